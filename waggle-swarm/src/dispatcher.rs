//! The swarm dispatcher: a model-callable tool that delegates a sub-task to
//! a peer node over its `/api/chat` endpoint, streams the worker's progress
//! upward as `swarm_event` chunks, and projects only text chunks into the
//! report the leader's model sees (process masking).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::Value;

use waggle_core::chunk::{OutputChunk, SwarmEventKind};
use waggle_core::error::{DispatchError, SwarmError};
use waggle_core::node::NodeIdentity;
use waggle_core::tool::{SessionTool, ToolContext, ToolSpec};
use waggle_core::wire::{BusyResponse, ChatRequest, ChunkLine, URGENT_INTERRUPT_PREFIX};

use crate::registry::{NodeRegistry, PeerNode};
use crate::CLUSTER_APP_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
}

impl Priority {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("urgent") => Self::Urgent,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub task_instruction: String,
    pub context_info: String,
    pub target_port: Option<u16>,
    pub sub_session_id: Option<String>,
    pub priority: Priority,
}

/// How one worker attempt failed.
enum WorkerFailure {
    /// 503 from the peer's busy lock.
    Busy(BusyResponse),
    /// Could not connect at all; the peer gets pruned from the registry.
    Unreachable(String),
    /// Reached the peer but the exchange failed; no pruning.
    Failed(String),
    /// The leader session was cancelled; abandon the stream. The signal is
    /// deliberately left in the channel for the runtime guard.
    LeaderCancelled,
}

pub struct SwarmDispatcher {
    registry: NodeRegistry,
    node: NodeIdentity,
    http: reqwest::Client,
    chat_timeout: Duration,
}

impl SwarmDispatcher {
    pub fn new(registry: NodeRegistry, node: NodeIdentity, chat_timeout: Duration) -> Self {
        Self {
            registry,
            node,
            http: reqwest::Client::new(),
            chat_timeout,
        }
    }

    /// Run one dispatch. Always resolves to a report string for the model;
    /// infrastructure failures are folded into it rather than raised.
    pub async fn dispatch(&self, req: DispatchRequest, ctx: &ToolContext) -> String {
        let peers = match self.registry.active_peers(self.node.port).await {
            Ok(peers) => peers,
            Err(e) => return format!("[Dispatch failed] Swarm registry unavailable: {e}"),
        };

        if peers.is_empty() {
            return format!(
                "[Swarm notice] No other active nodes found in the registry (this node, \
                 port {}, is the only survivor). Do not try to dispatch again: execute the \
                 task yourself with your local tools (skill_load, etc.). Remember that you \
                 are a fully capable agent too.",
                self.node.port
            );
        }

        let candidates = match req.target_port {
            Some(target) => match peers.iter().find(|p| p.port == target) {
                Some(peer) => vec![peer.clone()],
                None => {
                    return format!(
                        "[Error] The target worker (port {target}) is offline or not \
                         registered. Re-plan the task or call again without target_port."
                    )
                }
            },
            None => {
                let mut shuffled = peers.clone();
                shuffled.shuffle(&mut rand::thread_rng());
                shuffled
            }
        };

        let sub_session_id = req
            .sub_session_id
            .clone()
            .unwrap_or_else(|| format!("sub_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
        let message = self.build_worker_message(&req, &sub_session_id);
        let task_preview = preview(&req.task_instruction, 60);

        let payload = ChatRequest {
            message,
            app_name: CLUSTER_APP_NAME.to_string(),
            user_id: self.node.caller_id(),
            session_id: sub_session_id.clone(),
        };

        let mut last_error = String::from("no candidates attempted");

        for peer in &candidates {
            tracing::info!(
                worker = peer.port,
                session = %sub_session_id,
                "dispatching sub-task to worker"
            );
            ctx.emit(OutputChunk::SwarmEvent {
                sub_type: SwarmEventKind::Init,
                worker_port: peer.port,
                task_preview: Some(task_preview.clone()),
                content: None,
                error: None,
            })
            .await;

            match self.try_worker(peer, &payload, ctx).await {
                Ok(final_report) => {
                    ctx.emit(OutputChunk::SwarmEvent {
                        sub_type: SwarmEventKind::Finish,
                        worker_port: peer.port,
                        task_preview: None,
                        content: None,
                        error: None,
                    })
                    .await;
                    tracing::info!(worker = peer.port, "worker completed sub-task");
                    return format!(
                        "✅ [SWARM TASK COMPLETED]\n\
                         Worker: port={}, session={}\n\
                         {}\n\n\
                         [System hint] Cite this worker (port {}) when you report the result.",
                        peer.port, sub_session_id, final_report, peer.port
                    );
                }
                Err(WorkerFailure::Busy(busy)) => {
                    if req.target_port.is_some() {
                        return format!(
                            "[Dispatch conflict] The target worker (port {}) is busy.\n\
                             Current task: '{}' (running for {}s)\n\
                             Options: retry with priority='URGENT' to force an interrupt, \
                             call again without target_port to pick another worker, or wait \
                             and retry.",
                            peer.port, busy.current_task, busy.running_time_seconds
                        );
                    }
                    tracing::info!(worker = peer.port, "worker busy, trying next candidate");
                    last_error = DispatchError::PeerBusy {
                        port: peer.port,
                        task_preview: busy.current_task,
                    }
                    .to_string();
                }
                Err(WorkerFailure::Unreachable(reason)) => {
                    tracing::warn!(
                        worker = peer.port,
                        reason = %reason,
                        "worker unreachable, pruning from registry"
                    );
                    if let Err(e) = self.registry.remove(peer.port).await {
                        tracing::warn!(worker = peer.port, error = %e, "failed to prune dead node");
                    }
                    ctx.emit(OutputChunk::SwarmEvent {
                        sub_type: SwarmEventKind::Fail,
                        worker_port: peer.port,
                        task_preview: None,
                        content: None,
                        error: Some(reason.clone()),
                    })
                    .await;
                    last_error = DispatchError::PeerUnreachable {
                        port: peer.port,
                        reason,
                    }
                    .to_string();
                }
                Err(WorkerFailure::Failed(reason)) => {
                    tracing::warn!(worker = peer.port, reason = %reason, "worker attempt failed");
                    ctx.emit(OutputChunk::SwarmEvent {
                        sub_type: SwarmEventKind::Fail,
                        worker_port: peer.port,
                        task_preview: None,
                        content: None,
                        error: Some(reason.clone()),
                    })
                    .await;
                    last_error = reason;
                }
                Err(WorkerFailure::LeaderCancelled) => {
                    tracing::info!(worker = peer.port, "leader cancelled, abandoning dispatch");
                    return format!(
                        "[Dispatch aborted] The leader session was cancelled while waiting \
                         for worker {}. The worker may still be running session {}; use \
                         stop_worker to stop it if needed.",
                        peer.port, sub_session_id
                    );
                }
            }
        }

        format!(
            "[Dispatch failed] Could not hand the task to any worker.\n\
             All {} candidate(s) were busy or unreachable.\n\
             Last error: {}\n\
             Suggestion: execute the task yourself, or retry later.",
            candidates.len(),
            last_error
        )
    }

    /// POST the chat request to one peer and consume its ndjson stream.
    /// Only `text` chunks are projected into the returned report; everything
    /// else (tool calls, intermediate results) stays on the worker side.
    async fn try_worker(
        &self,
        peer: &PeerNode,
        payload: &ChatRequest,
        ctx: &ToolContext,
    ) -> Result<String, WorkerFailure> {
        let response = self
            .http
            .post(format!("{}/api/chat", peer.url))
            .timeout(self.chat_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    WorkerFailure::Unreachable(e.to_string())
                } else {
                    WorkerFailure::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 503 {
            let busy = response.json::<BusyResponse>().await.unwrap_or(BusyResponse {
                status: "busy".into(),
                current_task: "unknown".into(),
                running_time_seconds: 0,
                suggestion: String::new(),
            });
            return Err(WorkerFailure::Busy(busy));
        }
        if !status.is_success() {
            return Err(WorkerFailure::Failed(format!("HTTP {status}")));
        }

        let mut final_report = String::new();
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(next) = stream.next().await {
            // Abandon (not abort) on leader cancellation: dropping the
            // stream closes our side; the worker runs on until an explicit
            // stop_worker.
            if ctx.cancel.is_signalled() {
                return Err(WorkerFailure::LeaderCancelled);
            }
            let bytes = next.map_err(|e| WorkerFailure::Failed(format!("stream error: {e}")))?;
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line[..line.len() - 1]);
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<ChunkLine>(&line) else {
                    continue;
                };
                if let OutputChunk::Text { content } = parsed.chunk {
                    final_report.push_str(&content);
                    ctx.emit(OutputChunk::SwarmEvent {
                        sub_type: SwarmEventKind::Chunk,
                        worker_port: peer.port,
                        task_preview: None,
                        content: Some(content),
                        error: None,
                    })
                    .await;
                }
            }
        }

        Ok(final_report)
    }

    /// Prepend the strict reporting contract so workers keep their replies
    /// short and file-based; the leader's context must not absorb worker
    /// process output.
    fn build_worker_message(&self, req: &DispatchRequest, sub_session_id: &str) -> String {
        let mut message = format!(
            "[Context]\n{}\n\n[Task]\n{}\n\n[Reporting requirements]\n\
             1. You are a worker node in the swarm, assisting the leader (port {}).\n\
             2. Execute the task directly; do not narrate lengthy reasoning.\n\
             3. Store long artifacts under ./workspace/{}/ and report only paths and a \
             brief status. Never dump full code or long text in the reply.\n\
             4. On error, report the cause concisely.",
            req.context_info, req.task_instruction, self.node.port, sub_session_id
        );
        if req.priority == Priority::Urgent {
            message = format!("{URGENT_INTERRUPT_PREFIX}{message}");
        }
        message
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_chars).collect();
        format!("{kept}...")
    }
}

/// Tool-call arguments, as the model supplies them.
#[derive(Debug, Deserialize)]
struct DispatchArgs {
    task_instruction: String,
    #[serde(default)]
    context_info: String,
    #[serde(default)]
    target_port: Option<u16>,
    #[serde(default)]
    sub_session_id: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

/// `dispatch_task`: delegate one sub-task to a peer node.
pub struct DispatchTaskTool {
    dispatcher: std::sync::Arc<SwarmDispatcher>,
}

impl DispatchTaskTool {
    pub fn new(dispatcher: std::sync::Arc<SwarmDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl SessionTool for DispatchTaskTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "dispatch_task".into(),
            description: "Delegate a sub-task to another node in the swarm. Picks an idle \
                          peer at random unless target_port is given. Use sub_session_id \
                          from a previous dispatch to continue a multi-turn exchange with \
                          the same worker, and priority='URGENT' (with target_port) to \
                          interrupt a busy worker."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task_instruction": {
                        "type": "string",
                        "description": "Clear, self-contained instruction for the worker",
                    },
                    "context_info": {
                        "type": "string",
                        "description": "Background the worker needs (snippets, requirements)",
                    },
                    "target_port": {
                        "type": "integer",
                        "description": "Send to this specific worker; omit for automatic selection",
                    },
                    "sub_session_id": {
                        "type": "string",
                        "description": "Reuse a worker session from a previous dispatch",
                    },
                    "priority": {
                        "type": "string",
                        "enum": ["NORMAL", "URGENT"],
                        "description": "URGENT forces a busy targeted worker to drop its current task",
                    },
                },
                "required": ["task_instruction"],
            }),
        }
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, SwarmError> {
        let args: DispatchArgs =
            serde_json::from_value(args).map_err(|e| waggle_core::error::ToolError::InvalidArguments {
                tool_name: "dispatch_task".into(),
                message: e.to_string(),
            })?;

        let request = DispatchRequest {
            task_instruction: args.task_instruction,
            context_info: args.context_info,
            target_port: args.target_port,
            sub_session_id: args.sub_session_id,
            priority: Priority::parse(args.priority.as_deref()),
        };

        let report = self.dispatcher.dispatch(request, ctx).await;
        Ok(Value::String(report))
    }
}
