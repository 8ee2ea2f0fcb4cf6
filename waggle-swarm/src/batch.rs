//! `dispatch_batch_tasks`: fan N independent sub-tasks out to the swarm in
//! parallel and join the reports.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use waggle_core::error::{SwarmError, ToolError};
use waggle_core::tool::{SessionTool, ToolContext, ToolSpec};

use crate::dispatcher::{DispatchRequest, Priority, SwarmDispatcher};

/// Per-task delimiter the web UI parses to render result cards. This is a
/// stable wire format; the byte sequence must not change.
fn task_delimiter(n: usize) -> String {
    format!("--- 任务 {n} 结果 ---")
}

#[derive(Debug, Deserialize)]
struct BatchArgs {
    tasks: Vec<String>,
    #[serde(default)]
    common_context: String,
    #[serde(default)]
    priority: Option<String>,
}

pub struct DispatchBatchTool {
    dispatcher: Arc<SwarmDispatcher>,
}

impl DispatchBatchTool {
    pub fn new(dispatcher: Arc<SwarmDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl SessionTool for DispatchBatchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "dispatch_batch_tasks".into(),
            description: "Dispatch several independent sub-tasks to the swarm at once and \
                          wait for all of them. Each task goes to an automatically chosen \
                          worker in a fresh sub-session. Use for fan-out work such as \
                          multi-angle searches or batch file generation. Completion order \
                          of the children is not guaranteed."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Independent task instructions, one per worker",
                    },
                    "common_context": {
                        "type": "string",
                        "description": "Background shared by every task",
                    },
                    "priority": {
                        "type": "string",
                        "enum": ["NORMAL", "URGENT"],
                    },
                },
                "required": ["tasks"],
            }),
        }
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, SwarmError> {
        let args: BatchArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
                tool_name: "dispatch_batch_tasks".into(),
                message: e.to_string(),
            })?;

        if args.tasks.is_empty() {
            return Ok(Value::String(
                "[Swarm notice] The task list is empty; nothing was dispatched.".into(),
            ));
        }

        tracing::info!(task_count = args.tasks.len(), "starting batch dispatch");
        let priority = Priority::parse(args.priority.as_deref());

        let runs = args.tasks.iter().enumerate().map(|(index, task)| {
            let request = DispatchRequest {
                task_instruction: format!("[Batch-Task-{}] {}", index + 1, task),
                context_info: args.common_context.clone(),
                target_port: None,
                sub_session_id: None,
                priority,
            };
            let dispatcher = self.dispatcher.clone();
            let ctx = ctx.clone();
            async move {
                let report = dispatcher.dispatch(request, &ctx).await;
                format!("{}\n{}\n", task_delimiter(index + 1), report)
            }
        });

        let results = futures::future::join_all(runs).await;

        let report = format!(
            "[Batch report] Executed {} parallel task(s).\n{}",
            args.tasks.len(),
            results.join("\n")
        );
        tracing::info!(task_count = args.tasks.len(), "batch dispatch complete");
        Ok(Value::String(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRegistry;
    use axum::routing::post;
    use axum::Json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use waggle_core::cancel::CancelChannel;
    use waggle_core::chunk::OutputChunk;
    use waggle_core::node::NodeIdentity;
    use waggle_core::session::SessionKey;
    use waggle_core::tool::ToolSet;
    use waggle_core::wire::{ChatRequest, ChunkLine};

    fn test_ctx() -> ToolContext {
        let (tx, _rx) = mpsc::channel(256);
        ToolContext {
            session: SessionKey::new("app", "user", "leader"),
            tools: ToolSet::new(vec![]),
            cancel: CancelChannel::new(),
            chunks: tx,
        }
    }

    async fn spawn_echo_worker(registry: &NodeRegistry) {
        let app = axum::Router::new().route(
            "/api/chat",
            post(|Json(req): Json<ChatRequest>| async move {
                // Echo the batch marker back so the joined report shows
                // which task this worker served.
                let marker = req
                    .message
                    .lines()
                    .find(|l| l.contains("[Batch-Task-"))
                    .unwrap_or("")
                    .to_string();
                format!(
                    "{}\n",
                    serde_json::to_string(&ChunkLine {
                        chunk: OutputChunk::text(format!("handled {marker}")),
                    })
                    .unwrap()
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        registry.register(&NodeIdentity::new(port)).await.unwrap();
    }

    #[tokio::test]
    async fn empty_task_list_is_a_noop() {
        let registry = NodeRegistry::in_memory().await.unwrap();
        let dispatcher = Arc::new(SwarmDispatcher::new(
            registry,
            NodeIdentity::new(8000),
            Duration::from_secs(5),
        ));
        let tool = DispatchBatchTool::new(dispatcher);

        let result = tool
            .invoke(serde_json::json!({"tasks": []}), &test_ctx())
            .await
            .unwrap();
        assert!(result.as_str().unwrap().contains("nothing was dispatched"));
    }

    #[tokio::test]
    async fn batch_report_uses_the_stable_delimiters() {
        let registry = NodeRegistry::in_memory().await.unwrap();
        spawn_echo_worker(&registry).await;
        spawn_echo_worker(&registry).await;

        let dispatcher = Arc::new(SwarmDispatcher::new(
            registry,
            NodeIdentity::new(8000),
            Duration::from_secs(5),
        ));
        let tool = DispatchBatchTool::new(dispatcher);

        let result = tool
            .invoke(
                serde_json::json!({
                    "tasks": ["search apples", "search oranges", "search pears"],
                    "common_context": "fruit market research",
                }),
                &test_ctx(),
            )
            .await
            .unwrap();
        let report = result.as_str().unwrap();

        // Byte-exact delimiters, one per task, in order.
        let d1 = report.find("--- 任务 1 结果 ---").unwrap();
        let d2 = report.find("--- 任务 2 结果 ---").unwrap();
        let d3 = report.find("--- 任务 3 结果 ---").unwrap();
        assert!(d1 < d2 && d2 < d3);

        assert!(report.contains("Executed 3 parallel task(s)"));
        assert!(report.contains("handled"));
    }
}
