//! HTTP surface of a node. Every node exposes the same endpoints; the swarm
//! dispatcher on peer nodes speaks to these too.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use waggle_core::session::{Part, SessionKey};
use waggle_core::wire::{
    BusyResponse, CancelRequest, ChatRequest, ChunkLine, CreateSessionRequest,
    CreateSessionResponse, HistoryResponse, MessageBlock, SessionListResponse, StatusResponse,
    StopWorkerRequest,
};

use crate::busy::BusyGuard;
use crate::state::AppState;

/// How long an urgent request polls for the busy lock after posting CANCEL.
const PREEMPT_WAIT: Duration = Duration::from_secs(2);
const PREEMPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/cancel", post(cancel_handler))
        .route("/api/stop_worker", post(stop_worker_handler))
        .route(
            "/api/sessions",
            post(create_session_handler).get(list_sessions_handler),
        )
        .route("/api/sessions/{id}/history", get(history_handler))
        .route("/api/sessions/{id}", axum::routing::delete(delete_session_handler))
        .with_state(state)
}

/// POST /api/chat — execute one user turn, streaming ndjson chunks.
async fn chat_handler(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let key = SessionKey::new(&req.app_name, &req.user_id, &req.session_id);
    let task_preview = preview(&req.message, 50);

    let guard = match state.busy.try_acquire(key.clone(), task_preview.clone()) {
        Some(guard) => guard,
        None if req.is_urgent() => match preempt(&state, &key, &task_preview).await {
            Some(guard) => guard,
            None => return busy_response(&state),
        },
        None => return busy_response(&state),
    };

    let cancel = state.cancels.channel(&key).await;
    // A stale signal from before this turn must not kill it.
    cancel.take();

    let tools = state.tool_sets.for_session(&key, &state.core_tools).await;
    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let runtime = state.runtime.clone();
    let message = req.message.clone();

    tokio::spawn(async move {
        // The guard lives for the whole turn; dropping it on any exit path
        // releases the busy lock.
        let _guard: BusyGuard = guard;
        let _ = runtime.run_turn(&key, &message, &tools, &cancel, &tx).await;
    });

    let body_stream = ReceiverStream::new(rx).map(|chunk| {
        let line = serde_json::to_string(&ChunkLine { chunk }).unwrap_or_default();
        Ok::<_, Infallible>(format!("{line}\n"))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        axum::body::Body::from_stream(body_stream),
    )
        .into_response()
}

/// Urgent preemption: post CANCEL to whichever session holds the lock, then
/// poll briefly for the release.
async fn preempt(state: &AppState, key: &SessionKey, task_preview: &str) -> Option<BusyGuard> {
    if let Some(held) = state.busy.snapshot() {
        info!(
            preempting = %held.session,
            incoming = %key,
            "urgent preemption requested, cancelling current session"
        );
        state.cancels.channel(&held.session).await.post();
    }

    let deadline = tokio::time::Instant::now() + PREEMPT_WAIT;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(PREEMPT_POLL_INTERVAL).await;
        if let Some(guard) = state
            .busy
            .try_acquire(key.clone(), task_preview.to_string())
        {
            return Some(guard);
        }
    }
    warn!(session = %key, "urgent preemption timed out waiting for the busy lock");
    None
}

fn busy_response(state: &AppState) -> Response {
    let snapshot = state.busy.snapshot();
    let (current_task, running) = snapshot
        .map(|s| (s.task_preview, s.running_time_seconds))
        .unwrap_or_else(|| ("unknown".into(), 0));
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(BusyResponse {
            status: "busy".into(),
            current_task,
            running_time_seconds: running,
            suggestion: "This node is processing another session. Retry later, pick another \
                         node, or resend with the [URGENT_INTERRUPT] prefix to preempt."
                .into(),
        }),
    )
        .into_response()
}

/// POST /api/cancel — signal cancellation to a session.
async fn cancel_handler(
    State(state): State<AppState>,
    Json(req): Json<CancelRequest>,
) -> Json<StatusResponse> {
    let key = SessionKey::new(&req.app_name, &req.user_id, &req.session_id);
    state.cancels.channel(&key).await.post();
    info!(session = %key, "cancel signal posted");
    Json(StatusResponse::success())
}

/// POST /api/stop_worker — relay a cancel to a specific peer's session.
async fn stop_worker_handler(
    State(state): State<AppState>,
    Json(req): Json<StopWorkerRequest>,
) -> Json<StatusResponse> {
    let url = match &state.registry {
        Some(registry) => match registry.lookup(req.worker_port).await {
            Ok(Some(url)) => url,
            Ok(None) => format!("http://127.0.0.1:{}", req.worker_port),
            Err(e) => return Json(StatusResponse::error(format!("registry unavailable: {e}"))),
        },
        None => format!("http://127.0.0.1:{}", req.worker_port),
    };

    let cancel = CancelRequest {
        app_name: req.app_name,
        user_id: req.user_id,
        session_id: req.worker_session_id,
    };

    match state
        .http
        .post(format!("{url}/api/cancel"))
        .timeout(Duration::from_secs(10))
        .json(&cancel)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            info!(worker = req.worker_port, "stop relayed to worker");
            Json(StatusResponse::success())
        }
        Ok(response) => Json(StatusResponse::error(format!(
            "worker replied HTTP {}",
            response.status()
        ))),
        Err(e) => Json(StatusResponse::error(format!("worker unreachable: {e}"))),
    }
}

/// POST /api/sessions — create an empty session with a server-generated id.
async fn create_session_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let session_id = SessionKey::generate_id(&req.user_id);
    let key = SessionKey::new(&req.app_name, &req.user_id, &session_id);
    match state.store.get_or_create(&key).await {
        Ok(session) => Json(CreateSessionResponse {
            session_id,
            title: session.title,
        })
        .into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct SessionScope {
    app_name: String,
    user_id: String,
}

/// GET /api/sessions?app_name=&user_id= — list sessions.
async fn list_sessions_handler(
    State(state): State<AppState>,
    Query(scope): Query<SessionScope>,
) -> Response {
    match state.store.list(&scope.app_name, &scope.user_id).await {
        Ok(sessions) => Json(SessionListResponse { sessions }).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/sessions/{id}/history — event log projected to message blocks.
async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(scope): Query<SessionScope>,
) -> Response {
    let key = SessionKey::new(&scope.app_name, &scope.user_id, &session_id);
    match state.store.get(&key).await {
        Ok(Some(session)) => {
            let messages = session
                .events
                .iter()
                .map(|event| {
                    let all_text = event
                        .content
                        .parts
                        .iter()
                        .all(|p| matches!(p, Part::Text { .. }));
                    if all_text {
                        MessageBlock {
                            role: event.content.role.clone(),
                            text: Some(event.text()),
                            blocks: None,
                        }
                    } else {
                        MessageBlock {
                            role: event.content.role.clone(),
                            text: None,
                            blocks: Some(event.content.parts.clone()),
                        }
                    }
                })
                .collect();
            Json(HistoryResponse { messages }).into_response()
        }
        Ok(None) => not_found(),
        Err(e) => internal_error(e),
    }
}

/// DELETE /api/sessions/{id}?app_name=&user_id=
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(scope): Query<SessionScope>,
) -> Response {
    let key = SessionKey::new(&scope.app_name, &scope.user_id, &session_id);
    match state.store.delete(&key).await {
        Ok(true) => {
            state.tool_sets.forget(&key).await;
            info!(session = %key, "session deleted");
            Json(StatusResponse::success()).into_response()
        }
        Ok(false) => not_found(),
        Err(e) => internal_error(e),
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(StatusResponse::error("session not found")),
    )
        .into_response()
}

fn internal_error(e: waggle_core::error::SwarmError) -> Response {
    warn!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(StatusResponse::error(e.to_string())),
    )
        .into_response()
}

fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = text
        .strip_prefix(waggle_core::wire::URGENT_INTERRUPT_PREFIX)
        .unwrap_or(text);
    let first_line = trimmed.lines().next().unwrap_or("");
    let count = first_line.chars().count();
    if count <= max_chars {
        first_line.to_string()
    } else {
        let kept: String = first_line.chars().take(max_chars).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use waggle_agent::compaction::Compactor;
    use waggle_agent::llm::{LlmClient, MockLlmClient, ModelResponse};
    use waggle_agent::runtime::SessionRuntime;
    use waggle_core::cancel::CancelRegistry;
    use waggle_core::chunk::OutputChunk;
    use waggle_core::config::RuntimeLimits;
    use waggle_core::error::SwarmError;
    use waggle_core::node::NodeIdentity;
    use waggle_core::tool::{SessionTool, ToolContext, ToolSpec};
    use waggle_core::wire::URGENT_INTERRUPT_PREFIX;
    use waggle_swarm::NodeRegistry;

    use crate::busy::BusyLock;
    use crate::state::{AppState, SessionToolSets};
    use crate::store::SqliteSessionStore;

    /// A tool that parks for a while; used to hold the busy lock so the
    /// cancellation and preemption paths can be driven.
    struct SlowTool;

    #[async_trait]
    impl SessionTool for SlowTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "slow".into(),
                description: "sleeps briefly".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, SwarmError> {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Ok(json!("slept"))
        }
    }

    async fn test_state(llm: Arc<dyn LlmClient>) -> AppState {
        let store = Arc::new(SqliteSessionStore::in_memory().await.unwrap());
        let limits = RuntimeLimits::default();
        let summarizer = Arc::new(MockLlmClient::new(vec![ModelResponse::text_only("summary")]));
        let runtime = Arc::new(SessionRuntime::new(
            store.clone(),
            llm,
            Compactor::new(summarizer, limits),
            "test agent".into(),
            limits,
        ));
        AppState {
            node: NodeIdentity::new(8000),
            runtime,
            store,
            registry: None,
            busy: BusyLock::new(),
            cancels: CancelRegistry::new(),
            tool_sets: SessionToolSets::new(),
            core_tools: Arc::new(|| vec![Arc::new(SlowTool) as Arc<dyn SessionTool>]),
            http: reqwest::Client::new(),
        }
    }

    async fn serve(state: AppState) -> String {
        let app = router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{port}")
    }

    fn chat_body(session: &str, message: &str) -> Value {
        json!({
            "message": message,
            "app_name": "a",
            "user_id": "u",
            "session_id": session,
        })
    }

    async fn read_chunks(response: reqwest::Response) -> Vec<OutputChunk> {
        let body = response.text().await.unwrap();
        body.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str::<ChunkLine>(l).unwrap().chunk)
            .collect()
    }

    #[tokio::test]
    async fn basic_turn_streams_and_persists() {
        let state = test_state(Arc::new(MockLlmClient::new(vec![ModelResponse::text_only(
            "hello back",
        )])))
        .await;
        let base = serve(state.clone()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/api/chat"))
            .json(&chat_body("s1", "hello"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-ndjson"
        );

        let chunks = read_chunks(response).await;
        assert!(chunks
            .iter()
            .any(|c| matches!(c, OutputChunk::Text { content } if content.contains("hello back"))));

        // Busy lock released after the stream closes.
        assert!(!state.busy.is_busy());

        // Side effect: user + model events in history.
        let history: HistoryResponse = client
            .get(format!(
                "{base}/api/sessions/s1/history?app_name=a&user_id=u"
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[0].text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn busy_node_returns_503_with_task_info() {
        let state = test_state(Arc::new(MockLlmClient::new(vec![]))).await;
        let base = serve(state.clone()).await;

        let _held = state
            .busy
            .try_acquire(SessionKey::new("a", "u", "s1"), "long analysis".into())
            .unwrap();

        let response = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&chat_body("s2", "new task"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);

        let busy: BusyResponse = response.json().await.unwrap();
        assert_eq!(busy.status, "busy");
        assert_eq!(busy.current_task, "long analysis");
        assert!(busy.suggestion.contains("URGENT_INTERRUPT"));
    }

    #[tokio::test]
    async fn urgent_request_preempts_the_running_session() {
        // s1's turn: call the slow tool, then (never reached after cancel)
        // produce text. s2's turn: plain text.
        let state = test_state(Arc::new(MockLlmClient::new(vec![
            ModelResponse::tool_call("slow", json!({})),
            ModelResponse::text_only("s2 handled"),
        ])))
        .await;
        let base = serve(state.clone()).await;
        let client = reqwest::Client::new();

        let s1 = {
            let client = client.clone();
            let base = base.clone();
            tokio::spawn(async move {
                let response = client
                    .post(format!("{base}/api/chat"))
                    .json(&chat_body("s1", "long running job"))
                    .send()
                    .await
                    .unwrap();
                read_chunks(response).await
            })
        };

        // Let s1 enter the slow tool, then preempt it.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(state.busy.is_busy());

        let response = client
            .post(format!("{base}/api/chat"))
            .json(&chat_body(
                "s2",
                &format!("{URGENT_INTERRUPT_PREFIX}take over now"),
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let s2_chunks = read_chunks(response).await;
        assert!(s2_chunks
            .iter()
            .any(|c| matches!(c, OutputChunk::Text { content } if content.contains("s2 handled"))));

        let s1_chunks = s1.await.unwrap();
        assert!(s1_chunks
            .iter()
            .any(|c| matches!(c, OutputChunk::Text { content } if content.contains("[Stopped]"))));

        // s1's history ends with the cancellation notice.
        let history: HistoryResponse = client
            .get(format!(
                "{base}/api/sessions/s1/history?app_name=a&user_id=u"
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let last = history.messages.last().unwrap();
        assert!(last.text.as_deref().unwrap_or("").contains("interrupted"));
    }

    #[tokio::test]
    async fn cancel_endpoint_posts_the_signal() {
        let state = test_state(Arc::new(MockLlmClient::new(vec![]))).await;
        let base = serve(state.clone()).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/api/cancel"))
            .json(&json!({"app_name": "a", "user_id": "u", "session_id": "s1"}))
            .send()
            .await
            .unwrap();
        let status: StatusResponse = response.json().await.unwrap();
        assert_eq!(status.status, "success");

        let channel = state
            .cancels
            .channel(&SessionKey::new("a", "u", "s1"))
            .await;
        assert!(channel.is_signalled());
    }

    #[tokio::test]
    async fn session_crud_lifecycle() {
        let state = test_state(Arc::new(MockLlmClient::new(vec![]))).await;
        let base = serve(state).await;
        let client = reqwest::Client::new();

        // Create.
        let created: CreateSessionResponse = client
            .post(format!("{base}/api/sessions"))
            .json(&json!({"app_name": "a", "user_id": "u"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(created.session_id.starts_with("u_"));
        assert!(created.title.is_none());

        // List includes it.
        let list: SessionListResponse = client
            .get(format!("{base}/api/sessions?app_name=a&user_id=u"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.sessions.len(), 1);
        assert_eq!(list.sessions[0].session_id, created.session_id);
        assert_eq!(list.sessions[0].message_count, 0);

        // Delete, then everything 404s.
        let response = client
            .delete(format!(
                "{base}/api/sessions/{}?app_name=a&user_id=u",
                created.session_id
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = client
            .get(format!(
                "{base}/api/sessions/{}/history?app_name=a&user_id=u",
                created.session_id
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        let response = client
            .delete(format!(
                "{base}/api/sessions/{}?app_name=a&user_id=u",
                created.session_id
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        let list: SessionListResponse = client
            .get(format!("{base}/api/sessions?app_name=a&user_id=u"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(list.sessions.is_empty());
    }

    #[tokio::test]
    async fn stop_worker_relays_cancel_to_the_peer() {
        // The "peer" is just another instance of the same router.
        let peer_state = test_state(Arc::new(MockLlmClient::new(vec![]))).await;
        let peer_base = serve(peer_state.clone()).await;
        let peer_port: u16 = peer_base.rsplit(':').next().unwrap().parse().unwrap();

        let registry = NodeRegistry::in_memory().await.unwrap();
        registry
            .register(&NodeIdentity::new(peer_port))
            .await
            .unwrap();
        // The registry's canonical URL for the peer matches the bound port.
        let mut leader_state = test_state(Arc::new(MockLlmClient::new(vec![]))).await;
        leader_state.registry = Some(registry);
        let leader_base = serve(leader_state).await;

        let response = reqwest::Client::new()
            .post(format!("{leader_base}/api/stop_worker"))
            .json(&json!({
                "worker_port": peer_port,
                "worker_session_id": "sub_abc",
                "app_name": "waggle_swarm",
                "user_id": "agent_node_8000",
            }))
            .send()
            .await
            .unwrap();
        let status: StatusResponse = response.json().await.unwrap();
        assert_eq!(status.status, "success", "error: {:?}", status.error);

        let channel = peer_state
            .cancels
            .channel(&SessionKey::new("waggle_swarm", "agent_node_8000", "sub_abc"))
            .await;
        assert!(channel.is_signalled());
    }
}
