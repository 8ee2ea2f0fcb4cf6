//! HTTP wire types shared by the node facade and the dispatcher client.
//! Every node exposes the same surface, so the dispatcher reuses these when
//! talking to peers.

use serde::{Deserialize, Serialize};

use crate::chunk::OutputChunk;
use crate::session::{Part, SessionSummary};

/// Literal prefix that marks a chat message as an urgent preemption request.
/// A busy node receiving it cancels its current session instead of replying
/// 503.
pub const URGENT_INTERRUPT_PREFIX: &str = "[URGENT_INTERRUPT] ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl ChatRequest {
    pub fn is_urgent(&self) -> bool {
        self.message.starts_with(URGENT_INTERRUPT_PREFIX)
    }
}

/// One line of the ndjson chat stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkLine {
    pub chunk: OutputChunk,
}

/// 503 body returned when the node's busy lock is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyResponse {
    pub status: String,
    pub current_task: String,
    pub running_time_seconds: u64,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            status: "success".into(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
        }
    }
}

/// Leader-initiated kill of a specific peer's session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopWorkerRequest {
    pub worker_port: u16,
    pub worker_session_id: String,
    pub app_name: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub app_name: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

/// One event projected into a UI-facing message block: plain text turns
/// collapse to `text`, mixed turns keep their tagged parts under `blocks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBlock {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Part>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageBlock>,
}
