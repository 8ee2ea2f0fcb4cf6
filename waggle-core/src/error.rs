use crate::session::SessionKey;

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("infra error: {0}")]
    Infra(#[from] InfraError),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("max iterations exceeded for session {session}: {iterations} iterations")]
    MaxIterationsExceeded { session: SessionKey, iterations: u32 },

    #[error("cancelled by user for session {session}")]
    Cancelled { session: SessionKey },

    #[error("compaction failed: {reason}")]
    CompactionFailed { reason: String },

    #[error("session not found: {session}")]
    SessionNotFound { session: SessionKey },
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("context window exceeded: {reason}")]
    ContextWindowExceeded { reason: String },

    #[error("provider unavailable: {reason}")]
    ProviderUnavailable { reason: String },

    #[error("invalid LLM response: {reason}")]
    InvalidResponse { reason: String },
}

#[derive(Debug, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum ToolError {
    #[error("tool not found: {tool_name}")]
    NotFound { tool_name: String },

    #[error("tool {tool_name} execution failed: {message}")]
    ExecutionFailed { tool_name: String, message: String },

    #[error("invalid arguments for tool {tool_name}: {message}")]
    InvalidArguments { tool_name: String, message: String },
}

/// Dispatch failures are reported to the model as structured tool results,
/// never raised through the runtime; this enum only standardizes their
/// wording.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("peer on port {port} is busy with '{task_preview}'")]
    PeerBusy { port: u16, task_preview: String },

    #[error("peer on port {port} unreachable: {reason}")]
    PeerUnreachable { port: u16, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl SwarmError {
    /// True when this error is the cooperative cancellation signal raised by
    /// the guard; the runtime finalizes the turn instead of failing it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SwarmError::Agent(AgentError::Cancelled { .. }))
    }

    /// True when the model provider rejected the request for context size;
    /// triggers reactive compaction.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, SwarmError::Llm(LlmError::ContextWindowExceeded { .. }))
    }
}
