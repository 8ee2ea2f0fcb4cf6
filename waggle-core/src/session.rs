//! Session and event-log types plus the `SessionStore` trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SwarmError;

/// Triple that uniquely identifies one conversation across the swarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Generate a fresh session id, prefixed with the user identity so ids
    /// cannot collide across users.
    pub fn generate_id(user_id: &str) -> String {
        format!("{}_{}", user_id, uuid::Uuid::new_v4().simple())
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Model,
    System,
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Model => write!(f, "model"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One piece of an event's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Thought {
        text: String,
    },
    FunctionCall {
        tool_name: String,
        args: Value,
    },
    FunctionResponse {
        tool_name: String,
        result: Value,
    },
}

impl Part {
    /// Text payload of this part, if it carries one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } | Part::Thought { text } => Some(text),
            _ => None,
        }
    }
}

/// Role-tagged content of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

/// One turn record in a session's append-log. Events are never mutated after
/// append; compaction replaces the whole list through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub author: Author,
    pub content: Content,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            author: Author::User,
            content: Content {
                role: "user".into(),
                parts: vec![Part::Text { text: text.into() }],
            },
            created_at: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            author: Author::System,
            content: Content {
                role: "system".into(),
                parts: vec![Part::Text { text: text.into() }],
            },
            created_at: Utc::now(),
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::model(vec![Part::Text { text: text.into() }])
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            author: Author::Model,
            content: Content {
                role: "model".into(),
                parts,
            },
            created_at: Utc::now(),
        }
    }

    pub fn function_call(tool_name: impl Into<String>, args: Value) -> Self {
        Self::model(vec![Part::FunctionCall {
            tool_name: tool_name.into(),
            args,
        }])
    }

    pub fn function_response(tool_name: impl Into<String>, result: Value) -> Self {
        Self {
            author: Author::User,
            content: Content {
                role: "user".into(),
                parts: vec![Part::FunctionResponse {
                    tool_name: tool_name.into(),
                    result,
                }],
            },
            created_at: Utc::now(),
        }
    }

    /// Concatenated text of all text-bearing parts.
    pub fn text(&self) -> String {
        self.content
            .parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Full session state: key, auto-derived title, free-form metadata carried
/// across turns, and the ordered event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub title: Option<String>,
    pub metadata: Value,
    pub events: Vec<Event>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lightweight listing row; events are not materialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence behind sessions. Callers receive materialized copies; all
/// mutation goes through this API so the authoritative event list is only
/// ever replaced in place (`replace_events`), never by swapping a reference.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_or_create(&self, key: &SessionKey) -> Result<Session, SwarmError>;

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SwarmError>;

    async fn list(&self, app_name: &str, user_id: &str)
        -> Result<Vec<SessionSummary>, SwarmError>;

    /// Returns true when a session existed and was removed.
    async fn delete(&self, key: &SessionKey) -> Result<bool, SwarmError>;

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<(), SwarmError>;

    /// Atomically replace the whole event list of a session. This is the
    /// compaction primitive: the stored log shrinks to `events` in one
    /// transaction.
    async fn replace_events(&self, key: &SessionKey, events: Vec<Event>)
        -> Result<(), SwarmError>;

    async fn set_title(&self, key: &SessionKey, title: &str) -> Result<(), SwarmError>;

    async fn set_metadata(&self, key: &SessionKey, metadata: Value) -> Result<(), SwarmError>;
}
