//! Output-chunk protocol: the tagged stream a session runtime emits while a
//! turn executes. The HTTP facade serializes each chunk as one ndjson line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmEventKind {
    Init,
    Chunk,
    Finish,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputChunk {
    Text {
        content: String,
    },
    Thought {
        content: String,
    },
    ToolCall {
        tool_name: String,
        args: Value,
    },
    ToolResult {
        tool_name: String,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clean: Option<bool>,
    },
    /// Nested progress from a dispatched sub-task, merged inline into the
    /// parent stream so the UI can render worker activity.
    SwarmEvent {
        sub_type: SwarmEventKind,
        worker_port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_preview: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OutputChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn thought(content: impl Into<String>) -> Self {
        Self::Thought {
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_wire_shape_matches_protocol() {
        let chunk = OutputChunk::ToolCall {
            tool_name: "skill_load".into(),
            args: serde_json::json!({"skill_id": "web-search"}),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["tool_name"], "skill_load");

        let event = OutputChunk::SwarmEvent {
            sub_type: SwarmEventKind::Init,
            worker_port: 8001,
            task_preview: Some("search the web".into()),
            content: None,
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "swarm_event");
        assert_eq!(json["sub_type"], "init");
        assert_eq!(json["worker_port"], 8001);
        assert!(json.get("content").is_none());
    }

    #[test]
    fn clean_flag_is_omitted_when_unset() {
        let chunk = OutputChunk::ToolResult {
            tool_name: "dispatch_task".into(),
            content: serde_json::json!("done"),
            clean: None,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert!(json.get("clean").is_none());
    }
}
