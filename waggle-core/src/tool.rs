//! Tool abstraction: specs the model sees, the invocation trait, and the
//! per-session mutable tool set.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::cancel::CancelChannel;
use crate::chunk::OutputChunk;
use crate::error::SwarmError;
use crate::session::SessionKey;

/// What the model is told about a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Context handed to every tool invocation: the owning session, a handle for
/// mutating the session's tool set (skill_load), the cancellation channel for
/// tools that block, and the chunk sender for tools that stream nested
/// progress (the swarm dispatcher).
#[derive(Clone)]
pub struct ToolContext {
    pub session: SessionKey,
    pub tools: ToolSet,
    pub cancel: CancelChannel,
    pub chunks: mpsc::Sender<OutputChunk>,
}

impl ToolContext {
    /// Emit a chunk upward into the parent output stream. Dropped receivers
    /// are ignored: a disconnected caller must not fail the tool.
    pub async fn emit(&self, chunk: OutputChunk) {
        let _ = self.chunks.send(chunk).await;
    }
}

/// A callable bound into a session. Implementations are shared (`Arc`) and
/// must not hold per-invocation state.
#[async_trait]
pub trait SessionTool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, SwarmError>;
}

/// Ordered, name-deduplicated set of tools owned by one session. The first
/// binding is always the `skill_load` meta-tool; activation appends more.
#[derive(Clone)]
pub struct ToolSet {
    inner: Arc<Mutex<Vec<Arc<dyn SessionTool>>>>,
}

impl ToolSet {
    pub fn new(core_tools: Vec<Arc<dyn SessionTool>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(core_tools)),
        }
    }

    /// Append tools not already bound (by name). Returns the names actually
    /// added, in insertion order.
    pub fn extend_dedup(&self, tools: Vec<Arc<dyn SessionTool>>) -> Vec<String> {
        let mut bound = self.inner.lock().expect("tool set lock");
        let existing: Vec<String> = bound.iter().map(|t| t.spec().name).collect();
        let mut added = Vec::new();
        for tool in tools {
            let name = tool.spec().name;
            if existing.contains(&name) || added.contains(&name) {
                continue;
            }
            bound.push(tool);
            added.push(name);
        }
        added
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SessionTool>> {
        let bound = self.inner.lock().expect("tool set lock");
        bound.iter().find(|t| t.spec().name == name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let bound = self.inner.lock().expect("tool set lock");
        bound.iter().map(|t| t.spec()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.specs().into_iter().map(|s| s.name).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("tool set lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedTool(&'static str);

    #[async_trait]
    impl SessionTool for NamedTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.0.to_string(),
                description: String::new(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, SwarmError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn extend_dedup_skips_existing_names() {
        let set = ToolSet::new(vec![Arc::new(NamedTool("skill_load"))]);
        let added = set.extend_dedup(vec![
            Arc::new(NamedTool("dispatch_task")),
            Arc::new(NamedTool("skill_load")),
            Arc::new(NamedTool("dispatch_task")),
        ]);
        assert_eq!(added, vec!["dispatch_task".to_string()]);
        assert_eq!(set.names(), vec!["skill_load", "dispatch_task"]);
    }

    #[test]
    fn get_finds_by_name() {
        let set = ToolSet::new(vec![Arc::new(NamedTool("skill_load"))]);
        assert!(set.get("skill_load").is_some());
        assert!(set.get("missing").is_none());
    }
}
