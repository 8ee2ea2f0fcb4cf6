//! Shared application state for the HTTP facade.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use waggle_agent::runtime::SessionRuntime;
use waggle_core::cancel::CancelRegistry;
use waggle_core::node::NodeIdentity;
use waggle_core::session::{SessionKey, SessionStore};
use waggle_core::tool::{SessionTool, ToolSet};
use waggle_swarm::NodeRegistry;

use crate::busy::BusyLock;

/// Factory producing the core tools every new session starts with. The
/// first binding is always `skill_load`.
pub type CoreToolFactory = Arc<dyn Fn() -> Vec<Arc<dyn SessionTool>> + Send + Sync>;

/// Tool bindings live for the lifetime of a session: each session owns a
/// fresh mutable tool set, created on first use and kept across turns.
#[derive(Clone, Default)]
pub struct SessionToolSets {
    inner: Arc<RwLock<HashMap<SessionKey, ToolSet>>>,
}

impl SessionToolSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn for_session(&self, key: &SessionKey, core: &CoreToolFactory) -> ToolSet {
        let mut map = self.inner.write().await;
        map.entry(key.clone())
            .or_insert_with(|| ToolSet::new(core()))
            .clone()
    }

    pub async fn forget(&self, key: &SessionKey) {
        self.inner.write().await.remove(key);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub node: NodeIdentity,
    pub runtime: Arc<SessionRuntime>,
    pub store: Arc<dyn SessionStore>,
    /// Absent when the swarm registry could not be opened at startup; the
    /// node then runs standalone.
    pub registry: Option<NodeRegistry>,
    pub busy: BusyLock,
    pub cancels: CancelRegistry,
    pub tool_sets: SessionToolSets,
    pub core_tools: CoreToolFactory,
    pub http: reqwest::Client,
}
