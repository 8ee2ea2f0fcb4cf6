//! Node identity. Each process serves one port; the port doubles as the
//! node's name in the swarm registry.

/// Environment variable the daemon exports so tools running inside the
/// process (the dispatcher in particular) can identify their own node and
/// exclude it from peer candidate sets.
pub const NODE_PORT_ENV: &str = "WAGGLE_NODE_PORT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub port: u16,
    pub base_url: String,
}

impl NodeIdentity {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            base_url: format!("http://127.0.0.1:{port}"),
        }
    }

    /// Export this node's port into the process environment.
    pub fn export_env(&self) {
        std::env::set_var(NODE_PORT_ENV, self.port.to_string());
    }

    /// User identity this node presents when dispatching sub-tasks to peers.
    pub fn caller_id(&self) -> String {
        format!("agent_node_{}", self.port)
    }
}
