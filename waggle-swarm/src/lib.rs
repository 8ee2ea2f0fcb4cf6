//! Swarm cooperation: the shared peer registry and the dispatch tools that
//! let a node's model delegate sub-tasks to other nodes.

mod batch;
mod dispatcher;
mod registry;

pub use batch::DispatchBatchTool;
pub use dispatcher::{DispatchRequest, DispatchTaskTool, Priority, SwarmDispatcher};
pub use registry::{NodeRegistry, PeerNode};

/// App name under which dispatched sub-sessions run on worker nodes.
pub const CLUSTER_APP_NAME: &str = "waggle_swarm";
