//! Shared types for the waggle swarm orchestrator.
//!
//! Every node in the swarm is both leader and worker; this crate holds the
//! vocabulary they agree on: session keys and event logs, the output-chunk
//! protocol streamed back to callers, the tool abstraction, the cancellation
//! channel, and the HTTP wire types.

pub mod cancel;
pub mod chunk;
pub mod config;
pub mod error;
pub mod node;
pub mod session;
pub mod tool;
pub mod wire;
