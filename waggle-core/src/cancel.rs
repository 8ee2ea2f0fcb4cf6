//! Cooperative cancellation: a single-slot mailbox per session plus the pure
//! guard function consulted before every model call and every tool call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{AgentError, SwarmError};
use crate::session::SessionKey;

/// Single-slot signal mailbox. Posting twice is the same as posting once;
/// taking drains the slot.
#[derive(Debug, Clone, Default)]
pub struct CancelChannel {
    signalled: Arc<AtomicBool>,
}

impl CancelChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking send of the CANCEL signal.
    pub fn post(&self) {
        self.signalled.store(true, Ordering::SeqCst);
    }

    /// Non-blocking receive; drains the slot.
    pub fn take(&self) -> bool {
        self.signalled.swap(false, Ordering::SeqCst)
    }

    pub fn is_signalled(&self) -> bool {
        self.signalled.load(Ordering::SeqCst)
    }
}

/// Guard consulted at every suspension boundary. Raises the distinguished
/// cancellation condition when a signal is pending; the runtime catches it
/// and finalizes the turn.
pub fn guard(cancel: &CancelChannel, session: &SessionKey) -> Result<(), SwarmError> {
    if cancel.take() {
        tracing::info!(session = %session, "cancellation signal observed");
        return Err(AgentError::Cancelled {
            session: session.clone(),
        }
        .into());
    }
    Ok(())
}

/// Process-wide map of session key to cancellation channel. Channels are
/// created on demand and shared between the HTTP endpoints (writers) and the
/// session runtime (reader).
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<RwLock<HashMap<SessionKey, CancelChannel>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn channel(&self, key: &SessionKey) -> CancelChannel {
        let mut map = self.inner.write().await;
        map.entry(key.clone()).or_default().clone()
    }

    pub async fn get(&self, key: &SessionKey) -> Option<CancelChannel> {
        let map = self.inner.read().await;
        map.get(key).cloned()
    }
}
