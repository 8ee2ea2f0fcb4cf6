//! Per-node busy lock: a try-acquire mutex with observable state. At most
//! one session runtime is active per node; concurrency across nodes is the
//! swarm's source of parallelism.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use waggle_core::session::SessionKey;

#[derive(Debug, Clone)]
struct BusyInfo {
    session: SessionKey,
    task_preview: String,
    started_at: Instant,
}

/// Observable view of the held lock, used to build 503 bodies and to find
/// the session to preempt.
#[derive(Debug, Clone)]
pub struct BusySnapshot {
    pub session: SessionKey,
    pub task_preview: String,
    pub running_time_seconds: u64,
}

#[derive(Clone, Default)]
pub struct BusyLock {
    inner: Arc<Mutex<Option<BusyInfo>>>,
}

impl BusyLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquire. Returns the RAII guard on success; the lock is
    /// released when the guard drops, on every exit path of the turn.
    pub fn try_acquire(&self, session: SessionKey, task_preview: String) -> Option<BusyGuard> {
        let mut slot = self.inner.lock().expect("busy lock poisoned");
        if slot.is_some() {
            return None;
        }
        *slot = Some(BusyInfo {
            session,
            task_preview,
            started_at: Instant::now(),
        });
        Some(BusyGuard {
            inner: self.inner.clone(),
        })
    }

    pub fn snapshot(&self) -> Option<BusySnapshot> {
        let slot = self.inner.lock().expect("busy lock poisoned");
        slot.as_ref().map(|info| BusySnapshot {
            session: info.session.clone(),
            task_preview: info.task_preview.clone(),
            running_time_seconds: info.started_at.elapsed().as_secs(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.lock().expect("busy lock poisoned").is_some()
    }
}

pub struct BusyGuard {
    inner: Arc<Mutex<Option<BusyInfo>>>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut slot = self.inner.lock().expect("busy lock poisoned");
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> SessionKey {
        SessionKey::new("app", "user", id)
    }

    #[test]
    fn second_acquire_fails_until_guard_drops() {
        let lock = BusyLock::new();
        let guard = lock
            .try_acquire(key("s1"), "first task".into())
            .expect("free lock");
        assert!(lock.try_acquire(key("s2"), "second task".into()).is_none());

        let snapshot = lock.snapshot().unwrap();
        assert_eq!(snapshot.session, key("s1"));
        assert_eq!(snapshot.task_preview, "first task");

        drop(guard);
        assert!(!lock.is_busy());
        assert!(lock.try_acquire(key("s2"), "second task".into()).is_some());
    }

    #[test]
    fn snapshot_is_none_when_idle() {
        let lock = BusyLock::new();
        assert!(lock.snapshot().is_none());
    }
}
