//! Test-only in-memory session store.

use std::collections::HashMap;

use tokio::sync::Mutex;

use waggle_core::error::SwarmError;
use waggle_core::session::{Event, Session, SessionKey, SessionStore, SessionSummary};

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, key: &SessionKey, events: Vec<Event>) {
        let now = chrono::Utc::now();
        self.sessions.lock().await.insert(
            key.clone(),
            Session {
                key: key.clone(),
                title: None,
                metadata: serde_json::json!({}),
                events,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub async fn events(&self, key: &SessionKey) -> Vec<Event> {
        self.sessions
            .lock()
            .await
            .get(key)
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    pub async fn title(&self, key: &SessionKey) -> Option<String> {
        self.sessions
            .lock()
            .await
            .get(key)
            .and_then(|s| s.title.clone())
    }
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    async fn get_or_create(&self, key: &SessionKey) -> Result<Session, SwarmError> {
        let mut sessions = self.sessions.lock().await;
        let now = chrono::Utc::now();
        Ok(sessions
            .entry(key.clone())
            .or_insert_with(|| Session {
                key: key.clone(),
                title: None,
                metadata: serde_json::json!({}),
                events: vec![],
                created_at: now,
                updated_at: now,
            })
            .clone())
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SwarmError> {
        Ok(self.sessions.lock().await.get(key).cloned())
    }

    async fn list(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, SwarmError> {
        Ok(self
            .sessions
            .lock()
            .await
            .values()
            .filter(|s| s.key.app_name == app_name && s.key.user_id == user_id)
            .map(|s| SessionSummary {
                session_id: s.key.session_id.clone(),
                title: s.title.clone(),
                message_count: s.events.len(),
                created_at: s.created_at,
                updated_at: s.updated_at,
            })
            .collect())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, SwarmError> {
        Ok(self.sessions.lock().await.remove(key).is_some())
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<(), SwarmError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(key).expect("session exists");
        session.events.push(event);
        session.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn replace_events(&self, key: &SessionKey, events: Vec<Event>) -> Result<(), SwarmError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(key).expect("session exists");
        session.events.clear();
        session.events.extend(events);
        session.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn set_title(&self, key: &SessionKey, title: &str) -> Result<(), SwarmError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(key) {
            session.title = Some(title.to_string());
        }
        Ok(())
    }

    async fn set_metadata(
        &self,
        key: &SessionKey,
        metadata: serde_json::Value,
    ) -> Result<(), SwarmError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(key) {
            session.metadata = metadata;
        }
        Ok(())
    }
}
