//! SQLite-backed session store. One database file per node, named by port;
//! sessions keep their title/metadata in a JSON state column and their event
//! log in a per-session append table.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use waggle_core::error::{AgentError, InfraError, SwarmError};
use waggle_core::session::{
    Author, Content, Event, Session, SessionKey, SessionStore, SessionSummary,
};

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub async fn open(path: &Path) -> Result<Self, SwarmError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SwarmError::Infra(InfraError::Io(e)))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| db_err(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| db_err(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, SwarmError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| db_err(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), SwarmError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_key TEXT PRIMARY KEY,
                app_name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                session_key TEXT NOT NULL,
                seq INTEGER NOT NULL,
                author TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_key, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(e.to_string()))?;

        Ok(())
    }

    async fn load_state(&self, key_str: &str) -> Result<Option<SessionRow>, SwarmError> {
        let row = sqlx::query(
            "SELECT state, created_at, updated_at FROM sessions WHERE session_key = ?",
        )
        .bind(key_str)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: serde_json::Value = serde_json::from_str(&row.get::<String, _>("state"))
            .map_err(|e| db_err(format!("corrupt session state: {e}")))?;
        Ok(Some(SessionRow {
            title: state
                .get("title")
                .and_then(|t| t.as_str())
                .map(str::to_string),
            metadata: state
                .get("metadata")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
        }))
    }

    async fn update_state(
        &self,
        key: &SessionKey,
        mutate: impl FnOnce(&mut serde_json::Value),
    ) -> Result<(), SwarmError> {
        let key_str = key_str(key);
        let row = sqlx::query("SELECT state FROM sessions WHERE session_key = ?")
            .bind(&key_str)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e.to_string()))?
            .ok_or_else(|| missing(key))?;

        let mut state: serde_json::Value = serde_json::from_str(&row.get::<String, _>("state"))
            .map_err(|e| db_err(format!("corrupt session state: {e}")))?;
        mutate(&mut state);

        sqlx::query("UPDATE sessions SET state = ?, updated_at = ? WHERE session_key = ?")
            .bind(state.to_string())
            .bind(now())
            .bind(&key_str)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e.to_string()))?;
        Ok(())
    }

    async fn load_events(&self, key_str: &str) -> Result<Vec<Event>, SwarmError> {
        let rows =
            sqlx::query("SELECT author, content, created_at FROM events WHERE session_key = ? ORDER BY seq")
                .bind(key_str)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err(e.to_string()))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let content: Content = serde_json::from_str(&row.get::<String, _>("content"))
                .map_err(|e| db_err(format!("corrupt event content: {e}")))?;
            events.push(Event {
                author: parse_author(&row.get::<String, _>("author"))?,
                content,
                created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            });
        }
        Ok(events)
    }
}

struct SessionRow {
    title: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_or_create(&self, key: &SessionKey) -> Result<Session, SwarmError> {
        if let Some(session) = self.get(key).await? {
            return Ok(session);
        }

        let ts = now();
        sqlx::query(
            "INSERT OR IGNORE INTO sessions \
             (session_key, app_name, user_id, session_id, state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key_str(key))
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(serde_json::json!({"title": null, "metadata": {}}).to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(e.to_string()))?;

        tracing::info!(session = %key, "session created");
        self.get(key)
            .await?
            .ok_or_else(|| db_err("session vanished after create".into()))
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SwarmError> {
        let key_str = key_str(key);
        let Some(row) = self.load_state(&key_str).await? else {
            return Ok(None);
        };
        let events = self.load_events(&key_str).await?;
        Ok(Some(Session {
            key: key.clone(),
            title: row.title,
            metadata: row.metadata,
            events,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    async fn list(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, SwarmError> {
        let rows = sqlx::query(
            "SELECT s.session_id, s.state, s.created_at, s.updated_at, \
             (SELECT COUNT(*) FROM events e WHERE e.session_key = s.session_key) AS message_count \
             FROM sessions s WHERE s.app_name = ? AND s.user_id = ? ORDER BY s.updated_at DESC",
        )
        .bind(app_name)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(e.to_string()))?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let state: serde_json::Value = serde_json::from_str(&row.get::<String, _>("state"))
                .map_err(|e| db_err(format!("corrupt session state: {e}")))?;
            summaries.push(SessionSummary {
                session_id: row.get::<String, _>("session_id"),
                title: state
                    .get("title")
                    .and_then(|t| t.as_str())
                    .map(str::to_string),
                message_count: row.get::<i64, _>("message_count") as usize,
                created_at: parse_ts(&row.get::<String, _>("created_at"))?,
                updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
            });
        }
        Ok(summaries)
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, SwarmError> {
        let key_str = key_str(key);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err(e.to_string()))?;
        sqlx::query("DELETE FROM events WHERE session_key = ?")
            .bind(&key_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(e.to_string()))?;
        let result = sqlx::query("DELETE FROM sessions WHERE session_key = ?")
            .bind(&key_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(e.to_string()))?;
        tx.commit().await.map_err(|e| db_err(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<(), SwarmError> {
        let key_str = key_str(key);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err(e.to_string()))?;

        let exists = sqlx::query("SELECT 1 AS present FROM sessions WHERE session_key = ?")
            .bind(&key_str)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_err(e.to_string()))?
            .is_some();
        if !exists {
            return Err(missing(key));
        }

        let next_seq: i64 = sqlx::query(
            "SELECT COALESCE(MAX(seq) + 1, 0) AS next_seq FROM events WHERE session_key = ?",
        )
        .bind(&key_str)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_err(e.to_string()))?
        .get("next_seq");

        sqlx::query(
            "INSERT INTO events (session_key, seq, author, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&key_str)
        .bind(next_seq)
        .bind(event.author.to_string())
        .bind(serde_json::to_string(&event.content).map_err(|e| db_err(e.to_string()))?)
        .bind(event.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err(e.to_string()))?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE session_key = ?")
            .bind(now())
            .bind(&key_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(e.to_string()))?;

        tx.commit().await.map_err(|e| db_err(e.to_string()))
    }

    async fn replace_events(
        &self,
        key: &SessionKey,
        events: Vec<Event>,
    ) -> Result<(), SwarmError> {
        let key_str = key_str(key);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err(e.to_string()))?;

        sqlx::query("DELETE FROM events WHERE session_key = ?")
            .bind(&key_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(e.to_string()))?;

        for (seq, event) in events.iter().enumerate() {
            sqlx::query(
                "INSERT INTO events (session_key, seq, author, content, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&key_str)
            .bind(seq as i64)
            .bind(event.author.to_string())
            .bind(serde_json::to_string(&event.content).map_err(|e| db_err(e.to_string()))?)
            .bind(event.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(e.to_string()))?;
        }

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE session_key = ?")
            .bind(now())
            .bind(&key_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(e.to_string()))?;

        tx.commit().await.map_err(|e| db_err(e.to_string()))
    }

    async fn set_title(&self, key: &SessionKey, title: &str) -> Result<(), SwarmError> {
        let title = title.to_string();
        self.update_state(key, move |state| {
            state["title"] = serde_json::Value::String(title);
        })
        .await
    }

    async fn set_metadata(
        &self,
        key: &SessionKey,
        metadata: serde_json::Value,
    ) -> Result<(), SwarmError> {
        self.update_state(key, move |state| {
            state["metadata"] = metadata;
        })
        .await
    }
}

/// Composite key column value. The unit separator keeps user-supplied ids
/// from colliding with each other's delimiters.
fn key_str(key: &SessionKey) -> String {
    format!(
        "{}\u{1f}{}\u{1f}{}",
        key.app_name, key.user_id, key.session_id
    )
}

fn parse_author(value: &str) -> Result<Author, SwarmError> {
    match value {
        "user" => Ok(Author::User),
        "model" => Ok(Author::Model),
        "system" => Ok(Author::System),
        other => Err(db_err(format!("unknown event author '{other}'"))),
    }
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, SwarmError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| db_err(format!("bad timestamp '{value}': {e}")))
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn db_err(message: String) -> SwarmError {
    SwarmError::Infra(InfraError::Database(message))
}

fn missing(key: &SessionKey) -> SwarmError {
    SwarmError::Agent(AgentError::SessionNotFound {
        session: key.clone(),
    })
}
