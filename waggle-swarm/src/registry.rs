//! Shared node registry: one SQLite table of `(port, url, status, last_seen)`
//! that every node on the host reads for peer discovery. Eventually
//! consistent by design; unreachable peers are pruned lazily by whichever
//! dispatcher observes the failure.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use waggle_core::error::{InfraError, SwarmError};
use waggle_core::node::NodeIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerNode {
    pub port: u16,
    pub url: String,
}

#[derive(Clone)]
pub struct NodeRegistry {
    pool: SqlitePool,
}

impl NodeRegistry {
    /// Open (or create) the shared registry database. Statements run with a
    /// short busy timeout; lock contention between nodes is expected and
    /// non-fatal.
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
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| db_err(e.to_string()))?;

        let registry = Self { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    pub async fn in_memory() -> Result<Self, SwarmError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| db_err(e.to_string()))?;
        let registry = Self { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    async fn migrate(&self) -> Result<(), SwarmError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                port INTEGER PRIMARY KEY,
                url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                last_seen REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(e.to_string()))?;
        Ok(())
    }

    /// Self-register this node. Idempotent: re-registering the same port
    /// replaces the existing row.
    pub async fn register(&self, node: &NodeIdentity) -> Result<(), SwarmError> {
        sqlx::query(
            "INSERT OR REPLACE INTO nodes (port, url, status, last_seen) VALUES (?, ?, 'active', ?)",
        )
        .bind(node.port as i64)
        .bind(&node.base_url)
        .bind(now_epoch())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(e.to_string()))?;
        tracing::info!(port = node.port, url = %node.base_url, "node registered in swarm");
        Ok(())
    }

    /// Remove a node row. Used both for graceful self-deregistration and for
    /// pruning peers observed dead; deleting an absent row is a no-op.
    pub async fn remove(&self, port: u16) -> Result<(), SwarmError> {
        sqlx::query("DELETE FROM nodes WHERE port = ?")
            .bind(port as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e.to_string()))?;
        Ok(())
    }

    /// Active peers, excluding the given node itself.
    pub async fn active_peers(&self, self_port: u16) -> Result<Vec<PeerNode>, SwarmError> {
        let rows = sqlx::query("SELECT port, url FROM nodes WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| PeerNode {
                port: row.get::<i64, _>("port") as u16,
                url: row.get::<String, _>("url"),
            })
            .filter(|peer| peer.port != self_port)
            .collect())
    }

    /// Resolve one node's URL regardless of who asks.
    pub async fn lookup(&self, port: u16) -> Result<Option<String>, SwarmError> {
        let row = sqlx::query("SELECT url FROM nodes WHERE port = ?")
            .bind(port as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e.to_string()))?;
        Ok(row.map(|r| r.get::<String, _>("url")))
    }

    /// All registered ports, sorted. Test and debugging helper.
    pub async fn ports(&self) -> Result<Vec<u16>, SwarmError> {
        let rows = sqlx::query("SELECT port FROM nodes ORDER BY port")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<i64, _>("port") as u16)
            .collect())
    }
}

fn db_err(message: String) -> SwarmError {
    SwarmError::Infra(InfraError::Database(message))
}

fn now_epoch() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_is_idempotent() {
        let registry = NodeRegistry::in_memory().await.unwrap();
        let node = NodeIdentity::new(8000);
        registry.register(&node).await.unwrap();
        registry.register(&node).await.unwrap();
        assert_eq!(registry.ports().await.unwrap(), vec![8000]);
    }

    #[tokio::test]
    async fn active_peers_excludes_self() {
        let registry = NodeRegistry::in_memory().await.unwrap();
        for port in [8000, 8001, 8002] {
            registry.register(&NodeIdentity::new(port)).await.unwrap();
        }

        let peers = registry.active_peers(8000).await.unwrap();
        let ports: Vec<u16> = peers.iter().map(|p| p.port).collect();
        assert!(!ports.contains(&8000));
        assert_eq!(peers.len(), 2);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = NodeRegistry::in_memory().await.unwrap();
        registry.register(&NodeIdentity::new(8001)).await.unwrap();
        registry.remove(8001).await.unwrap();
        registry.remove(8001).await.unwrap();
        assert!(registry.ports().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lookup_resolves_urls() {
        let registry = NodeRegistry::in_memory().await.unwrap();
        registry.register(&NodeIdentity::new(8001)).await.unwrap();
        assert_eq!(
            registry.lookup(8001).await.unwrap().as_deref(),
            Some("http://127.0.0.1:8001")
        );
        assert!(registry.lookup(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_creates_a_shared_file_store() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("swarm_registry.db");

        let writer = NodeRegistry::open(&path).await.unwrap();
        writer.register(&NodeIdentity::new(8000)).await.unwrap();

        let reader = NodeRegistry::open(&path).await.unwrap();
        assert_eq!(reader.ports().await.unwrap(), vec![8000]);
    }
}
