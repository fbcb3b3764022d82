// src/storage/mod.rs
//! SQL coordination tables
//!
//! All cross-replica state lives in two tables of one shared SQLite database:
//!
//! ```text
//! {prefix}cats_agent_locks                 {prefix}caching_replicas
//! ┌────────────┬──────────┬───────┬──────┐ ┌────────┬─────────────────────┐
//! │ agent_name │ owner_id │ acq'd │ exp. │ │ pod_id │ last_heartbeat_time │
//! │ (PK)       │          │  ms   │  ms  │ │ (PK)   │ ms, "valid until"   │
//! └────────────┴──────────┴───────┴──────┘ └────────┴─────────────────────┘
//! ```
//!
//! Mutual exclusion rests entirely on the `agent_name` primary key: a second
//! insert of the same name fails with a constraint violation, which the
//! [`LockStore`] reports as [`InsertOutcome::AlreadyHeld`].

pub mod lock_store;
pub mod replica_store;

pub use lock_store::{AgentLock, InsertOutcome, LockStore};
pub use replica_store::{ReplicaHeartbeat, ReplicaStore, UpsertOutcome};

use crate::utils::config::{validate_table_prefix, DatabaseConfig};
use crate::utils::errors::{CoordinatorError, Result};
use rusqlite::{Connection, ErrorCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Physical names of the coordination tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub agent_locks: String,
    pub replicas: String,
}

impl TableNames {
    pub fn with_prefix(prefix: &str) -> Result<Self> {
        validate_table_prefix(prefix)?;
        Ok(Self {
            agent_locks: format!("{}cats_agent_locks", prefix),
            replicas: format!("{}caching_replicas", prefix),
        })
    }
}

/// Shared handle to the coordination database
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    tables: Arc<TableNames>,
}

impl Database {
    /// Open (or create) the database file and bootstrap the schema
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                CoordinatorError::StorageFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let conn = Connection::open(&config.path).map_err(storage_error("Failed to open database"))?;

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(storage_error("Failed to set busy timeout"))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(storage_error("Failed to set journal mode"))?;
        debug!("SQLite journal mode: {}", journal_mode);

        let db = Self::from_connection(conn, &config.table_prefix).await?;
        info!("Coordination database opened at {:?}", config.path);
        Ok(db)
    }

    /// Private in-memory database (tests and single-process simulations)
    pub async fn open_in_memory(table_prefix: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_error("Failed to open database"))?;
        Self::from_connection(conn, table_prefix).await
    }

    async fn from_connection(conn: Connection, table_prefix: &str) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            tables: Arc::new(TableNames::with_prefix(table_prefix)?),
        };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {locks} (
                agent_name TEXT NOT NULL PRIMARY KEY,
                owner_id TEXT NOT NULL,
                lock_acquired INTEGER NOT NULL,
                lock_expiry INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {replicas} (
                pod_id TEXT NOT NULL PRIMARY KEY,
                last_heartbeat_time INTEGER NOT NULL
            );
            "#,
            locks = self.tables.agent_locks,
            replicas = self.tables.replicas,
        ))
        .map_err(storage_error("Schema creation failed"))?;

        Ok(())
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub(crate) async fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

pub(crate) fn storage_error(context: &'static str) -> impl FnOnce(rusqlite::Error) -> CoordinatorError {
    move |e| CoordinatorError::StorageFailed(format!("{}: {}", context, e))
}

/// Unique/primary-key violations are lost races, not failures
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_table_names_with_prefix() {
        let names = TableNames::with_prefix("tenant1_").unwrap();
        assert_eq!(names.agent_locks, "tenant1_cats_agent_locks");
        assert_eq!(names.replicas, "tenant1_caching_replicas");

        assert!(TableNames::with_prefix("Tenant-1").is_err());
    }

    #[tokio::test]
    async fn test_open_in_memory_creates_schema() {
        let db = Database::open_in_memory("").await.unwrap();
        let conn = db.connection().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2)",
                rusqlite::params![db.tables().agent_locks, db.tables().replicas],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_open_file_is_idempotent() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("coord.db"),
            ..Default::default()
        };

        Database::open(&config).await.unwrap();
        assert!(Database::open(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_constraint_violation_detection() {
        let db = Database::open_in_memory("").await.unwrap();
        let conn = db.connection().await;
        let sql = format!(
            "INSERT INTO {} (pod_id, last_heartbeat_time) VALUES ('a', 1)",
            db.tables().replicas
        );
        conn.execute(&sql, []).unwrap();
        let err = conn.execute(&sql, []).unwrap_err();
        assert!(is_constraint_violation(&err));
        assert!(!is_constraint_violation(&rusqlite::Error::QueryReturnedNoRows));
    }
}
