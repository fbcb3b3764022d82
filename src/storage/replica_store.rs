// src/storage/replica_store.rs
//! Replica heartbeat rows.
//!
//! `last_heartbeat_time` is the instant the row stops being live, not the
//! instant it was written.

use crate::storage::{is_constraint_violation, storage_error, Database};
use crate::utils::errors::Result;
use rusqlite::params;
use tracing::debug;

/// One replica's liveness claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaHeartbeat {
    pub pod_id: String,

    /// Epoch millis until which the replica counts as live
    pub last_heartbeat_time: i64,
}

impl ReplicaHeartbeat {
    pub fn is_live(&self, now: i64) -> bool {
        now <= self.last_heartbeat_time
    }
}

/// Result of a heartbeat write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    Inserted,

    /// The row appeared between our update and insert
    Conflict,
}

#[derive(Debug, Clone)]
pub struct ReplicaStore {
    db: Database,
}

impl ReplicaStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Refresh this replica's row, inserting it if missing
    pub async fn upsert(&self, pod_id: &str, valid_until: i64) -> Result<UpsertOutcome> {
        let conn = self.db.connection().await;
        let table = &self.db.tables().replicas;

        let updated = conn
            .execute(
                &format!("UPDATE {} SET last_heartbeat_time = ?1 WHERE pod_id = ?2", table),
                params![valid_until, pod_id],
            )
            .map_err(storage_error("Heartbeat update failed"))?;

        if updated > 0 {
            return Ok(UpsertOutcome::Updated);
        }

        match conn.execute(
            &format!(
                "INSERT INTO {} (pod_id, last_heartbeat_time) VALUES (?1, ?2)",
                table
            ),
            params![pod_id, valid_until],
        ) {
            Ok(_) => Ok(UpsertOutcome::Inserted),
            Err(e) if is_constraint_violation(&e) => {
                debug!("Heartbeat row for {} inserted concurrently", pod_id);
                Ok(UpsertOutcome::Conflict)
            }
            Err(e) => Err(storage_error("Heartbeat insert failed")(e)),
        }
    }

    /// All rows ordered by `pod_id` (byte order, identical on every replica)
    pub async fn list_ordered(&self) -> Result<Vec<ReplicaHeartbeat>> {
        let conn = self.db.connection().await;
        let sql = format!(
            "SELECT pod_id, last_heartbeat_time FROM {} ORDER BY pod_id",
            self.db.tables().replicas
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(storage_error("Query preparation failed"))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ReplicaHeartbeat {
                    pod_id: row.get(0)?,
                    last_heartbeat_time: row.get(1)?,
                })
            })
            .map_err(storage_error("Query execution failed"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_error("Result collection failed"))?;

        Ok(rows)
    }

    /// Delete a row only if it still carries the heartbeat we observed
    pub async fn delete_if_unchanged(&self, pod_id: &str, last_heartbeat_time: i64) -> Result<bool> {
        let conn = self.db.connection().await;
        let sql = format!(
            "DELETE FROM {} WHERE pod_id = ?1 AND last_heartbeat_time = ?2",
            self.db.tables().replicas
        );

        let deleted = conn
            .execute(&sql, params![pod_id, last_heartbeat_time])
            .map_err(storage_error("Replica delete failed"))?;
        Ok(deleted > 0)
    }

    /// Remove a replica's row unconditionally (graceful shutdown)
    pub async fn delete(&self, pod_id: &str) -> Result<bool> {
        let conn = self.db.connection().await;
        let sql = format!("DELETE FROM {} WHERE pod_id = ?1", self.db.tables().replicas);

        let deleted = conn
            .execute(&sql, params![pod_id])
            .map_err(storage_error("Replica delete failed"))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> ReplicaStore {
        ReplicaStore::new(Database::open_in_memory("").await.unwrap())
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let store = store().await;

        assert_eq!(store.upsert("pod-a", 100).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert("pod-a", 200).await.unwrap(), UpsertOutcome::Updated);

        let rows = store.list_ordered().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_heartbeat_time, 200);
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_pod_id() {
        let store = store().await;
        for pod in ["pod-c", "pod-a", "pod-b"] {
            store.upsert(pod, 100).await.unwrap();
        }

        let pods: Vec<_> = store
            .list_ordered()
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.pod_id)
            .collect();
        assert_eq!(pods, vec!["pod-a", "pod-b", "pod-c"]);
    }

    #[tokio::test]
    async fn test_delete_if_unchanged() {
        let store = store().await;
        store.upsert("pod-a", 100).await.unwrap();

        // refreshed since we observed 100
        store.upsert("pod-a", 150).await.unwrap();
        assert!(!store.delete_if_unchanged("pod-a", 100).await.unwrap());
        assert!(store.delete_if_unchanged("pod-a", 150).await.unwrap());
        assert!(store.list_ordered().await.unwrap().is_empty());
    }

    #[test]
    fn test_liveness_is_inclusive() {
        let row = ReplicaHeartbeat {
            pod_id: "pod-a".to_string(),
            last_heartbeat_time: 100,
        };
        assert!(row.is_live(100));
        assert!(!row.is_live(101));
    }
}
