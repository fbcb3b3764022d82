// src/storage/lock_store.rs
//! Lock rows: insert-if-absent, conditional update, conditional delete.

use crate::storage::{is_constraint_violation, storage_error, Database};
use crate::utils::errors::Result;
use rusqlite::params;
use tracing::debug;

/// One currently-held agent lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLock {
    pub agent_name: String,

    /// Replica that inserted the row (informational)
    pub owner_id: String,

    /// Epoch millis
    pub lock_acquired: i64,

    /// Epoch millis; the row is reclaimable once `now > lock_expiry`
    pub lock_expiry: i64,
}

impl AgentLock {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.lock_expiry
    }
}

/// Result of an insert attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,

    /// A row for this agent already exists (another replica won)
    AlreadyHeld,
}

/// Thin wrapper over the lock table
#[derive(Debug, Clone)]
pub struct LockStore {
    db: Database,
}

impl LockStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a lock row; a primary-key conflict is reported, not raised
    pub async fn insert(&self, lock: &AgentLock) -> Result<InsertOutcome> {
        let conn = self.db.connection().await;
        let sql = format!(
            "INSERT INTO {} (agent_name, owner_id, lock_acquired, lock_expiry) VALUES (?1, ?2, ?3, ?4)",
            self.db.tables().agent_locks
        );

        match conn.execute(
            &sql,
            params![lock.agent_name, lock.owner_id, lock.lock_acquired, lock.lock_expiry],
        ) {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_constraint_violation(&e) => {
                debug!("Lock for {} already held", lock.agent_name);
                Ok(InsertOutcome::AlreadyHeld)
            }
            Err(e) => Err(storage_error("Lock insert failed")(e)),
        }
    }

    /// Move a lock's expiry; false if the row no longer exists
    pub async fn extend(&self, agent_name: &str, lock_expiry: i64) -> Result<bool> {
        let conn = self.db.connection().await;
        let sql = format!(
            "UPDATE {} SET lock_expiry = ?1 WHERE agent_name = ?2",
            self.db.tables().agent_locks
        );

        let updated = conn
            .execute(&sql, params![lock_expiry, agent_name])
            .map_err(storage_error("Lock update failed"))?;
        Ok(updated > 0)
    }

    /// Delete a lock row; false if there was nothing to delete
    pub async fn delete(&self, agent_name: &str) -> Result<bool> {
        let conn = self.db.connection().await;
        let sql = format!(
            "DELETE FROM {} WHERE agent_name = ?1",
            self.db.tables().agent_locks
        );

        let deleted = conn
            .execute(&sql, params![agent_name])
            .map_err(storage_error("Lock delete failed"))?;
        Ok(deleted > 0)
    }

    /// Delete a lock row only if its expiry is still the one we observed.
    ///
    /// Returns false when another replica already deleted or re-acquired it.
    pub async fn delete_if_expiry(&self, agent_name: &str, lock_expiry: i64) -> Result<bool> {
        let conn = self.db.connection().await;
        let sql = format!(
            "DELETE FROM {} WHERE agent_name = ?1 AND lock_expiry = ?2",
            self.db.tables().agent_locks
        );

        let deleted = conn
            .execute(&sql, params![agent_name, lock_expiry])
            .map_err(storage_error("Conditional lock delete failed"))?;
        Ok(deleted > 0)
    }

    /// Delete a lock row only if `owner_id` inserted it
    pub async fn delete_if_owner(&self, agent_name: &str, owner_id: &str) -> Result<bool> {
        let conn = self.db.connection().await;
        let sql = format!(
            "DELETE FROM {} WHERE agent_name = ?1 AND owner_id = ?2",
            self.db.tables().agent_locks
        );

        let deleted = conn
            .execute(&sql, params![agent_name, owner_id])
            .map_err(storage_error("Owner lock delete failed"))?;
        Ok(deleted > 0)
    }

    pub async fn get(&self, agent_name: &str) -> Result<Option<AgentLock>> {
        let conn = self.db.connection().await;
        let sql = format!(
            "SELECT agent_name, owner_id, lock_acquired, lock_expiry FROM {} WHERE agent_name = ?1",
            self.db.tables().agent_locks
        );

        match conn.query_row(&sql, params![agent_name], row_to_lock) {
            Ok(lock) => Ok(Some(lock)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage_error("Lock lookup failed")(e)),
        }
    }

    /// All lock rows, expired or not
    pub async fn list(&self) -> Result<Vec<AgentLock>> {
        let conn = self.db.connection().await;
        let sql = format!(
            "SELECT agent_name, owner_id, lock_acquired, lock_expiry FROM {} ORDER BY agent_name",
            self.db.tables().agent_locks
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(storage_error("Query preparation failed"))?;

        let locks = stmt
            .query_map([], row_to_lock)
            .map_err(storage_error("Query execution failed"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_error("Result collection failed"))?;

        Ok(locks)
    }
}

fn row_to_lock(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentLock> {
    Ok(AgentLock {
        agent_name: row.get(0)?,
        owner_id: row.get(1)?,
        lock_acquired: row.get(2)?,
        lock_expiry: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(agent: &str, owner: &str, expiry: i64) -> AgentLock {
        AgentLock {
            agent_name: agent.to_string(),
            owner_id: owner.to_string(),
            lock_acquired: 0,
            lock_expiry: expiry,
        }
    }

    async fn store() -> LockStore {
        LockStore::new(Database::open_in_memory("").await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_then_conflict() {
        let store = store().await;

        let first = store.insert(&lock("aws/agent", "pod-a", 100)).await.unwrap();
        assert_eq!(first, InsertOutcome::Inserted);

        let second = store.insert(&lock("aws/agent", "pod-b", 200)).await.unwrap();
        assert_eq!(second, InsertOutcome::AlreadyHeld);

        let held = store.get("aws/agent").await.unwrap().unwrap();
        assert_eq!(held.owner_id, "pod-a");
        assert_eq!(held.lock_expiry, 100);
    }

    #[tokio::test]
    async fn test_extend_and_delete() {
        let store = store().await;
        store.insert(&lock("aws/agent", "pod-a", 100)).await.unwrap();

        assert!(store.extend("aws/agent", 5_000).await.unwrap());
        assert_eq!(store.get("aws/agent").await.unwrap().unwrap().lock_expiry, 5_000);

        assert!(store.delete("aws/agent").await.unwrap());
        assert!(!store.delete("aws/agent").await.unwrap());
        assert!(!store.extend("aws/agent", 6_000).await.unwrap());
        assert!(store.get("aws/agent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_if_expiry_is_conditional() {
        let store = store().await;
        store.insert(&lock("aws/agent", "pod-a", 100)).await.unwrap();

        // row was refreshed after we read it
        store.extend("aws/agent", 900).await.unwrap();
        assert!(!store.delete_if_expiry("aws/agent", 100).await.unwrap());
        assert!(store.delete_if_expiry("aws/agent", 900).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_if_owner_leaves_other_owners_alone() {
        let store = store().await;
        store.insert(&lock("aws/agent", "pod-b", 100)).await.unwrap();

        assert!(!store.delete_if_owner("aws/agent", "pod-a").await.unwrap());
        assert!(store.get("aws/agent").await.unwrap().is_some());
        assert!(store.delete_if_owner("aws/agent", "pod-b").await.unwrap());
        assert!(store.get("aws/agent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_expiry() {
        let store = store().await;
        store.insert(&lock("b", "pod-a", 100)).await.unwrap();
        store.insert(&lock("a", "pod-b", 300)).await.unwrap();

        let locks = store.list().await.unwrap();
        assert_eq!(locks.len(), 2);
        assert_eq!(locks[0].agent_name, "a");

        assert!(locks[1].is_expired(101));
        assert!(!locks[1].is_expired(100));
    }
}
