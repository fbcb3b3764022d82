// src/cluster/lock_manager.rs
//! Per-agent exclusive locks with TTL
//!
//! Lifecycle of one lock row:
//!
//! ```text
//! try_acquire_single ──insert──▶ held (expiry = now + timeout)
//!                                  │
//!            release_lock ─────────┤ next run < threshold away: delete
//!                                  │ otherwise: expiry = next run time
//!                                  │
//!            sweep (any replica) ──┘ expiry passed: conditional delete
//! ```
//!
//! Every write degrades to "lost the race, try again next tick": an insert
//! conflict or a conditional delete that touches nothing is never an error.

use crate::observability::metrics;
use crate::storage::{AgentLock, Database, InsertOutcome, LockStore};
use crate::utils::clock::{duration_millis, Clock};
use crate::utils::config::DynamicSchedulerConfig;
use crate::utils::errors::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// What `release_lock` did to the row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Next run is imminent, row removed
    Deleted,

    /// Row kept, expiry moved to the next run time
    Extended,

    /// No row to release (swept or released already)
    NotHeld,

    /// The statement failed; the row will expire on its own
    Failed,
}

/// Outcome of one expiry sweep over the lock table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSweep {
    /// Agents with an unexpired row, held by any replica
    pub held: HashSet<String>,

    /// Expired rows this replica deleted
    pub reclaimed: Vec<String>,

    /// Expired rows whose delete did not go through
    pub contended: HashSet<String>,
}

impl LockSweep {
    /// Whether an agent must be skipped this tick
    pub fn excludes(&self, agent_name: &str) -> bool {
        self.held.contains(agent_name) || self.contended.contains(agent_name)
    }
}

/// Acquires, releases and reclaims agent locks for one replica
#[derive(Debug)]
pub struct LockManager {
    store: LockStore,
    owner_id: String,
    clock: Arc<dyn Clock>,
    settings: DynamicSchedulerConfig,
}

impl LockManager {
    pub fn new(
        db: Database,
        owner_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        settings: DynamicSchedulerConfig,
    ) -> Self {
        Self {
            store: LockStore::new(db),
            owner_id: owner_id.into(),
            clock,
            settings,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Try to claim `agent_name` until `now + timeout`.
    ///
    /// Returns false when another replica holds the lock or the insert failed.
    pub async fn try_acquire_single(&self, agent_name: &str, now: i64, timeout: Duration) -> bool {
        let lock = AgentLock {
            agent_name: agent_name.to_string(),
            owner_id: self.owner_id.clone(),
            lock_acquired: now,
            lock_expiry: now.saturating_add(duration_millis(timeout)),
        };

        match self.store.insert(&lock).await {
            Ok(InsertOutcome::Inserted) => {
                debug!(agent = agent_name, expiry = lock.lock_expiry, "Acquired lock");
                metrics::record_lock_acquisition("acquired");
                true
            }
            Ok(InsertOutcome::AlreadyHeld) => {
                debug!(agent = agent_name, "Lock held elsewhere");
                metrics::record_lock_acquisition("contended");
                false
            }
            Err(e) => {
                error!(agent = agent_name, "Failed to acquire lock: {}", e);
                metrics::record_lock_acquisition("error");
                false
            }
        }
    }

    /// Release a lock so that it next becomes available at `next_execution_time`
    pub async fn release_lock(&self, agent_name: &str, next_execution_time: i64) -> ReleaseOutcome {
        let now = self.clock.now_millis();
        let new_ttl = next_execution_time.saturating_sub(now);

        let result = if new_ttl < self.settings.release_threshold_ms() {
            self.store
                .delete(agent_name)
                .await
                .map(|deleted| if deleted { ReleaseOutcome::Deleted } else { ReleaseOutcome::NotHeld })
        } else {
            self.store
                .extend(agent_name, now.saturating_add(new_ttl))
                .await
                .map(|updated| if updated { ReleaseOutcome::Extended } else { ReleaseOutcome::NotHeld })
        };

        let outcome = result.unwrap_or_else(|e| {
            error!(agent = agent_name, "Failed to release lock: {}", e);
            ReleaseOutcome::Failed
        });

        match outcome {
            ReleaseOutcome::Deleted => metrics::record_lock_release("deleted"),
            ReleaseOutcome::Extended => metrics::record_lock_release("extended"),
            ReleaseOutcome::NotHeld => {
                debug!(agent = agent_name, "Release found no lock row");
                metrics::record_lock_release("not_held");
            }
            ReleaseOutcome::Failed => metrics::record_lock_release("error"),
        }

        outcome
    }

    /// Drop this replica's own row for `agent_name`, whatever its expiry.
    ///
    /// A row inserted by another replica is left alone and reported as
    /// [`ReleaseOutcome::NotHeld`].
    pub async fn release_owned(&self, agent_name: &str) -> ReleaseOutcome {
        let outcome = match self.store.delete_if_owner(agent_name, &self.owner_id).await {
            Ok(true) => ReleaseOutcome::Deleted,
            Ok(false) => ReleaseOutcome::NotHeld,
            Err(e) => {
                error!(agent = agent_name, "Failed to release owned lock: {}", e);
                ReleaseOutcome::Failed
            }
        };

        match outcome {
            ReleaseOutcome::Deleted => metrics::record_lock_release("deleted"),
            ReleaseOutcome::NotHeld => metrics::record_lock_release("not_held"),
            _ => metrics::record_lock_release("error"),
        }

        outcome
    }

    /// Delete expired lock rows and report which agents are still claimed.
    ///
    /// An expired row whose delete does not take effect (another replica got
    /// there first, or the statement failed) is reported as contended so the
    /// agent sits out this tick.
    pub async fn sweep(&self, now: i64) -> Result<LockSweep> {
        let mut sweep = LockSweep::default();

        for lock in self.store.list().await? {
            if !lock.is_expired(now) {
                sweep.held.insert(lock.agent_name);
                continue;
            }

            match self.store.delete_if_expiry(&lock.agent_name, lock.lock_expiry).await {
                Ok(true) => {
                    info!(
                        agent = %lock.agent_name,
                        previous_owner = %lock.owner_id,
                        "Reclaimed expired lock"
                    );
                    sweep.reclaimed.push(lock.agent_name);
                }
                Ok(false) => {
                    debug!(agent = %lock.agent_name, "Expired lock already reclaimed elsewhere");
                    sweep.contended.insert(lock.agent_name);
                }
                Err(e) => {
                    error!(agent = %lock.agent_name, "Failed to delete expired lock: {}", e);
                    sweep.contended.insert(lock.agent_name);
                }
            }
        }

        if !sweep.reclaimed.is_empty() {
            metrics::record_sweep_reclaimed(sweep.reclaimed.len());
        }

        Ok(sweep)
    }

    /// Current lock rows
    pub async fn locks(&self) -> Result<Vec<AgentLock>> {
        self.store.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;
    use crate::utils::config::SchedulerConfig;

    const START: i64 = 1_700_000_000_000;

    async fn manager(db: &Database, owner: &str, clock: &Arc<ManualClock>) -> LockManager {
        let settings = DynamicSchedulerConfig::new(&SchedulerConfig::default()).unwrap();
        LockManager::new(db.clone(), owner, clock.clone(), settings)
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let a = manager(&db, "pod-a", &clock).await;
        let b = manager(&db, "pod-b", &clock).await;

        assert!(a.try_acquire_single("aws/agent", START, Duration::from_secs(60)).await);
        assert!(!b.try_acquire_single("aws/agent", START, Duration::from_secs(60)).await);

        let locks = a.locks().await.unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].owner_id, "pod-a");
        assert_eq!(locks[0].lock_expiry, START + 60_000);
    }

    #[tokio::test]
    async fn test_release_below_threshold_deletes() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let a = manager(&db, "pod-a", &clock).await;

        a.try_acquire_single("aws/agent", START, Duration::from_secs(60)).await;
        let outcome = a.release_lock("aws/agent", START + 499).await;

        assert_eq!(outcome, ReleaseOutcome::Deleted);
        assert!(a.locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_above_threshold_extends() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let a = manager(&db, "pod-a", &clock).await;

        a.try_acquire_single("aws/agent", START, Duration::from_secs(60)).await;
        clock.advance(Duration::from_secs(5));
        let next = START + 30_000;
        let outcome = a.release_lock("aws/agent", next).await;

        assert_eq!(outcome, ReleaseOutcome::Extended);
        let locks = a.locks().await.unwrap();
        assert_eq!(locks[0].lock_expiry, next);
    }

    #[tokio::test]
    async fn test_release_without_row() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let a = manager(&db, "pod-a", &clock).await;

        assert_eq!(a.release_lock("missing", 0).await, ReleaseOutcome::NotHeld);
        assert_eq!(a.release_lock("missing", START + 60_000).await, ReleaseOutcome::NotHeld);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_expired_and_reports_held() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let a = manager(&db, "pod-a", &clock).await;
        let b = manager(&db, "pod-b", &clock).await;

        a.try_acquire_single("short", START, Duration::from_secs(10)).await;
        a.try_acquire_single("long", START, Duration::from_secs(600)).await;

        let sweep = b.sweep(START + 11_000).await.unwrap();
        assert_eq!(sweep.reclaimed, vec!["short".to_string()]);
        assert!(sweep.excludes("long"));
        assert!(!sweep.excludes("short"));

        assert!(b.try_acquire_single("short", START + 11_000, Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn test_release_owned_only_touches_own_row() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let a = manager(&db, "pod-a", &clock).await;
        let b = manager(&db, "pod-b", &clock).await;

        a.try_acquire_single("aws/agent", START, Duration::from_secs(60)).await;
        a.release_lock("aws/agent", START + 60_000).await;

        assert_eq!(b.release_owned("aws/agent").await, ReleaseOutcome::NotHeld);
        assert_eq!(a.locks().await.unwrap().len(), 1);
        assert_eq!(a.release_owned("aws/agent").await, ReleaseOutcome::Deleted);
        assert!(a.locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_database_errors_fail_closed() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let a = manager(&db, "pod-a", &clock).await;

        {
            let conn = db.connection().await;
            conn.execute_batch(&format!("DROP TABLE {}", db.tables().agent_locks))
                .unwrap();
        }

        assert!(!a.try_acquire_single("aws/agent", START, Duration::from_secs(60)).await);
        assert_eq!(a.release_lock("aws/agent", 0).await, ReleaseOutcome::Failed);
        assert_eq!(a.release_lock("aws/agent", START + 60_000).await, ReleaseOutcome::Failed);
        assert_eq!(a.release_owned("aws/agent").await, ReleaseOutcome::Failed);
        assert!(a.sweep(START).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_excludes_expired_rows_it_could_not_delete() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let a = manager(&db, "pod-a", &clock).await;
        let b = manager(&db, "pod-b", &clock).await;

        a.try_acquire_single("skipped", START, Duration::from_secs(10)).await;
        a.try_acquire_single("failing", START, Duration::from_secs(10)).await;

        // one delete silently touches nothing, the other errors
        {
            let table = &db.tables().agent_locks;
            let conn = db.connection().await;
            conn.execute_batch(&format!(
                "CREATE TRIGGER skip_delete BEFORE DELETE ON {table}
                 WHEN OLD.agent_name = 'skipped' BEGIN SELECT RAISE(IGNORE); END;
                 CREATE TRIGGER fail_delete BEFORE DELETE ON {table}
                 WHEN OLD.agent_name = 'failing' BEGIN SELECT RAISE(ABORT, 'busy'); END;"
            ))
            .unwrap();
        }

        let sweep = b.sweep(START + 11_000).await.unwrap();
        assert!(sweep.reclaimed.is_empty());
        assert!(sweep.held.is_empty());
        assert!(sweep.excludes("skipped"));
        assert!(sweep.excludes("failing"));
        assert_eq!(sweep.contended.len(), 2);
    }

    #[tokio::test]
    async fn test_release_threshold_follows_settings() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let settings = DynamicSchedulerConfig::new(&SchedulerConfig::default()).unwrap();
        let a = LockManager::new(db, "pod-a", clock.clone(), settings.clone());

        settings
            .update(&SchedulerConfig {
                release_threshold_ms: 5_000,
                ..Default::default()
            })
            .unwrap();

        a.try_acquire_single("aws/agent", START, Duration::from_secs(60)).await;
        assert_eq!(a.release_lock("aws/agent", START + 4_000).await, ReleaseOutcome::Deleted);
    }
}
