// src/cluster/heartbeat.rs
//! Replica liveness and shard assignment
//!
//! Each tick:
//!
//! 1. Upsert this replica's row with `valid_until = now + ttl`
//! 2. Conditionally delete other replicas' rows that have expired
//! 3. Read all rows ordered by `pod_id`; this replica's position and the row
//!    count become the [`ShardAssignment`] fed to the [`ShardingFilter`]
//!
//! If step 3 cannot find this replica the filter is detached (only
//! core-provider agents pass) and the error is surfaced to the caller.

use crate::cluster::sharding::{ShardAssignment, ShardingFilter};
use crate::observability::metrics;
use crate::storage::{Database, ReplicaHeartbeat, ReplicaStore, UpsertOutcome};
use crate::utils::clock::{duration_millis, Clock};
use crate::utils::errors::{CoordinatorError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct HeartbeatRegistry {
    store: ReplicaStore,
    pod_id: String,
    clock: Arc<dyn Clock>,
    replica_ttl: Duration,
    sharding: Arc<ShardingFilter>,
}

impl HeartbeatRegistry {
    pub fn new(
        db: Database,
        pod_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        replica_ttl: Duration,
        sharding: Arc<ShardingFilter>,
    ) -> Self {
        Self {
            store: ReplicaStore::new(db),
            pod_id: pod_id.into(),
            clock,
            replica_ttl,
            sharding,
        }
    }

    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    /// Mark this replica live until `now + new_ttl`
    pub async fn record_heartbeat(&self, new_ttl: Duration) -> Result<UpsertOutcome> {
        let valid_until = self.clock.now_millis().saturating_add(duration_millis(new_ttl));
        let outcome = self.store.upsert(&self.pod_id, valid_until).await?;

        if outcome == UpsertOutcome::Inserted {
            info!(pod_id = %self.pod_id, "Registered replica heartbeat");
        }
        debug!(pod_id = %self.pod_id, valid_until, ?outcome, "Heartbeat recorded");
        Ok(outcome)
    }

    /// Delete expired rows of other replicas; returns how many this call removed
    pub async fn delete_expired_replicas(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let mut removed = 0;

        for row in self.store.list_ordered().await? {
            if row.pod_id == self.pod_id || row.last_heartbeat_time >= now {
                continue;
            }

            match self
                .store
                .delete_if_unchanged(&row.pod_id, row.last_heartbeat_time)
                .await
            {
                Ok(true) => {
                    info!(pod_id = %row.pod_id, "Removed expired replica");
                    removed += 1;
                }
                Ok(false) => debug!(pod_id = %row.pod_id, "Expired replica already removed"),
                Err(e) => warn!(pod_id = %row.pod_id, "Failed to remove expired replica: {}", e),
            }
        }

        if removed > 0 {
            metrics::record_replicas_expired(removed);
        }
        Ok(removed)
    }

    /// Compute this replica's position among all heartbeat rows
    pub async fn pre_filter(&self) -> Result<ShardAssignment> {
        let rows = self.store.list_ordered().await?;

        let pod_index = rows
            .iter()
            .position(|row| row.pod_id == self.pod_id)
            .ok_or_else(|| CoordinatorError::ReplicaNotRegistered {
                pod_id: self.pod_id.clone(),
                live: rows.len(),
            })?;

        Ok(ShardAssignment {
            pod_index,
            pod_count: rows.len(),
        })
    }

    /// One full heartbeat cycle; updates the sharding filter
    pub async fn tick(&self) -> Result<ShardAssignment> {
        match self.record_heartbeat(self.replica_ttl).await {
            Ok(_) => metrics::record_heartbeat("ok"),
            Err(e) => {
                error!(pod_id = %self.pod_id, "Failed to record heartbeat: {}", e);
                metrics::record_heartbeat("error");
            }
        }

        if let Err(e) = self.delete_expired_replicas().await {
            warn!("Failed to scan for expired replicas: {}", e);
        }

        match self.pre_filter().await {
            Ok(assignment) => {
                self.sharding.assign(assignment);
                metrics::set_shard_pod_count(assignment.pod_count);
                Ok(assignment)
            }
            Err(e) => {
                error!(pod_id = %self.pod_id, "Sharding unavailable: {}", e);
                metrics::record_sharding_failure();
                self.sharding.detach();
                Err(e)
            }
        }
    }

    /// Run `tick` every `interval` until cancelled. The first tick fires one
    /// interval from now; callers seed the row with [`Self::tick`] first.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // errors are logged inside tick
                        let _ = self.tick().await;
                    }
                }
            }

            debug!(pod_id = %self.pod_id, "Heartbeat loop stopped");
        })
    }

    /// Remove this replica's row so the fleet reshards without waiting for expiry
    pub async fn deregister(&self) -> Result<bool> {
        let removed = self.store.delete(&self.pod_id).await?;
        self.sharding.detach();
        if removed {
            info!(pod_id = %self.pod_id, "Deregistered replica heartbeat");
        }
        Ok(removed)
    }

    pub async fn replicas(&self) -> Result<Vec<ReplicaHeartbeat>> {
        self.store.list_ordered().await
    }
}
