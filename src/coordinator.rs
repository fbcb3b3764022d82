// src/coordinator.rs
//! Wiring for one replica
//!
//! ```text
//! Coordinator::start
//! ├─ heartbeat tick (seed row, first shard assignment)
//! ├─ spawn HeartbeatRegistry loop  (heartbeat_interval_seconds)
//! └─ spawn AgentScheduler loop     (lock_acquisition_interval_seconds)
//!
//! Coordinator::shutdown
//! ├─ cancel both loops
//! ├─ scheduler drains in-flight jobs (shutdown_grace_seconds)
//! └─ delete own heartbeat row
//! ```

use crate::agent::{Agent, AgentExecution, AgentIntervalProvider, ExecutionInstrumentation};
use crate::cluster::{
    DefaultNodeIdentity, HeartbeatRegistry, LockManager, NodeIdentity, ShardingFilter,
    ToggleNodeStatus,
};
use crate::scheduler::AgentScheduler;
use crate::storage::{AgentLock, Database, ReplicaHeartbeat};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::config::{CoordinatorConfig, DynamicSchedulerConfig, SchedulerConfig};
use crate::utils::errors::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct Coordinator {
    config: CoordinatorConfig,
    node: DefaultNodeIdentity,
    settings: DynamicSchedulerConfig,
    node_status: Arc<ToggleNodeStatus>,
    sharding: Arc<ShardingFilter>,
    locks: Arc<LockManager>,
    heartbeat: Arc<HeartbeatRegistry>,
    scheduler: Arc<AgentScheduler>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Open the configured database and build a coordinator on the wall clock
    pub async fn open(config: CoordinatorConfig) -> Result<Self> {
        let db = Database::open(&config.database).await?;
        Self::new(config, db, Arc::new(SystemClock))
    }

    pub fn new(config: CoordinatorConfig, db: Database, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_interval_provider(config, db, clock, None)
    }

    /// Like [`Self::new`] with a custom interval provider for agents that do
    /// not declare their own interval
    pub fn with_interval_provider(
        config: CoordinatorConfig,
        db: Database,
        clock: Arc<dyn Clock>,
        intervals: Option<Arc<dyn AgentIntervalProvider>>,
    ) -> Result<Self> {
        config.validate()?;

        let node = match &config.node_id {
            Some(id) if !id.trim().is_empty() => DefaultNodeIdentity::new(id.trim()),
            _ => DefaultNodeIdentity::generate(),
        };
        let node_id = node.node_identity().to_string();

        let settings = DynamicSchedulerConfig::new(&config.scheduler)?;
        let node_status = Arc::new(ToggleNodeStatus::default());
        let sharding = Arc::new(ShardingFilter::new(&config.sharding));

        let locks = Arc::new(LockManager::new(
            db.clone(),
            node_id.clone(),
            clock.clone(),
            settings.clone(),
        ));

        let heartbeat = Arc::new(HeartbeatRegistry::new(
            db,
            node_id,
            clock.clone(),
            config.heartbeat.replica_ttl(),
            sharding.clone(),
        ));

        let mut scheduler = AgentScheduler::new(locks.clone(), sharding.clone(), settings.clone(), clock)
            .with_config(&config.scheduler)
            .with_node_status(node_status.clone());
        if let Some(intervals) = intervals {
            scheduler = scheduler.with_interval_provider(intervals);
        }

        Ok(Self {
            config,
            node,
            settings,
            node_status,
            sharding,
            locks,
            heartbeat,
            scheduler: Arc::new(scheduler),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn node_id(&self) -> &str {
        self.node.node_identity()
    }

    pub fn scheduler(&self) -> &Arc<AgentScheduler> {
        &self.scheduler
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatRegistry> {
        &self.heartbeat
    }

    pub fn sharding(&self) -> &Arc<ShardingFilter> {
        &self.sharding
    }

    /// Administrative on/off switch consulted at every scheduler tick
    pub fn node_status(&self) -> &Arc<ToggleNodeStatus> {
        &self.node_status
    }

    pub fn schedule(
        &self,
        agent: Arc<dyn Agent>,
        execution: Arc<dyn AgentExecution>,
        instrumentation: Arc<dyn ExecutionInstrumentation>,
    ) {
        self.scheduler.schedule(agent, execution, instrumentation);
    }

    pub async fn unschedule(&self, agent_type: &str) -> bool {
        self.scheduler.unschedule(agent_type).await
    }

    /// Apply a new scheduler section; an invalid one leaves the current settings in place
    pub fn reload(&self, scheduler: &SchedulerConfig) -> Result<()> {
        self.settings.update(scheduler)?;
        info!(
            max_concurrent_agents = scheduler.max_concurrent_agents,
            disabled = scheduler.disabled_agents.len(),
            pattern = %scheduler.enabled_agent_pattern,
            "Scheduler settings reloaded"
        );
        Ok(())
    }

    pub async fn locks(&self) -> Result<Vec<AgentLock>> {
        self.locks.locks().await
    }

    pub async fn replicas(&self) -> Result<Vec<ReplicaHeartbeat>> {
        self.heartbeat.replicas().await
    }

    /// Seed the heartbeat row and start both loops
    pub async fn start(&self) -> Result<()> {
        info!(node_id = self.node_id(), "Starting coordinator");

        if let Err(e) = self.heartbeat.tick().await {
            warn!("Initial heartbeat did not produce a shard assignment: {}", e);
        }

        let heartbeat = self
            .heartbeat
            .clone()
            .spawn(self.config.heartbeat.interval(), self.cancel.child_token());

        let scheduler = self.scheduler.clone();
        let cancel = self.cancel.child_token();
        let scheduler = tokio::spawn(async move {
            if let Err(e) = scheduler.run(cancel).await {
                error!("Scheduler loop failed: {}", e);
            }
        });

        self.tasks.lock().extend([heartbeat, scheduler]);
        Ok(())
    }

    /// Stop both loops, drain running agents and leave the replica set
    pub async fn shutdown(&self) -> Result<()> {
        info!(node_id = self.node_id(), "Shutting down coordinator");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Coordinator task panicked: {}", e);
            }
        }

        self.heartbeat.deregister().await?;
        info!(node_id = self.node_id(), "Coordinator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentInterval, StaticAgent, TracingInstrumentation};
    use crate::cluster::{ShardAssignment, ShardState};
    use crate::utils::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl AgentExecution for Counting {
        async fn execute(&self, _agent: &dyn Agent) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(node_id: &str) -> CoordinatorConfig {
        CoordinatorConfig {
            node_id: Some(node_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown_lifecycle() {
        let db = Database::open_in_memory("").await.unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let coordinator = Coordinator::new(config("pod-a"), db, clock).unwrap();
        assert_eq!(coordinator.node_id(), "pod-a");

        let execution = Arc::new(Counting::default());
        coordinator.schedule(
            Arc::new(StaticAgent::new("acct/agent", "aws").with_interval(AgentInterval::uniform(
                Duration::from_secs(60),
                Duration::from_secs(120),
            ))),
            execution.clone(),
            Arc::new(TracingInstrumentation),
        );

        coordinator.start().await.unwrap();
        assert_eq!(
            coordinator.sharding().state(),
            ShardState::Assigned(ShardAssignment { pod_index: 0, pod_count: 1 })
        );

        for _ in 0..200 {
            if execution.runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(execution.runs.load(Ordering::SeqCst), 1);

        coordinator.shutdown().await.unwrap();
        assert!(coordinator.replicas().await.unwrap().is_empty());
        assert_eq!(coordinator.locks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_rejects_bad_pattern() {
        let db = Database::open_in_memory("").await.unwrap();
        let coordinator = Coordinator::new(config("pod-a"), db, Arc::new(SystemClock)).unwrap();

        let bad = SchedulerConfig {
            enabled_agent_pattern: "(".to_string(),
            ..Default::default()
        };
        assert!(coordinator.reload(&bad).is_err());

        let good = SchedulerConfig {
            max_concurrent_agents: 5,
            ..Default::default()
        };
        assert!(coordinator.reload(&good).is_ok());
        assert_eq!(coordinator.settings.snapshot().max_concurrent_agents, 5);
    }

    #[tokio::test]
    async fn test_generated_identity_when_unset() {
        let db = Database::open_in_memory("").await.unwrap();
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), db, Arc::new(SystemClock)).unwrap();
        assert!(!coordinator.node_id().is_empty());
    }
}
