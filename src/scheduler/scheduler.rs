// src/scheduler/scheduler.rs
//! The scheduler loop
//!
//! One tick:
//!
//! ```text
//! node disabled? ──yes──▶ skip
//!      │
//!      ▼
//! prune ActiveAgents entries past timeout + release threshold
//!      │
//!      ▼
//! capacity = max_concurrent_agents - |active|  ──0──▶ done (no SQL)
//!      │
//!      ▼
//! registered − active − !enabled − disabled − !sharded
//!      │
//!      ▼
//! lock sweep: drop held / contended, reclaim expired
//!      │
//!      ▼
//! shuffle, keep `capacity`, log the rest
//!      │
//!      ▼
//! try_acquire_single ──won──▶ ActiveAgents + WorkerPool(AgentJob)
//! ```
//!
//! Finished jobs report over an mpsc channel; the loop releases their locks
//! between ticks.

use crate::agent::{
    Agent, AgentExecution, AgentIntervalProvider, DefaultAgentIntervalProvider,
    ExecutionInstrumentation,
};
use crate::cluster::{LockManager, NodeStatusProvider, ShardingFilter, ToggleNodeStatus};
use crate::observability::metrics;
use crate::scheduler::agent_job::{AgentCompletion, AgentJob, NextAttempt};
use crate::scheduler::registry::{ActiveAgents, AgentRegistry, RegisteredAgent};
use crate::scheduler::worker_pool::{PoolStats, WorkerPool, WorkerPoolConfig};
use crate::utils::clock::Clock;
use crate::utils::config::{DynamicSchedulerConfig, SchedulerConfig, SchedulerSettings};
use crate::utils::errors::{CoordinatorError, Result};
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Agents eligible for lock acquisition this tick
#[derive(Debug, Default)]
pub struct CandidateSet {
    pub agents: Vec<RegisteredAgent>,

    /// Free slots under `max_concurrent_agents`
    pub capacity: usize,

    /// Expired locks deleted by the sweep
    pub reclaimed: Vec<String>,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub skipped: bool,
    pub pruned: Vec<String>,
    pub candidates: usize,
    pub reclaimed: Vec<String>,
    pub dropped: Vec<String>,
    pub acquired: Vec<String>,
}

pub struct AgentScheduler {
    registry: Arc<AgentRegistry>,
    active: Arc<ActiveAgents>,
    locks: Arc<LockManager>,
    sharding: Arc<ShardingFilter>,
    settings: DynamicSchedulerConfig,
    intervals: Arc<dyn AgentIntervalProvider>,
    node_status: Arc<dyn NodeStatusProvider>,
    clock: Arc<dyn Clock>,
    pool: WorkerPool,
    tick_interval: Duration,
    shutdown_grace: Duration,
    completions_tx: mpsc::UnboundedSender<AgentCompletion>,
    completions_rx: Mutex<Option<mpsc::UnboundedReceiver<AgentCompletion>>>,
}

impl fmt::Debug for AgentScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentScheduler")
            .field("owner_id", &self.locks.owner_id())
            .field("registered", &self.registry.len())
            .field("active", &self.active.len())
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

impl AgentScheduler {
    pub fn new(
        locks: Arc<LockManager>,
        sharding: Arc<ShardingFilter>,
        settings: DynamicSchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let defaults = SchedulerConfig::default();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            registry: Arc::new(AgentRegistry::new()),
            active: Arc::new(ActiveAgents::new()),
            locks,
            sharding,
            settings,
            intervals: Arc::new(DefaultAgentIntervalProvider::default()),
            node_status: Arc::new(ToggleNodeStatus::default()),
            clock,
            pool: WorkerPool::default(),
            tick_interval: defaults.tick_interval(),
            shutdown_grace: defaults.shutdown_grace(),
            completions_tx,
            completions_rx: Mutex::new(Some(completions_rx)),
        }
    }

    pub fn with_registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_active_agents(mut self, active: Arc<ActiveAgents>) -> Self {
        self.active = active;
        self
    }

    pub fn with_interval_provider(mut self, intervals: Arc<dyn AgentIntervalProvider>) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_node_status(mut self, node_status: Arc<dyn NodeStatusProvider>) -> Self {
        self.node_status = node_status;
        self
    }

    /// Tick interval, shutdown grace and worker cap from the static scheduler config
    pub fn with_config(mut self, config: &SchedulerConfig) -> Self {
        self.tick_interval = config.tick_interval();
        self.shutdown_grace = config.shutdown_grace();
        self.pool = WorkerPool::new(WorkerPoolConfig {
            max_workers: config.max_workers,
        });
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn active_agents(&self) -> &Arc<ActiveAgents> {
        &self.active
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Register an agent, replacing any previous registration of the same type
    pub fn schedule(
        &self,
        agent: Arc<dyn Agent>,
        execution: Arc<dyn AgentExecution>,
        instrumentation: Arc<dyn ExecutionInstrumentation>,
    ) {
        let agent_type = agent.agent_type().to_string();

        if !self.settings.snapshot().is_enabled(&agent_type) {
            debug!(agent_type = %agent_type, "Registered agent does not match the enabled pattern");
        }

        let replaced = self.registry.register(RegisteredAgent {
            agent,
            execution,
            instrumentation,
        });

        if replaced.is_some() {
            info!(agent_type = %agent_type, "Replaced agent registration");
        } else {
            debug!(agent_type = %agent_type, "Registered agent");
        }
    }

    /// Remove an agent. A lock row this replica holds for it, running or
    /// reserved until the next due time, is released first so other replicas
    /// can pick the agent up on their next tick.
    pub async fn unschedule(&self, agent_type: &str) -> bool {
        let outcome = self.locks.release_owned(agent_type).await;
        debug!(agent_type, ?outcome, "Released lock on unschedule");
        self.active.remove(agent_type);
        metrics::set_active_agents(self.active.len());

        let removed = self.registry.remove(agent_type).is_some();
        if removed {
            info!(agent_type, "Unscheduled agent");
        }
        removed
    }

    /// Filter registered agents down to what this replica may try to lock.
    ///
    /// Returns an empty set without touching the database when the
    /// concurrency ceiling is already reached. Otherwise the lock sweep runs
    /// even when nothing survives filtering, so expired rows get reclaimed by
    /// any replica with free capacity.
    pub async fn discover_candidates(
        &self,
        settings: &SchedulerSettings,
        now: i64,
    ) -> Result<CandidateSet> {
        let capacity = settings
            .max_concurrent_agents
            .saturating_sub(self.active.len());

        if capacity == 0 {
            debug!(
                active = self.active.len(),
                max = settings.max_concurrent_agents,
                "At capacity, skipping lock acquisition"
            );
            return Ok(CandidateSet::default());
        }

        let mut agents: Vec<RegisteredAgent> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|registered| {
                let agent_type = registered.agent_type();
                !self.active.contains(agent_type)
                    && settings.is_enabled(agent_type)
                    && !settings.is_disabled(agent_type)
                    && self.sharding.filter(registered.agent.as_ref())
            })
            .collect();

        let sweep = self.locks.sweep(now).await?;
        agents.retain(|registered| !sweep.excludes(registered.agent_type()));

        Ok(CandidateSet {
            agents,
            capacity,
            reclaimed: sweep.reclaimed,
        })
    }

    /// Run one scheduling pass
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        if !self.node_status.is_node_enabled() {
            debug!("Node disabled, skipping scheduler tick");
            metrics::record_tick("skipped");
            report.skipped = true;
            return Ok(report);
        }

        let settings = self.settings.snapshot();
        let now = self.clock.now_millis();

        report.pruned = self.active.prune_expired(now, settings.release_threshold_ms);
        for agent_type in &report.pruned {
            warn!(agent_type = %agent_type, "Evicted active agent that outlived its lock timeout");
        }

        let discovery = match self.discover_candidates(&settings, now).await {
            Ok(discovery) => discovery,
            Err(e) => {
                error!("Candidate discovery failed: {}", e);
                metrics::record_tick("error");
                return Err(e);
            }
        };

        report.candidates = discovery.agents.len();
        report.reclaimed = discovery.reclaimed;

        let mut candidates = discovery.agents;
        candidates.shuffle(&mut rand::thread_rng());

        if candidates.len() > discovery.capacity {
            let dropped = candidates.split_off(discovery.capacity);
            report.dropped = dropped
                .iter()
                .map(|registered| registered.agent_type().to_string())
                .collect();

            info!(
                capacity = discovery.capacity,
                active = self.active.len(),
                max = settings.max_concurrent_agents,
                dropped = ?report.dropped,
                "Concurrency ceiling reached, deferring agents to a later tick"
            );
            metrics::record_capacity_dropped(report.dropped.len());
        }

        for registered in candidates {
            let agent_type = registered.agent_type().to_string();
            let interval = self.intervals.get_interval(registered.agent.as_ref());

            if !self
                .locks
                .try_acquire_single(&agent_type, now, interval.timeout)
                .await
            {
                continue;
            }

            let next_attempt = NextAttempt::from_interval(now, &interval);
            self.active.insert(agent_type.clone(), next_attempt);

            let job = AgentJob::new(registered, next_attempt, self.completions_tx.clone());
            if self.pool.submit(async move {
                job.run().await;
            }) {
                report.acquired.push(agent_type);
            } else {
                self.active.remove(&agent_type);
                self.locks.release_lock(&agent_type, 0).await;
            }
        }

        metrics::set_active_agents(self.active.len());
        metrics::record_tick("ok");
        Ok(report)
    }

    /// Release the lock of a finished job with its next due time baked into the TTL
    pub async fn agent_completed(&self, completion: AgentCompletion) {
        let now = self.clock.now_millis();

        match self
            .active
            .complete(&completion.agent_type, completion.acquired_at)
        {
            // the row may already belong to whoever reclaimed it after expiry
            Some(next_attempt) if next_attempt.expires_at(0) < now => {
                warn!(
                    agent_type = %completion.agent_type,
                    lock_expiry = next_attempt.expires_at(0),
                    now,
                    "Agent finished after its lock expired, lock untouched"
                );
                metrics::record_lock_release("expired");
            }
            Some(_) => {
                let outcome = self
                    .locks
                    .release_lock(&completion.agent_type, completion.next_execution_time)
                    .await;
                debug!(
                    agent_type = %completion.agent_type,
                    status = ?completion.status,
                    next = completion.next_execution_time,
                    ?outcome,
                    "Agent completed"
                );
            }
            None => debug!(
                agent_type = %completion.agent_type,
                "Completion for a run no longer tracked as active, lock untouched"
            ),
        }

        metrics::set_active_agents(self.active.len());
    }

    /// Handle completions that have already arrived. A no-op while the loop
    /// started by [`Self::run`] owns the channel.
    pub async fn process_pending_completions(&self) -> usize {
        let mut guard = match self.completions_rx.try_lock() {
            Ok(guard) => guard,
            Err(_) => return 0,
        };
        let Some(completions) = guard.as_mut() else {
            return 0;
        };

        let mut processed = 0;
        while let Ok(completion) = completions.try_recv() {
            self.agent_completed(completion).await;
            processed += 1;
        }
        processed
    }

    /// Tick until `cancel` fires, then drain in-flight jobs.
    ///
    /// May only be called once per scheduler.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut completions = self
            .completions_rx
            .lock()
            .await
            .take()
            .ok_or(CoordinatorError::SchedulerStopped)?;

        info!(
            owner_id = self.locks.owner_id(),
            interval_ms = self.tick_interval.as_millis() as u64,
            "Scheduler loop started"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(completion) = completions.recv() => self.agent_completed(completion).await,
                _ = ticker.tick() => {
                    // errors are logged inside tick
                    let _ = self.tick().await;
                }
            }
        }

        self.drain(&mut completions).await;
        info!(owner_id = self.locks.owner_id(), "Scheduler loop stopped");
        Ok(())
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Wait up to the shutdown grace for running jobs, releasing their locks
    /// as they finish
    async fn drain(&self, completions: &mut mpsc::UnboundedReceiver<AgentCompletion>) {
        self.pool.close();

        let in_flight = self.pool.in_flight();
        if in_flight > 0 {
            info!(
                in_flight,
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "Draining in-flight agents"
            );
        }

        let deadline = tokio::time::sleep(self.shutdown_grace);
        tokio::pin!(deadline);
        let finished = self.pool.wait();
        tokio::pin!(finished);

        loop {
            tokio::select! {
                Some(completion) = completions.recv() => self.agent_completed(completion).await,
                _ = &mut finished => break,
                _ = &mut deadline => {
                    warn!(
                        in_flight = self.pool.in_flight(),
                        "Shutdown grace elapsed; remaining locks will expire on their own"
                    );
                    break;
                }
            }
        }

        while let Ok(completion) = completions.try_recv() {
            self.agent_completed(completion).await;
        }
    }
}
