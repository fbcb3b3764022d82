// src/main.rs
//! CATS Coordinator
//!
//! Dry-run daemon: registers the agents listed in configuration, competes
//! for their locks with every other replica pointed at the same database and
//! logs each execution instead of calling a cloud provider.
//!
//! Signals: SIGHUP reloads the `scheduler` section, SIGINT/SIGTERM shut down
//! gracefully.

use anyhow::{Context, Result};
use async_trait::async_trait;
use cats_coordinator::agent::{Agent, AgentExecution, AgentInterval, StaticAgent, TracingInstrumentation};
use cats_coordinator::observability::{init_metrics, init_tracing};
use cats_coordinator::utils::config::{AgentDefinition, CoordinatorConfig};
use cats_coordinator::{Coordinator, VERSION};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Logs the execution and does nothing else
struct DryRunExecution;

#[async_trait]
impl AgentExecution for DryRunExecution {
    async fn execute(&self, agent: &dyn Agent) -> anyhow::Result<()> {
        info!(
            agent_type = agent.agent_type(),
            provider = agent.provider_name(),
            "Dry run: agent executed"
        );
        Ok(())
    }
}

fn build_agent(definition: &AgentDefinition) -> StaticAgent {
    let agent = StaticAgent::new(definition.agent_type.trim(), definition.provider.trim());

    match definition.interval_seconds {
        Some(interval) => {
            let interval = Duration::from_secs(interval);
            let error_interval = definition
                .error_interval_seconds
                .map_or(interval, Duration::from_secs);
            let timeout = Duration::from_secs(definition.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS));
            agent.with_interval(AgentInterval::new(interval, error_interval, timeout))
        }
        None => agent,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = CoordinatorConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics, logging)
    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    info!("Starting CATS coordinator v{}", VERSION);
    info!("Configuration loaded: {:?}", config);

    let coordinator = Coordinator::open(config.clone())
        .await
        .context("Failed to initialize coordinator")?;

    let execution: Arc<dyn AgentExecution> = Arc::new(DryRunExecution);
    for definition in &config.agents {
        coordinator.schedule(
            Arc::new(build_agent(definition)),
            execution.clone(),
            Arc::new(TracingInstrumentation),
        );
    }
    info!("Registered {} agents", config.agents.len());

    coordinator.start().await?;

    for replica in coordinator.replicas().await? {
        info!(
            pod_id = %replica.pod_id,
            valid_until = replica.last_heartbeat_time,
            "Live replica"
        );
    }

    wait_for_shutdown(&coordinator).await?;

    coordinator.shutdown().await?;
    info!("Coordinator stopped gracefully");
    Ok(())
}

#[cfg(unix)]
fn reload(coordinator: &Coordinator) {
    match CoordinatorConfig::load() {
        Ok(config) => {
            if let Err(e) = coordinator.reload(&config.scheduler) {
                warn!("Rejected scheduler reload: {}", e);
            }
        }
        Err(e) => warn!("Failed to reload configuration: {}", e),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(coordinator: &Coordinator) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for CTRL+C")?;
                info!("Received interrupt, cleaning up...");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, cleaning up...");
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading scheduler settings");
                reload(coordinator);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_coordinator: &Coordinator) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for CTRL+C")?;
    info!("Received interrupt, cleaning up...");
    Ok(())
}
