// src/agent/instrumentation.rs
//! Default execution instrumentation: structured logs plus metrics.

use crate::agent::{Agent, ExecutionInstrumentation};
use crate::observability::metrics;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInstrumentation;

impl ExecutionInstrumentation for TracingInstrumentation {
    fn execution_started(&self, agent: &dyn Agent) {
        debug!(agent_type = agent.agent_type(), "Agent execution started");
    }

    fn execution_completed(&self, agent: &dyn Agent, elapsed: Duration) {
        info!(
            agent_type = agent.agent_type(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Agent execution completed"
        );
        metrics::record_execution("success", elapsed);
    }

    fn execution_failed(&self, agent: &dyn Agent, error: &anyhow::Error, elapsed: Duration) {
        warn!(
            agent_type = agent.agent_type(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Agent execution failed: {:#}",
            error
        );
        metrics::record_execution("failure", elapsed);
    }
}
