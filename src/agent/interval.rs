// src/agent/interval.rs
//! Per-agent scheduling intervals.

use crate::agent::Agent;
use std::time::Duration;

/// How often an agent runs and how long its lock is held while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentInterval {
    /// Delay before the next run after a success
    pub interval: Duration,

    /// Delay before the next run after a failure
    pub error_interval: Duration,

    /// Lock TTL while the agent runs
    pub timeout: Duration,
}

impl AgentInterval {
    pub fn new(interval: Duration, error_interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            error_interval,
            timeout,
        }
    }

    /// Same delay after success and failure
    pub fn uniform(interval: Duration, timeout: Duration) -> Self {
        Self::new(interval, interval, timeout)
    }
}

/// Supplies the interval for each agent
pub trait AgentIntervalProvider: Send + Sync {
    fn get_interval(&self, agent: &dyn Agent) -> AgentInterval;
}

/// Uses the agent's own interval when it declares one, otherwise a fixed default
#[derive(Debug, Clone)]
pub struct DefaultAgentIntervalProvider {
    default: AgentInterval,
}

impl DefaultAgentIntervalProvider {
    pub fn new(default: AgentInterval) -> Self {
        Self { default }
    }
}

impl Default for DefaultAgentIntervalProvider {
    fn default() -> Self {
        Self::new(AgentInterval::uniform(
            Duration::from_secs(60),
            Duration::from_secs(300),
        ))
    }
}

impl AgentIntervalProvider for DefaultAgentIntervalProvider {
    fn get_interval(&self, agent: &dyn Agent) -> AgentInterval {
        agent.agent_interval().unwrap_or(self.default)
    }
}
