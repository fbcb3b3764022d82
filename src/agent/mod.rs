// src/agent/mod.rs
//! Caching agent interfaces
//!
//! The coordinator never knows what an agent does. It sees:
//!
//! - **Agent**: a named unit of periodic work owned by a provider
//! - **AgentExecution**: runs one pass of an agent
//! - **ExecutionInstrumentation**: observes each pass
//! - **AgentIntervalProvider**: how often an agent runs and how long its lock lives

pub mod instrumentation;
pub mod interval;

pub use instrumentation::TracingInstrumentation;
pub use interval::{AgentInterval, AgentIntervalProvider, DefaultAgentIntervalProvider};

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// A named, periodic unit of cache-refresh work
pub trait Agent: Send + Sync + Debug {
    /// Unique type, conventionally `<account>/<region or scope>/<AgentKind>`
    fn agent_type(&self) -> &str;

    /// Cloud provider the agent belongs to
    fn provider_name(&self) -> &str;

    /// Interval the agent insists on, overriding the provider default
    fn agent_interval(&self) -> Option<AgentInterval> {
        None
    }
}

/// Runs one pass of an agent
#[async_trait]
pub trait AgentExecution: Send + Sync {
    async fn execute(&self, agent: &dyn Agent) -> anyhow::Result<()>;
}

/// Observes agent executions
pub trait ExecutionInstrumentation: Send + Sync {
    fn execution_started(&self, agent: &dyn Agent);

    fn execution_completed(&self, agent: &dyn Agent, elapsed: Duration);

    fn execution_failed(&self, agent: &dyn Agent, error: &anyhow::Error, elapsed: Duration);
}

/// Plain agent description, handy for configuration-driven registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAgent {
    agent_type: String,
    provider: String,
    interval: Option<AgentInterval>,
}

impl StaticAgent {
    pub fn new(agent_type: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            provider: provider.into(),
            interval: None,
        }
    }

    pub fn with_interval(mut self, interval: AgentInterval) -> Self {
        self.interval = Some(interval);
        self
    }
}

impl Agent for StaticAgent {
    fn agent_type(&self) -> &str {
        &self.agent_type
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn agent_interval(&self) -> Option<AgentInterval> {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_agent() {
        let agent = StaticAgent::new("acct/us-east-1/ClusterCachingAgent", "aws");
        assert_eq!(agent.agent_type(), "acct/us-east-1/ClusterCachingAgent");
        assert_eq!(agent.provider_name(), "aws");
        assert!(agent.agent_interval().is_none());

        let interval = AgentInterval::uniform(Duration::from_secs(30), Duration::from_secs(120));
        let agent = agent.with_interval(interval);
        assert_eq!(agent.agent_interval(), Some(interval));
    }
}
