// src/scheduler/registry.rs
//! Registered agents and the agents this replica is currently running.
//!
//! Both maps are injected into the scheduler rather than owned globally, so
//! tests and embedding services can inspect them directly.

use crate::agent::{Agent, AgentExecution, ExecutionInstrumentation};
use crate::scheduler::agent_job::NextAttempt;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// An agent together with what runs it and what observes it
#[derive(Clone)]
pub struct RegisteredAgent {
    pub agent: Arc<dyn Agent>,
    pub execution: Arc<dyn AgentExecution>,
    pub instrumentation: Arc<dyn ExecutionInstrumentation>,
}

impl RegisteredAgent {
    pub fn agent_type(&self) -> &str {
        self.agent.agent_type()
    }
}

impl fmt::Debug for RegisteredAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAgent")
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

/// Agents known to this replica, keyed by agent type
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: DashMap<String, RegisteredAgent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, returning the registration it replaced
    pub fn register(&self, agent: RegisteredAgent) -> Option<RegisteredAgent> {
        self.agents.insert(agent.agent_type().to_string(), agent)
    }

    pub fn remove(&self, agent_type: &str) -> Option<RegisteredAgent> {
        self.agents.remove(agent_type).map(|(_, agent)| agent)
    }

    pub fn contains(&self, agent_type: &str) -> bool {
        self.agents.contains_key(agent_type)
    }

    /// Point-in-time copy of every registration
    pub fn snapshot(&self) -> Vec<RegisteredAgent> {
        self.agents.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// `agent_type -> NextAttempt` for every job this replica has dispatched
#[derive(Debug, Default)]
pub struct ActiveAgents {
    agents: DashMap<String, NextAttempt>,
}

impl ActiveAgents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, agent_type: impl Into<String>, next_attempt: NextAttempt) {
        self.agents.insert(agent_type.into(), next_attempt);
    }

    pub fn remove(&self, agent_type: &str) -> Option<NextAttempt> {
        self.agents.remove(agent_type).map(|(_, next)| next)
    }

    /// Remove the entry only if it belongs to the run acquired at `acquired_at`
    pub fn complete(&self, agent_type: &str, acquired_at: i64) -> Option<NextAttempt> {
        self.agents
            .remove_if(agent_type, |_, next| next.current_time == acquired_at)
            .map(|(_, next)| next)
    }

    pub fn contains(&self, agent_type: &str) -> bool {
        self.agents.contains_key(agent_type)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Evict entries whose lock has certainly lapsed; returns the evicted types
    pub fn prune_expired(&self, now: i64, release_threshold_ms: i64) -> Vec<String> {
        let expired: Vec<String> = self
            .agents
            .iter()
            .filter(|entry| entry.value().expires_at(release_threshold_ms) < now)
            .map(|entry| entry.key().clone())
            .collect();

        // re-check under the shard lock in case the entry was replaced meanwhile
        expired
            .into_iter()
            .filter(|agent_type| {
                self.agents
                    .remove_if(agent_type, |_, next| next.expires_at(release_threshold_ms) < now)
                    .is_some()
            })
            .collect()
    }
}
