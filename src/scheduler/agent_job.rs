// src/scheduler/agent_job.rs
//! One execution of one agent
//!
//! The job never touches the lock table itself. It reports an
//! [`AgentCompletion`] over the scheduler's channel and the scheduler loop
//! releases the lock, so completion handling stays ordered with ticks.

use crate::agent::AgentInterval;
use crate::scheduler::registry::RegisteredAgent;
use crate::utils::clock::duration_millis;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// Bookkeeping for an agent this replica is running
///
/// All values are epoch millis or millisecond spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextAttempt {
    /// When the lock was acquired
    pub current_time: i64,
    pub success_interval: i64,
    pub error_interval: i64,

    /// Lock TTL granted at acquisition
    pub timeout: i64,
}

impl NextAttempt {
    pub fn from_interval(current_time: i64, interval: &AgentInterval) -> Self {
        Self {
            current_time,
            success_interval: duration_millis(interval.interval),
            error_interval: duration_millis(interval.error_interval),
            timeout: duration_millis(interval.timeout),
        }
    }

    /// Epoch millis at which the agent is next due
    pub fn next_time(&self, status: ExecutionStatus) -> i64 {
        let delay = match status {
            ExecutionStatus::Success => self.success_interval,
            ExecutionStatus::Failure => self.error_interval,
        };
        self.current_time.saturating_add(delay)
    }

    /// Instant past which the run is presumed lost
    pub fn expires_at(&self, release_threshold_ms: i64) -> i64 {
        self.current_time
            .saturating_add(self.timeout)
            .saturating_add(release_threshold_ms)
    }
}

/// Message sent from a finished job back to the scheduler loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCompletion {
    pub agent_type: String,

    /// `NextAttempt::current_time` of the run that finished
    pub acquired_at: i64,
    pub status: ExecutionStatus,
    pub next_execution_time: i64,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct AgentJob {
    agent: RegisteredAgent,
    next_attempt: NextAttempt,
    completions: UnboundedSender<AgentCompletion>,
}

impl AgentJob {
    pub fn new(
        agent: RegisteredAgent,
        next_attempt: NextAttempt,
        completions: UnboundedSender<AgentCompletion>,
    ) -> Self {
        Self {
            agent,
            next_attempt,
            completions,
        }
    }

    /// Execute the agent and report the outcome.
    ///
    /// Errors and panics from the agent end up in instrumentation and pick
    /// the error interval; they never escape this function.
    pub async fn run(self) -> ExecutionStatus {
        let RegisteredAgent {
            agent,
            execution,
            instrumentation,
        } = self.agent;

        instrumentation.execution_started(agent.as_ref());
        let started = Instant::now();

        let outcome = AssertUnwindSafe(execution.execute(agent.as_ref()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(anyhow::anyhow!("agent panicked: {}", panic_message(&*payload))));

        let elapsed = started.elapsed();
        let status = match outcome {
            Ok(()) => {
                instrumentation.execution_completed(agent.as_ref(), elapsed);
                ExecutionStatus::Success
            }
            Err(e) => {
                instrumentation.execution_failed(agent.as_ref(), &e, elapsed);
                ExecutionStatus::Failure
            }
        };

        let completion = AgentCompletion {
            agent_type: agent.agent_type().to_string(),
            acquired_at: self.next_attempt.current_time,
            status,
            next_execution_time: self.next_attempt.next_time(status),
            elapsed,
        };

        if self.completions.send(completion).is_err() {
            warn!(
                agent_type = agent.agent_type(),
                "Scheduler gone before completion could be reported; lock will expire"
            );
        }

        status
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentExecution, ExecutionInstrumentation, StaticAgent};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[derive(Debug, Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl ExecutionInstrumentation for Recording {
        fn execution_started(&self, agent: &dyn Agent) {
            self.events.lock().push(format!("started {}", agent.agent_type()));
        }

        fn execution_completed(&self, agent: &dyn Agent, _elapsed: Duration) {
            self.events.lock().push(format!("completed {}", agent.agent_type()));
        }

        fn execution_failed(&self, agent: &dyn Agent, error: &anyhow::Error, _elapsed: Duration) {
            self.events
                .lock()
                .push(format!("failed {}: {}", agent.agent_type(), error));
        }
    }

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    struct Scripted(Behaviour);

    #[async_trait]
    impl AgentExecution for Scripted {
        async fn execute(&self, _agent: &dyn Agent) -> anyhow::Result<()> {
            match self.0 {
                Behaviour::Succeed => Ok(()),
                Behaviour::Fail => Err(anyhow::anyhow!("provider unavailable")),
                Behaviour::Panic => panic!("boom"),
            }
        }
    }

    fn attempt() -> NextAttempt {
        NextAttempt {
            current_time: 1_000,
            success_interval: 60_000,
            error_interval: 5_000,
            timeout: 120_000,
        }
    }

    async fn run(behaviour: Behaviour) -> (ExecutionStatus, AgentCompletion, Vec<String>) {
        let instrumentation = Arc::new(Recording::default());
        let agent = RegisteredAgent {
            agent: Arc::new(StaticAgent::new("acct/agent", "aws")),
            execution: Arc::new(Scripted(behaviour)),
            instrumentation: instrumentation.clone(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let status = AgentJob::new(agent, attempt(), tx).run().await;
        let completion = rx.recv().await.unwrap();
        let events = instrumentation.events.lock().clone();
        (status, completion, events)
    }

    #[test]
    fn test_next_attempt_times() {
        let next = attempt();
        assert_eq!(next.next_time(ExecutionStatus::Success), 61_000);
        assert_eq!(next.next_time(ExecutionStatus::Failure), 6_000);
        assert_eq!(next.expires_at(500), 121_500);
    }

    #[test]
    fn test_from_interval() {
        let interval = AgentInterval::new(
            Duration::from_secs(30),
            Duration::from_secs(10),
            Duration::from_secs(90),
        );
        let next = NextAttempt::from_interval(5, &interval);
        assert_eq!(next.success_interval, 30_000);
        assert_eq!(next.error_interval, 10_000);
        assert_eq!(next.timeout, 90_000);
    }

    #[tokio::test]
    async fn test_success_reports_success_interval() {
        let (status, completion, events) = run(Behaviour::Succeed).await;

        assert_eq!(status, ExecutionStatus::Success);
        assert_eq!(completion.next_execution_time, 61_000);
        assert_eq!(completion.acquired_at, 1_000);
        assert_eq!(events, vec!["started acct/agent", "completed acct/agent"]);
    }

    #[tokio::test]
    async fn test_failure_reports_error_interval() {
        let (status, completion, events) = run(Behaviour::Fail).await;

        assert_eq!(status, ExecutionStatus::Failure);
        assert_eq!(completion.next_execution_time, 6_000);
        assert_eq!(events[1], "failed acct/agent: provider unavailable");
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let (status, completion, events) = run(Behaviour::Panic).await;

        assert_eq!(status, ExecutionStatus::Failure);
        assert_eq!(completion.status, ExecutionStatus::Failure);
        assert!(events[1].contains("agent panicked: boom"));
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_fail_job() {
        let agent = RegisteredAgent {
            agent: Arc::new(StaticAgent::new("acct/agent", "aws")),
            execution: Arc::new(Scripted(Behaviour::Succeed)),
            instrumentation: Arc::new(Recording::default()),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        assert_eq!(AgentJob::new(agent, attempt(), tx).run().await, ExecutionStatus::Success);
    }
}
