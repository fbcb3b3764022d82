// src/scheduler/mod.rs
//! Agent scheduling on one replica
//!
//! # Architecture
//!
//! ```text
//! AgentScheduler (one task)
//! ├─ AgentRegistry   registered agents (injected)
//! ├─ ActiveAgents    agent_type -> NextAttempt (injected)
//! ├─ LockManager     cross-replica exclusion
//! ├─ ShardingFilter  which agents this replica competes for
//! └─ WorkerPool      runs AgentJobs
//!        │
//!        └── AgentCompletion ──mpsc──▶ AgentScheduler ──▶ release_lock
//! ```
//!
//! The loop never awaits agent work. A slow agent only occupies a pool task
//! and one slot under `max_concurrent_agents`.

pub mod agent_job;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod worker_pool;

pub use agent_job::{AgentCompletion, AgentJob, ExecutionStatus, NextAttempt};
pub use registry::{ActiveAgents, AgentRegistry, RegisteredAgent};
pub use scheduler::{AgentScheduler, CandidateSet, TickReport};
pub use worker_pool::{PoolStats, WorkerPool, WorkerPoolConfig};
