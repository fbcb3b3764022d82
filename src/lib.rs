// src/lib.rs
//! CATS Coordinator Library
//!
//! Decides which replica of a horizontally scaled service runs which
//! periodic caching agent, using nothing but a shared SQL database.
//!
//! # Architecture
//!
//! The coordinator is structured into several key modules:
//!
//! - **storage**: lock and heartbeat tables (rusqlite)
//! - **cluster**: lock manager, heartbeat registry, sharding filter, node identity
//! - **agent**: the interfaces agents and their runners implement
//! - **scheduler**: the per-replica scheduling loop, agent jobs, worker pool
//! - **coordinator**: wiring and lifecycle for one replica
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration, errors, clock

pub mod agent;
pub mod cluster;
pub mod coordinator;
pub mod observability;
pub mod scheduler;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use agent::{Agent, AgentExecution, AgentInterval, ExecutionInstrumentation, StaticAgent};
pub use cluster::{HeartbeatRegistry, LockManager, ShardingFilter};
pub use coordinator::Coordinator;
pub use scheduler::{AgentScheduler, NextAttempt};
pub use storage::Database;
pub use utils::config::CoordinatorConfig;
pub use utils::errors::{CoordinatorError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
