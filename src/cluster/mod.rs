// src/cluster/mod.rs
//! Cross-replica coordination
//!
//! Two independent mechanisms share the database:
//!
//! ```text
//!                   ┌──────────────────────┐
//!  scheduler tick ─▶│ LockManager          │── cats_agent_locks
//!                   │  acquire / release   │   (mutual exclusion)
//!                   │  expiry sweep        │
//!                   └──────────────────────┘
//!                   ┌──────────────────────┐
//! heartbeat tick ─▶ │ HeartbeatRegistry    │── caching_replicas
//!                   │  upsert / expire     │   (load partitioning)
//!                   └──────────┬───────────┘
//!                              │ ShardAssignment
//!                              ▼
//!                   ┌──────────────────────┐
//!                   │ ShardingFilter       │◀─ candidate discovery
//!                   └──────────────────────┘
//! ```
//!
//! Locks decide who runs an agent right now. Heartbeats only decide which
//! agents a replica bothers to compete for.

pub mod heartbeat;
pub mod lock_manager;
pub mod node;
pub mod sharding;

pub use heartbeat::HeartbeatRegistry;
pub use lock_manager::{LockManager, LockSweep, ReleaseOutcome};
pub use node::{DefaultNodeIdentity, NodeIdentity, NodeStatusProvider, ToggleNodeStatus};
pub use sharding::{shard_hash, ShardAssignment, ShardState, ShardingFilter, SHARD_HASH_VERSION};
