// src/cluster/sharding.rs
//! Hash-based partitioning of agents across live replicas
//!
//! Every replica computes the same ordered list of live heartbeat rows, finds
//! its own position in it and keeps only the agents whose account hashes to
//! that position:
//!
//! ```text
//! agent_type  "acct-77/us-west-2/ClusterCachingAgent"
//! account     "acct-77"
//! owner       fnv1a_32("acct-77") % pod_count == pod_index
//! ```
//!
//! The hash is part of the fleet contract: replicas that disagree on it
//! would run some accounts twice and others never. [`SHARD_HASH_VERSION`]
//! must change if [`shard_hash`] ever does.

use crate::agent::Agent;
use crate::utils::config::ShardingConfig;
use parking_lot::RwLock;
use tracing::{info, warn};

/// Version of the account hash shared by all replicas
pub const SHARD_HASH_VERSION: u32 = 1;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the UTF-8 bytes of `key`
pub fn shard_hash(key: &str) -> u32 {
    key.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Account portion of an agent type: everything before the first `/`
pub fn account_key(agent_type: &str) -> &str {
    agent_type
        .split_once('/')
        .map_or(agent_type, |(account, _)| account)
}

/// This replica's slot in the live replica set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardAssignment {
    pub pod_index: usize,
    pub pod_count: usize,
}

impl ShardAssignment {
    pub fn owns(&self, agent_type: &str) -> bool {
        if self.pod_count <= 1 {
            return true;
        }
        let hash = u64::from(shard_hash(account_key(agent_type)));
        hash % self.pod_count as u64 == self.pod_index as u64
    }
}

/// Sharding state as last computed by the heartbeat registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    /// No valid assignment: only core-provider agents pass
    Detached,
    Assigned(ShardAssignment),
}

/// Lock-free decision of whether this replica owns an agent
#[derive(Debug)]
pub struct ShardingFilter {
    enabled: bool,
    core_provider: String,
    state: RwLock<ShardState>,
}

impl ShardingFilter {
    /// New filter in the `Detached` state
    pub fn new(config: &ShardingConfig) -> Self {
        Self {
            enabled: config.enabled,
            core_provider: config.core_provider.clone(),
            state: RwLock::new(ShardState::Detached),
        }
    }

    /// Filter that accepts every agent
    pub fn disabled() -> Self {
        Self::new(&ShardingConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn filter(&self, agent: &dyn Agent) -> bool {
        if !self.enabled || agent.provider_name() == self.core_provider {
            return true;
        }

        match *self.state.read() {
            ShardState::Detached => false,
            ShardState::Assigned(assignment) => assignment.owns(agent.agent_type()),
        }
    }

    pub fn state(&self) -> ShardState {
        *self.state.read()
    }

    pub fn assign(&self, assignment: ShardAssignment) {
        let previous = std::mem::replace(&mut *self.state.write(), ShardState::Assigned(assignment));
        if previous != ShardState::Assigned(assignment) {
            info!(
                pod_index = assignment.pod_index,
                pod_count = assignment.pod_count,
                "Shard assignment changed"
            );
        }
    }

    pub fn detach(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), ShardState::Detached);
        if previous != ShardState::Detached {
            warn!("Shard assignment lost, only {} agents will run", self.core_provider);
        }
    }
}
