// src/cluster/node.rs
//! Replica identity and administrative status.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use ulid::Ulid;

/// Stable per-process identifier, used as `owner_id` and `pod_id`
pub trait NodeIdentity: Send + Sync + Debug {
    fn node_identity(&self) -> &str;
}

/// `<hostname>-<ulid>` unless an explicit identity is supplied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultNodeIdentity {
    identity: String,
}

impl DefaultNodeIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    pub fn generate() -> Self {
        let host = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self::new(format!("{}-{}", host, Ulid::new().to_string().to_lowercase()))
    }
}

impl NodeIdentity for DefaultNodeIdentity {
    fn node_identity(&self) -> &str {
        &self.identity
    }
}

/// Whether this replica may schedule agents at all
pub trait NodeStatusProvider: Send + Sync {
    fn is_node_enabled(&self) -> bool;
}

/// Status flag flipped by operators (or tests) at runtime
#[derive(Debug)]
pub struct ToggleNodeStatus {
    enabled: AtomicBool,
}

impl ToggleNodeStatus {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
}

impl Default for ToggleNodeStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NodeStatusProvider for ToggleNodeStatus {
    fn is_node_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identities_are_unique() {
        let a = DefaultNodeIdentity::generate();
        let b = DefaultNodeIdentity::generate();
        assert_ne!(a.node_identity(), b.node_identity());
        assert!(!a.node_identity().is_empty());
    }

    #[test]
    fn test_toggle_status() {
        let status = ToggleNodeStatus::default();
        assert!(status.is_node_enabled());
        status.disable();
        assert!(!status.is_node_enabled());
        status.enable();
        assert!(status.is_node_enabled());
    }
}
