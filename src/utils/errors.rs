// src/utils/errors.rs
//! Error taxonomy for the coordinator.
//!
//! Lost races (a lock already held, a row someone else already deleted) are
//! not represented here: they surface as `false` or an outcome enum from the
//! storage layer. These variants cover infrastructure failures and the one
//! fatal inconsistency the sharding computation can hit.

use thiserror::Error;

/// Errors raised by the coordinator
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A SQL statement or connection operation failed
    #[error("Storage failed: {0}")]
    StorageFailed(String),

    /// This replica has no heartbeat row in the live snapshot
    #[error("Replica {pod_id} not found among {live} live heartbeat rows")]
    ReplicaNotRegistered { pod_id: String, live: usize },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The enabled-agent pattern does not compile
    #[error("Invalid agent pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Tracing or metrics could not be installed
    #[error("Observability setup failed: {0}")]
    ObservabilityError(String),

    /// The scheduler loop was already started or has stopped
    #[error("Scheduler is not running")]
    SchedulerStopped,
}

impl From<config::ConfigError> for CoordinatorError {
    fn from(err: config::ConfigError) -> Self {
        CoordinatorError::ConfigError(err.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_not_registered_message() {
        let err = CoordinatorError::ReplicaNotRegistered {
            pod_id: "pod-a".to_string(),
            live: 3,
        };
        assert_eq!(
            err.to_string(),
            "Replica pod-a not found among 3 live heartbeat rows"
        );
    }

    #[test]
    fn test_pattern_error_converts() {
        let err: CoordinatorError = regex::Regex::new("(").unwrap_err().into();
        assert!(matches!(err, CoordinatorError::InvalidPattern(_)));
    }
}
