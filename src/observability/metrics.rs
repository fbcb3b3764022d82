// src/observability/metrics.rs
//! Coordinator metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `cats_lock_acquisitions_total` | Counter | `result` |
//! | `cats_lock_releases_total` | Counter | `action` |
//! | `cats_lock_sweep_reclaimed_total` | Counter | - |
//! | `cats_scheduler_ticks_total` | Counter | `status` |
//! | `cats_scheduler_capacity_dropped_total` | Counter | - |
//! | `cats_active_agents` | Gauge | - |
//! | `cats_heartbeats_total` | Counter | `result` |
//! | `cats_replicas_expired_total` | Counter | - |
//! | `cats_sharding_failures_total` | Counter | - |
//! | `cats_shard_pod_count` | Gauge | - |
//! | `cats_agent_executions_total` | Counter | `status` |
//! | `cats_agent_execution_seconds` | Histogram | `status` |

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names
pub mod names {
    pub const LOCK_ACQUISITIONS_TOTAL: &str = "cats_lock_acquisitions_total";
    pub const LOCK_RELEASES_TOTAL: &str = "cats_lock_releases_total";
    pub const LOCK_SWEEP_RECLAIMED_TOTAL: &str = "cats_lock_sweep_reclaimed_total";
    pub const SCHEDULER_TICKS_TOTAL: &str = "cats_scheduler_ticks_total";
    pub const SCHEDULER_CAPACITY_DROPPED_TOTAL: &str = "cats_scheduler_capacity_dropped_total";
    pub const ACTIVE_AGENTS: &str = "cats_active_agents";
    pub const HEARTBEATS_TOTAL: &str = "cats_heartbeats_total";
    pub const REPLICAS_EXPIRED_TOTAL: &str = "cats_replicas_expired_total";
    pub const SHARDING_FAILURES_TOTAL: &str = "cats_sharding_failures_total";
    pub const SHARD_POD_COUNT: &str = "cats_shard_pod_count";
    pub const AGENT_EXECUTIONS_TOTAL: &str = "cats_agent_executions_total";
    pub const AGENT_EXECUTION_SECONDS: &str = "cats_agent_execution_seconds";
}

/// Register descriptions with the installed recorder
pub fn describe() {
    describe_counter!(names::LOCK_ACQUISITIONS_TOTAL, "Lock insert attempts by result");
    describe_counter!(names::LOCK_RELEASES_TOTAL, "Lock releases by action taken");
    describe_counter!(names::LOCK_SWEEP_RECLAIMED_TOTAL, "Expired lock rows deleted by this replica");
    describe_counter!(names::SCHEDULER_TICKS_TOTAL, "Scheduler ticks by outcome");
    describe_counter!(
        names::SCHEDULER_CAPACITY_DROPPED_TOTAL,
        "Candidates dropped by the concurrency ceiling"
    );
    describe_gauge!(names::ACTIVE_AGENTS, "Agents currently running on this replica");
    describe_counter!(names::HEARTBEATS_TOTAL, "Heartbeat writes by result");
    describe_counter!(names::REPLICAS_EXPIRED_TOTAL, "Stale replica rows removed");
    describe_counter!(
        names::SHARDING_FAILURES_TOTAL,
        "Sharding computations where this replica was missing"
    );
    describe_gauge!(names::SHARD_POD_COUNT, "Live replicas in the last sharding snapshot");
    describe_counter!(names::AGENT_EXECUTIONS_TOTAL, "Agent executions by status");
    describe_histogram!(names::AGENT_EXECUTION_SECONDS, "Agent execution wall time");
}

pub fn record_lock_acquisition(result: &'static str) {
    counter!(names::LOCK_ACQUISITIONS_TOTAL, "result" => result).increment(1);
}

pub fn record_lock_release(action: &'static str) {
    counter!(names::LOCK_RELEASES_TOTAL, "action" => action).increment(1);
}

pub fn record_sweep_reclaimed(count: usize) {
    counter!(names::LOCK_SWEEP_RECLAIMED_TOTAL).increment(count as u64);
}

pub fn record_tick(status: &'static str) {
    counter!(names::SCHEDULER_TICKS_TOTAL, "status" => status).increment(1);
}

pub fn record_capacity_dropped(count: usize) {
    counter!(names::SCHEDULER_CAPACITY_DROPPED_TOTAL).increment(count as u64);
}

pub fn set_active_agents(count: usize) {
    gauge!(names::ACTIVE_AGENTS).set(count as f64);
}

pub fn record_heartbeat(result: &'static str) {
    counter!(names::HEARTBEATS_TOTAL, "result" => result).increment(1);
}

pub fn record_replicas_expired(count: usize) {
    counter!(names::REPLICAS_EXPIRED_TOTAL).increment(count as u64);
}

pub fn record_sharding_failure() {
    counter!(names::SHARDING_FAILURES_TOTAL).increment(1);
}

pub fn set_shard_pod_count(count: usize) {
    gauge!(names::SHARD_POD_COUNT).set(count as f64);
}

pub fn record_execution(status: &'static str, elapsed: Duration) {
    counter!(names::AGENT_EXECUTIONS_TOTAL, "status" => status).increment(1);
    histogram!(names::AGENT_EXECUTION_SECONDS, "status" => status).record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_lock_acquisition("acquired");
        record_tick("skipped");
        set_active_agents(3);
        record_execution("success", Duration::from_millis(20));
    }

    #[test]
    fn test_names_share_prefix() {
        for name in [
            names::LOCK_ACQUISITIONS_TOTAL,
            names::SCHEDULER_TICKS_TOTAL,
            names::HEARTBEATS_TOTAL,
            names::AGENT_EXECUTION_SECONDS,
        ] {
            assert!(name.starts_with("cats_"));
        }
    }
}
