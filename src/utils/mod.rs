// src/utils/mod.rs
//! Shared plumbing: configuration, error types and the coordinator clock.

pub mod clock;
pub mod config;
pub mod errors;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CoordinatorConfig, DynamicSchedulerConfig, SchedulerConfig};
pub use errors::{CoordinatorError, Result};
