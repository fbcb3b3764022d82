// src/utils/config.rs
//! Coordinator configuration
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. TOML file at `$CATS_CONFIG`, or `cats-coordinator.toml` if present
//! 3. Environment variables `CATS__<SECTION>__<KEY>`
//!    (e.g. `CATS__SCHEDULER__MAX_CONCURRENT_AGENTS=50`,
//!    `CATS__SCHEDULER__DISABLED_AGENTS=aws/a,aws/b`)
//!
//! The `scheduler` section is hot-reloadable through [`DynamicSchedulerConfig`].

use crate::utils::errors::{CoordinatorError, Result};
use config::{Config, Environment, File};
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const CONFIG_PATH_ENV: &str = "CATS_CONFIG";
const DEFAULT_CONFIG_NAME: &str = "cats-coordinator";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub heartbeat: HeartbeatConfig,
    pub sharding: ShardingConfig,
    pub observability: ObservabilityConfig,

    /// Stable identity for this replica; generated when absent
    pub node_id: Option<String>,

    /// Agents registered by the dry-run daemon
    pub agents: Vec<AgentDefinition>,
}

/// Database settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file shared by all replicas
    pub path: PathBuf,

    /// Prefix prepended to both coordination tables (per-tenant namespacing)
    pub table_prefix: String,

    /// How long a statement waits on a locked database before failing
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cats-coordinator.db"),
            table_prefix: String::new(),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Scheduler settings (hot-reloadable)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ceiling on agents running concurrently on this replica
    pub max_concurrent_agents: usize,

    /// Agent types that must not be scheduled
    pub disabled_agents: Vec<String>,

    /// Case-insensitive whole-match pattern an agent type must satisfy
    pub enabled_agent_pattern: String,

    /// Scheduler tick period
    pub lock_acquisition_interval_seconds: u64,

    /// Below this remaining TTL a released lock row is deleted instead of extended
    pub release_threshold_ms: i64,

    /// How long shutdown waits for in-flight agents
    pub shutdown_grace_seconds: u64,

    /// Cap on concurrently executing jobs in the worker pool (default: unbounded).
    /// Applies at start only.
    pub max_workers: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 100,
            disabled_agents: Vec::new(),
            enabled_agent_pattern: ".*".to_string(),
            lock_acquisition_interval_seconds: 1,
            release_threshold_ms: 500,
            shutdown_grace_seconds: 30,
            max_workers: None,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.lock_acquisition_interval_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// Heartbeat settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub heartbeat_interval_seconds: u64,

    /// How long a heartbeat row stays live after it is written
    pub replica_ttl_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            replica_ttl_seconds: 60,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn replica_ttl(&self) -> Duration {
        Duration::from_secs(self.replica_ttl_seconds)
    }
}

/// Sharding settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    /// When false every agent passes the sharding filter
    pub enabled: bool,

    /// Provider whose agents run on every replica regardless of sharding
    pub core_provider: String,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            core_provider: "core".to_string(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging and metrics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub log_level: String,
    pub log_format: LogFormat,

    /// Prometheus scrape listener; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_addr: None,
        }
    }
}

/// Agent declared in configuration for the dry-run daemon
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefinition {
    pub agent_type: String,
    pub provider: String,
    pub interval_seconds: Option<u64>,
    pub error_interval_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

impl CoordinatorConfig {
    /// Load from `$CATS_CONFIG` (or the default file name) plus environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Load from an explicit file plus environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        let config: CoordinatorConfig = builder
            .add_source(
                Environment::with_prefix("CATS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scheduler.disabled_agents")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.lock_acquisition_interval_seconds == 0 {
            return Err(CoordinatorError::ConfigError(
                "lock_acquisition_interval_seconds must be at least 1".to_string(),
            ));
        }

        if self.scheduler.release_threshold_ms < 0 {
            return Err(CoordinatorError::ConfigError(
                "release_threshold_ms cannot be negative".to_string(),
            ));
        }

        if self.scheduler.max_workers == Some(0) {
            return Err(CoordinatorError::ConfigError(
                "max_workers must be at least 1 when set".to_string(),
            ));
        }

        if self.heartbeat.heartbeat_interval_seconds == 0 {
            return Err(CoordinatorError::ConfigError(
                "heartbeat_interval_seconds must be at least 1".to_string(),
            ));
        }

        if self.heartbeat.replica_ttl_seconds <= self.heartbeat.heartbeat_interval_seconds {
            return Err(CoordinatorError::ConfigError(format!(
                "replica_ttl_seconds ({}) must exceed heartbeat_interval_seconds ({})",
                self.heartbeat.replica_ttl_seconds, self.heartbeat.heartbeat_interval_seconds
            )));
        }

        validate_table_prefix(&self.database.table_prefix)?;
        compile_pattern(&self.scheduler.enabled_agent_pattern)?;

        for agent in &self.agents {
            if agent.agent_type.trim().is_empty() {
                return Err(CoordinatorError::ConfigError(
                    "agent_type cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Table prefixes end up in SQL text, so only `[a-z0-9_]` is accepted
pub fn validate_table_prefix(prefix: &str) -> Result<()> {
    if prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        Ok(())
    } else {
        Err(CoordinatorError::ConfigError(format!(
            "table_prefix {:?} may only contain [a-z0-9_]",
            prefix
        )))
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    let anchored = format!("^(?:{})$", pattern);
    Ok(RegexBuilder::new(&anchored).case_insensitive(true).build()?)
}

/// Compiled view of [`SchedulerConfig`] read on every tick
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrent_agents: usize,
    pub disabled_agents: HashSet<String>,
    pub enabled_pattern: Regex,
    pub release_threshold_ms: i64,
}

impl SchedulerSettings {
    fn compile(config: &SchedulerConfig) -> Result<Self> {
        let disabled_agents = config
            .disabled_agents
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            max_concurrent_agents: config.max_concurrent_agents,
            disabled_agents,
            enabled_pattern: compile_pattern(&config.enabled_agent_pattern)?,
            release_threshold_ms: config.release_threshold_ms,
        })
    }

    pub fn is_enabled(&self, agent_type: &str) -> bool {
        self.enabled_pattern.is_match(agent_type)
    }

    pub fn is_disabled(&self, agent_type: &str) -> bool {
        self.disabled_agents.contains(agent_type)
    }
}

/// Shared, swappable scheduler settings
#[derive(Debug, Clone)]
pub struct DynamicSchedulerConfig {
    current: Arc<RwLock<Arc<SchedulerSettings>>>,
}

impl DynamicSchedulerConfig {
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let settings = SchedulerSettings::compile(config)?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        })
    }

    /// Current settings; cheap to call once per tick
    pub fn snapshot(&self) -> Arc<SchedulerSettings> {
        Arc::clone(&self.current.read())
    }

    /// Swap in new settings. On error the previous settings stay in effect.
    pub fn update(&self, config: &SchedulerConfig) -> Result<()> {
        let settings = SchedulerSettings::compile(config)?;
        *self.current.write() = Arc::new(settings);
        Ok(())
    }

    pub fn release_threshold_ms(&self) -> i64 {
        self.current.read().release_threshold_ms
    }
}
