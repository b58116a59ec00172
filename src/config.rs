//! # Orchestrator Configuration
//!
//! Defaults, environment overrides (`PROPFLOW_*`), and layered file loading through the
//! `config` crate (`PROPFLOW__*` variables override file values).

use crate::constants::system;
use crate::error::{OrchestrationError, OrchestrationResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global cap on concurrently running step handlers, shared by every execution
    pub max_concurrency: usize,
    /// Retries granted to steps that do not declare their own limit
    pub default_max_retries: u32,
    /// Per-invocation timeout for steps that do not declare their own
    pub default_task_timeout_seconds: u64,
    /// Base delay before a failed step is re-queued; 0 re-queues on the next dispatch cycle
    pub retry_backoff_base_ms: u64,
    /// Ceiling for the exponential retry delay
    pub retry_backoff_max_ms: u64,
    /// Fallback wake interval for the dispatcher when no notification arrives
    pub dispatch_tick_ms: u64,
    /// How long settled executions stay queryable before eviction
    pub retention_ttl_seconds: u64,
    /// How often the reaper looks for expired executions
    pub reaper_interval_seconds: u64,
    /// Capacity of the broadcast channel carrying orchestration events
    pub event_channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_parallelism(),
            default_max_retries: 3,
            default_task_timeout_seconds: 300,
            retry_backoff_base_ms: 0,
            retry_backoff_max_ms: 30_000,
            dispatch_tick_ms: 50,
            retention_ttl_seconds: 3600,
            reaper_interval_seconds: 60,
            event_channel_capacity: system::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl OrchestratorConfig {
    /// Configuration with short timeouts and no retention, for tests
    pub fn for_testing() -> Self {
        Self {
            max_concurrency: 4,
            default_max_retries: 0,
            default_task_timeout_seconds: 5,
            retry_backoff_base_ms: 0,
            retry_backoff_max_ms: 100,
            dispatch_tick_ms: 10,
            retention_ttl_seconds: 60,
            reaper_interval_seconds: 1,
            event_channel_capacity: 4096,
        }
    }

    /// Apply `PROPFLOW_*` environment overrides to the defaults
    pub fn from_env() -> OrchestrationResult<Self> {
        let mut config = Self::default();

        if let Some(value) = env_override("PROPFLOW_MAX_CONCURRENCY")? {
            config.max_concurrency = value;
        }
        if let Some(value) = env_override("PROPFLOW_DEFAULT_MAX_RETRIES")? {
            config.default_max_retries = value;
        }
        if let Some(value) = env_override("PROPFLOW_TASK_TIMEOUT_SECONDS")? {
            config.default_task_timeout_seconds = value;
        }
        if let Some(value) = env_override("PROPFLOW_RETRY_BACKOFF_BASE_MS")? {
            config.retry_backoff_base_ms = value;
        }
        if let Some(value) = env_override("PROPFLOW_RETENTION_TTL_SECONDS")? {
            config.retention_ttl_seconds = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file (TOML, YAML, or JSON by extension) layered
    /// under `PROPFLOW__*` environment variables.
    pub fn load(path: Option<&Path>) -> OrchestrationResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("PROPFLOW").separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            max_concurrency = config.max_concurrency,
            default_max_retries = config.default_max_retries,
            task_timeout_seconds = config.default_task_timeout_seconds,
            "Orchestrator configuration loaded"
        );

        Ok(config)
    }

    pub fn validate(&self) -> OrchestrationResult<()> {
        if self.max_concurrency == 0 {
            return Err(OrchestrationError::Configuration(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.default_task_timeout_seconds == 0 {
            return Err(OrchestrationError::Configuration(
                "default_task_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(OrchestrationError::Configuration(
                "event_channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.default_max_retries > system::MAX_STEP_RETRIES {
            return Err(OrchestrationError::Configuration(format!(
                "default_max_retries must not exceed {}",
                system::MAX_STEP_RETRIES
            )));
        }
        Ok(())
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_seconds)
    }

    pub fn dispatch_tick(&self) -> Duration {
        Duration::from_millis(self.dispatch_tick_ms.max(1))
    }

    pub fn retention_ttl(&self) -> Duration {
        Duration::from_secs(self.retention_ttl_seconds)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds.max(1))
    }

    /// Delay before re-queueing a step after its `retry_count`-th failure.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        if self.retry_backoff_base_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = retry_count.saturating_sub(1).min(16);
        let delay = self
            .retry_backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_backoff_max_ms);
        Duration::from_millis(delay)
    }
}

fn env_override<T>(key: &str) -> OrchestrationResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| OrchestrationError::Configuration(format!("Invalid {key}: {e}"))),
        Err(_) => Ok(None),
    }
}
