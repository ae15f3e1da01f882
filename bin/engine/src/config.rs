//! Engine configuration.
//!
//! Loaded via the `config` crate from `LEADFLOW__`-prefixed environment
//! variables, with `__` separating nested keys:
//!
//! ```text
//! LEADFLOW__NATS__URL=nats://localhost:4222
//! LEADFLOW__SWEEP__INTERVAL_SECONDS=30
//! LEADFLOW__EXECUTOR__STEP_LIMIT=100
//! ```

use leadflow_scheduler::{CalendarConfig, RetryPolicy, SweepConfig, WorkerConfig};
use leadflow_workflow::executor::ExecutorConfig;
use leadflow_workflow::nats::NatsConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix.
const ENV_PREFIX: &str = "LEADFLOW";

/// Engine configuration composed from library configs.
#[derive(Debug, Default, Deserialize)]
pub struct EngineConfig {
    /// NATS transport. Without it jobs and events stay in process.
    #[serde(default)]
    pub nats: Option<NatsSettings>,

    /// Directory of workflow definitions, leads, templates and cohorts
    /// loaded at startup.
    #[serde(default)]
    pub seed_dir: Option<PathBuf>,

    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub calendar: CalendarConfig,
}

/// NATS connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsSettings {
    pub url: String,
    /// Job stream name override.
    #[serde(default)]
    pub jobs_stream: Option<String>,
    /// Queue group override for event subscribers.
    #[serde(default)]
    pub queue_group: Option<String>,
}

impl From<&NatsSettings> for NatsConfig {
    fn from(settings: &NatsSettings) -> Self {
        Self {
            url: settings.url.clone(),
            jobs_stream_name: settings.jobs_stream.clone(),
            queue_group: settings.queue_group.clone(),
        }
    }
}

/// Node executor limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    /// Nodes run per invocation before a continuation job is queued.
    #[serde(default = "default_step_limit")]
    pub step_limit: usize,

    /// Upper bound on a single collaborator call, in milliseconds.
    #[serde(default = "default_collaborator_timeout_ms")]
    pub collaborator_timeout_ms: u64,
}

fn default_step_limit() -> usize {
    50
}

fn default_collaborator_timeout_ms() -> u64 {
    10_000
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            step_limit: default_step_limit(),
            collaborator_timeout_ms: default_collaborator_timeout_ms(),
        }
    }
}

impl From<&ExecutorSettings> for ExecutorConfig {
    fn from(settings: &ExecutorSettings) -> Self {
        Self {
            step_limit: settings.step_limit,
            collaborator_timeout: Duration::from_millis(settings.collaborator_timeout_ms),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed into its field.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_config(
            config::Config::builder()
                .add_source(
                    config::Environment::with_prefix(ENV_PREFIX)
                        .separator("__")
                        .try_parsing(true),
                )
                .build()?,
        )
    }

    /// Deserializes an already-built configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has the wrong type.
    pub fn from_config(config: config::Config) -> Result<Self, config::ConfigError> {
        config.try_deserialize()
    }

    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::from(&self.executor)
    }
}
