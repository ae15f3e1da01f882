//! Startup errors for the engine binary.

use leadflow_workflow::error::{DefinitionError, QueueError, StoreError};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum EngineError {
    /// Configuration could not be loaded.
    Config(config::ConfigError),
    /// A seed file could not be read or parsed.
    Seed { path: PathBuf, reason: String },
    /// A seeded workflow definition is invalid.
    Definition {
        name: String,
        source: DefinitionError,
    },
    Store(StoreError),
    /// The NATS server could not be reached.
    Nats { url: String, reason: String },
    Queue(QueueError),
    /// The HTTP client could not be built.
    Http(reqwest::Error),
    /// A background task ended while the engine was running.
    TaskStopped { task: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Seed { path, reason } => write!(f, "seed file {}: {reason}", path.display()),
            Self::Definition { name, source } => write!(f, "workflow '{name}': {source}"),
            Self::Store(err) => write!(f, "store error: {err}"),
            Self::Nats { url, reason } => write!(f, "failed to connect to NATS at {url}: {reason}"),
            Self::Queue(err) => write!(f, "job queue error: {err}"),
            Self::Http(err) => write!(f, "http client error: {err}"),
            Self::TaskStopped { task } => write!(f, "background task stopped: {task}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}
