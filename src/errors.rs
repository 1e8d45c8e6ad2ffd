//! Session and CLI error types

use macro_engine::{EngineError, VariableError};
use std::time::Duration;
use thiserror::Error;

/// Failures of the session facade that are not part of a run's result
#[derive(Debug, Error)]
pub enum SessionError {
    /// A run is in flight on the shared engine
    #[error("A macro is already running")]
    AlreadyRunning,

    /// Variable assignment rejected
    #[error(transparent)]
    Variable(#[from] VariableError),

    /// The in-flight run did not wind down after a stop request
    #[error("Run did not stop within {0:?}")]
    ExitTimeout(Duration),

    /// Other engine failure
    #[error("Engine error: {0}")]
    Engine(String),
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::AlreadyRunning => SessionError::AlreadyRunning,
            EngineError::Variable(err) => SessionError::Variable(err),
            other => SessionError::Engine(other.to_string()),
        }
    }
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Datasource file failures
#[derive(Debug, Error)]
pub enum DatasourceFileError {
    #[error("Failed to read datasource {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },
}
