//! Engine error types

use soulmacro_core_types::ErrorCode;
use thiserror::Error;

/// Variable store validation failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VariableError {
    /// Name is not a recognised system or user variable
    #[error("Unknown variable: {0}")]
    Unknown(String),

    /// Variable is derived or computed and cannot be assigned
    #[error("Variable {0} is read-only")]
    ReadOnly(String),

    /// Value fails the variable's validator
    #[error("Invalid value '{value}' for {name}: expected {expected}")]
    InvalidValue {
        name: String,
        value: String,
        expected: &'static str,
    },
}

/// Failure of a single command, mapped onto the stable error-code space.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required parameter absent
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// Parameter present but unusable
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Variable assignment rejected
    #[error(transparent)]
    Variable(#[from] VariableError),

    /// Target element could not be located
    #[error("{0}")]
    ElementNotFound(String),

    /// Target element exists but is not visible
    #[error("{0}")]
    ElementNotVisible(String),

    /// Operation exceeded its time budget
    #[error("{0}")]
    Timeout(String),

    /// Datasource collaborator failure
    #[error("Datasource error: {0}")]
    Datasource(String),

    /// Datasource has no more rows
    #[error("End of datasource reached")]
    DatasourceEnd,

    /// Download collaborator failure
    #[error("Download failed: {0}")]
    Download(String),

    /// File collaborator failure
    #[error("File write failed: {0}")]
    FileWrite(String),

    /// External stop request
    #[error("Macro stopped")]
    Cancelled,

    /// Bridge or other collaborator failure
    #[error("{0}")]
    Bridge(String),

    /// Anything else raised inside a handler
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CommandError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        CommandError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::MissingParameter(_) => ErrorCode::MissingParameter,
            CommandError::InvalidParameter { .. } | CommandError::Variable(_) => {
                ErrorCode::InvalidParameter
            }
            CommandError::ElementNotFound(_) => ErrorCode::ElementNotFound,
            CommandError::ElementNotVisible(_) => ErrorCode::ElementNotVisible,
            CommandError::Timeout(_) => ErrorCode::Timeout,
            CommandError::Datasource(_) => ErrorCode::DatasourceError,
            CommandError::DatasourceEnd => ErrorCode::DatasourceEnd,
            CommandError::Download(_) => ErrorCode::DownloadError,
            CommandError::FileWrite(_) => ErrorCode::FileWriteError,
            CommandError::Cancelled => ErrorCode::Stopped,
            CommandError::Bridge(_) | CommandError::Internal(_) => ErrorCode::ScriptError,
        }
    }
}

/// Engine-level failures that are not part of a run's result.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another `execute()` is in flight on this engine
    #[error("A macro is already running")]
    AlreadyRunning,

    /// Variable access rejected
    #[error(transparent)]
    Variable(#[from] VariableError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_errors_surface_as_invalid_parameter() {
        let err: CommandError = VariableError::ReadOnly("!NOW".into()).into();
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn internal_faults_become_script_errors() {
        let err = CommandError::Internal(anyhow::anyhow!("bridge exploded"));
        assert_eq!(err.code(), ErrorCode::ScriptError);
        assert_eq!(err.to_string(), "bridge exploded");
        assert!(!err.code().is_retryable());
    }

    #[test]
    fn lookup_failures_are_retryable() {
        assert!(CommandError::ElementNotFound("x".into()).code().is_retryable());
        assert!(CommandError::ElementNotVisible("x".into()).code().is_retryable());
        assert!(!CommandError::Timeout("x".into()).code().is_retryable());
    }
}
