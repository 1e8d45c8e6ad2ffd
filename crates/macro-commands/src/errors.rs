//! Bridge error types

use macro_engine::CommandError;
use thiserror::Error;

/// Failures reported by a [`crate::BrowserBridge`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// No element matched the locator
    #[error("Element not found: {0}")]
    NotFound(String),

    /// Element matched but is hidden
    #[error("Element not visible: {0}")]
    NotVisible(String),

    /// Browser did not answer in time
    #[error("Bridge timeout: {0}")]
    Timeout(String),

    /// Page load failed
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// No browser attached
    #[error("Bridge unavailable: {0}")]
    Unavailable(String),

    /// Anything else the browser side reported
    #[error("{0}")]
    Protocol(String),
}

impl From<BridgeError> for CommandError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NotFound(_) => CommandError::ElementNotFound(err.to_string()),
            BridgeError::NotVisible(_) => CommandError::ElementNotVisible(err.to_string()),
            BridgeError::Timeout(_) => CommandError::Timeout(err.to_string()),
            other => CommandError::Bridge(other.to_string()),
        }
    }
}
