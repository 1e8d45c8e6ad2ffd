//! Shared primitives for the SoulMacro crates.
//!
//! The numeric [`ErrorCode`] values are an external contract: remote clients and
//! recorded macros compare against them, so they must never be renumbered.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Stable, product-compatible result codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    Ok,
    Stopped,
    SyntaxError,
    MissingParameter,
    InvalidParameter,
    ElementNotFound,
    ElementNotVisible,
    Timeout,
    DownloadError,
    DownloadTimeout,
    DownloadFolderAccess,
    FileWriteError,
    DatasourceError,
    DatasourceEnd,
    ScriptError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 15] = [
        ErrorCode::Ok,
        ErrorCode::Stopped,
        ErrorCode::SyntaxError,
        ErrorCode::MissingParameter,
        ErrorCode::InvalidParameter,
        ErrorCode::ElementNotFound,
        ErrorCode::ElementNotVisible,
        ErrorCode::Timeout,
        ErrorCode::DownloadError,
        ErrorCode::DownloadTimeout,
        ErrorCode::DownloadFolderAccess,
        ErrorCode::FileWriteError,
        ErrorCode::DatasourceError,
        ErrorCode::DatasourceEnd,
        ErrorCode::ScriptError,
    ];

    pub fn value(self) -> i32 {
        match self {
            ErrorCode::Ok => 1,
            ErrorCode::Stopped => -101,
            ErrorCode::SyntaxError => -910,
            ErrorCode::MissingParameter => -911,
            ErrorCode::InvalidParameter => -912,
            ErrorCode::ElementNotFound => -921,
            ErrorCode::ElementNotVisible => -922,
            ErrorCode::Timeout => -930,
            ErrorCode::DownloadError => -940,
            ErrorCode::DownloadTimeout => -941,
            ErrorCode::DownloadFolderAccess => -942,
            ErrorCode::FileWriteError => -950,
            ErrorCode::DatasourceError => -960,
            ErrorCode::DatasourceEnd => -961,
            ErrorCode::ScriptError => -1001,
        }
    }

    pub fn from_value(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.value() == value)
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::Stopped => "STOPPED",
            ErrorCode::SyntaxError => "SYNTAX_ERROR",
            ErrorCode::MissingParameter => "MISSING_PARAMETER",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::ElementNotFound => "ELEMENT_NOT_FOUND",
            ErrorCode::ElementNotVisible => "ELEMENT_NOT_VISIBLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DownloadError => "DOWNLOAD_ERROR",
            ErrorCode::DownloadTimeout => "DOWNLOAD_TIMEOUT",
            ErrorCode::DownloadFolderAccess => "DOWNLOAD_FOLDER_ACCESS",
            ErrorCode::FileWriteError => "FILE_WRITE_ERROR",
            ErrorCode::DatasourceError => "DATASOURCE_ERROR",
            ErrorCode::DatasourceEnd => "DATASOURCE_END",
            ErrorCode::ScriptError => "SCRIPT_ERROR",
        }
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    /// Element lookups that may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::ElementNotFound | ErrorCode::ElementNotVisible
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.value())
    }
}

#[cfg(feature = "serde-full")]
impl serde::Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.value())
    }
}

#[cfg(feature = "serde-full")]
impl<'de> serde::Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <i32 as serde::Deserialize>::deserialize(deserializer)?;
        ErrorCode::from_value(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error code {value}")))
    }
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("unknown error code {0}")]
pub struct UnknownErrorCode(pub i32);

impl TryFrom<i32> for ErrorCode {
    type Error = UnknownErrorCode;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        ErrorCode::from_value(value).ok_or(UnknownErrorCode(value))
    }
}

/// Identifier attached to one `execute()` call for log correlation.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
