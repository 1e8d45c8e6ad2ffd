//! Core types for macro execution

use serde::{Deserialize, Serialize};
use soulmacro_core_types::{ErrorCode, RunId};
use std::collections::BTreeMap;

use crate::errors::CommandError;
use crate::value::Value;

/// One `KEY=VALUE` pair or positional token of a command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Key as written (positional parameters use their whole token)
    pub key: String,

    /// Unexpanded value, surrounding quotes removed
    pub raw_value: String,

    /// True when the token carried no `=`
    pub positional: bool,

    /// Token exactly as it appeared in the source line
    pub token: String,
}

impl Parameter {
    pub fn keyed(key: impl Into<String>, raw_value: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            raw_value: raw_value.into(),
            positional: false,
            token: token.into(),
        }
    }

    pub fn positional(value: impl Into<String>, token: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            key: value.clone(),
            raw_value: value,
            positional: true,
            token: token.into(),
        }
    }
}

/// A parsed macro line. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Upper-cased command name
    pub name: String,

    pub parameters: Vec<Parameter>,

    /// Source line, trimmed
    pub raw: String,

    /// 1-based line number in the macro source
    pub line: usize,

    /// Reason the line could not be tokenised cleanly
    pub malformed: Option<String>,
}

impl Command {
    /// Case-insensitive lookup of a keyed parameter
    pub fn param(&self, key: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| !p.positional && p.key.eq_ignore_ascii_case(key))
    }

    /// True when a positional flag such as `OPEN` is present
    pub fn has_flag(&self, flag: &str) -> bool {
        self.parameters
            .iter()
            .any(|p| p.positional && p.key.eq_ignore_ascii_case(flag))
    }
}

/// A parsed macro, reused across every loop iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroScript {
    pub name: String,
    pub commands: Vec<Command>,
}

impl MacroScript {
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            commands: crate::parser::parse(text),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn malformed(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter().filter(|c| c.malformed.is_some())
    }
}

/// Outcome of one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub error_code: ErrorCode,
    pub error_message: Option<String>,
    pub output: Option<String>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_code: ErrorCode::Ok,
            error_message: None,
            output: None,
        }
    }

    pub fn with_output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::ok()
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: code,
            error_message: Some(message.into()),
            output: None,
        }
    }

    pub fn message(&self) -> &str {
        self.error_message.as_deref().unwrap_or("")
    }
}

impl From<CommandError> for CommandResult {
    fn from(err: CommandError) -> Self {
        CommandResult::failure(err.code(), err.to_string())
    }
}

/// Severity for the handler log sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One timed command, collected while `!FILE_PROFILER` is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilerRecord {
    pub line: usize,
    pub command_name: String,
    pub raw_command: String,
    pub duration_ms: u64,
    pub timestamp_ms: i64,
}

/// How a run terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// All iterations ran, or the datasource ran out
    Completed,
    /// A failure propagated with neither ERRORIGNORE nor ERRORLOOP in effect
    Aborted,
    /// External stop request
    Stopped,
}

/// Terminal, immutable output of one run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub run_id: RunId,
    pub macro_name: String,
    pub state: RunState,
    pub success: bool,
    pub error_code: ErrorCode,
    pub error_message: Option<String>,
    pub failed_line: Option<usize>,
    pub variables: BTreeMap<String, Value>,
    pub loops_completed: u32,
    pub extract_data: Vec<String>,
    pub profiler_records: Option<Vec<ProfilerRecord>>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Extracted values joined the way `!EXTRACTADD` presents them
    pub fn extract_string(&self) -> String {
        self.extract_data.join(crate::variables::EXTRACT_DELIMITER)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(&name.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_converts_to_failure() {
        let result: CommandResult = CommandError::MissingParameter("GOTO".into()).into();
        assert!(!result.success);
        assert_eq!(result.error_code, ErrorCode::MissingParameter);
        assert_eq!(result.message(), "Missing parameter: GOTO");
    }

    #[test]
    fn keyed_lookup_ignores_positionals_and_case() {
        let command = Command {
            name: "TAB".into(),
            parameters: vec![
                Parameter::positional("OPEN", "OPEN"),
                Parameter::keyed("T", "2", "T=2"),
            ],
            raw: "TAB OPEN T=2".into(),
            line: 1,
            malformed: None,
        };
        assert_eq!(command.param("t").map(|p| p.raw_value.as_str()), Some("2"));
        assert!(command.param("OPEN").is_none());
        assert!(command.has_flag("open"));
    }
}
