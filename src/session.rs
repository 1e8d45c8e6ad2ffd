//! In-process session facade
//!
//! Wraps one shared [`MacroEngine`] behind the status-code surface a remote
//! protocol server exposes: `play`, `set_variable`, `last_extract`,
//! `last_error`, `stop` and `exit`.

use macro_engine::{ExecutionResult, MacroEngine, MacroScript, RunOptions, SetOutcome, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::SessionError;

pub const STATUS_OK: i32 = 1;
pub const STATUS_SESSION_ERROR: i32 = -2;
pub const STATUS_ALREADY_RUNNING: i32 = -3;

/// Name given to macros submitted as bare text
pub const INLINE_MACRO_NAME: &str = "inline";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct LastRun {
    result: Option<ExecutionResult>,
    error: Option<String>,
}

pub struct MacroSession {
    engine: Arc<MacroEngine>,
    last: Mutex<LastRun>,
    exit_timeout: Duration,
}

impl MacroSession {
    pub fn new(engine: Arc<MacroEngine>) -> Self {
        Self {
            engine,
            last: Mutex::new(LastRun::default()),
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
        }
    }

    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<MacroEngine> {
        &self.engine
    }

    /// Parse and run macro text; returns the status code
    pub async fn play(&self, text: &str) -> i32 {
        let script = MacroScript::parse(INLINE_MACRO_NAME, text);
        self.play_script(&script, RunOptions::default()).await
    }

    /// Run a parsed macro: [`STATUS_OK`] on success, the run's error code on
    /// failure, [`STATUS_ALREADY_RUNNING`] while another run is in flight
    pub async fn play_script(&self, script: &MacroScript, options: RunOptions) -> i32 {
        match self.engine.execute(script, options).await {
            Ok(result) => {
                let status = if result.success {
                    STATUS_OK
                } else {
                    result.error_code.value()
                };
                debug!(status, "play finished");
                let mut last = self.last.lock();
                last.error = if result.success {
                    None
                } else {
                    result.error_message.clone()
                };
                last.result = Some(result);
                status
            }
            Err(err) => match SessionError::from(err) {
                SessionError::AlreadyRunning => {
                    warn!("play rejected: a macro is already running");
                    STATUS_ALREADY_RUNNING
                }
                other => {
                    self.last.lock().error = Some(other.to_string());
                    STATUS_SESSION_ERROR
                }
            },
        }
    }

    pub fn set_variable(
        &self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<SetOutcome, SessionError> {
        Ok(self.engine.set_variable(name, value)?)
    }

    pub fn get_variable(&self, name: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.engine.get_variable(name)?)
    }

    /// Extracted values of the last run, joined with the extract delimiter
    pub fn last_extract(&self) -> String {
        self.last
            .lock()
            .result
            .as_ref()
            .map(ExecutionResult::extract_string)
            .unwrap_or_default()
    }

    /// Error message of the last run; empty after a success
    pub fn last_error(&self) -> String {
        self.last.lock().error.clone().unwrap_or_default()
    }

    pub fn last_result(&self) -> Option<ExecutionResult> {
        self.last.lock().result.clone()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Stop any run, wait for it to wind down, then forget last-run state and
    /// restore variable defaults. The session stays usable afterwards.
    pub async fn exit(&self) -> Result<(), SessionError> {
        self.engine.stop();
        let deadline = Instant::now() + self.exit_timeout;
        while self.engine.is_running() {
            if Instant::now() >= deadline {
                return Err(SessionError::ExitTimeout(self.exit_timeout));
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }

        *self.last.lock() = LastRun::default();
        self.engine.reset_variables()?;
        info!("session reset");
        Ok(())
    }
}
