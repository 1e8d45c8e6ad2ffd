//! Macro execution loop

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use soulmacro_core_types::{ErrorCode, RunId};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cleanup::{CleanupHook, CleanupRegistry};
use crate::context::HandlerContext;
use crate::errors::{CommandError, EngineError, VariableError};
use crate::ports::{DataSource, ProfileSink};
use crate::profiler;
use crate::registry::{CommandHandler, HandlerModule, HandlerRegistry};
use crate::retry::RetryPolicy;
use crate::types::{CommandResult, ExecutionResult, MacroScript, ProfilerRecord, RunState};
use crate::value::Value;
use crate::variables::{SetOutcome, VariableStore, ERRORIGNORE, ERRORLOOP, LOOP};

/// Engine tuning, loaded from the `engine` config section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Loop count used when a run does not ask for one
    pub max_loops: u32,

    /// Preferred pause between lookup attempts (milliseconds)
    pub retry_interval_ms: u64,

    /// Shortest pause between lookup attempts (milliseconds)
    pub min_retry_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loops: 1,
            retry_interval_ms: 100,
            min_retry_interval_ms: 10,
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_interval_ms),
            Duration::from_millis(self.min_retry_interval_ms),
        )
    }
}

/// Per-run options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Overrides [`EngineConfig::max_loops`]
    pub max_loops: Option<u32>,
}

impl RunOptions {
    pub fn loops(max_loops: u32) -> Self {
        Self {
            max_loops: Some(max_loops),
        }
    }
}

/// What the loop does after a failed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureAction {
    /// `!ERRORIGNORE=YES`: carry on with the next command
    Continue,
    /// `!ERRORLOOP=YES`: skip the rest of this iteration
    NextIteration,
    /// Neither flag: end the run
    Abort,
}

fn failure_action(variables: &VariableStore) -> FailureAction {
    if variables.is_yes(ERRORIGNORE) {
        FailureAction::Continue
    } else if variables.is_yes(ERRORLOOP) {
        FailureAction::NextIteration
    } else {
        FailureAction::Abort
    }
}

/// Mutable bookkeeping of one run
struct RunTally {
    state: RunState,
    error_code: ErrorCode,
    error_message: Option<String>,
    failed_line: Option<usize>,
    loops_completed: u32,
    profiler_records: Vec<ProfilerRecord>,
    profiled: bool,
}

impl RunTally {
    fn new() -> Self {
        Self {
            state: RunState::Completed,
            error_code: ErrorCode::Ok,
            error_message: None,
            failed_line: None,
            loops_completed: 0,
            profiler_records: Vec::new(),
            profiled: false,
        }
    }

    fn stop(&mut self) {
        self.state = RunState::Stopped;
        self.error_code = ErrorCode::Stopped;
        self.error_message = Some(CommandError::Cancelled.to_string());
    }

    fn abort(&mut self, code: ErrorCode, message: String, line: Option<usize>) {
        self.state = RunState::Aborted;
        self.error_code = code;
        self.error_message = Some(message);
        self.failed_line = line;
    }
}

/// Macro interpreter: one run at a time, variables kept between runs
pub struct MacroEngine {
    registry: HandlerRegistry,
    cleanup: CleanupRegistry,
    variables: tokio::sync::Mutex<VariableStore>,
    cancel: Mutex<CancellationToken>,
    datasource: Option<Arc<dyn DataSource>>,
    profile_sink: Option<Arc<dyn ProfileSink>>,
    config: EngineConfig,
    retry: RetryPolicy,
}

impl MacroEngine {
    pub fn builder() -> MacroEngineBuilder {
        MacroEngineBuilder::new()
    }

    /// Engine with only the built-in commands
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.variables.try_lock().is_err()
    }

    /// Request the in-flight run to stop; a no-op when idle
    pub fn stop(&self) {
        let cancel = self.cancel.lock();
        if !cancel.is_cancelled() {
            info!("stop requested");
            cancel.cancel();
        }
    }

    /// Read a variable between runs
    pub fn get_variable(&self, name: &str) -> Result<Option<Value>, EngineError> {
        let variables = self
            .variables
            .try_lock()
            .map_err(|_| EngineError::AlreadyRunning)?;
        Ok(variables.get(name))
    }

    /// Assign a variable between runs
    pub fn set_variable(
        &self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<SetOutcome, EngineError> {
        let mut variables = self
            .variables
            .try_lock()
            .map_err(|_| EngineError::AlreadyRunning)?;
        Ok(variables.set(name, value)?)
    }

    /// Restore every variable to its default
    pub fn reset_variables(&self) -> Result<(), EngineError> {
        let mut variables = self
            .variables
            .try_lock()
            .map_err(|_| EngineError::AlreadyRunning)?;
        variables.reset();
        Ok(())
    }

    /// Run `script`. Fails only with [`EngineError::AlreadyRunning`]; every
    /// macro-level outcome, including faults, is reported in the result.
    pub async fn execute(
        &self,
        script: &MacroScript,
        options: RunOptions,
    ) -> Result<ExecutionResult, EngineError> {
        let mut variables = self
            .variables
            .try_lock()
            .map_err(|_| EngineError::AlreadyRunning)?;

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let run_id = RunId::new();
        let span = info_span!("macro_run", run_id = %run_id, macro_name = %script.name);
        let result = self
            .run(script, options, &mut variables, cancel, run_id)
            .instrument(span)
            .await;
        Ok(result)
    }

    async fn run(
        &self,
        script: &MacroScript,
        options: RunOptions,
        variables: &mut VariableStore,
        cancel: CancellationToken,
        run_id: RunId,
    ) -> ExecutionResult {
        let started = Instant::now();
        let max_loops = options.max_loops.unwrap_or(self.config.max_loops).max(1);
        info!(
            commands = script.commands.len(),
            max_loops, "macro run started"
        );

        self.cleanup.reset();
        variables.begin_run();
        let mut run = RunTally::new();

        let looped = AssertUnwindSafe(self.run_loops(script, max_loops, variables, &cancel, &mut run))
            .catch_unwind()
            .await;
        if looped.is_err() {
            error!("macro run faulted outside a handler");
            run.abort(
                ErrorCode::ScriptError,
                "Internal engine fault".to_string(),
                None,
            );
        }

        let cleanup_failures = self.cleanup.run_all().await;
        if cleanup_failures > 0 {
            warn!(cleanup_failures, "some cleanup hooks failed");
        }

        if run.profiled {
            self.write_profile(script, variables, &run).await;
        }

        let success = run.state == RunState::Completed;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            state = ?run.state,
            code = run.error_code.value(),
            loops = run.loops_completed,
            duration_ms,
            "macro run finished"
        );

        ExecutionResult {
            run_id,
            macro_name: script.name.clone(),
            state: run.state,
            success,
            error_code: run.error_code,
            error_message: run.error_message,
            failed_line: run.failed_line,
            variables: variables.snapshot(),
            loops_completed: run.loops_completed,
            extract_data: variables.extract_data().to_vec(),
            profiler_records: run.profiled.then_some(run.profiler_records),
            duration_ms,
        }
    }

    async fn run_loops(
        &self,
        script: &MacroScript,
        max_loops: u32,
        variables: &mut VariableStore,
        cancel: &CancellationToken,
        run: &mut RunTally,
    ) {
        'iterations: for iteration in 1..=max_loops {
            if cancel.is_cancelled() {
                run.stop();
                return;
            }
            if iteration > 1 {
                advance_loop_counter(variables, iteration);
            }

            if let Some(datasource) = &self.datasource {
                match datasource.load_row(iteration, variables).await {
                    Ok(true) => {}
                    Ok(false) | Err(CommandError::DatasourceEnd) => {
                        info!(iteration, "datasource exhausted");
                        return;
                    }
                    Err(err) => {
                        run.abort(err.code(), err.to_string(), None);
                        return;
                    }
                }
            }

            debug!(iteration, "iteration started");
            for command in &script.commands {
                if cancel.is_cancelled() {
                    run.stop();
                    return;
                }

                let profiling = profiler::profiling_enabled(variables);
                let timestamp_ms = Utc::now().timestamp_millis();
                let timer = Instant::now();
                let result = {
                    let mut ctx =
                        HandlerContext::new(command, variables, cancel.clone(), self.retry);
                    self.registry.dispatch(command, &mut ctx).await
                };
                if profiling {
                    run.profiled = true;
                    run.profiler_records.push(ProfilerRecord {
                        line: command.line,
                        command_name: command.name.clone(),
                        raw_command: command.raw.clone(),
                        duration_ms: timer.elapsed().as_millis() as u64,
                        timestamp_ms,
                    });
                }

                if result.success {
                    continue;
                }
                if result.error_code == ErrorCode::Stopped || cancel.is_cancelled() {
                    run.stop();
                    return;
                }
                if result.error_code == ErrorCode::DatasourceEnd {
                    info!(line = command.line, "end of datasource reached");
                    return;
                }

                let message = failure_message(&result);
                match failure_action(variables) {
                    FailureAction::Continue => {
                        warn!(line = command.line, command = %command.name, code = result.error_code.value(), "ignoring failure: {}", message);
                        run.error_message = Some(message);
                    }
                    FailureAction::NextIteration => {
                        warn!(line = command.line, command = %command.name, code = result.error_code.value(), iteration, "skipping rest of iteration: {}", message);
                        run.error_message = Some(message);
                        run.loops_completed = iteration;
                        continue 'iterations;
                    }
                    FailureAction::Abort => {
                        warn!(line = command.line, command = %command.name, code = result.error_code.value(), "aborting run: {}", message);
                        run.abort(result.error_code, message, Some(command.line));
                        return;
                    }
                }
            }
            run.loops_completed = iteration;
        }
    }

    async fn write_profile(&self, script: &MacroScript, variables: &VariableStore, run: &RunTally) {
        let Some(sink) = &self.profile_sink else {
            debug!("profiling enabled but no profile sink configured");
            return;
        };
        let Some(target) = profiler::profile_target(variables, &script.name) else {
            return;
        };
        let contents = match profiler::render_profile(
            &script.name,
            &run.error_code.to_string(),
            &run.profiler_records,
        ) {
            Ok(contents) => contents,
            Err(err) => {
                warn!("failed to render profile: {}", err);
                return;
            }
        };
        if let Err(err) = sink.append(&target, &contents).await {
            warn!(target = %target, "failed to write profile: {:#}", err);
        }
    }
}

impl Default for MacroEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Set `!LOOP` for the next iteration. After an explicit `SET !LOOP` the count
/// continues from the assigned value.
fn advance_loop_counter(variables: &mut VariableStore, iteration: u32) {
    if variables.loop_overridden() {
        let previous = variables
            .number(LOOP)
            .filter(|n| n.is_finite() && *n >= 1.0)
            .map(|n| n as u32)
            .unwrap_or(iteration - 1);
        let next = previous.saturating_add(1);
        debug!(iteration, loop_value = next, "!LOOP was set explicitly, continuing from it");
        variables.set_loop_counter(next);
    } else {
        variables.set_loop_counter(iteration);
    }
}

fn failure_message(result: &CommandResult) -> String {
    match result.message() {
        "" => result.error_code.name().to_string(),
        message => message.to_string(),
    }
}

/// Builder for [`MacroEngine`]
pub struct MacroEngineBuilder {
    registry: HandlerRegistry,
    cleanup: CleanupRegistry,
    variables: VariableStore,
    datasource: Option<Arc<dyn DataSource>>,
    profile_sink: Option<Arc<dyn ProfileSink>>,
    config: EngineConfig,
}

impl Default for MacroEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroEngineBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::with_builtins(),
            cleanup: CleanupRegistry::new(),
            variables: VariableStore::new(),
            datasource: None,
            profile_sink: None,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler(mut self, name: &str, handler: Arc<dyn CommandHandler>) -> Self {
        self.registry.register(name, handler);
        self
    }

    pub fn with_module(mut self, module: Arc<dyn HandlerModule>) -> Self {
        debug!(module = module.name(), "installing handler module");
        module.install(&mut self.registry, &mut self.cleanup);
        self
    }

    pub fn with_cleanup_hook(mut self, name: &str, hook: Arc<dyn CleanupHook>) -> Self {
        self.cleanup.register(name, hook);
        self
    }

    pub fn with_datasource(mut self, datasource: Arc<dyn DataSource>) -> Self {
        self.datasource = Some(datasource);
        self
    }

    pub fn with_profile_sink(mut self, sink: Arc<dyn ProfileSink>) -> Self {
        self.profile_sink = Some(sink);
        self
    }

    /// Prime a variable before the first run
    pub fn with_variable(mut self, name: &str, value: impl Into<Value>) -> Result<Self, VariableError> {
        self.variables.set(name, value)?;
        Ok(self)
    }

    pub fn build(self) -> MacroEngine {
        let retry = self.config.retry_policy();
        MacroEngine {
            registry: self.registry,
            cleanup: self.cleanup,
            variables: tokio::sync::Mutex::new(self.variables),
            cancel: Mutex::new(CancellationToken::new()),
            datasource: self.datasource,
            profile_sink: self.profile_sink,
            config: self.config,
            retry,
        }
    }
}
