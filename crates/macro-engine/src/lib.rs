//! Macro Replay Engine
//!
//! Interprets recorded browser macros: parses the line-oriented macro language,
//! keeps the typed variable store, drives loops under the ERRORIGNORE /
//! ERRORLOOP policy and guarantees cleanup when a run ends. Browser-facing
//! commands are plugged in through [`CommandHandler`] and [`HandlerModule`].

pub mod builtins;
pub mod cleanup;
pub mod context;
pub mod errors;
pub mod executor;
pub mod expression;
pub mod parser;
pub mod ports;
pub mod profiler;
pub mod registry;
pub mod retry;
pub mod types;
pub mod value;
pub mod variables;

pub use cleanup::{hook_fn, CleanupHook, CleanupRegistry};
pub use context::{HandlerContext, ResolvedParam};
pub use errors::{CommandError, EngineError, VariableError};
pub use executor::{EngineConfig, MacroEngine, MacroEngineBuilder, RunOptions};
pub use ports::{DataSource, MemoryProfileSink, ProfileSink, RowsDataSource};
pub use registry::{CommandHandler, HandlerModule, HandlerRegistry, NoopHandler};
pub use retry::{execute_with_timeout_retry, RetryBudget, RetryPolicy};
pub use soulmacro_core_types::{ErrorCode, RunId};
pub use types::{
    Command, CommandResult, ExecutionResult, LogLevel, MacroScript, Parameter, ProfilerRecord,
    RunState,
};
pub use value::Value;
pub use variables::{Expansion, SetOutcome, VariableStore};
