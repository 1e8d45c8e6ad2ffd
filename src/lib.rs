//! SoulMacro - replay recorded browser macros
//!
//! Library half of the `soulmacro` binary: configuration, the session facade
//! over one [`macro_engine::MacroEngine`], the dry-run browser bridge and
//! file-backed collaborators.

pub mod bridge;
pub mod config;
pub mod datasource;
pub mod errors;
pub mod profiler;
pub mod session;

pub use bridge::DryRunBridge;
pub use config::{AppConfig, ProfilerConfig};
pub use datasource::load_csv;
pub use errors::{ConfigError, DatasourceFileError, SessionError};
pub use profiler::FileProfileSink;
pub use session::{MacroSession, STATUS_ALREADY_RUNNING, STATUS_OK, STATUS_SESSION_ERROR};

pub use macro_commands;
pub use macro_engine;

use macro_commands::{BrowserBridge, BrowserCommands};
use macro_engine::{DataSource, MacroEngine};
use std::sync::Arc;

/// Engine wired with the browser command module over `bridge`, file-backed
/// profiling and an optional datasource
pub fn build_engine(
    config: &AppConfig,
    bridge: Arc<dyn BrowserBridge>,
    datasource: Option<Arc<dyn DataSource>>,
) -> MacroEngine {
    let mut builder = MacroEngine::builder()
        .with_config(config.engine.clone())
        .with_module(Arc::new(BrowserCommands::new(bridge)))
        .with_profile_sink(Arc::new(FileProfileSink::new(
            config.profiler.output_dir.clone(),
        )));
    if let Some(datasource) = datasource {
        builder = builder.with_datasource(datasource);
    }
    builder.build()
}
