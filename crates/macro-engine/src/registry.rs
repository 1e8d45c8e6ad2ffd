//! Handler registry and dispatch boundary

use async_trait::async_trait;
use futures::FutureExt;
use soulmacro_core_types::ErrorCode;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

use crate::cleanup::CleanupRegistry;
use crate::context::HandlerContext;
use crate::errors::CommandError;
use crate::types::{Command, CommandResult};

/// Pluggable implementation of one macro command
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError>;
}

/// Handler used for every command without a registration (`VERSION`, `CLEAR`, ...)
pub struct NoopHandler;

#[async_trait]
impl CommandHandler for NoopHandler {
    async fn handle(
        &self,
        command: &Command,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        debug!(command = %command.name, line = command.line, "no handler registered, skipping");
        Ok(CommandResult::ok())
    }
}

/// A bundle of handlers plus the one cleanup hook they share
pub trait HandlerModule: Send + Sync {
    fn name(&self) -> &str;

    fn install(&self, registry: &mut HandlerRegistry, cleanup: &mut CleanupRegistry);
}

/// Maps upper-cased command names to handlers
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
    fallback: Arc<dyn CommandHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Empty registry; every command resolves to [`NoopHandler`]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(NoopHandler),
        }
    }

    /// Registry preloaded with `SET`, `ADD` and `WAIT`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register(&mut registry);
        registry
    }

    /// Register or replace the handler for `name`
    pub fn register(&mut self, name: &str, handler: Arc<dyn CommandHandler>) {
        let key = name.trim().to_ascii_uppercase();
        if self.handlers.insert(key.clone(), handler).is_some() {
            debug!(command = %key, "replaced command handler");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&name.trim().to_ascii_uppercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn resolve(&self, name: &str) -> Arc<dyn CommandHandler> {
        self.handlers
            .get(&name.to_ascii_uppercase())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Run the handler for `command`. Never fails: malformed lines, handler
    /// errors and panics all come back as a failed [`CommandResult`].
    pub async fn dispatch(&self, command: &Command, ctx: &mut HandlerContext<'_>) -> CommandResult {
        if let Some(reason) = &command.malformed {
            return CommandResult::failure(
                ErrorCode::SyntaxError,
                format!("Line {}: {}", command.line, reason),
            );
        }

        let handler = self.resolve(&command.name);
        match AssertUnwindSafe(handler.handle(command, ctx)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                debug!(command = %command.name, line = command.line, "handler failed: {}", err);
                err.into()
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(command = %command.name, line = command.line, "handler panicked: {}", message);
                CommandResult::failure(ErrorCode::ScriptError, message)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "Handler panicked".to_string()
    }
}
