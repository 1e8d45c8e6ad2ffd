//! Built-in `SET`, `ADD` and `WAIT`

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::HandlerContext;
use crate::errors::CommandError;
use crate::registry::{CommandHandler, HandlerRegistry};
use crate::retry;
use crate::types::{Command, CommandResult, LogLevel};
use crate::value::Value;
use crate::variables::EXTRACT;

pub(crate) fn register(registry: &mut HandlerRegistry) {
    registry.register("SET", Arc::new(SetHandler));
    registry.register("ADD", Arc::new(AddHandler));
    registry.register("WAIT", Arc::new(WaitHandler));
}

/// Variable name and value operands shared by `SET` and `ADD`
fn operands(ctx: &HandlerContext<'_>) -> Result<(String, String), CommandError> {
    let name = ctx
        .arg(0)
        .ok_or_else(|| CommandError::MissingParameter("VARIABLE".into()))?
        .to_string();
    let value = ctx
        .arg(1)
        .ok_or_else(|| CommandError::MissingParameter("VALUE".into()))?
        .to_string();
    Ok((name, value))
}

/// Resolve `EVAL(...)`, otherwise apply `<SP>` / `<BR>` escapes
fn literal_value(ctx: &HandlerContext<'_>, text: &str) -> Value {
    match ctx.value_of(text) {
        Value::Str(s) if crate::expression::eval_argument(text).is_none() => {
            Value::Str(unescape(&s))
        }
        value => value,
    }
}

fn unescape(text: &str) -> String {
    text.replace("<SP>", " ")
        .replace("<sp>", " ")
        .replace("<BR>", "\n")
        .replace("<br>", "\n")
}

/// `SET <var> <value>`
pub struct SetHandler;

#[async_trait]
impl CommandHandler for SetHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        let (name, raw) = operands(ctx)?;
        let value = literal_value(ctx, &raw);
        let outcome = ctx.set_var(&name, value)?;
        ctx.log(
            LogLevel::Debug,
            &format!("{} = {} (was {})", outcome.name, outcome.current, outcome.previous),
        );
        Ok(CommandResult::ok())
    }
}

/// `ADD <var> <value>`: numeric addition when both sides are numbers (an empty
/// variable counts as 0), concatenation otherwise
pub struct AddHandler;

#[async_trait]
impl CommandHandler for AddHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        let (name, raw) = operands(ctx)?;
        let addend = literal_value(ctx, &raw);

        if name.trim().eq_ignore_ascii_case(EXTRACT) {
            ctx.set_var(EXTRACT, addend)?;
            return Ok(CommandResult::ok());
        }

        let current = ctx
            .get_var(&name)
            .ok_or_else(|| crate::errors::VariableError::Unknown(name.trim().to_ascii_uppercase()))?;
        let sum = add_values(&current, &addend);
        let outcome = ctx.set_var(&name, sum)?;
        ctx.log(
            LogLevel::Debug,
            &format!("{} = {} (was {})", outcome.name, outcome.current, outcome.previous),
        );
        Ok(CommandResult::ok())
    }
}

fn add_values(current: &Value, addend: &Value) -> Value {
    let left = if current.is_empty_string() {
        Some(0.0)
    } else {
        current.as_number()
    };
    match (left, addend.as_number()) {
        (Some(a), Some(b)) => Value::Num(a + b),
        _ => Value::Str(format!("{}{}", current, addend)),
    }
}

/// `WAIT SECONDS=<n>`; returns early with `STOPPED` on stop
pub struct WaitHandler;

#[async_trait]
impl CommandHandler for WaitHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        let raw = ctx.required_param("SECONDS")?.to_string();
        let seconds = ctx
            .value_of(&raw)
            .as_number()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .ok_or_else(|| CommandError::invalid("SECONDS", format!("'{}' is not a duration", raw)))?;

        ctx.log(LogLevel::Debug, &format!("waiting {}s", seconds));
        ctx.sleep(retry::duration_from_secs(seconds)).await?;
        Ok(CommandResult::ok())
    }
}
