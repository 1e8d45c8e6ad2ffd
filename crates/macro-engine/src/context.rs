//! Per-command handler context

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{CommandError, VariableError};
use crate::expression;
use crate::retry::{self, RetryPolicy};
use crate::types::{Command, CommandResult, LogLevel, Parameter};
use crate::value::Value;
use crate::variables::{Expansion, SetOutcome, VariableStore};

/// A parameter after placeholder expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParam {
    pub key: String,
    pub value: String,
    pub positional: bool,
    /// Expanded form of the original token
    pub token: String,
}

/// Everything a handler may touch while running one command.
///
/// Parameters are expanded once, before the handler runs, so a handler sees
/// the variable state left by the previous command.
pub struct HandlerContext<'a> {
    variables: &'a mut VariableStore,
    params: Vec<ResolvedParam>,
    cancel: CancellationToken,
    retry: RetryPolicy,
    line: usize,
    command: String,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        command: &Command,
        variables: &'a mut VariableStore,
        cancel: CancellationToken,
        retry: RetryPolicy,
    ) -> Self {
        let params = {
            let store: &VariableStore = variables;
            command
                .parameters
                .iter()
                .map(|p| resolve_param(p, store))
                .collect()
        };
        Self {
            variables,
            params,
            cancel,
            retry,
            line: command.line,
            command: command.name.clone(),
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn command_name(&self) -> &str {
        &self.command
    }

    pub fn params(&self) -> &[ResolvedParam] {
        &self.params
    }

    /// Expanded value of a keyed parameter (case-insensitive)
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| !p.positional && p.key.eq_ignore_ascii_case(key))
            .map(|p| p.value.as_str())
    }

    /// Like [`HandlerContext::param`] but fails with `MISSING_PARAMETER`
    pub fn required_param(&self, key: &str) -> Result<&str, CommandError> {
        self.param(key)
            .ok_or_else(|| CommandError::MissingParameter(key.to_ascii_uppercase()))
    }

    /// Expanded text of the n-th argument: the value of a positional token,
    /// or the whole token when it happened to contain `=`
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|p| {
            if p.positional {
                p.value.as_str()
            } else {
                p.token.as_str()
            }
        })
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.params
            .iter()
            .any(|p| p.positional && p.value.eq_ignore_ascii_case(flag))
    }

    pub fn expand(&self, text: &str) -> Expansion {
        self.variables.expand(text)
    }

    pub fn evaluate(&self, expression_text: &str) -> Value {
        self.variables.evaluate(expression_text)
    }

    /// Typed reading of an already-expanded argument: `EVAL(...)` yields the
    /// evaluated value, anything else stays a string
    pub fn value_of(&self, expanded: &str) -> Value {
        match expression::eval_argument(expanded) {
            Some(inner) => expression::evaluate(&inner),
            None => Value::from(expanded),
        }
    }

    pub fn get_var(&self, name: &str) -> Option<Value> {
        self.variables.get(name)
    }

    pub fn set_var(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<SetOutcome, VariableError> {
        self.variables.set(name, value)
    }

    pub fn variables(&self) -> &VariableStore {
        &*self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableStore {
        &mut *self.variables
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep that resolves early with `Cancelled` on stop
    pub async fn sleep(&self, duration: Duration) -> Result<(), CommandError> {
        retry::sleep_or_cancel(duration, &self.cancel).await
    }

    /// Retry budget for element lookups, from `!TIMEOUT_TAG` / `!TIMEOUT_STEP`
    pub fn tag_budget(&self) -> retry::RetryBudget {
        self.retry.budget_from(&*self.variables, crate::variables::TIMEOUT_TAG)
    }

    /// Run `operation` under the retry/timeout coordinator with the tag budget
    pub async fn retry_lookup<F, Fut>(&self, operation: F) -> CommandResult
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = CommandResult> + Send,
    {
        let budget = self.tag_budget();
        retry::execute_with_timeout_retry(&budget, &self.cancel, operation).await
    }

    /// Structured log sink tagged with the current line and command
    pub fn log(&self, level: LogLevel, message: &str) {
        let (line, command) = (self.line, self.command.as_str());
        match level {
            LogLevel::Debug => debug!(line, command, "{}", message),
            LogLevel::Info => info!(line, command, "{}", message),
            LogLevel::Warn => warn!(line, command, "{}", message),
            LogLevel::Error => error!(line, command, "{}", message),
        }
    }
}

fn resolve_param(param: &Parameter, variables: &VariableStore) -> ResolvedParam {
    ResolvedParam {
        key: param.key.clone(),
        value: variables.expand(&param.raw_value).expanded,
        positional: param.positional,
        token: variables.expand(&param.token).expanded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    #[test]
    fn test_params_are_expanded_before_use() {
        let mut store = VariableStore::new();
        store.set("!VAR1", "world").unwrap();
        let command = parse_line("URL GOTO=http://x/{{!VAR1}} FLAG", 2).unwrap();
        let ctx = HandlerContext::new(
            &command,
            &mut store,
            CancellationToken::new(),
            RetryPolicy::default(),
        );
        assert_eq!(ctx.param("goto"), Some("http://x/world"));
        assert!(ctx.has_flag("flag"));
        assert_eq!(ctx.arg(1), Some("FLAG"));
        assert!(matches!(
            ctx.required_param("MISSING"),
            Err(CommandError::MissingParameter(key)) if key == "MISSING"
        ));
    }

    #[test]
    fn test_value_of_eval() {
        let mut store = VariableStore::new();
        let command = parse_line("SET !VAR1 x", 1).unwrap();
        let ctx = HandlerContext::new(
            &command,
            &mut store,
            CancellationToken::new(),
            RetryPolicy::default(),
        );
        assert_eq!(ctx.value_of(r#"EVAL("2*21")"#), Value::Num(42.0));
        assert_eq!(ctx.value_of("42"), Value::from("42"));
    }
}
