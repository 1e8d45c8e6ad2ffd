//! Retry/timeout coordination for element-seeking commands

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::CommandError;
use crate::types::CommandResult;
use crate::variables::{VariableStore, TIMEOUT_STEP};
use soulmacro_core_types::ErrorCode;

/// Message used when a lookup timed out without saying why
pub const NOT_FOUND_FALLBACK: &str = "Element not found";

/// Seconds as a duration; non-positive or NaN is zero, values past the
/// representable range saturate
pub fn duration_from_secs(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Engine-wide retry pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Preferred pause between attempts
    pub retry_interval: Duration,

    /// Floor for the pause, also used when `!TIMEOUT_STEP` is 0
    pub min_retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(100),
            min_retry_interval: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_interval: Duration, min_retry_interval: Duration) -> Self {
        Self {
            retry_interval,
            min_retry_interval: min_retry_interval.min(retry_interval),
        }
    }

    /// Pause between attempts for a given `!TIMEOUT_STEP` value in seconds
    pub fn step_interval(&self, step_seconds: f64) -> Duration {
        let step = duration_from_secs(step_seconds);
        self.retry_interval.min(step).max(self.min_retry_interval)
    }

    /// Budget of `budget_var` seconds, paced by `!TIMEOUT_STEP`
    pub fn budget_from(&self, variables: &VariableStore, budget_var: &str) -> RetryBudget {
        let seconds = variables.number(budget_var).unwrap_or(0.0);
        let step = variables.number(TIMEOUT_STEP).unwrap_or(0.0);
        RetryBudget {
            timeout: duration_from_secs(seconds),
            interval: self.step_interval(step),
        }
    }
}

/// Time budget of one retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub timeout: Duration,
    pub interval: Duration,
}

impl RetryBudget {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Sleep for `duration`, returning `Cancelled` as soon as `cancel` fires
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), CommandError> {
    if cancel.is_cancelled() {
        return Err(CommandError::Cancelled);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(CommandError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Invoke `operation` until it succeeds, fails with a non-retryable code, or
/// the budget runs out.
///
/// Only `ELEMENT_NOT_FOUND` / `ELEMENT_NOT_VISIBLE` failures are retried. On
/// exhaustion the result is `TIMEOUT` carrying the last failure message. The
/// first attempt always runs, even with a zero budget.
pub async fn execute_with_timeout_retry<F, Fut>(
    budget: &RetryBudget,
    cancel: &CancellationToken,
    mut operation: F,
) -> CommandResult
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = CommandResult> + Send,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    let mut last_message: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return CommandError::Cancelled.into();
        }

        attempts += 1;
        let remaining = budget.timeout.saturating_sub(started.elapsed());
        let attempt_limit = remaining.max(budget.interval);

        let result = tokio::select! {
            _ = cancel.cancelled() => return CommandError::Cancelled.into(),
            outcome = tokio::time::timeout(attempt_limit, operation()) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    debug!(attempts, "attempt exceeded the remaining budget");
                    return timed_out(last_message);
                }
            },
        };

        if result.success {
            if attempts > 1 {
                debug!(attempts, "operation succeeded after retry");
            }
            return result;
        }
        if !result.error_code.is_retryable() {
            return result;
        }
        if !result.message().is_empty() {
            last_message = result.error_message;
        }

        let remaining = budget.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            debug!(attempts, budget_ms = budget.timeout.as_millis() as u64, "retry budget exhausted");
            return timed_out(last_message);
        }

        if sleep_or_cancel(budget.interval.min(remaining), cancel).await.is_err() {
            return CommandError::Cancelled.into();
        }
    }
}

fn timed_out(last_message: Option<String>) -> CommandResult {
    let message = last_message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| NOT_FOUND_FALLBACK.to_string());
    CommandResult::failure(ErrorCode::Timeout, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_duration_from_secs_saturates() {
        assert_eq!(duration_from_secs(1.5), Duration::from_millis(1500));
        assert_eq!(duration_from_secs(-3.0), Duration::ZERO);
        assert_eq!(duration_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(duration_from_secs(1e300), Duration::MAX);
        assert_eq!(duration_from_secs(f64::INFINITY), Duration::MAX);

        let mut store = VariableStore::new();
        store.set("!TIMEOUT_STEP", "4294967295").unwrap();
        let budget = RetryPolicy::default().budget_from(&store, "!TIMEOUT_TAG");
        assert_eq!(budget.interval, Duration::from_millis(100));
    }

    fn not_found(message: &str) -> CommandResult {
        CommandResult::failure(ErrorCode::ElementNotFound, message)
    }

    #[test]
    fn test_step_interval_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.step_interval(6.0), Duration::from_millis(100));
        assert_eq!(policy.step_interval(0.05), Duration::from_millis(50));
        assert_eq!(policy.step_interval(0.0), Duration::from_millis(10));
        assert_eq!(policy.step_interval(f64::NAN), Duration::from_millis(10));
    }

    #[test]
    fn test_budget_from_variables() {
        let mut store = VariableStore::new();
        store.set("!TIMEOUT_TAG", "3").unwrap();
        let budget = RetryPolicy::default().budget_from(&store, crate::variables::TIMEOUT_TAG);
        assert_eq!(budget.timeout, Duration::from_secs(3));
        assert_eq!(budget.interval, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let budget = RetryBudget::new(Duration::from_secs(1), Duration::from_millis(50));
        let counter = calls.clone();
        let result = execute_with_timeout_retry(&budget, &CancellationToken::new(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    not_found("missing")
                } else {
                    CommandResult::with_output("found")
                }
            }
        })
        .await;

        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("found"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_times_out_after_budget() {
        let budget = RetryBudget::new(Duration::from_secs(2), Duration::from_millis(100));
        let started = Instant::now();
        let result = execute_with_timeout_retry(&budget, &CancellationToken::new(), || async {
            not_found("no TAG match")
        })
        .await;
        let elapsed = started.elapsed();

        assert_eq!(result.error_code, ErrorCode::Timeout);
        assert_eq!(result.message(), "no TAG match");
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_generic_message() {
        let budget = RetryBudget::new(Duration::from_millis(300), Duration::from_millis(100));
        let result =
            execute_with_timeout_retry(&budget, &CancellationToken::new(), || async { not_found("") })
                .await;
        assert_eq!(result.error_code, ErrorCode::Timeout);
        assert_eq!(result.message(), NOT_FOUND_FALLBACK);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let budget = RetryBudget::new(Duration::from_secs(5), Duration::from_millis(10));
        let result = execute_with_timeout_retry(&budget, &CancellationToken::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { CommandResult::failure(ErrorCode::ScriptError, "bridge down") }
        })
        .await;
        assert_eq!(result.error_code, ErrorCode::ScriptError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let budget = RetryBudget::new(Duration::from_secs(60), Duration::from_secs(30));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result =
            execute_with_timeout_retry(&budget, &cancel, || async { not_found("missing") }).await;
        assert_eq!(result.error_code, ErrorCode::Stopped);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_or_cancel_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = tokio_test::block_on(sleep_or_cancel(Duration::from_secs(10), &cancel));
        assert!(matches!(outcome, Err(CommandError::Cancelled)));
    }
}
