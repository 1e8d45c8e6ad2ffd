//! `URL`, `BACK`, `REFRESH`, `TAB` and `FRAME`

use async_trait::async_trait;
use macro_engine::retry;
use macro_engine::variables::{TIMEOUT_PAGE, WAITPAGECOMPLETE};
use macro_engine::{Command, CommandError, CommandHandler, CommandResult, HandlerContext, LogLevel};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::errors::BridgeError;
use crate::model::{FrameTarget, NavigateOptions, TabAction};
use crate::ports::BrowserBridge;

const URL_CURRENT: &str = "!URLCURRENT";

/// Normalise a `GOTO=` target; bare hosts get `http://`
pub fn normalize_url(target: &str) -> Result<Url, url::ParseError> {
    let target = target.trim();
    match Url::parse(target) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("http://{}", target)),
        Err(err) => Err(err),
    }
}

/// Race a bridge call against stop and an optional page-load limit
async fn bounded<T, F>(
    ctx: &HandlerContext<'_>,
    limit: Option<Duration>,
    call: F,
) -> Result<T, CommandError>
where
    F: Future<Output = Result<T, BridgeError>> + Send,
{
    let bounded_call = async {
        match limit {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome.map_err(CommandError::from),
                Err(_) => Err(CommandError::Timeout(format!(
                    "Page load exceeded {}s",
                    limit.as_secs_f64()
                ))),
            },
            None => call.await.map_err(CommandError::from),
        }
    };
    tokio::select! {
        _ = ctx.cancel_token().cancelled() => Err(CommandError::Cancelled),
        outcome = bounded_call => outcome,
    }
}

fn page_limit(ctx: &HandlerContext<'_>) -> Option<Duration> {
    ctx.variables()
        .number(TIMEOUT_PAGE)
        .filter(|seconds| *seconds > 0.0)
        .map(retry::duration_from_secs)
}

async fn record_current_url(
    bridge: &Arc<dyn BrowserBridge>,
    ctx: &mut HandlerContext<'_>,
    fallback: &str,
) -> Result<(), CommandError> {
    let current = match bridge.current_url().await {
        Ok(url) => url,
        Err(err) => {
            debug!("current url unavailable: {}", err);
            fallback.to_string()
        }
    };
    ctx.set_var(URL_CURRENT, current)?;
    Ok(())
}

/// `URL GOTO=<url>`
pub struct UrlHandler {
    bridge: Arc<dyn BrowserBridge>,
}

impl UrlHandler {
    pub fn new(bridge: Arc<dyn BrowserBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl CommandHandler for UrlHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        let target = ctx.required_param("GOTO")?;
        let url = normalize_url(target)
            .map_err(|err| CommandError::invalid("GOTO", format!("'{}': {}", target, err)))?;

        let limit = page_limit(ctx);
        let options = NavigateOptions {
            timeout: limit.unwrap_or(Duration::ZERO),
            wait_complete: ctx.variables().is_yes(WAITPAGECOMPLETE),
        };
        ctx.log(LogLevel::Info, &format!("navigating to {}", url));
        bounded(ctx, limit, self.bridge.navigate(url.as_str(), &options)).await?;

        record_current_url(&self.bridge, ctx, url.as_str()).await?;
        Ok(CommandResult::ok())
    }
}

/// `BACK`
pub struct BackHandler {
    bridge: Arc<dyn BrowserBridge>,
}

impl BackHandler {
    pub fn new(bridge: Arc<dyn BrowserBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl CommandHandler for BackHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        bounded(ctx, page_limit(ctx), self.bridge.back()).await?;
        record_current_url(&self.bridge, ctx, "").await?;
        Ok(CommandResult::ok())
    }
}

/// `REFRESH`
pub struct RefreshHandler {
    bridge: Arc<dyn BrowserBridge>,
}

impl RefreshHandler {
    pub fn new(bridge: Arc<dyn BrowserBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl CommandHandler for RefreshHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        bounded(ctx, page_limit(ctx), self.bridge.refresh()).await?;
        Ok(CommandResult::ok())
    }
}

/// `TAB T=<n> | OPEN | CLOSE | CLOSEALLOTHERS`
pub struct TabHandler {
    bridge: Arc<dyn BrowserBridge>,
}

impl TabHandler {
    pub fn new(bridge: Arc<dyn BrowserBridge>) -> Self {
        Self { bridge }
    }
}

fn tab_action(ctx: &HandlerContext<'_>) -> Result<TabAction, CommandError> {
    if let Some(index) = ctx.param("T") {
        return index
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .map(TabAction::Select)
            .ok_or_else(|| CommandError::invalid("T", format!("'{}' is not a tab number", index)));
    }
    if ctx.has_flag("CLOSEALLOTHERS") {
        Ok(TabAction::CloseAllOthers)
    } else if ctx.has_flag("CLOSE") {
        Ok(TabAction::Close)
    } else if ctx.has_flag("OPEN") {
        Ok(TabAction::Open)
    } else {
        Err(CommandError::MissingParameter("T".into()))
    }
}

#[async_trait]
impl CommandHandler for TabHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        let action = tab_action(ctx)?;
        bounded(ctx, None, self.bridge.tab(action)).await?;
        Ok(CommandResult::ok())
    }
}

/// `FRAME F=<n>` or `FRAME NAME=<name>`; retried like TAG
pub struct FrameHandler {
    bridge: Arc<dyn BrowserBridge>,
}

impl FrameHandler {
    pub fn new(bridge: Arc<dyn BrowserBridge>) -> Self {
        Self { bridge }
    }
}

fn frame_target(ctx: &HandlerContext<'_>) -> Result<FrameTarget, CommandError> {
    if let Some(index) = ctx.param("F") {
        return index
            .trim()
            .parse::<u32>()
            .map(FrameTarget::Index)
            .map_err(|_| CommandError::invalid("F", format!("'{}' is not a frame number", index)));
    }
    ctx.param("NAME")
        .map(|name| FrameTarget::Name(name.to_string()))
        .ok_or_else(|| CommandError::MissingParameter("F".into()))
}

#[async_trait]
impl CommandHandler for FrameHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        let target = frame_target(ctx)?;
        let bridge = &self.bridge;
        let result = ctx
            .retry_lookup(|| {
                let bridge = bridge.clone();
                let target = target.clone();
                async move {
                    match bridge.select_frame(&target).await {
                        Ok(()) => CommandResult::ok(),
                        Err(err) => CommandError::from(err).into(),
                    }
                }
            })
            .await;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://example.com/a?b=1").unwrap().as_str(),
            "https://example.com/a?b=1"
        );
        assert_eq!(
            normalize_url("example.com").unwrap().as_str(),
            "http://example.com/"
        );
        assert_eq!(normalize_url("about:blank").unwrap().as_str(), "about:blank");
        assert!(normalize_url("http://[::1").is_err());
    }
}
