//! `TAG` command

use async_trait::async_trait;
use macro_engine::variables::EXTRACT;
use macro_engine::{Command, CommandError, CommandHandler, CommandResult, HandlerContext, LogLevel};
use std::sync::Arc;

use crate::model::{ElementLocator, ExtractKind, TagAction, TagPosition, TagQuery};
use crate::ports::BrowserBridge;

/// Locates an element (retrying within `!TIMEOUT_TAG`) and clicks, fills or
/// extracts from it
pub struct TagHandler {
    bridge: Arc<dyn BrowserBridge>,
}

impl TagHandler {
    pub fn new(bridge: Arc<dyn BrowserBridge>) -> Self {
        Self { bridge }
    }
}

/// Resolve `EVAL(...)` and the `<SP>` / `<BR>` escapes of a text value
pub(crate) fn text_value(ctx: &HandlerContext<'_>, raw: &str) -> String {
    ctx.value_of(raw)
        .to_string()
        .replace("<SP>", " ")
        .replace("<BR>", "\n")
}

/// Build the locator and action, checking parameter shape before any
/// browser call
pub(crate) fn parse_request(
    ctx: &HandlerContext<'_>,
) -> Result<(ElementLocator, TagAction), CommandError> {
    let locator = if let Some(xpath) = ctx.param("XPATH") {
        ElementLocator::XPath(xpath.to_string())
    } else if let Some(selector) = ctx.param("SELECTOR") {
        ElementLocator::Selector(selector.to_string())
    } else {
        let pos_text = ctx.required_param("POS")?;
        let pos = TagPosition::parse(pos_text).ok_or_else(|| {
            CommandError::invalid("POS", format!("'{}' is not a position", pos_text))
        })?;
        let (element, input_type) = TagQuery::parse_type(ctx.required_param("TYPE")?);
        let attr_text = ctx.param("ATTR").unwrap_or("*");
        let attributes = TagQuery::parse_attributes(attr_text).ok_or_else(|| {
            CommandError::invalid("ATTR", format!("'{}' is not NAME:VALUE[&&...]", attr_text))
        })?;
        ElementLocator::Tag(TagQuery {
            pos,
            element,
            input_type,
            attributes,
        })
    };

    let action = match (ctx.param("CONTENT"), ctx.param("EXTRACT")) {
        (Some(_), Some(_)) => {
            return Err(CommandError::invalid(
                "CONTENT",
                "cannot be combined with EXTRACT",
            ))
        }
        (Some(content), None) => TagAction::Fill(text_value(ctx, content)),
        (None, Some(kind)) => TagAction::Extract(ExtractKind::parse(kind)),
        (None, None) => TagAction::Click,
    };

    Ok((locator, action))
}

#[async_trait]
impl CommandHandler for TagHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        let (locator, action) = parse_request(ctx)?;
        ctx.log(LogLevel::Debug, &format!("locating {}", locator));

        let bridge = &self.bridge;
        let result = ctx
            .retry_lookup(|| {
                let bridge = bridge.clone();
                let locator = locator.clone();
                let action = action.clone();
                async move {
                    match bridge.tag(&locator, &action).await {
                        Ok(Some(text)) => CommandResult::with_output(text),
                        Ok(None) => CommandResult::ok(),
                        Err(err) => CommandError::from(err).into(),
                    }
                }
            })
            .await;

        if result.success {
            if let (TagAction::Extract(_), Some(text)) = (&action, &result.output) {
                ctx.set_var(EXTRACT, text.as_str())?;
            }
        }
        Ok(result)
    }
}
