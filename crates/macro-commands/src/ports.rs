use async_trait::async_trait;

use crate::errors::BridgeError;
use crate::model::{ElementLocator, FrameTarget, NavigateOptions, ProxySettings, TabAction, TagAction};

/// The browser side of every command in this crate
#[async_trait]
pub trait BrowserBridge: Send + Sync {
    async fn navigate(&self, url: &str, options: &NavigateOptions) -> Result<(), BridgeError>;

    async fn current_url(&self) -> Result<String, BridgeError>;

    /// Locate an element and apply `action`; extraction returns the text
    async fn tag(
        &self,
        locator: &ElementLocator,
        action: &TagAction,
    ) -> Result<Option<String>, BridgeError>;

    async fn select_frame(&self, target: &FrameTarget) -> Result<(), BridgeError>;

    async fn tab(&self, action: TabAction) -> Result<(), BridgeError>;

    async fn refresh(&self) -> Result<(), BridgeError>;

    async fn back(&self) -> Result<(), BridgeError>;

    async fn proxy_settings(&self) -> Result<ProxySettings, BridgeError>;

    async fn apply_proxy(&self, settings: &ProxySettings) -> Result<(), BridgeError>;
}
