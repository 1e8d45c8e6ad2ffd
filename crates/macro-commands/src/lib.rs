//! Browser command module
//!
//! `URL`, `TAG`, `FRAME`, `TAB`, `REFRESH`, `BACK` and `PROXY` written against
//! an injected [`BrowserBridge`]. Install into an engine with
//! [`BrowserCommands`]; module state such as the proxy backup lives in the
//! module instance.

pub mod errors;
pub mod model;
pub mod navigation;
pub mod ports;
pub mod proxy;
pub mod tag;

pub use errors::BridgeError;
pub use model::{
    ElementLocator, ExtractKind, FrameTarget, NavigateOptions, ProxySettings, TabAction,
    TagAction, TagPosition, TagQuery,
};
pub use ports::BrowserBridge;
pub use proxy::ProxyState;

use macro_engine::{CleanupRegistry, HandlerModule, HandlerRegistry};
use std::sync::Arc;

/// Cleanup hook name used by this module
pub const PROXY_RESTORE_HOOK: &str = "browser.proxy-restore";

/// Handler module bundling every browser command over one bridge
pub struct BrowserCommands {
    bridge: Arc<dyn BrowserBridge>,
    proxy: Arc<ProxyState>,
}

impl BrowserCommands {
    pub fn new(bridge: Arc<dyn BrowserBridge>) -> Self {
        Self {
            bridge,
            proxy: Arc::new(ProxyState::new()),
        }
    }

    pub fn proxy_state(&self) -> Arc<ProxyState> {
        self.proxy.clone()
    }
}

impl HandlerModule for BrowserCommands {
    fn name(&self) -> &str {
        "browser"
    }

    fn install(&self, registry: &mut HandlerRegistry, cleanup: &mut CleanupRegistry) {
        let bridge = &self.bridge;
        registry.register("URL", Arc::new(navigation::UrlHandler::new(bridge.clone())));
        registry.register("BACK", Arc::new(navigation::BackHandler::new(bridge.clone())));
        registry.register("REFRESH", Arc::new(navigation::RefreshHandler::new(bridge.clone())));
        registry.register("TAB", Arc::new(navigation::TabHandler::new(bridge.clone())));
        registry.register("FRAME", Arc::new(navigation::FrameHandler::new(bridge.clone())));
        registry.register("TAG", Arc::new(tag::TagHandler::new(bridge.clone())));
        registry.register(
            "PROXY",
            Arc::new(proxy::ProxyHandler::new(bridge.clone(), self.proxy.clone())),
        );
        cleanup.register(
            PROXY_RESTORE_HOOK,
            Arc::new(proxy::ProxyRestore::new(bridge.clone(), self.proxy.clone())),
        );
    }
}
