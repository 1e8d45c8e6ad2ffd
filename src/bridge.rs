//! Dry-run browser bridge
//!
//! Stands in for a live browser: every action is logged and recorded, every
//! element is found, and extraction yields the locator text.

use async_trait::async_trait;
use macro_commands::{
    BridgeError, BrowserBridge, ElementLocator, FrameTarget, NavigateOptions, ProxySettings,
    TabAction, TagAction,
};
use parking_lot::Mutex;
use tracing::info;

const BLANK_PAGE: &str = "about:blank";

#[derive(Debug, Default)]
struct PageState {
    history: Vec<String>,
    proxy: ProxySettings,
}

#[derive(Debug, Default)]
pub struct DryRunBridge {
    state: Mutex<PageState>,
    actions: Mutex<Vec<String>>,
}

impl DryRunBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action performed so far, in order
    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().clone()
    }

    fn record(&self, action: String) {
        info!(target: "soulmacro::dry_run", "{}", action);
        self.actions.lock().push(action);
    }
}

#[async_trait]
impl BrowserBridge for DryRunBridge {
    async fn navigate(&self, url: &str, options: &NavigateOptions) -> Result<(), BridgeError> {
        self.record(format!(
            "navigate {} (timeout {}s, wait_complete {})",
            url,
            options.timeout.as_secs(),
            options.wait_complete
        ));
        self.state.lock().history.push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BridgeError> {
        Ok(self
            .state
            .lock()
            .history
            .last()
            .cloned()
            .unwrap_or_else(|| BLANK_PAGE.to_string()))
    }

    async fn tag(
        &self,
        locator: &ElementLocator,
        action: &TagAction,
    ) -> Result<Option<String>, BridgeError> {
        match action {
            TagAction::Click => {
                self.record(format!("click {}", locator));
                Ok(None)
            }
            TagAction::Fill(content) => {
                self.record(format!("fill {} with {:?}", locator, content));
                Ok(None)
            }
            TagAction::Extract(kind) => {
                self.record(format!("extract {:?} from {}", kind, locator));
                Ok(Some(locator.to_string()))
            }
        }
    }

    async fn select_frame(&self, target: &FrameTarget) -> Result<(), BridgeError> {
        self.record(format!("frame {:?}", target));
        Ok(())
    }

    async fn tab(&self, action: TabAction) -> Result<(), BridgeError> {
        self.record(format!("tab {:?}", action));
        Ok(())
    }

    async fn refresh(&self) -> Result<(), BridgeError> {
        self.record("refresh".to_string());
        Ok(())
    }

    async fn back(&self) -> Result<(), BridgeError> {
        self.record("back".to_string());
        self.state.lock().history.pop();
        Ok(())
    }

    async fn proxy_settings(&self) -> Result<ProxySettings, BridgeError> {
        Ok(self.state.lock().proxy.clone())
    }

    async fn apply_proxy(&self, settings: &ProxySettings) -> Result<(), BridgeError> {
        self.record(format!(
            "proxy {}",
            settings.address.as_deref().unwrap_or("direct")
        ));
        self.state.lock().proxy = settings.clone();
        Ok(())
    }
}
