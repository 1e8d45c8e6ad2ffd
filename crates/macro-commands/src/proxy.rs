//! `PROXY` command and the end-of-run restore hook

use async_trait::async_trait;
use macro_engine::{
    CleanupHook, Command, CommandError, CommandHandler, CommandResult, HandlerContext, LogLevel,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use crate::model::ProxySettings;
use crate::ports::BrowserBridge;

/// Keyword for "no proxy" in `ADDRESS=`
pub const DIRECT: &str = "__NONE__";

/// Proxy configuration saved before the first `PROXY` of a run
#[derive(Debug, Default)]
pub struct ProxyState {
    backup: Mutex<Option<ProxySettings>>,
}

impl ProxyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_backed_up(&self) -> bool {
        self.backup.lock().is_some()
    }

    /// Keep `settings` unless a backup already exists
    pub fn save(&self, settings: ProxySettings) -> bool {
        let mut backup = self.backup.lock();
        if backup.is_some() {
            return false;
        }
        *backup = Some(settings);
        true
    }

    pub fn take(&self) -> Option<ProxySettings> {
        self.backup.lock().take()
    }
}

/// Parse `ADDRESS=` / `BYPASS=` into settings
pub fn parse_proxy(address: &str, bypass: Option<&str>) -> Result<ProxySettings, CommandError> {
    let address = address.trim();
    let bypass: Vec<String> = match bypass.map(str::trim) {
        None | Some("") => Vec::new(),
        Some(list) if list.eq_ignore_ascii_case("null") => Vec::new(),
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect(),
    };

    if address.is_empty() || address.eq_ignore_ascii_case(DIRECT) {
        return Ok(ProxySettings {
            address: None,
            bypass,
        });
    }

    let host_port = address
        .split_once("://")
        .map_or(address, |(_, rest)| rest);
    let valid = host_port
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false);
    if !valid {
        return Err(CommandError::invalid(
            "ADDRESS",
            format!("'{}' is not host:port", address),
        ));
    }

    Ok(ProxySettings {
        address: Some(address.to_string()),
        bypass,
    })
}

/// `PROXY ADDRESS=<host:port> [BYPASS=<list>]`
pub struct ProxyHandler {
    bridge: Arc<dyn BrowserBridge>,
    state: Arc<ProxyState>,
}

impl ProxyHandler {
    pub fn new(bridge: Arc<dyn BrowserBridge>, state: Arc<ProxyState>) -> Self {
        Self { bridge, state }
    }
}

#[async_trait]
impl CommandHandler for ProxyHandler {
    async fn handle(
        &self,
        _command: &Command,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<CommandResult, CommandError> {
        let settings = parse_proxy(ctx.required_param("ADDRESS")?, ctx.param("BYPASS"))?;

        if !self.state.is_backed_up() {
            let current = self.bridge.proxy_settings().await?;
            self.state.save(current);
            ctx.log(LogLevel::Debug, "saved browser proxy settings");
        }

        self.bridge.apply_proxy(&settings).await?;
        ctx.log(
            LogLevel::Info,
            &format!(
                "proxy set to {}",
                settings.address.as_deref().unwrap_or("direct")
            ),
        );
        Ok(CommandResult::ok())
    }
}

/// Puts the saved proxy back when the run ends
pub struct ProxyRestore {
    bridge: Arc<dyn BrowserBridge>,
    state: Arc<ProxyState>,
}

impl ProxyRestore {
    pub fn new(bridge: Arc<dyn BrowserBridge>, state: Arc<ProxyState>) -> Self {
        Self { bridge, state }
    }
}

#[async_trait]
impl CleanupHook for ProxyRestore {
    async fn run(&self) -> anyhow::Result<()> {
        if let Some(backup) = self.state.take() {
            self.bridge.apply_proxy(&backup).await?;
            info!(
                address = backup.address.as_deref().unwrap_or("direct"),
                "restored browser proxy"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxy() {
        let settings = parse_proxy("127.0.0.1:8080", Some("localhost, *.internal")).unwrap();
        assert_eq!(settings.address.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(settings.bypass, vec!["localhost", "*.internal"]);

        assert_eq!(parse_proxy("__none__", None).unwrap(), ProxySettings::direct());
        assert!(parse_proxy("http://proxy.lan:3128", Some("null")).unwrap().bypass.is_empty());
        assert!(parse_proxy("proxy.lan", None).is_err());
        assert!(parse_proxy(":80", None).is_err());
        assert!(parse_proxy("host:99999", None).is_err());
    }

    #[test]
    fn test_state_keeps_first_backup() {
        let state = ProxyState::new();
        assert!(state.save(ProxySettings::direct()));
        assert!(!state.save(ProxySettings {
            address: Some("a:1".into()),
            bypass: Vec::new(),
        }));
        assert_eq!(state.take(), Some(ProxySettings::direct()));
        assert!(!state.is_backed_up());
    }
}
