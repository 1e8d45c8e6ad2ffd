use async_trait::async_trait;
use macro_commands::{
    BridgeError, BrowserBridge, BrowserCommands, ElementLocator, FrameTarget, NavigateOptions,
    ProxySettings, TabAction, TagAction,
};
use macro_engine::{ErrorCode, MacroEngine, MacroScript, RunOptions, RunState, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Bridge double: records every call and fails lookups a configured number
/// of times before succeeding
struct ScriptedBridge {
    calls: Mutex<Vec<String>>,
    misses_left: Mutex<u32>,
    proxy: Mutex<ProxySettings>,
    navigation_error: Option<BridgeError>,
}

impl ScriptedBridge {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            misses_left: Mutex::new(0),
            proxy: Mutex::new(ProxySettings {
                address: Some("corp.proxy:3128".into()),
                bypass: vec!["localhost".into()],
            }),
            navigation_error: None,
        }
    }

    fn missing_for(self, attempts: u32) -> Self {
        *self.misses_left.lock() = attempts;
        self
    }

    fn failing_navigation(mut self, err: BridgeError) -> Self {
        self.navigation_error = Some(err);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn lookup(&self, what: &str) -> Result<(), BridgeError> {
        let mut misses = self.misses_left.lock();
        if *misses > 0 {
            *misses -= 1;
            return Err(BridgeError::NotFound(what.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserBridge for ScriptedBridge {
    async fn navigate(&self, url: &str, _options: &NavigateOptions) -> Result<(), BridgeError> {
        self.record(format!("navigate {}", url));
        match &self.navigation_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn current_url(&self) -> Result<String, BridgeError> {
        let calls = self.calls.lock();
        let last = calls
            .iter()
            .rev()
            .find_map(|call| call.strip_prefix("navigate "))
            .unwrap_or("about:blank");
        Ok(last.to_string())
    }

    async fn tag(
        &self,
        locator: &ElementLocator,
        action: &TagAction,
    ) -> Result<Option<String>, BridgeError> {
        self.record(format!("tag {}", locator));
        self.lookup(&locator.to_string())?;
        Ok(match action {
            TagAction::Extract(_) => Some(format!("text of {}", locator)),
            _ => None,
        })
    }

    async fn select_frame(&self, target: &FrameTarget) -> Result<(), BridgeError> {
        self.record(format!("frame {:?}", target));
        self.lookup("frame")
    }

    async fn tab(&self, action: TabAction) -> Result<(), BridgeError> {
        self.record(format!("tab {:?}", action));
        Ok(())
    }

    async fn refresh(&self) -> Result<(), BridgeError> {
        self.record("refresh");
        Ok(())
    }

    async fn back(&self) -> Result<(), BridgeError> {
        self.record("back");
        Ok(())
    }

    async fn proxy_settings(&self) -> Result<ProxySettings, BridgeError> {
        self.record("proxy_settings");
        Ok(self.proxy.lock().clone())
    }

    async fn apply_proxy(&self, settings: &ProxySettings) -> Result<(), BridgeError> {
        self.record(format!(
            "apply_proxy {}",
            settings.address.as_deref().unwrap_or("direct")
        ));
        *self.proxy.lock() = settings.clone();
        Ok(())
    }
}

fn engine_with(bridge: Arc<ScriptedBridge>) -> MacroEngine {
    MacroEngine::builder()
        .with_module(Arc::new(BrowserCommands::new(bridge)))
        .build()
}

async fn run(engine: &MacroEngine, text: &str) -> macro_engine::ExecutionResult {
    engine
        .execute(&MacroScript::parse("browser", text), RunOptions::default())
        .await
        .expect("engine idle")
}

#[tokio::test(start_paused = true)]
async fn tag_retries_until_element_appears_and_extracts() {
    let bridge = Arc::new(ScriptedBridge::new().missing_for(2));
    let engine = engine_with(bridge.clone());
    let result = run(
        &engine,
        "TAG POS=1 TYPE=SPAN ATTR=CLASS:price EXTRACT=TXT\nSET !VAR1 {{!EXTRACT}}",
    )
    .await;

    assert!(result.success, "{:?}", result.error_message);
    let tag_calls = bridge.calls().iter().filter(|c| c.starts_with("tag")).count();
    assert_eq!(tag_calls, 3);
    assert_eq!(result.extract_data, vec!["text of SPAN CLASS=price"]);
    assert_eq!(
        result.variable("!VAR1"),
        Some(&Value::from("text of SPAN CLASS=price"))
    );
}

#[tokio::test(start_paused = true)]
async fn tag_times_out_with_last_failure_message() {
    let bridge = Arc::new(ScriptedBridge::new().missing_for(u32::MAX));
    let engine = engine_with(bridge.clone());
    let started = tokio::time::Instant::now();
    let result = run(&engine, "SET !TIMEOUT_TAG 1\nTAG POS=1 TYPE=A ATTR=TXT:Next").await;

    assert_eq!(result.error_code, ErrorCode::Timeout);
    assert_eq!(result.failed_line, Some(2));
    assert_eq!(
        result.error_message.as_deref(),
        Some("Element not found: A TXT=Next")
    );
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn tag_shape_errors_precede_browser_calls() {
    let bridge = Arc::new(ScriptedBridge::new());
    let engine = engine_with(bridge.clone());

    let result = run(&engine, "TAG POS=1 ATTR=NAME:q").await;
    assert_eq!(result.error_code, ErrorCode::MissingParameter);

    let result = run(&engine, "TAG POS=zero TYPE=A").await;
    assert_eq!(result.error_code, ErrorCode::InvalidParameter);

    let result = run(&engine, "TAG POS=1 TYPE=INPUT:TEXT CONTENT=a EXTRACT=TXT").await;
    assert_eq!(result.error_code, ErrorCode::InvalidParameter);

    assert!(bridge.calls().is_empty());
}

#[tokio::test]
async fn tag_content_expands_variables_and_escapes() {
    let bridge = Arc::new(ScriptedBridge::new());
    let engine = engine_with(bridge.clone());
    let result = run(
        &engine,
        "SET !VAR1 world\nTAG XPATH=//input[@name='q'] CONTENT=hello<SP>{{!VAR1}}",
    )
    .await;
    assert!(result.success);
    assert_eq!(bridge.calls(), vec!["tag xpath //input[@name='q']"]);
}

#[tokio::test]
async fn url_navigates_and_records_current_url() {
    let bridge = Arc::new(ScriptedBridge::new());
    let engine = engine_with(bridge.clone());
    let result = run(&engine, "URL GOTO=example.com/start\nREFRESH\nBACK").await;
    assert!(result.success);
    assert_eq!(
        bridge.calls(),
        vec!["navigate http://example.com/start", "refresh", "back"]
    );
    assert_eq!(
        result.variable("!URLCURRENT"),
        Some(&Value::from("http://example.com/start"))
    );
}

#[tokio::test]
async fn navigation_failures_are_script_errors() {
    let bridge = Arc::new(
        ScriptedBridge::new().failing_navigation(BridgeError::Navigation("ERR_NAME_NOT_RESOLVED".into())),
    );
    let engine = engine_with(bridge);
    let result = run(&engine, "URL GOTO=https://nowhere.invalid").await;
    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.error_code, ErrorCode::ScriptError);
    assert!(result
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("ERR_NAME_NOT_RESOLVED"));
}

#[tokio::test]
async fn url_requires_goto() {
    let bridge = Arc::new(ScriptedBridge::new());
    let engine = engine_with(bridge);
    let result = run(&engine, "URL").await;
    assert_eq!(result.error_code, ErrorCode::MissingParameter);
}

#[tokio::test]
async fn tab_and_frame_commands() {
    let bridge = Arc::new(ScriptedBridge::new());
    let engine = engine_with(bridge.clone());
    let result = run(&engine, "TAB OPEN\nTAB T=2\nFRAME F=1\nFRAME NAME=main\nTAB CLOSEALLOTHERS").await;
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(
        bridge.calls(),
        vec![
            "tab Open",
            "tab Select(2)",
            "frame Index(1)",
            "frame Name(\"main\")",
            "tab CloseAllOthers"
        ]
    );

    let result = run(&engine, "TAB").await;
    assert_eq!(result.error_code, ErrorCode::MissingParameter);
}

#[tokio::test]
async fn proxy_is_backed_up_once_and_restored_after_run() {
    let bridge = Arc::new(ScriptedBridge::new());
    let module = Arc::new(BrowserCommands::new(bridge.clone()));
    let state = module.proxy_state();
    let engine = MacroEngine::builder().with_module(module).build();

    let result = run(
        &engine,
        "PROXY ADDRESS=127.0.0.1:8080\nPROXY ADDRESS=__NONE__\nSET !NOSUCHVAR 1",
    )
    .await;
    assert!(!result.success);
    assert_eq!(
        bridge.calls(),
        vec![
            "proxy_settings",
            "apply_proxy 127.0.0.1:8080",
            "apply_proxy direct",
            "apply_proxy corp.proxy:3128"
        ]
    );
    assert!(!state.is_backed_up());

    // a run without PROXY leaves the browser alone
    let before = bridge.calls().len();
    run(&engine, "SET !VAR1 1").await;
    assert_eq!(bridge.calls().len(), before);
}

#[tokio::test]
async fn proxy_rejects_bad_address() {
    let bridge = Arc::new(ScriptedBridge::new());
    let engine = engine_with(bridge.clone());
    let result = run(&engine, "PROXY ADDRESS=nohostport").await;
    assert_eq!(result.error_code, ErrorCode::InvalidParameter);
    assert!(bridge.calls().is_empty());
}
