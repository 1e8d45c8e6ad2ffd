use macro_commands::{BrowserBridge, ProxySettings};
use macro_engine::{ErrorCode, MacroEngine, Value};
use soulmacro_cli::{
    build_engine, AppConfig, DryRunBridge, MacroSession, STATUS_ALREADY_RUNNING, STATUS_OK,
};
use std::sync::Arc;
use std::time::Duration;

fn dry_run_session() -> (Arc<MacroSession>, Arc<DryRunBridge>) {
    let bridge = Arc::new(DryRunBridge::new());
    let engine = build_engine(&AppConfig::default(), bridge.clone(), None);
    (Arc::new(MacroSession::new(Arc::new(engine))), bridge)
}

async fn wait_until_running(session: &MacroSession) {
    while !session.is_running() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn second_play_while_running_is_rejected() {
    let session = Arc::new(MacroSession::new(Arc::new(MacroEngine::new())));

    let background = session.clone();
    let first = tokio::spawn(async move { background.play("WAIT SECONDS=30").await });
    wait_until_running(&session).await;

    assert_eq!(session.play("SET !VAR1 x").await, STATUS_ALREADY_RUNNING);
    assert!(session.set_variable("!VAR1", "x").is_err());

    session.stop();
    let status = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .expect("stop should end the wait promptly")
        .unwrap();
    assert_eq!(status, ErrorCode::Stopped.value());
    assert_eq!(session.last_error(), "Macro stopped");
}

#[tokio::test]
async fn exit_stops_and_leaves_session_reusable() {
    let session = Arc::new(MacroSession::new(Arc::new(MacroEngine::new())));
    session.set_variable("!VAR2", "primed").unwrap();

    let background = session.clone();
    let run = tokio::spawn(async move { background.play("WAIT SECONDS=30").await });
    wait_until_running(&session).await;

    session.exit().await.unwrap();
    assert_eq!(run.await.unwrap(), ErrorCode::Stopped.value());
    assert_eq!(session.get_variable("!VAR2").unwrap(), Some(Value::empty()));

    assert_eq!(session.play("SET !VAR1 10\nADD !VAR1 5").await, STATUS_OK);
    assert_eq!(session.get_variable("!VAR1").unwrap(), Some(Value::Num(15.0)));
}

#[tokio::test]
async fn primed_variables_reach_the_macro() {
    let (session, bridge) = dry_run_session();
    session.set_variable("!VAR1", "example.com/search").unwrap();

    let status = session
        .play("URL GOTO={{!VAR1}}\nTAG POS=1 TYPE=A ATTR=TXT:Next EXTRACT=TXT")
        .await;
    assert_eq!(status, STATUS_OK);
    assert_eq!(session.last_extract(), "A TXT=Next");
    assert_eq!(
        bridge.current_url().await.unwrap(),
        "http://example.com/search"
    );
}

#[tokio::test]
async fn proxy_is_restored_when_the_run_ends() {
    let (session, bridge) = dry_run_session();

    let status = session
        .play("PROXY ADDRESS=10.0.0.1:3128\nSET !NOPE 1")
        .await;
    assert_eq!(status, ErrorCode::InvalidParameter.value());

    assert_eq!(bridge.proxy_settings().await.unwrap(), ProxySettings::direct());
    let actions = bridge.actions();
    assert_eq!(
        actions,
        vec!["proxy 10.0.0.1:3128".to_string(), "proxy direct".to_string()]
    );
}

#[tokio::test]
async fn failed_run_reports_code_and_message() {
    let (session, _bridge) = dry_run_session();
    let status = session.play("SET !VAR1 ok\nURL\nSET !VAR2 never").await;
    assert_eq!(status, ErrorCode::MissingParameter.value());
    assert_eq!(session.last_error(), "Missing parameter: GOTO");

    let result = session.last_result().unwrap();
    assert_eq!(result.failed_line, Some(2));
    assert_eq!(result.variable("!VAR2"), Some(&Value::empty()));
}
