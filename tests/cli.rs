use assert_cmd::prelude::*;
use serde_json::Value;
use std::fs;
use std::process::Command;

fn soulmacro() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("soulmacro"));
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn play_reports_json_result() {
    let dir = tempfile::tempdir().unwrap();
    let macro_path = dir.path().join("count.iim");
    fs::write(
        &macro_path,
        "VERSION BUILD=1\nADD !VAR1 1\nTAG POS=1 TYPE=SPAN ATTR=CLASS:price EXTRACT=TXT\n",
    )
    .unwrap();

    let assert = soulmacro()
        .current_dir(dir.path())
        .args(["--output", "json", "play"])
        .arg(&macro_path)
        .args(["--loops", "3"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    let value: Value = serde_json::from_str(&stdout).expect("valid json");
    assert_eq!(value["status"].as_i64(), Some(1));
    assert_eq!(value["macro_name"].as_str(), Some("count"));
    assert_eq!(value["state"].as_str(), Some("Completed"));
    assert_eq!(value["loops_completed"].as_u64(), Some(3));
    assert_eq!(value["variables"]["!VAR1"].as_f64(), Some(3.0));
    assert_eq!(value["extract_data"].as_array().unwrap().len(), 3);
}

#[test]
fn play_with_vars_and_profile() {
    let dir = tempfile::tempdir().unwrap();
    let macro_path = dir.path().join("greet.iim");
    fs::write(&macro_path, "SET !VAR2 {{!VAR1}}<SP>there\n").unwrap();

    let assert = soulmacro()
        .current_dir(dir.path())
        .args(["-o", "json", "play"])
        .arg(&macro_path)
        .args(["--var", "!VAR1=hello", "--profile"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let value: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["variables"]["!VAR2"].as_str(), Some("hello there"));

    let profile = fs::read_to_string(dir.path().join("greet.profile.csv")).unwrap();
    let mut lines = profile.lines();
    assert!(lines.next().unwrap().starts_with("Macro: greet,"));
    assert_eq!(lines.next(), Some("Line,Command,Duration_ms,Timestamp"));
    assert!(lines.next().unwrap().starts_with("1,"));
}

#[test]
fn play_failure_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let macro_path = dir.path().join("bad.iim");
    fs::write(&macro_path, "SET !TIMEOUT soon\n").unwrap();

    soulmacro()
        .current_dir(dir.path())
        .arg("play")
        .arg(&macro_path)
        .assert()
        .failure()
        .code(1);
}

#[test]
fn play_with_datasource_runs_one_loop_per_row() {
    let dir = tempfile::tempdir().unwrap();
    let macro_path = dir.path().join("rows.iim");
    let csv_path = dir.path().join("rows.csv");
    fs::write(&macro_path, "ADD !VAR1 {{!COL2}}\n").unwrap();
    fs::write(&csv_path, "a,1\nb,2\nc,3\n").unwrap();

    let assert = soulmacro()
        .current_dir(dir.path())
        .args(["-o", "json", "play"])
        .arg(&macro_path)
        .args(["--loops", "10", "--datasource"])
        .arg(&csv_path)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let value: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["variables"]["!VAR1"].as_f64(), Some(6.0));
    assert_eq!(value["variables"]["!DATASOURCE_LINE"].as_f64(), Some(3.0));
}

#[test]
fn check_flags_malformed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let macro_path = dir.path().join("broken.iim");
    fs::write(&macro_path, "SET !VAR1 ok\nSET !VAR2 \"open\n").unwrap();

    let assert = soulmacro()
        .args(["-o", "json", "check"])
        .arg(&macro_path)
        .assert()
        .failure();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let value: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["commands"].as_u64(), Some(2));
    assert_eq!(value["malformed"][0]["line"].as_u64(), Some(2));
}

#[test]
fn eval_prints_value() {
    let assert = soulmacro().args(["eval", "1+2*3"]).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert_eq!(stdout.trim(), "7");

    let assert = soulmacro().args(["eval", "1/0"]).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert_eq!(stdout.trim(), "Infinity");
}
