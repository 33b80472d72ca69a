//! Runs the `handoff` binary against a temporary workspace.

use std::path::Path;
use std::process::{Command, Output};

const LEDGER: &str = "\
### Fix login redirect
**Status:** Not Started
**Priority:** High
**Capability:** debugging
**Estimated Time:** 20 minutes
";

fn workspace() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let project = tmp.path().join("web");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(project.join("TASKS.md"), LEDGER).unwrap();
    tmp
}

fn handoff(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_handoff"))
        .arg("--workspace")
        .arg(root)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_select_next_done_round() {
    let tmp = workspace();

    let selected = handoff(tmp.path(), &["select", "--index", "1"]);
    assert_eq!(selected.status.code(), Some(0));
    let text = stdout(&selected);
    assert!(text.contains("web_fix_login_redirect_fix"));
    assert!(text.contains("Subtask-Complete: web_fix_login_redirect_fix"));
    assert!(tmp.path().join(".handoff/state.json").exists());

    let next = handoff(tmp.path(), &["next"]);
    assert_eq!(next.status.code(), Some(0));
    assert!(stdout(&next).contains("web_fix_login_redirect_fix"));

    let done = handoff(tmp.path(), &["done", "web_fix_login_redirect_fix"]);
    assert!(stdout(&done).contains("web_fix_login_redirect_verify"));

    let closed = handoff(tmp.path(), &["done", "web_fix_login_redirect_verify"]);
    assert_eq!(closed.status.code(), Some(0));
    assert!(stdout(&closed).contains("Complete"));
    let ledger = std::fs::read_to_string(tmp.path().join("web/TASKS.md")).unwrap();
    assert!(ledger.contains("**Status:** Complete"));
}

#[test]
fn test_status_without_selection() {
    let tmp = workspace();
    let output = handoff(tmp.path(), &["status"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("No active work item"));
}

#[test]
fn test_operational_errors_exit_three() {
    let tmp = workspace();
    let next = handoff(tmp.path(), &["next"]);
    assert_eq!(next.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&next.stderr).contains("handoff select"));

    let health = handoff(tmp.path(), &["health"]);
    assert_eq!(health.status.code(), Some(3));
}

#[test]
fn test_corrupt_state_then_reset() {
    let tmp = workspace();
    std::fs::create_dir_all(tmp.path().join(".handoff")).unwrap();
    std::fs::write(tmp.path().join(".handoff/state.json"), "{ not json").unwrap();

    let status = handoff(tmp.path(), &["status"]);
    assert_eq!(status.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&status.stderr).contains("handoff reset"));

    let reset = handoff(tmp.path(), &["reset"]);
    assert_eq!(reset.status.code(), Some(0));
    assert!(stdout(&reset).contains("moved aside"));
    assert!(handoff(tmp.path(), &["status"]).status.success());
}

#[test]
fn test_agents_init_and_disable() {
    let tmp = workspace();
    assert!(handoff(tmp.path(), &["agents", "init"]).status.success());
    assert!(tmp.path().join(".handoff/agents.toml").exists());
    assert_eq!(
        handoff(tmp.path(), &["agents", "init"]).status.code(),
        Some(3)
    );

    assert!(handoff(tmp.path(), &["agents", "disable", "claude-code"])
        .status
        .success());
    let list = stdout(&handoff(tmp.path(), &["agents", "list"]));
    assert!(list.contains("claude-code (Claude Code) [disabled"));

    // Nothing else covers debugging, so dispatch fails without touching state.
    let select = handoff(tmp.path(), &["select", "--index", "1"]);
    assert_eq!(select.status.code(), Some(3));
    assert!(!tmp.path().join(".handoff/state.json").exists());
}

#[cfg(unix)]
#[test]
fn test_health_exit_code_follows_worst_severity() {
    let tmp = workspace();
    std::fs::write(
        tmp.path().join("handoff.toml"),
        r#"
[health]
command = ["sh", "-c", "echo '{\"issues\":[{\"severity\":\"Critical\",\"message\":\"db down\",\"component\":\"db\"}]}'"]
"#,
    )
    .unwrap();
    let output = handoff(tmp.path(), &["health"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).contains("[critical] db: db down"));
}

#[test]
fn test_usage_errors_exit_three() {
    let tmp = workspace();
    let unknown = handoff(tmp.path(), &["bogus"]);
    assert_eq!(unknown.status.code(), Some(3));
    assert!(!unknown.stderr.is_empty());

    let bad_index = handoff(tmp.path(), &["select", "--index", "notanumber"]);
    assert_eq!(bad_index.status.code(), Some(3));
    assert!(!tmp.path().join(".handoff/state.json").exists());

    assert_eq!(handoff(tmp.path(), &["--help"]).status.code(), Some(0));
}

#[test]
fn test_agents_add_remove_export() {
    let tmp = workspace();
    let added = handoff(
        tmp.path(),
        &[
            "agents",
            "add",
            "local-ops",
            "--name",
            "Local Ops",
            "--tier",
            "free",
            "--capability",
            "debugging,Server Ops",
            "--description",
            "Runs on the build box",
        ],
    );
    assert!(added.status.success());
    let list = stdout(&handoff(tmp.path(), &["agents", "list"]));
    assert!(list.contains("local-ops (Local Ops) [enabled, free cost]"));
    assert!(list.contains("debugging, server-ops"));

    // Duplicate ids are refused.
    let again = handoff(tmp.path(), &["agents", "add", "local-ops"]);
    assert_eq!(again.status.code(), Some(3));

    // The free executor now wins the debugging subtask.
    let select = handoff(tmp.path(), &["select", "--index", "1"]);
    assert!(stdout(&select).contains("Local Ops"));

    let exported = stdout(&handoff(tmp.path(), &["agents", "export"]));
    assert!(exported.contains("id = \"local-ops\""));
    let copy = tmp.path().join("backup.toml");
    assert!(handoff(tmp.path(), &["agents", "export", "--output", copy.to_str().unwrap()])
        .status
        .success());
    assert!(std::fs::read_to_string(&copy)
        .unwrap()
        .contains("display_name = \"Local Ops\""));

    assert!(handoff(tmp.path(), &["agents", "remove", "local-ops"])
        .status
        .success());
    let list = stdout(&handoff(tmp.path(), &["agents", "list"]));
    assert!(!list.contains("local-ops"));
    assert_eq!(
        handoff(tmp.path(), &["agents", "remove", "local-ops"])
            .status
            .code(),
        Some(3)
    );
}

#[test]
fn test_agents_remove_refuses_fallback() {
    let tmp = workspace();
    std::fs::write(
        tmp.path().join("handoff.toml"),
        "fallback_executor = \"claude-code\"\n",
    )
    .unwrap();
    let output = handoff(tmp.path(), &["agents", "remove", "claude-code"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("fallback_executor"));
    let list = stdout(&handoff(tmp.path(), &["agents", "list"]));
    assert!(list.contains("claude-code (Claude Code)"));
}
