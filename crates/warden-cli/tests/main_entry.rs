//! Integration tests for the `warden` binary.
//!
//! Each test points the runtime directory at a fresh temporary directory so
//! PID files never leak between tests.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::boolean::PredicateBooleanExt;
use predicates::str::{contains, starts_with};
use rstest::{fixture, rstest};
use serde_json::Value;
use tempfile::TempDir;

#[fixture]
fn runtime() -> TempDir {
    TempDir::new().expect("runtime dir")
}

fn warden(runtime: &Path) -> Command {
    let mut command = cargo_bin_cmd!("warden");
    command
        .env("WARDEN_LOG_FILTER", "warn")
        .arg("--runtime-dir")
        .arg(runtime);
    command
}

fn json_stdout(command: &mut Command) -> (bool, Value) {
    let output = command.output().expect("warden runs");
    let report = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    (output.status.success(), report)
}

fn status_line(runtime: &Path, name: &str) -> String {
    let output = warden(runtime)
        .args(["status", name])
        .output()
        .expect("warden runs");
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

fn wait_for_status(runtime: &Path, name: &str, wanted: impl Fn(&str) -> bool) -> String {
    let started = Instant::now();
    loop {
        let line = status_line(runtime, name);
        if wanted(&line) || started.elapsed() > Duration::from_secs(10) {
            return line;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[rstest]
fn run_reports_captured_output(runtime: TempDir) {
    let (success, report) =
        json_stdout(warden(runtime.path()).args(["run", "--", "sh", "-c", "echo hi; echo err >&2"]));
    assert!(success);
    assert_eq!(report["stdout"], "hi\n");
    assert_eq!(report["stderr"], "err\n");
    assert_eq!(report["exit_code"], 0);
    assert_eq!(report["failed"], false);
    assert_eq!(report["fail_reason"], Value::Null);
    assert_eq!(report["command"], "sh -c 'echo hi; echo err >&2'");
}

#[rstest]
fn run_fails_with_the_command(runtime: TempDir) {
    let (success, report) = json_stdout(warden(runtime.path()).args([
        "run",
        "--env",
        "CODE=4",
        "--",
        "sh",
        "-c",
        "exit $CODE",
    ]));
    assert!(!success);
    assert_eq!(report["exit_code"], 4);
    assert_eq!(report["fail_reason"], "exited with exit code 4");
}

#[rstest]
fn run_terminates_on_timeout(runtime: TempDir) {
    let (success, report) =
        json_stdout(warden(runtime.path()).args(["run", "--timeout-secs", "1", "--", "sleep", "10"]));
    assert!(!success);
    assert_eq!(report["timeout_action"], "term");
    assert_eq!(report["signal"], 15);
}

#[rstest]
fn run_reports_missing_program(runtime: TempDir) {
    warden(runtime.path())
        .args(["run", "--", "/nonexistent/warden-cli-test"])
        .assert()
        .failure()
        .stderr(contains("not found"));
}

#[rstest]
fn disabled_fork_policy_refuses_to_run(runtime: TempDir) {
    warden(runtime.path())
        .args(["--fork-policy", "disabled", "run", "--", "true"])
        .assert()
        .failure()
        .stderr(contains("forking is disabled"));
}

#[rstest]
fn config_reflects_environment(runtime: TempDir) {
    let (success, report) = json_stdout(
        warden(runtime.path())
            .env("WARDEN_LINGER_TIMEOUT_MS", "1234")
            .arg("config"),
    );
    assert!(success);
    assert_eq!(report["linger_timeout_ms"], 1234);
    assert_eq!(report["log_filter"], "warn");
    assert_eq!(
        report["runtime_dir"],
        runtime.path().to_str().expect("utf-8 path")
    );
}

#[rstest]
fn invalid_configuration_is_reported(runtime: TempDir) {
    warden(runtime.path())
        .args(["--fork-policy", "sometimes", "config"])
        .assert()
        .failure();
}

#[rstest]
fn config_reads_configuration_file(runtime: TempDir) {
    let file = runtime.path().join("warden.toml");
    std::fs::write(&file, "kill_timeout_secs = 42\nlog_format = \"compact\"\n")
        .expect("write configuration file");
    let (success, report) = json_stdout(
        warden(runtime.path())
            .arg("--config-path")
            .arg(&file)
            .arg("config"),
    );
    assert!(success);
    assert_eq!(report["kill_timeout_secs"], 42);
    assert_eq!(report["log_format"], "compact");
}

#[rstest]
fn configuration_flags_after_the_subcommand_are_rejected(runtime: TempDir) {
    warden(runtime.path())
        .args(["config", "--fork-policy", "disabled"])
        .assert()
        .failure()
        .stderr(contains("--fork-policy"));
}

#[rstest]
fn unknown_daemon_is_stopped(runtime: TempDir) {
    warden(runtime.path())
        .args(["status", "nothing-here"])
        .assert()
        .success()
        .stdout("stopped\n");
}

#[rstest]
fn invalid_daemon_name_is_rejected(runtime: TempDir) {
    warden(runtime.path())
        .args(["status", "../escape"])
        .assert()
        .failure()
        .stderr(contains("escape"));
}

#[rstest]
fn start_status_stop_lifecycle(runtime: TempDir) {
    let output = warden(runtime.path())
        .args(["start", "sleeper", "--", "sleep", "30"])
        .output()
        .expect("warden runs");
    assert!(output.status.success(), "start failed: {output:?}");
    let pid = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    assert!(pid.parse::<i32>().is_ok_and(|value| value > 0));

    assert_eq!(status_line(runtime.path(), "sleeper"), pid);
    warden(runtime.path())
        .args(["start", "sleeper", "--", "sleep", "30"])
        .assert()
        .failure()
        .stderr(contains("already running"));

    warden(runtime.path())
        .args(["stop", "sleeper", "--timeout-secs", "2"])
        .assert()
        .success()
        .stdout(contains(pid.as_str()));
    assert_eq!(
        wait_for_status(runtime.path(), "sleeper", |line| line == "stopped"),
        "stopped"
    );
}

#[rstest]
fn serve_detaches_until_stopped(runtime: TempDir) {
    let logfile = runtime.path().join("serve.log");
    warden(runtime.path())
        .args(["serve", "svc", "--logfile"])
        .arg(&logfile)
        .assert()
        .success();

    let pid = wait_for_status(runtime.path(), "svc", |line| line != "stopped");
    assert!(pid.parse::<i32>().is_ok(), "daemon never claimed its PID file: {pid}");

    warden(runtime.path())
        .args(["stop", "svc", "--timeout-secs", "5"])
        .assert()
        .success()
        .stdout(starts_with("stopped").or(starts_with("killed")));
    assert_eq!(
        wait_for_status(runtime.path(), "svc", |line| line == "stopped"),
        "stopped"
    );
}
