//! Tests for daemon launch and the handoff protocol.

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use tempfile::TempDir;
use warden_config::ForkPolicy;

use super::launch::search_candidates;
use super::*;
use crate::exec::DEFAULT_LINGER;
use crate::pidfile::{read_locked_pid_file, write_pid_file};
use crate::process::{KillOptions, KillOutcome, is_process_alive, kill_process};

#[fixture]
fn runtime() -> TempDir {
    TempDir::new().expect("runtime dir")
}

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

fn stop(pid: i32) {
    let options = KillOptions {
        timeout: Duration::from_secs(2),
        ..KillOptions::default()
    };
    let outcome = kill_process(pid, options).expect("kill daemon");
    assert!(
        matches!(outcome, KillOutcome::Exited | KillOutcome::ForceKilled),
        "unexpected outcome {outcome:?}"
    );
}

#[rstest]
fn daemon_holds_its_pid_file(runtime: TempDir) {
    let pidfile = runtime.path().join("sleeper.pid");
    let spec = DaemonSpec::new(CommandSpec::new(["sleep", "30"])).pidfile(&pidfile);

    let pid = ProcessRunner::default().start_daemon(&spec).expect("daemon starts");

    assert!(pid > 0);
    assert_eq!(read_locked_pid_file(&pidfile).expect("read PID file"), Some(pid));
    assert!(is_process_alive(pid).expect("liveness check"));
    assert!(write_pid_file(&pidfile).is_err(), "the daemon owns the lock");

    stop(pid);
    assert!(wait_until(Duration::from_secs(5), || {
        matches!(read_locked_pid_file(&pidfile), Ok(None))
    }));
}

#[rstest]
fn bad_program_reports_exec_failure(runtime: TempDir) {
    let pidfile = runtime.path().join("broken.pid");
    let spec =
        DaemonSpec::new(CommandSpec::new(["/nonexistent/warden-daemon"])).pidfile(&pidfile);

    let error = ProcessRunner::default()
        .start_daemon(&spec)
        .expect_err("exec fails");

    assert!(error.is_execution_error(), "unexpected error {error:?}");
    let message = error.to_string();
    assert!(
        message.starts_with("Error when starting daemon process: \"executing command: ENOENT"),
        "unexpected message {message}"
    );
    assert!(wait_until(Duration::from_secs(5), || {
        matches!(read_locked_pid_file(&pidfile), Ok(None))
    }));
    drop(write_pid_file(&pidfile).expect("lock is free again"));
}

#[rstest]
fn locked_pid_file_stops_the_launch(runtime: TempDir) {
    let pidfile = runtime.path().join("taken.pid");
    let held = write_pid_file(&pidfile).expect("claim");
    let spec = DaemonSpec::new(CommandSpec::new(["sleep", "30"])).pidfile(&pidfile);

    let error = ProcessRunner::default()
        .start_daemon(&spec)
        .expect_err("second claim fails");

    assert!(error.is_execution_error());
    assert!(error.to_string().contains("claiming PID file"));
    assert_eq!(
        read_locked_pid_file(&pidfile).expect("read PID file"),
        Some(held.pid())
    );
}

#[rstest]
fn daemon_output_environment_and_directory(runtime: TempDir) {
    let log = runtime.path().join("daemon.log");
    let workdir = runtime.path().canonicalize().expect("canonical path");
    let command = CommandSpec::shell("echo \"$WARDEN_DAEMON_VAR:$LC_ALL\"; pwd -P; umask")
        .env("WARDEN_DAEMON_VAR", "hello")
        .cwd(&workdir);
    let spec = DaemonSpec::new(command).output(DaemonOutput::File(log.clone()));

    ProcessRunner::default().start_daemon(&spec).expect("daemon starts");

    let expected = format!("hello:C\n{}\n0077\n", workdir.display());
    assert!(
        wait_until(Duration::from_secs(5), || {
            fs::read_to_string(&log).is_ok_and(|text| text == expected)
        }),
        "log holds {:?}",
        fs::read_to_string(&log)
    );
}

#[rstest]
fn disabled_policy_rejects_daemons() {
    let runner = ProcessRunner::new(ForkPolicy::Disabled, DEFAULT_LINGER);
    let spec = DaemonSpec::new(CommandSpec::new(["true"]));
    assert!(runner.start_daemon(&spec).expect_err("disabled").is_programmer_error());
    assert!(runner.daemonize(None).expect_err("disabled").is_programmer_error());
}

#[rstest]
fn empty_command_is_rejected() {
    let spec = DaemonSpec::new(CommandSpec::new(Vec::<OsString>::new()));
    let error = ProcessRunner::default()
        .start_daemon(&spec)
        .expect_err("nothing to run");
    assert!(error.is_programmer_error());
}

#[rstest]
#[case::pid(b"", b"4242", Ok(4242))]
#[case::error_wins(b"boom", b"4242", Err("Error when starting daemon process: \"boom\""))]
#[case::garbage(
    b"",
    b"abc",
    Err("Error while trying to parse PID \"abc\": invalid digit found in string")
)]
#[case::nothing(
    b"",
    b"",
    Err("Error while trying to parse PID \"\": cannot parse integer from empty string")
)]
fn decodes_handoff(
    #[case] error_text: &[u8],
    #[case] pid_text: &[u8],
    #[case] expected: Result<i32, &str>,
) {
    let decoded = decode_handoff(error_text, pid_text).map_err(|error| error.to_string());
    assert_eq!(decoded.as_ref().copied().map_err(String::as_str), expected);
}

#[rstest]
#[case::absolute("/bin/true", "/usr/bin:/bin", &["/bin/true"])]
#[case::relative("./run", "/usr/bin", &["./run"])]
#[case::searched("true", "/usr/local/bin:/bin", &["/usr/local/bin/true", "/bin/true"])]
#[case::empty_entry("true", ":/bin", &["./true", "/bin/true"])]
fn resolves_program_like_execvp(
    #[case] program: &str,
    #[case] search_path: &str,
    #[case] expected: &[&str],
) {
    let candidates = search_candidates(program.as_ref(), search_path.as_ref());
    let rendered: Vec<&str> = candidates
        .iter()
        .map(|candidate| candidate.to_str().expect("utf-8"))
        .collect();
    assert_eq!(rendered, expected);
}

#[rstest]
fn daemonize_reports_readiness(runtime: TempDir) {
    let log = runtime.path().join("self.log");
    let runner = ProcessRunner::default();
    let log_path: &Path = &log;

    let original_failed = runner
        .run_in_separate_process(|| {
            let Ok(handle) = runner.daemonize(Some(log_path)) else {
                return true;
            };
            let _written = crate::fd::write_all_retrying(libc::STDOUT_FILENO, b"detached\n");
            handle.report_ready();
            false
        })
        .expect("original process exits cleanly");

    assert!(!original_failed);
    assert!(wait_until(Duration::from_secs(5), || {
        fs::read_to_string(&log).is_ok_and(|text| text == "detached\n")
    }));
}

#[rstest]
fn daemonize_relays_failure() {
    let runner = ProcessRunner::default();

    let original_failed = runner
        .run_in_separate_process(|| {
            let Ok(handle) = runner.daemonize(None) else {
                return false;
            };
            let _sent = handle.report_failure("cannot bind socket");
            false
        })
        .expect("original process exits");

    assert!(original_failed, "the original process exits with status 1");
}
