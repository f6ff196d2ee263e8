//! Behavioural tests for command execution and run-parts.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use tempfile::TempDir;
use warden_config::ForkPolicy;

use super::*;
use crate::process::is_process_alive;

#[fixture]
fn runner() -> ProcessRunner {
    ProcessRunner::default()
}

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new(["/bin/sh", "-c", script])
}

fn text(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).expect("utf-8 output")
}

fn write_script(dir: &Path, name: &str, body: &str, mode: u32) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("chmod script");
}

#[rstest]
fn captures_stdout_of_successful_command(runner: ProcessRunner) {
    let result = runner.run(&sh("echo hi")).expect("run");
    assert_eq!(result.stdout(), b"hi\n");
    assert!(result.stderr().is_empty());
    assert_eq!(result.exit_code(), Some(0));
    assert!(!result.failed());
    assert_eq!(result.fail_reason(), None);
    assert_eq!(result.command(), "/bin/sh -c 'echo hi'");
}

#[rstest]
fn reports_exit_code_and_stderr(runner: ProcessRunner) {
    let result = runner.run(&sh("echo out; echo oops >&2; exit 3")).expect("run");
    assert_eq!(result.exit_code(), Some(3));
    assert_eq!(result.signal(), None);
    assert_eq!(text(result.stderr()), "oops\n");
    assert_eq!(text(&result.output()), "out\noops\n");
    assert_eq!(result.fail_reason(), Some("exited with exit code 3"));
}

#[rstest]
fn reports_killing_signal(runner: ProcessRunner) {
    let result = runner.run(&sh("kill -KILL $$")).expect("run");
    assert_eq!(result.exit_code(), None);
    assert_eq!(result.signal(), Some(libc::SIGKILL));
    assert!(result.failed());
    assert_eq!(result.fail_reason(), Some("terminated by signal 9"));
}

#[rstest]
fn drains_large_output_without_deadlock(runner: ProcessRunner) {
    let result = runner
        .run(&sh("head -c 200000 /dev/zero; head -c 100000 /dev/zero >&2"))
        .expect("run");
    assert_eq!(result.stdout().len(), 200_000);
    assert_eq!(result.stderr().len(), 100_000);
}

#[rstest]
fn shell_commands_keep_their_text(runner: ProcessRunner) {
    let spec = CommandSpec::shell("echo $((1 + 2))");
    assert_eq!(spec.rendered(), "echo $((1 + 2))");
    let result = runner.run(&spec).expect("run");
    assert_eq!(text(result.stdout()), "3\n");
}

#[rstest]
fn timeout_terminates_sleeping_command(runner: ProcessRunner) {
    let started = Instant::now();
    let result = runner
        .run(&CommandSpec::new(["sleep", "5"]).timeout(Some(Duration::from_secs(1))))
        .expect("run");
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(result.failed());
    assert_eq!(result.signal(), Some(libc::SIGTERM));
    assert_eq!(result.timeout_action(), TimeoutAction::Term);
    let reason = result.fail_reason().expect("failed command has a reason");
    assert!(
        reason.contains("terminated after timeout of 1.00 seconds"),
        "unexpected reason: {reason}"
    );
    let pid = i32::try_from(result.pid()).expect("pid fits");
    assert!(!is_process_alive(pid).expect("liveness check"));
}

#[test]
fn ignored_term_escalates_to_kill() {
    let runner = ProcessRunner::new(ForkPolicy::Allowed, Duration::from_millis(500));
    let result = runner
        .run(&sh("trap '' TERM; exec sleep 10").timeout(Some(Duration::from_millis(500))))
        .expect("run");
    assert_eq!(result.signal(), Some(libc::SIGKILL));
    assert_eq!(result.timeout_action(), TimeoutAction::Kill);
    assert_eq!(
        result.fail_reason(),
        Some(
            "terminated by signal 9, force termination after timeout of 0.50 seconds \
             and linger for another 0.50 seconds"
        )
    );
}

#[test]
fn timeout_applies_after_output_closes() {
    let runner = ProcessRunner::new(ForkPolicy::Allowed, Duration::from_secs(2));
    let result = runner
        .run(&sh("exec >/dev/null 2>&1; exec sleep 10").timeout(Some(Duration::from_millis(300))))
        .expect("run");
    assert_eq!(result.timeout_action(), TimeoutAction::Term);
    assert_eq!(result.signal(), Some(libc::SIGTERM));
}

#[rstest]
fn fast_command_within_timeout_is_untouched(runner: ProcessRunner) {
    let result = runner
        .run(&sh("echo quick").timeout(Some(Duration::from_secs(10))))
        .expect("run");
    assert_eq!(result.timeout_action(), TimeoutAction::None);
    assert_eq!(result.fail_reason(), None);
}

#[rstest]
fn missing_program_is_an_execution_error(runner: ProcessRunner) {
    let error = runner
        .run(&CommandSpec::new(["/nonexistent/warden-test-binary", "--flag"]))
        .expect_err("cannot run");
    assert!(error.is_execution_error(), "unexpected error: {error:?}");
    let message = error.to_string();
    assert!(message.contains("not found"), "unexpected message: {message}");
    assert!(message.contains("/nonexistent/warden-test-binary"));
}

#[test]
fn disabled_fork_policy_rejects_spawning() {
    let runner = ProcessRunner::new(ForkPolicy::Disabled, DEFAULT_LINGER);
    let run = runner
        .run(&CommandSpec::new(["true"]))
        .expect_err("forking is disabled");
    assert!(run.is_programmer_error());
    let parts = runner
        .run_parts(Path::new("/"), &PartsOptions::default())
        .expect_err("forking is disabled");
    assert!(parts.is_programmer_error());
}

#[rstest]
fn empty_argv_is_a_programming_error(runner: ProcessRunner) {
    let error = runner
        .run(&CommandSpec::new(Vec::<String>::new()))
        .expect_err("nothing to run");
    assert!(error.is_programmer_error());
}

#[rstest]
fn default_environment_forces_c_locale(runner: ProcessRunner) {
    let result = runner
        .run(&sh("echo \"$WARDEN_TEST_VAR:$LC_ALL\"").env("WARDEN_TEST_VAR", "set"))
        .expect("run");
    assert_eq!(text(result.stdout()), "set:C\n");
}

#[rstest]
fn caller_entries_override_locale(runner: ProcessRunner) {
    let result = runner
        .run(&sh("echo \"$LC_ALL\"").env("LC_ALL", "POSIX"))
        .expect("run");
    assert_eq!(text(result.stdout()), "POSIX\n");
}

#[rstest]
fn reset_environment_is_exactly_the_given_map(runner: ProcessRunner) {
    let spec = sh("echo \"$WARDEN_TEST_VAR:$LC_ALL:$HOME\"")
        .env("WARDEN_TEST_VAR", "only")
        .reset_env(true);
    assert_eq!(spec.environment().len(), 1);
    let result = runner.run(&spec).expect("run");
    assert_eq!(text(result.stdout()), "only::\n");
}

#[rstest]
fn runs_from_root_by_default(runner: ProcessRunner) {
    let result = runner.run(&sh("pwd -P")).expect("run");
    assert_eq!(text(result.stdout()), "/\n");
}

#[rstest]
fn honours_working_directory(runner: ProcessRunner) {
    let dir = TempDir::new().expect("temp dir");
    let canonical = dir.path().canonicalize().expect("canonical path");
    let result = runner.run(&sh("pwd -P").cwd(dir.path())).expect("run");
    assert_eq!(text(result.stdout()).trim_end(), canonical.to_str().expect("utf-8 path"));
}

#[rstest]
fn file_sink_appends_both_streams(runner: ProcessRunner) {
    let dir = TempDir::new().expect("temp dir");
    let log = dir.path().join("command.log");
    let spec = sh("echo out; echo err >&2").output(OutputSink::File(log.clone()));
    for _ in 0..2 {
        let result = runner.run(&spec).expect("run");
        assert!(result.stdout().is_empty());
        assert!(result.stderr().is_empty());
        assert!(!result.failed());
    }
    assert_eq!(fs::read_to_string(&log).expect("log"), "out\nerr\nout\nerr\n");
}

#[rstest]
fn file_sink_honours_timeout(runner: ProcessRunner) {
    let dir = TempDir::new().expect("temp dir");
    let spec = CommandSpec::new(["sleep", "5"])
        .output(OutputSink::File(dir.path().join("sleep.log")))
        .timeout(Some(Duration::from_millis(300)));
    let result = runner.run(&spec).expect("run");
    assert_eq!(result.timeout_action(), TimeoutAction::Term);
}

#[rstest]
fn stdin_is_closed(runner: ProcessRunner) {
    let result = runner
        .run(&sh("cat; echo done").timeout(Some(Duration::from_secs(5))))
        .expect("run");
    assert_eq!(text(result.stdout()), "done\n");
    assert_eq!(result.timeout_action(), TimeoutAction::None);
}

#[rstest]
fn run_parts_reports_each_entry(runner: ProcessRunner) {
    let dir = TempDir::new().expect("temp dir");
    write_script(dir.path(), "10-first", "echo first", 0o755);
    write_script(dir.path(), "20_second", "exit 2", 0o755);
    write_script(dir.path(), "README.txt", "echo never", 0o755);
    write_script(dir.path(), "noexec", "echo never", 0o644);
    write_script(dir.path(), ".hidden", "echo never", 0o755);
    fs::create_dir(dir.path().join("sub")).expect("mkdir");

    let reports = runner
        .run_parts(dir.path(), &PartsOptions::default())
        .expect("run parts");
    let names: Vec<&str> = reports.iter().map(|report| report.name.as_str()).collect();
    assert_eq!(names, ["10-first", "20_second", "README.txt", "noexec", "sub"]);

    let statuses: Vec<&PartStatus> = reports.iter().map(|report| &report.status).collect();
    let [first, second, readme, noexec, sub] = statuses.as_slice() else {
        panic!("expected five reports, got {reports:?}");
    };
    let PartStatus::Ran(first) = first else {
        panic!("first part should run: {first:?}");
    };
    assert_eq!(text(first.stdout()), "first\n");
    let PartStatus::Ran(second) = second else {
        panic!("second part should run: {second:?}");
    };
    assert_eq!(second.exit_code(), Some(2));
    for skipped in [readme, noexec, sub] {
        assert_eq!(**skipped, PartStatus::Skipped);
    }
}

#[rstest]
fn run_parts_passes_environment(runner: ProcessRunner) {
    let dir = TempDir::new().expect("temp dir");
    write_script(dir.path(), "show", "echo \"$PART_VAR\"", 0o755);
    let options = PartsOptions {
        env: [("PART_VAR".into(), "value".into())].into_iter().collect(),
        reset_env: false,
    };
    let reports = runner.run_parts(dir.path(), &options).expect("run parts");
    let [PartReport {
        status: PartStatus::Ran(result),
        ..
    }] = reports.as_slice()
    else {
        panic!("expected one run, got {reports:?}");
    };
    assert_eq!(text(result.stdout()), "value\n");
}

#[rstest]
fn run_parts_on_missing_directory_is_empty(runner: ProcessRunner) {
    let dir = TempDir::new().expect("temp dir");
    let reports = runner
        .run_parts(&dir.path().join("absent"), &PartsOptions::default())
        .expect("run parts");
    assert!(reports.is_empty());
}

#[test]
fn abandoned_child_is_killed_and_reaped() {
    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn sleep");
    let pid = i32::try_from(child.id()).expect("pid fits");

    super::run::abandon(&mut child);

    assert!(!is_process_alive(pid).expect("liveness check"));
    let status = child.try_wait().expect("status").expect("already reaped");
    assert_eq!(std::os::unix::process::ExitStatusExt::signal(&status), Some(9));
}
