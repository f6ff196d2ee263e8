//! `warden run`.

use std::borrow::Cow;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use serde::Serialize;
use warden::{CommandResult, OutputSink, ProcessRunner, TimeoutAction};
use warden_config::Config;

use crate::cli::RunArgs;
use crate::error::AppError;

/// JSON rendering of a finished command.
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    command: &'a str,
    pid: u32,
    exit_code: Option<i32>,
    signal: Option<i32>,
    failed: bool,
    fail_reason: Option<&'a str>,
    timeout_action: &'static str,
    stdout: Cow<'a, str>,
    stderr: Cow<'a, str>,
}

impl<'a> From<&'a CommandResult> for RunReport<'a> {
    fn from(result: &'a CommandResult) -> Self {
        Self {
            command: result.command(),
            pid: result.pid(),
            exit_code: result.exit_code(),
            signal: result.signal(),
            failed: result.failed(),
            fail_reason: result.fail_reason(),
            timeout_action: match result.timeout_action() {
                TimeoutAction::None => "none",
                TimeoutAction::Term => "term",
                TimeoutAction::Kill => "kill",
            },
            stdout: String::from_utf8_lossy(result.stdout()),
            stderr: String::from_utf8_lossy(result.stderr()),
        }
    }
}

pub(super) fn run<W: Write>(
    args: RunArgs,
    config: &Config,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    let sink = match (args.output, args.interactive) {
        (Some(path), _) => OutputSink::File(path),
        (None, true) => OutputSink::Interactive,
        (None, false) => OutputSink::Capture,
    };
    let spec = args
        .launch
        .into_spec()
        .reset_env(args.reset_env)
        .output(sink)
        .timeout(args.timeout_secs.map(Duration::from_secs));

    let result = ProcessRunner::from_config(config).run(&spec)?;
    serde_json::to_writer(&mut *stdout, &RunReport::from(&result))?;
    writeln!(stdout)?;
    Ok(if result.failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
