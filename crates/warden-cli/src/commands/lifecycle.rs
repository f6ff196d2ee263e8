//! `warden start`, `warden status` and `warden stop`.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tracing::info;
use warden::{
    DaemonOutput, DaemonSpec, KillOptions, KillOutcome, ProcessRunner, kill_process,
    read_locked_pid_file, remove_pid_file,
};
use warden_config::{Config, RuntimePaths};

use super::CLI_TARGET;
use crate::cli::StartArgs;
use crate::error::AppError;

fn pid_path(config: &Config, name: &str) -> Result<PathBuf, AppError> {
    Ok(RuntimePaths::from_config(config)?.pid_path(name)?)
}

pub(super) fn start<W: Write>(
    args: StartArgs,
    config: &Config,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    let pidfile = pid_path(config, &args.name)?;
    if let Some(pid) = read_locked_pid_file(&pidfile)? {
        return Err(AppError::AlreadyRunning {
            name: args.name,
            pid,
        });
    }
    let output = args.output.map_or(DaemonOutput::Null, DaemonOutput::File);
    let spec = DaemonSpec::new(args.launch.into_spec())
        .output(output)
        .pidfile(&pidfile);

    let pid = ProcessRunner::from_config(config).start_daemon(&spec)?;
    info!(target: CLI_TARGET, name = %args.name, pid, "daemon started");
    writeln!(stdout, "{pid}")?;
    Ok(ExitCode::SUCCESS)
}

pub(super) fn status<W: Write>(
    name: &str,
    config: &Config,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    match read_locked_pid_file(&pid_path(config, name)?)? {
        Some(pid) => writeln!(stdout, "{pid}")?,
        None => writeln!(stdout, "stopped")?,
    }
    Ok(ExitCode::SUCCESS)
}

pub(super) fn stop<W: Write>(
    name: &str,
    timeout_secs: Option<u64>,
    config: &Config,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    let pidfile = pid_path(config, name)?;
    let Some(pid) = read_locked_pid_file(&pidfile)? else {
        writeln!(stdout, "stopped")?;
        return Ok(ExitCode::SUCCESS);
    };
    let options = KillOptions {
        timeout: timeout_secs.map_or_else(|| config.kill_timeout(), Duration::from_secs),
        ..KillOptions::default()
    };
    let outcome = kill_process(pid, options)?;
    remove_pid_file(&pidfile);
    info!(target: CLI_TARGET, name, pid, outcome = ?outcome, "daemon stopped");
    let verb = match outcome {
        KillOutcome::ForceKilled => "killed",
        KillOutcome::NotRunning | KillOutcome::Signalled | KillOutcome::Exited => "stopped",
    };
    writeln!(stdout, "{verb} {pid}")?;
    Ok(ExitCode::SUCCESS)
}
