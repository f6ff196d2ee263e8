//! `warden serve`: the CLI itself as a supervised daemon.

use std::path::Path;
use std::process::ExitCode;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;
use warden::telemetry::{self, LogSink};
use warden::{ProcessRunner, read_locked_pid_file, remove_pid_file, write_pid_file};
use warden_config::{Config, RuntimePaths};

use super::CLI_TARGET;
use crate::error::AppError;

/// Detaches, claims the PID file, and waits for a termination signal.
///
/// Only the daemon returns from here; the invoking process exits inside
/// [`ProcessRunner::daemonize`] once the daemon reports.
pub(super) fn serve(name: &str, logfile: Option<&Path>, config: &Config) -> Result<ExitCode, AppError> {
    let pidfile = RuntimePaths::from_config(config)?.pid_path(name)?;
    if let Some(pid) = read_locked_pid_file(&pidfile)? {
        return Err(AppError::AlreadyRunning {
            name: name.to_owned(),
            pid,
        });
    }

    let handle = ProcessRunner::from_config(config).daemonize(logfile)?;
    let claimed = telemetry::initialise(config, LogSink::Detached)
        .map_err(AppError::from)
        .and_then(|_| write_pid_file(&pidfile).map_err(AppError::from))
        .and_then(|lock| {
            Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
                .map(|signals| (lock, signals))
                .map_err(AppError::Signals)
        });
    let (lock, mut signals) = match claimed {
        Ok(ready) => ready,
        Err(error) => {
            handle.report_failure(&error.to_string())?;
            return Err(error);
        }
    };
    handle.report_ready();
    info!(target: CLI_TARGET, name, pid = lock.pid(), "serving until signalled");

    if let Some(signal) = signals.forever().next() {
        info!(target: CLI_TARGET, name, signal, "shutdown signal received");
    }
    drop(lock);
    remove_pid_file(&pidfile);
    Ok(ExitCode::SUCCESS)
}
