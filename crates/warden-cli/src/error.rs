//! Error type of the CLI runtime.

use std::io;

use thiserror::Error;
use warden::ControlError;
use warden::telemetry::TelemetryError;
use warden_config::{ConfigError, RuntimePathsError};

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Paths(#[from] RuntimePathsError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("daemon '{name}' is already running with PID {pid}")]
    AlreadyRunning { name: String, pid: i32 },
    #[error("failed to install signal handlers: {0}")]
    Signals(io::Error),
    #[error("failed to serialise output: {0}")]
    Serialise(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Write(#[from] io::Error),
}
