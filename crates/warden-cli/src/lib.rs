//! Command-line runtime of the `warden` tool.
//!
//! [`run`] splits leading configuration flags from the subcommand, parses the
//! subcommand, loads configuration, installs logging and dispatches. Output
//! streams are passed in so tests can capture them.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use warden::telemetry::{self, LogSink};
use warden_config::Config;

mod cli;
mod commands;
mod config;
mod error;

use cli::{Cli, CliCommand};
use config::split_arguments;
use error::AppError;

/// Runs the CLI with `args` and the given output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let split = split_arguments(args);
    let cli = match Cli::try_parse_from(split.command) {
        Ok(cli) => cli,
        Err(error) if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            return match write!(stdout, "{error}") {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            };
        }
        Err(error) => return report(stderr, &AppError::CliUsage(error)),
    };

    let outcome = Config::load_checked(split.config)
        .map_err(AppError::from)
        .and_then(|config| {
            // A detached daemon installs logging once its output is redirected.
            if !matches!(cli.command, CliCommand::Serve { .. }) {
                telemetry::initialise(&config, LogSink::Terminal)?;
            }
            commands::execute(cli.command, &config, stdout)
        });
    match outcome {
        Ok(code) => code,
        Err(error) => report(stderr, &error),
    }
}

fn report<E: Write>(stderr: &mut E, error: &AppError) -> ExitCode {
    let _written = writeln!(stderr, "{error}");
    ExitCode::FAILURE
}
