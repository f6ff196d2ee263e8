//! Entry point for the `warden` process-control tool.
//!
//! All work happens in [`warden_cli::run`], which parses arguments, loads
//! configuration and dispatches to the subcommands.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    warden_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
