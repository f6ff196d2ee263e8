//! Subcommand implementations.

mod lifecycle;
mod run;
mod serve;

use std::collections::BTreeMap;
use std::io::Write;
use std::process::ExitCode;

use warden::CommandSpec;
use warden_config::Config;

use crate::cli::{CliCommand, LaunchArgs};
use crate::error::AppError;

pub(crate) const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::commands");

pub(crate) fn execute<W: Write>(
    command: CliCommand,
    config: &Config,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    match command {
        CliCommand::Run(args) => run::run(args, config, stdout),
        CliCommand::Start(args) => lifecycle::start(args, config, stdout),
        CliCommand::Status { name } => lifecycle::status(&name, config, stdout),
        CliCommand::Stop { name, timeout_secs } => {
            lifecycle::stop(&name, timeout_secs, config, stdout)
        }
        CliCommand::Serve { name, logfile } => serve::serve(&name, logfile.as_deref(), config),
        CliCommand::Config => {
            serde_json::to_writer_pretty(&mut *stdout, config)?;
            writeln!(stdout)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

impl LaunchArgs {
    /// Builds the command to launch from the shared arguments.
    fn into_spec(self) -> CommandSpec {
        let env: BTreeMap<String, String> = self.env.into_iter().collect();
        let spec = CommandSpec::new(self.command).envs(env);
        match self.cwd {
            Some(cwd) => spec.cwd(cwd),
            None => spec,
        }
    }
}
