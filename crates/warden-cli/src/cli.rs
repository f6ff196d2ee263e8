//! Command-line argument definitions for `warden`.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

const CONFIG_HELP: &str = "\
Configuration flags, given before the subcommand:
  --config-path FILE        TOML configuration file
  --log-filter FILTER       tracing filter expression
  --log-format FORMAT       json or compact
  --runtime-dir DIR         directory holding daemon PID files
  --linger-timeout-ms MS    grace period after the terminate signal
  --kill-timeout-secs SECS  wait before a stopped daemon is killed
  --fork-policy POLICY      allowed or disabled

Each flag can also be set through WARDEN_<NAME> or the configuration file.";

/// Process and daemon control from the command line.
#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    disable_help_subcommand = true,
    after_help = CONFIG_HELP
)]
pub(crate) struct Cli {
    /// Action to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Subcommands of `warden`.
#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Runs a command to completion and prints its result as JSON.
    Run(RunArgs),
    /// Starts a command as a named daemon and prints its PID.
    Start(StartArgs),
    /// Prints the PID of a named daemon, or `stopped`.
    Status {
        /// Daemon name.
        name: String,
    },
    /// Stops a named daemon, killing it if it does not exit in time.
    Stop {
        /// Daemon name.
        name: String,
        /// Seconds to wait before sending SIGKILL.
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
    },
    /// Detaches `warden` itself as a named daemon until it is signalled.
    Serve {
        /// Daemon name.
        name: String,
        /// File receiving the daemon's output and logs.
        #[arg(long, value_name = "FILE")]
        logfile: Option<PathBuf>,
    },
    /// Prints the effective configuration as JSON.
    Config,
}

/// Program, environment and working directory of a launched command.
#[derive(Args, Debug)]
pub(crate) struct LaunchArgs {
    /// Working directory of the command.
    #[arg(long, value_name = "DIR")]
    pub(crate) cwd: Option<PathBuf>,
    /// Extra environment variable; may be repeated.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub(crate) env: Vec<(String, String)>,
    /// Program and arguments, after `--`.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) command: Vec<OsString>,
}

/// Arguments of `warden run`.
#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Seconds before the command is terminated.
    #[arg(long, value_name = "SECS")]
    pub(crate) timeout_secs: Option<u64>,
    /// Append output to this file instead of capturing it.
    #[arg(long, value_name = "FILE", conflicts_with = "interactive")]
    pub(crate) output: Option<PathBuf>,
    /// Connect the command to this terminal.
    #[arg(long)]
    pub(crate) interactive: bool,
    /// Start from an empty environment plus `--env` entries.
    #[arg(long)]
    pub(crate) reset_env: bool,
    #[command(flatten)]
    pub(crate) launch: LaunchArgs,
}

/// Arguments of `warden start`.
#[derive(Args, Debug)]
pub(crate) struct StartArgs {
    /// Daemon name; selects the PID file.
    pub(crate) name: String,
    /// Append the daemon's output to this file.
    #[arg(long, value_name = "FILE")]
    pub(crate) output: Option<PathBuf>,
    #[command(flatten)]
    pub(crate) launch: LaunchArgs,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("missing variable name in '{raw}'")),
        Some((key, value)) => Ok((key.to_owned(), value.to_owned())),
        None => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use rstest::rstest;

    use super::*;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case::plain("A=b", Ok(("A", "b")))]
    #[case::equals_in_value("A=b=c", Ok(("A", "b=c")))]
    #[case::empty_value("A=", Ok(("A", "")))]
    #[case::missing_separator("A", Err(()))]
    #[case::missing_name("=b", Err(()))]
    fn parses_env_pairs(#[case] raw: &str, #[case] expected: Result<(&str, &str), ()>) {
        let parsed = parse_env_pair(raw);
        let simplified = parsed
            .as_ref()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .map_err(|_| ());
        assert_eq!(simplified, expected);
    }

    #[test]
    fn run_collects_trailing_command() {
        let cli = Cli::try_parse_from([
            "warden", "run", "--timeout-secs", "3", "--env", "A=1", "--", "sh", "-c", "exit 2",
        ])
        .expect("parses");
        let CliCommand::Run(args) = cli.command else {
            panic!("expected run, got {:?}", cli.command);
        };
        assert_eq!(args.timeout_secs, Some(3));
        assert_eq!(args.launch.env, [(String::from("A"), String::from("1"))]);
        assert_eq!(args.launch.command, ["sh", "-c", "exit 2"]);
    }

    #[test]
    fn output_and_interactive_conflict() {
        let error = Cli::try_parse_from([
            "warden", "run", "--output", "/tmp/x", "--interactive", "--", "true",
        ])
        .expect_err("flags conflict");
        assert_eq!(error.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
