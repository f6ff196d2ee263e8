//! Separation of configuration flags from the subcommand line.
//!
//! Configuration flags are handed to `ortho_config`, which owns their parsing
//! together with the file and environment layers. They must precede the
//! subcommand; everything from the first other token on belongs to `clap`.

use std::ffi::{OsStr, OsString};

/// Flags understood by the configuration loader.
///
/// Keep in sync with the fields of [`warden_config::Config`].
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--runtime-dir",
    "--linger-timeout-ms",
    "--kill-timeout-secs",
    "--fork-policy",
];

/// Arguments split between the configuration loader and the command parser.
/// Both halves start with the program name.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ArgumentSplit {
    pub(crate) config: Vec<OsString>,
    pub(crate) command: Vec<OsString>,
}

/// Whether `argument` is a configuration flag, and if so whether its value
/// is the following token.
fn config_flag(argument: &OsStr) -> Option<bool> {
    let text = argument.to_str()?;
    let (flag, inline) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text, false),
    };
    CONFIG_CLI_FLAGS.contains(&flag).then_some(!inline)
}

pub(crate) fn split_arguments(args: impl IntoIterator<Item = OsString>) -> ArgumentSplit {
    let mut remaining = args.into_iter().peekable();
    let program: Vec<OsString> = remaining.next().into_iter().collect();
    let mut config = program.clone();
    while let Some(argument) = remaining.next_if(|argument| config_flag(argument).is_some()) {
        let takes_value = config_flag(&argument).unwrap_or(false);
        config.push(argument);
        if takes_value {
            config.extend(remaining.next());
        }
    }
    let mut command = program;
    command.extend(remaining);
    ArgumentSplit { config, command }
}
