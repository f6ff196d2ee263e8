use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::ControlError;
use crate::quote::shell_quote_args;

/// Shell used for [`CommandSpec::shell`] commands.
const SHELL: &str = "/bin/sh";

/// Where a command's standard output and error go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputSink {
    /// Capture both streams into the result.
    #[default]
    Capture,
    /// Append both streams to a file; the result carries empty buffers.
    File(PathBuf),
    /// Inherit the caller's terminal for all three standard streams.
    Interactive,
}

impl fmt::Display for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture => f.write_str("capture"),
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Interactive => f.write_str("interactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Program {
    Argv(Vec<OsString>),
    Shell(String),
}

/// Description of one command execution.
///
/// Commands run from `/` unless [`cwd`](Self::cwd) says otherwise, with the
/// caller's environment forced to the `C` locale unless
/// [`reset_env`](Self::reset_env) is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: Program,
    env: BTreeMap<OsString, OsString>,
    reset_env: bool,
    cwd: PathBuf,
    sink: OutputSink,
    timeout: Option<Duration>,
}

impl CommandSpec {
    /// Runs the argument vector `argv`; the first element names the program.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self::with_program(Program::Argv(argv.into_iter().map(Into::into).collect()))
    }

    /// Runs `script` through `/bin/sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::with_program(Program::Shell(script.into()))
    }

    fn with_program(program: Program) -> Self {
        Self {
            program,
            env: BTreeMap::new(),
            reset_env: false,
            cwd: PathBuf::from("/"),
            sink: OutputSink::Capture,
            timeout: None,
        }
    }

    /// Sets one environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets several environment variables for the child.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Gives the child exactly the configured variables instead of the
    /// caller's environment.
    #[must_use]
    pub const fn reset_env(mut self, reset: bool) -> Self {
        self.reset_env = reset;
        self
    }

    /// Sets the working directory of the child.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Chooses where output goes.
    #[must_use]
    pub fn output(mut self, sink: OutputSink) -> Self {
        self.sink = sink;
        self
    }

    /// Limits the run time; `None` waits indefinitely.
    #[must_use]
    pub const fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Output destination.
    #[must_use]
    pub const fn sink(&self) -> &OutputSink {
        &self.sink
    }

    /// Execution time limit.
    #[must_use]
    pub const fn time_limit(&self) -> Option<Duration> {
        self.timeout
    }

    /// Working directory of the child.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.cwd
    }

    /// Command line rendered for diagnostics.
    #[must_use]
    pub fn rendered(&self) -> String {
        match &self.program {
            Program::Argv(argv) => shell_quote_args(argv),
            Program::Shell(script) => script.clone(),
        }
    }

    /// Environment handed to the child.
    ///
    /// With [`reset_env`](Self::reset_env) this is exactly the configured
    /// variables; otherwise the caller's environment with `LC_ALL=C`,
    /// overlaid by the configured variables.
    #[must_use]
    pub fn environment(&self) -> BTreeMap<OsString, OsString> {
        if self.reset_env {
            return self.env.clone();
        }
        let mut merged: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
        merged.insert(OsString::from("LC_ALL"), OsString::from("C"));
        merged.extend(self.env.iter().map(|(key, value)| (key.clone(), value.clone())));
        merged
    }

    /// Builds the [`Command`] without configuring standard streams.
    pub(crate) fn to_command(&self) -> Result<Command, ControlError> {
        let mut command = match &self.program {
            Program::Argv(argv) => {
                let Some((program, args)) = argv.split_first() else {
                    return Err(ControlError::programmer("empty argument vector"));
                };
                let mut command = Command::new(program);
                command.args(args);
                command
            }
            Program::Shell(script) => {
                let mut command = Command::new(SHELL);
                command.arg("-c").arg(script);
                command
            }
        };
        command
            .env_clear()
            .envs(self.environment())
            .current_dir(&self.cwd);
        Ok(command)
    }

    /// Full argument vector, with shell scripts expanded to `/bin/sh -c`.
    pub(crate) fn argv(&self) -> Result<Vec<OsString>, ControlError> {
        match &self.program {
            Program::Argv(argv) if argv.is_empty() => {
                Err(ControlError::programmer("empty argument vector"))
            }
            Program::Argv(argv) => Ok(argv.clone()),
            Program::Shell(script) => Ok(vec![
                OsString::from(SHELL),
                OsString::from("-c"),
                OsString::from(script),
            ]),
        }
    }

    /// First word of the command, for error messages.
    pub(crate) fn program_name(&self) -> &OsStr {
        match &self.program {
            Program::Argv(argv) => argv.first().map_or(OsStr::new(""), OsString::as_os_str),
            Program::Shell(_) => OsStr::new(SHELL),
        }
    }
}
