//! Detached daemons started through a double fork.
//!
//! [`ProcessRunner::start_daemon`] launches a command as a daemon and only
//! returns once the daemon has either exec'd or reported why it could not.
//! The handoff uses two pipes created before the first fork: the daemon
//! writes its PID to one, and any startup failure to the other. The error
//! pipe is close-on-exec, so a successful `exec` shows up in the parent as
//! end of file with nothing read.
//!
//! Between `fork` and `exec` the child only touches data converted before
//! the first fork and issues plain system calls.

mod daemonize;
mod launch;
mod setup;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, info};

use crate::error::ControlError;
use crate::exec::{CommandSpec, ProcessRunner};
use crate::fd;

pub use daemonize::DaemonizeHandle;
pub use setup::{DAEMON_UMASK, Redirect, SetupError, setup_daemon_env, setup_daemon_fds};

use launch::LaunchPlan;

pub(crate) const DAEMON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::daemon");

/// Most bytes of startup diagnostics read from a daemon.
pub(crate) const ERROR_READ_LIMIT: usize = 100 * 1024;

/// Most bytes read from the PID pipe.
const PID_READ_LIMIT: usize = 128;

/// Destination of a daemon's standard output and error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DaemonOutput {
    /// Discard output.
    #[default]
    Null,
    /// Append to a file, created with mode `0600` if missing.
    File(PathBuf),
    /// Share an already open descriptor. It must stay open until
    /// [`ProcessRunner::start_daemon`] returns.
    Fd(RawFd),
}

/// Description of a daemon launch.
///
/// The command's program, environment and working directory come from the
/// wrapped [`CommandSpec`]; its output sink and timeout are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSpec {
    command: CommandSpec,
    output: DaemonOutput,
    pidfile: Option<PathBuf>,
}

impl DaemonSpec {
    /// Launches `command` with output discarded and no PID file.
    #[must_use]
    pub const fn new(command: CommandSpec) -> Self {
        Self {
            command,
            output: DaemonOutput::Null,
            pidfile: None,
        }
    }

    /// Chooses where the daemon's output goes.
    #[must_use]
    pub fn output(mut self, output: DaemonOutput) -> Self {
        self.output = output;
        self
    }

    /// Makes the daemon claim `path` before it execs. The lock is held by
    /// the exec'd program for its whole life.
    #[must_use]
    pub fn pidfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.pidfile = Some(path.into());
        self
    }

    /// Command being launched.
    #[must_use]
    pub const fn command(&self) -> &CommandSpec {
        &self.command
    }

    /// Output destination.
    #[must_use]
    pub const fn output_target(&self) -> &DaemonOutput {
        &self.output
    }

    /// PID file the daemon claims, if any.
    #[must_use]
    pub fn pidfile_path(&self) -> Option<&Path> {
        self.pidfile.as_deref()
    }

    pub(crate) fn environment(&self) -> BTreeMap<OsString, OsString> {
        self.command.environment()
    }
}

impl ProcessRunner {
    /// Starts `spec` as a daemon and returns its PID.
    ///
    /// The daemon runs in a new session, reparented away from the caller,
    /// with standard input from `/dev/null` and every descriptor above the
    /// standard three closed except the PID file lock.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Programmer`] when forking is disabled or the
    /// command is empty, and [`ControlError::Execution`] carrying the
    /// daemon's diagnostic when any startup step, including `exec`, fails.
    pub fn start_daemon(&self, spec: &DaemonSpec) -> Result<i32, ControlError> {
        self.ensure_fork_allowed("start a daemon")?;
        let plan = LaunchPlan::prepare(spec)?;
        let rendered = spec.command().rendered();
        debug!(
            target: DAEMON_TARGET,
            command = %rendered,
            output = ?spec.output_target(),
            pidfile = ?spec.pidfile_path(),
            "starting daemon"
        );

        let (pid_read, pid_write) = fd::pipe().map_err(|errno| ControlError::os("pipe", errno))?;
        let (error_read, error_write) =
            fd::pipe().map_err(|errno| ControlError::os("pipe", errno))?;

        // SAFETY: the child only runs `LaunchPlan::run_first_child`, which
        // restricts itself to system calls on data prepared above.
        let child = match unsafe { fork() } {
            Ok(ForkResult::Child) => plan.run_first_child(
                [error_read.as_raw_fd(), pid_read.as_raw_fd()],
                error_write.as_raw_fd(),
                pid_write.as_raw_fd(),
            ),
            Ok(ForkResult::Parent { child }) => child,
            Err(errno) => return Err(ControlError::os("fork", errno)),
        };
        drop((error_write, pid_write));

        let error_text = fd::read_to_limit(error_read.as_raw_fd(), ERROR_READ_LIMIT)
            .map_err(|errno| ControlError::os("read", errno))?;
        drop(error_read);
        let pid_text = fd::read_to_limit(pid_read.as_raw_fd(), PID_READ_LIMIT)
            .map_err(|errno| ControlError::os("read", errno))?;
        drop(pid_read);
        reap(child);

        let pid = decode_handoff(&error_text, &pid_text)?;
        info!(target: DAEMON_TARGET, command = %rendered, pid, "daemon started");
        Ok(pid)
    }
}

/// Waits for the intermediate child; it may already have been collected.
fn reap(child: Pid) {
    while let Err(Errno::EINTR) = waitpid(child, None) {}
}

/// Turns what the daemon sent back into its PID or the reported failure.
pub(crate) fn decode_handoff(error_text: &[u8], pid_text: &[u8]) -> Result<i32, ControlError> {
    if !error_text.is_empty() {
        return Err(ControlError::execution(format!(
            "Error when starting daemon process: {:?}",
            String::from_utf8_lossy(error_text)
        )));
    }
    let text = String::from_utf8_lossy(pid_text);
    text.trim().parse::<i32>().map_err(|error| {
        ControlError::execution(format!("Error while trying to parse PID {text:?}: {error}"))
    })
}

#[cfg(test)]
mod tests;
