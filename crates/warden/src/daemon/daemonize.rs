//! Turning the calling process itself into a daemon.

use std::ffi::CString;
use std::io::{self, Write as _};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::unistd::{ForkResult, fork, getpid};
use tracing::info;

use super::launch::{DETACH_DIR, report};
use super::setup::{DAEMON_UMASK, Redirect, SetupError, setup_daemon_env, setup_daemon_fds};
use super::{DAEMON_TARGET, ERROR_READ_LIMIT};
use crate::error::ControlError;
use crate::exec::ProcessRunner;
use crate::fd;

/// Placeholder sent when a failure is reported without a message.
const UNKNOWN_ERROR: &str = "<unknown error>";

/// Write end of the startup channel back to the process that called
/// [`ProcessRunner::daemonize`].
///
/// The original process exits as soon as this channel closes: with status 0
/// if nothing was written, or with status 1 after printing what was written
/// to its standard error. Dropping the handle counts as success.
#[derive(Debug)]
pub struct DaemonizeHandle {
    write_end: OwnedFd,
}

impl DaemonizeHandle {
    /// Reports a startup failure; the original process prints `message` and
    /// exits with status 1.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Os`] when the channel cannot be written.
    pub fn report_failure(self, message: &str) -> Result<(), ControlError> {
        let text = if message.is_empty() {
            UNKNOWN_ERROR
        } else {
            message
        };
        fd::write_all_retrying(self.write_end.as_raw_fd(), text.as_bytes())
            .map_err(|errno| ControlError::os("write", errno))
    }

    /// Reports a successful start; the original process exits with status 0.
    pub fn report_ready(self) {
        info!(target: DAEMON_TARGET, pid = getpid().as_raw(), "daemon ready");
    }

    fn fail_and_exit(self, error: &SetupError) -> ! {
        report(self.write_end.as_raw_fd(), error);
        fd::exit_child(1)
    }
}

impl AsFd for DaemonizeHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.write_end.as_fd()
    }
}

impl ProcessRunner {
    /// Detaches the calling process into a daemon.
    ///
    /// Only the daemon returns from this call. It runs in a new session from
    /// `/` with umask `077`, standard input from `/dev/null` and standard
    /// output and error appended to `logfile` (or discarded). The original
    /// process blocks until the daemon reports through the returned handle
    /// and then exits; an intermediate process exits immediately.
    ///
    /// Call this while the process is still single-threaded.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Programmer`] when forking is disabled or the
    /// log file path contains a NUL byte, and [`ControlError::Os`] when the
    /// channel or the first fork cannot be created. Failures after the first
    /// fork are relayed to the original process instead.
    pub fn daemonize(&self, logfile: Option<&Path>) -> Result<DaemonizeHandle, ControlError> {
        self.ensure_fork_allowed("daemonize")?;
        let logfile = logfile
            .map(|path| CString::new(path.as_os_str().as_bytes()))
            .transpose()
            .map_err(|_| ControlError::programmer("log file path contains a NUL byte"))?;
        let (read_end, write_end) = fd::pipe().map_err(|errno| ControlError::os("pipe", errno))?;

        // SAFETY: the caller guarantees the process is single-threaded.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { .. }) => {
                drop(write_end);
                exit_with_report(&read_end)
            }
            Ok(ForkResult::Child) => {}
            Err(errno) => return Err(ControlError::os("fork", errno)),
        }

        let handle = DaemonizeHandle { write_end };
        if let Err(error) = setup_daemon_env(DETACH_DIR, DAEMON_UMASK) {
            handle.fail_and_exit(&error);
        }
        // SAFETY: as above; the intermediate process exits straight away.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { .. }) => fd::exit_child(0),
            Ok(ForkResult::Child) => {}
            Err(errno) => handle.fail_and_exit(&SetupError::new("forking daemon", errno)),
        }
        drop(read_end);

        let redirect = logfile.as_deref().map_or(Redirect::Null, Redirect::File);
        if let Err(error) = setup_daemon_fds(redirect) {
            handle.fail_and_exit(&error);
        }
        info!(
            target: DAEMON_TARGET,
            pid = getpid().as_raw(),
            logfile = ?logfile,
            "daemon process detached; continuing in daemon"
        );
        Ok(handle)
    }
}

/// Runs in the original process: waits for the daemon's report and exits.
fn exit_with_report(read_end: &OwnedFd) -> ! {
    let message = match fd::read_to_limit(read_end.as_raw_fd(), ERROR_READ_LIMIT) {
        Ok(message) if message.is_empty() => fd::exit_child(0),
        Ok(message) => String::from_utf8_lossy(&message).into_owned(),
        Err(errno) => format!("cannot read daemon status: {errno}"),
    };
    let mut stderr = io::stderr().lock();
    let _written = writeln!(stderr, "Error when starting daemon process: {message:?}");
    fd::exit_child(1)
}
