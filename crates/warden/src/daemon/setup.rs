//! Detaching the current process: the two steps shared by
//! [`ProcessRunner::start_daemon`](crate::ProcessRunner::start_daemon) and
//! [`ProcessRunner::daemonize`](crate::ProcessRunner::daemonize).
//!
//! Both functions only issue system calls, so they may run between `fork`
//! and `exec` in a multi-threaded parent.

use std::ffi::CStr;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::sys::stat::{Mode, umask};
use nix::unistd::{chdir, setsid};
use thiserror::Error;

use crate::fd;

/// Null device used for standard input and discarded output.
const NULL_DEVICE: &CStr = c"/dev/null";

/// Permissions of output files created for a daemon.
const OUTPUT_FILE_MODE: libc::mode_t = 0o600;

/// File-creation mask applied to detached processes.
pub const DAEMON_UMASK: Mode = Mode::from_bits_truncate(0o077);

/// Failure of one detach step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{stage}: {errno}")]
pub struct SetupError {
    /// Step that failed.
    pub stage: &'static str,
    /// Error reported by the system call.
    pub errno: Errno,
}

impl SetupError {
    pub(crate) const fn new(stage: &'static str, errno: Errno) -> Self {
        Self { stage, errno }
    }
}

/// Where a detached process sends standard output and error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect<'a> {
    /// Discard output.
    Null,
    /// Append to this file, creating it with mode `0600`.
    File(&'a CStr),
    /// Duplicate this open descriptor.
    Fd(RawFd),
}

/// Changes to `cwd`, applies `mask` and starts a new session.
///
/// Call between the first and the second fork: the new session has no
/// controlling terminal and the second fork ensures the daemon never
/// acquires one.
///
/// # Errors
///
/// Returns the first failing step.
pub fn setup_daemon_env(cwd: &CStr, mask: Mode) -> Result<(), SetupError> {
    chdir(cwd).map_err(|errno| SetupError::new("changing directory", errno))?;
    umask(mask);
    setsid().map_err(|errno| SetupError::new("starting session", errno))?;
    Ok(())
}

/// Points standard input at the null device and standard output and error
/// at `output`.
///
/// # Errors
///
/// Returns the first failing step. Descriptors opened here are closed again
/// on failure.
pub fn setup_daemon_fds(output: Redirect<'_>) -> Result<(), SetupError> {
    let null_in = fd::open_raw(NULL_DEVICE, libc::O_RDONLY, 0)
        .map_err(|errno| SetupError::new("opening null device", errno))?;
    let (out, opened) = match output {
        Redirect::Fd(fd) => (fd, false),
        Redirect::File(path) => {
            let flags = libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND;
            match fd::open_raw(path, flags, OUTPUT_FILE_MODE) {
                Ok(fd) => (fd, true),
                Err(errno) => {
                    close_temporary(null_in);
                    return Err(SetupError::new("opening output file", errno));
                }
            }
        }
        Redirect::Null => match fd::open_raw(NULL_DEVICE, libc::O_WRONLY, 0) {
            Ok(fd) => (fd, true),
            Err(errno) => {
                close_temporary(null_in);
                return Err(SetupError::new("opening null device", errno));
            }
        },
    };

    let redirected = fd::dup2(null_in, libc::STDIN_FILENO)
        .and_then(|()| fd::dup2(out, libc::STDOUT_FILENO))
        .and_then(|()| fd::dup2(out, libc::STDERR_FILENO));
    close_temporary(null_in);
    if opened {
        close_temporary(out);
    }
    redirected.map_err(|errno| SetupError::new("redirecting standard streams", errno))
}

fn close_temporary(fd: RawFd) {
    if fd > libc::STDERR_FILENO {
        fd::close_raw(fd);
    }
}
