use crate::error::ControlError;

/// Total time spent retrying an ambiguous liveness check.
#[cfg(target_os = "linux")]
const CHECK_BUDGET: std::time::Duration = std::time::Duration::from_millis(500);

/// Returns `true` while a process with `pid` exists.
///
/// Zombies count as alive. On Linux the check stats `/proc/<pid>/status`;
/// `EINVAL`, which the kernel reports transiently for exiting processes, is
/// retried briefly before being surfaced.
///
/// # Errors
///
/// Returns [`ControlError::Programmer`] for `pid <= 0`, which would address a
/// process group rather than one process, and [`ControlError::Io`] or
/// [`ControlError::Os`] for unexpected failures of the check.
pub fn is_process_alive(pid: i32) -> Result<bool, ControlError> {
    if pid <= 0 {
        return Err(ControlError::programmer(format!(
            "invalid pid {pid}; liveness checks need a positive process id"
        )));
    }
    check(pid)
}

#[cfg(target_os = "linux")]
fn check(pid: i32) -> Result<bool, ControlError> {
    use std::io;

    use crate::retry::{RetryError, Retryable, Schedule, retry};

    let path = super::status_path(pid);
    let outcome = retry(
        || match std::fs::metadata(&path) {
            Ok(_) => Ok(true),
            Err(error) => match error.raw_os_error() {
                Some(libc::ENOENT | libc::ENOTDIR) => Ok(false),
                Some(libc::EINVAL) => Err(Retryable::Again(Some(error))),
                _ => Err(Retryable::Abort(error)),
            },
        },
        Schedule::PROCESS_POLL,
        CHECK_BUDGET,
    );
    let describe =
        |error: io::Error| ControlError::io(format!("probing {}", path.display()), error);
    match outcome {
        Ok(alive) => Ok(alive),
        Err(RetryError::Aborted(error) | RetryError::Timeout { last: Some(error), .. }) => {
            Err(describe(error))
        }
        Err(RetryError::Timeout {
            timeout,
            last: None,
        }) => Err(ControlError::RetryTimeout { timeout }),
    }
}

#[cfg(not(target_os = "linux"))]
fn check(pid: i32) -> Result<bool, ControlError> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(ControlError::os("kill", errno)),
    }
}
