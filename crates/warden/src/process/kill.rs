use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, info};

use super::{PROCESS_TARGET, is_process_alive};
use crate::error::ControlError;
use crate::retry::{RetryError, Retryable, Schedule, retry};

/// How [`kill_process`] should go about stopping a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillOptions {
    /// Signal sent first.
    pub signal: Signal,
    /// Time granted to exit after `signal` before `SIGKILL` follows. Zero
    /// sends `signal` and returns without waiting.
    pub timeout: Duration,
    /// Reap the process if it is a child of the caller.
    pub reap: bool,
}

impl Default for KillOptions {
    fn default() -> Self {
        Self {
            signal: Signal::SIGTERM,
            timeout: Duration::from_secs(30),
            reap: false,
        }
    }
}

/// What [`kill_process`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The process was already gone.
    NotRunning,
    /// The signal was sent and no waiting was requested.
    Signalled,
    /// The process exited within the timeout.
    Exited,
    /// The process outlived the timeout and was sent `SIGKILL`.
    ForceKilled,
}

/// Stops process `pid`, escalating to `SIGKILL` if it does not exit in time.
///
/// # Errors
///
/// Returns [`ControlError::Programmer`] for `pid <= 0`. Failures to deliver a
/// signal other than the process having vanished are returned as
/// [`ControlError::Os`].
pub fn kill_process(pid: i32, options: KillOptions) -> Result<KillOutcome, ControlError> {
    if pid <= 0 {
        return Err(ControlError::programmer(format!(
            "invalid pid {pid}; refusing to signal a process group"
        )));
    }
    if !is_process_alive(pid)? {
        return Ok(KillOutcome::NotRunning);
    }

    debug!(
        target: PROCESS_TARGET,
        pid,
        signal = %options.signal,
        timeout_ms = options.timeout.as_millis(),
        "signalling process"
    );
    signal_and_reap(pid, options.signal, options.reap)?;
    if options.timeout.is_zero() {
        return Ok(KillOutcome::Signalled);
    }

    match retry(|| check_exited(pid), Schedule::PROCESS_POLL, options.timeout) {
        Ok(()) | Err(RetryError::Timeout { .. }) => {}
        Err(RetryError::Aborted(error)) => return Err(error),
    }

    if is_process_alive(pid)? {
        info!(
            target: PROCESS_TARGET,
            pid,
            timeout_ms = options.timeout.as_millis(),
            "process ignored termination request; sending SIGKILL"
        );
        signal_and_reap(pid, Signal::SIGKILL, options.reap)?;
        return Ok(KillOutcome::ForceKilled);
    }
    Ok(KillOutcome::Exited)
}

fn signal_and_reap(pid: i32, signal: Signal, reap: bool) -> Result<(), ControlError> {
    let target = Pid::from_raw(pid);
    match kill(target, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => return Err(ControlError::os("kill", errno)),
    }
    if reap {
        // Not our child, or already reaped: nothing to collect either way.
        let _reaped = waitpid(target, Some(WaitPidFlag::WNOHANG));
    }
    Ok(())
}

fn check_exited(pid: i32) -> Result<(), Retryable<ControlError>> {
    if !is_process_alive(pid).map_err(Retryable::Abort)? {
        return Ok(());
    }
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) | Err(_) => Err(Retryable::Again(None)),
        Ok(_) => Ok(()),
    }
}
