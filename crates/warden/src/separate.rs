//! Running a closure in a forked child process.

use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork};

use crate::error::ControlError;
use crate::exec::ProcessRunner;
use crate::fd;

/// Exit status of a child whose closure panicked.
const PANIC_EXIT_CODE: i32 = 33;

impl ProcessRunner {
    /// Runs `body` in a forked child and returns its verdict.
    ///
    /// The child exits with status 1 when `body` returns `true` and 0 when
    /// it returns `false`; a panic exits with status 33. Side effects of
    /// `body` stay in the child.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Programmer`] when forking is disabled,
    /// [`ControlError::Os`] when `fork` or `waitpid` fails, and
    /// [`ControlError::Execution`] when the child does not exit with status
    /// 0 or 1.
    pub fn run_in_separate_process<F>(&self, body: F) -> Result<bool, ControlError>
    where
        F: FnOnce() -> bool,
    {
        self.ensure_fork_allowed("run in a separate process")?;
        // SAFETY: the child runs `body` and leaves through `_exit`, never
        // returning into the caller's stack frames.
        let child = match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let code = match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(verdict) => i32::from(verdict),
                    Err(_) => PANIC_EXIT_CODE,
                };
                fd::exit_child(code)
            }
            Ok(ForkResult::Parent { child }) => child,
            Err(errno) => return Err(ControlError::os("fork", errno)),
        };

        let status = loop {
            match waitpid(child, None) {
                Err(Errno::EINTR) => {}
                other => break other.map_err(|errno| ControlError::os("waitpid", errno))?,
            }
        };
        match status {
            WaitStatus::Exited(_, 0) => Ok(false),
            WaitStatus::Exited(_, 1) => Ok(true),
            WaitStatus::Exited(_, code) => Err(ControlError::execution(format!(
                "child process failed with exit code {code}"
            ))),
            WaitStatus::Signaled(_, signal, _) => Err(ControlError::execution(format!(
                "child process was terminated by {signal}"
            ))),
            other => Err(ControlError::execution(format!(
                "child process ended unexpectedly: {other:?}"
            ))),
        }
    }
}
