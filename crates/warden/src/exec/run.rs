//! Spawning a command and collecting its outcome.
//!
//! Captured output is multiplexed with `poll` over non-blocking pipes on the
//! calling thread. When a timeout is configured, escalation happens in two
//! stages: once the budget is overdue the child receives `SIGTERM` and a
//! separate linger budget starts, during which output is still drained. If
//! the child is alive after both budgets it receives `SIGKILL`.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::process::{Child, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::result::Completion;
use super::{CommandResult, CommandSpec, EXEC_TARGET, OutputSink, ProcessRunner, TimeoutAction};
use crate::error::ControlError;
use crate::fd;
use crate::timeout::{Remaining, TimeoutBudget};

/// Permissions for output files created by [`OutputSink::File`].
const OUTPUT_FILE_MODE: u32 = 0o600;

/// First pause while waiting for a child that closed its output.
const EXIT_POLL_START: Duration = Duration::from_millis(50);

/// Longest pause while waiting for a child that closed its output.
const EXIT_POLL_LIMIT: Duration = Duration::from_secs(1);

impl ProcessRunner {
    /// Runs `spec` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Programmer`] when forking is disabled or the
    /// argument vector is empty, [`ControlError::Execution`] when the program
    /// does not exist, and [`ControlError::Io`] for other spawn or wait
    /// failures.
    pub fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ControlError> {
        self.ensure_fork_allowed("run a command")?;
        let rendered = spec.rendered();
        debug!(
            target: EXEC_TARGET,
            command = %rendered,
            output = %spec.sink(),
            cwd = %spec.working_dir().display(),
            timeout_ms = spec.time_limit().map(|limit| limit.as_millis()),
            "running command"
        );

        let completion = match spec.sink() {
            OutputSink::Capture => self.run_captured(spec, &rendered)?,
            OutputSink::File(path) => {
                let file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .mode(OUTPUT_FILE_MODE)
                    .open(path)
                    .map_err(|error| {
                        ControlError::io(format!("opening output file {}", path.display()), error)
                    })?;
                let duplicate = file.try_clone().map_err(|error| {
                    ControlError::io("duplicating output file descriptor", error)
                })?;
                let child =
                    spawn(spec, &rendered, Stdio::piped(), file.into(), duplicate.into())?;
                self.run_uncaptured(child, spec)?
            }
            OutputSink::Interactive => {
                let child = spawn(
                    spec,
                    &rendered,
                    Stdio::inherit(),
                    Stdio::inherit(),
                    Stdio::inherit(),
                )?;
                self.run_uncaptured(child, spec)?
            }
        };

        let result = CommandResult::new(rendered, completion);
        if let Some(reason) = result.fail_reason() {
            debug!(
                target: EXEC_TARGET,
                command = %result.command(),
                reason,
                output = %String::from_utf8_lossy(&result.output()),
                "command failed"
            );
        }
        Ok(result)
    }

    fn run_captured(&self, spec: &CommandSpec, rendered: &str) -> Result<Completion, ControlError> {
        let mut child = spawn(spec, rendered, Stdio::piped(), Stdio::piped(), Stdio::piped())?;
        self.collect(&mut child, spec)
            .inspect_err(|_| abandon(&mut child))
    }

    fn collect(&self, child: &mut Child, spec: &CommandSpec) -> Result<Completion, ControlError> {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            return Err(ControlError::io(
                "capturing command output",
                io::Error::other("standard streams were not piped"),
            ));
        };

        let mut streams = [
            Stream::new(stdout.as_raw_fd())?,
            Stream::new(stderr.as_raw_fd())?,
        ];
        let mut escalation = Escalation::new(spec.time_limit(), self.linger);
        multiplex(child, &mut streams, &mut escalation)?;
        escalation.finish(child)?;
        drop((stdout, stderr));

        let status = wait(child)?;
        let [out, err] = streams;
        Ok(Completion {
            pid: child.id(),
            status,
            stdout: out.buffer,
            stderr: err.buffer,
            action: escalation.action,
            timeout: spec.time_limit(),
            linger: self.linger,
        })
    }

    fn run_uncaptured(
        &self,
        mut child: Child,
        spec: &CommandSpec,
    ) -> Result<Completion, ControlError> {
        let mut escalation = Escalation::new(spec.time_limit(), self.linger);
        if let Err(error) = escalation.finish(&mut child) {
            abandon(&mut child);
            return Err(error);
        }
        let status = wait(&mut child)?;
        Ok(Completion {
            pid: child.id(),
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
            action: escalation.action,
            timeout: spec.time_limit(),
            linger: self.linger,
        })
    }
}

fn spawn(
    spec: &CommandSpec,
    rendered: &str,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
) -> Result<Child, ControlError> {
    let mut command = spec.to_command()?;
    command.stdin(stdin).stdout(stdout).stderr(stderr);
    let mut child = command.spawn().map_err(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            ControlError::execution(format!(
                "Can't execute '{rendered}': not found ({})",
                spec.program_name().to_string_lossy()
            ))
        } else {
            ControlError::io(format!("spawning '{rendered}'"), error)
        }
    })?;
    // The child must never read from stdin: close our end right away.
    drop(child.stdin.take());
    Ok(child)
}

/// One captured output stream.
struct Stream {
    fd: RawFd,
    buffer: Vec<u8>,
    open: bool,
}

impl Stream {
    fn new(fd: RawFd) -> Result<Self, ControlError> {
        fd::set_nonblocking(fd).map_err(|errno| ControlError::os("fcntl", errno))?;
        Ok(Self {
            fd,
            buffer: Vec::new(),
            open: true,
        })
    }

    /// Reads everything currently available; marks the stream closed at end
    /// of file.
    fn drain(&mut self) -> Result<(), ControlError> {
        let mut chunk = [0_u8; 8192];
        loop {
            match fd::read_retrying(self.fd, &mut chunk) {
                Ok(0) => {
                    self.open = false;
                    return Ok(());
                }
                Ok(count) => self
                    .buffer
                    .extend_from_slice(chunk.get(..count).unwrap_or_default()),
                Err(Errno::EAGAIN) => return Ok(()),
                Err(errno) => return Err(ControlError::os("read", errno)),
            }
        }
    }
}

/// Timeout state shared by the I/O loop and the final wait.
struct Escalation {
    budget: TimeoutBudget,
    linger_period: Duration,
    linger: Option<TimeoutBudget>,
    action: TimeoutAction,
}

impl Escalation {
    fn new(timeout: Option<Duration>, linger_period: Duration) -> Self {
        Self {
            budget: TimeoutBudget::new(timeout).allow_negative(),
            linger_period,
            linger: None,
            action: TimeoutAction::None,
        }
    }

    /// Milliseconds `poll` may block, `-1` for no limit, or `None` when the
    /// linger period is over and the I/O loop must stop.
    fn poll_timeout(&mut self, child: &mut Child) -> Result<Option<libc::c_int>, ControlError> {
        let Some(remaining) = self.budget.remaining() else {
            return Ok(Some(-1));
        };
        if !remaining.is_overdue() {
            return Ok(Some(fd::poll_timeout_ms(remaining.saturating())));
        }
        if self.linger.is_none() {
            self.warn_timeout();
            if is_running(child)? {
                self.action = TimeoutAction::Term;
                signal(child, Signal::SIGTERM);
            }
            let linger = TimeoutBudget::new(Some(self.linger_period)).allow_negative();
            linger.start();
            self.linger = Some(linger);
        }
        match self.linger.as_ref().and_then(TimeoutBudget::remaining) {
            Some(Remaining::Left(left)) => Ok(Some(fd::poll_timeout_ms(left))),
            Some(Remaining::Overdue(_)) | None => Ok(None),
        }
    }

    /// Waits for the child once its output is closed, escalating as needed.
    fn finish(&mut self, child: &mut Child) -> Result<(), ControlError> {
        let Some(remaining) = self.budget.remaining() else {
            return Ok(());
        };
        if is_running(child)? {
            wait_for_exit(child, remaining.saturating())?;
        }
        if is_running(child)? {
            let linger_left = match &self.linger {
                None => {
                    self.warn_timeout();
                    self.action = TimeoutAction::Term;
                    signal(child, Signal::SIGTERM);
                    self.linger_period
                }
                Some(linger) => linger
                    .remaining()
                    .map_or(Duration::ZERO, Remaining::saturating),
            };
            wait_for_exit(child, linger_left)?;
        }
        if is_running(child)? {
            warn!(
                target: EXEC_TARGET,
                pid = child.id(),
                linger_ms = self.linger_period.as_millis(),
                "linger timeout reached, sending SIGKILL"
            );
            self.action = TimeoutAction::Kill;
            signal(child, Signal::SIGKILL);
        }
        Ok(())
    }

    fn warn_timeout(&self) {
        warn!(
            target: EXEC_TARGET,
            timeout_ms = self.budget.total().map(|total| total.as_millis()),
            "command timeout reached, sending SIGTERM"
        );
    }
}

fn multiplex(
    child: &mut Child,
    streams: &mut [Stream; 2],
    escalation: &mut Escalation,
) -> Result<(), ControlError> {
    while streams.iter().any(|stream| stream.open) {
        let Some(timeout_ms) = escalation.poll_timeout(child)? else {
            break;
        };
        let mut fds: Vec<libc::pollfd> = streams
            .iter()
            .filter(|stream| stream.open)
            .map(|stream| libc::pollfd {
                fd: stream.fd,
                events: libc::POLLIN | libc::POLLPRI,
                revents: 0,
            })
            .collect();
        let count = libc::nfds_t::try_from(fds.len()).unwrap_or(0);
        // SAFETY: `fds` holds `count` initialised entries for the duration
        // of the call.
        match Errno::result(unsafe { libc::poll(fds.as_mut_ptr(), count, timeout_ms) }) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(ControlError::os("poll", errno)),
        }
        for ready in &fds {
            let Some(stream) = streams.iter_mut().find(|stream| stream.fd == ready.fd) else {
                continue;
            };
            if ready.revents & (libc::POLLIN | libc::POLLPRI) != 0 {
                stream.drain()?;
            } else if ready.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
                stream.open = false;
            }
        }
    }
    Ok(())
}

fn is_running(child: &mut Child) -> Result<bool, ControlError> {
    child
        .try_wait()
        .map(|status| status.is_none())
        .map_err(|error| ControlError::io("polling child status", error))
}

/// Polls for exit with a growing pause for at most `limit`.
fn wait_for_exit(child: &mut Child, limit: Duration) -> Result<(), ControlError> {
    let budget = TimeoutBudget::new(Some(limit));
    budget.start();
    let mut pause = EXIT_POLL_START;
    while is_running(child)? {
        let left = budget.remaining().map_or(Duration::ZERO, Remaining::saturating);
        if left.is_zero() {
            break;
        }
        thread::sleep(pause.min(left));
        pause = (pause * 6 / 5).min(EXIT_POLL_LIMIT);
    }
    Ok(())
}

fn signal(child: &Child, signal: Signal) {
    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => warn!(
            target: EXEC_TARGET,
            pid,
            signal = %signal,
            error = %errno,
            "failed to signal child"
        ),
    }
}

/// Kills and reaps a child whose supervision failed half-way.
pub(super) fn abandon(child: &mut Child) {
    signal(child, Signal::SIGKILL);
    if let Err(error) = child.wait() {
        warn!(
            target: EXEC_TARGET,
            pid = child.id(),
            %error,
            "failed to reap abandoned child"
        );
    }
}

fn wait(child: &mut Child) -> Result<ExitStatus, ControlError> {
    child
        .wait()
        .map_err(|error| ControlError::io("waiting for child", error))
}
