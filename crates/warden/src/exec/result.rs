use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

/// Escalation step that ended a timed-out command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutAction {
    /// The command finished on its own.
    #[default]
    None,
    /// The command was sent the terminate signal after its timeout.
    Term,
    /// The command outlived the linger period and was killed.
    Kill,
}

/// Outcome of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pid: u32,
    exit_code: Option<i32>,
    signal: Option<i32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    command: String,
    timeout_action: TimeoutAction,
    fail_reason: Option<String>,
}

/// Facts gathered while a command ran.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) pid: u32,
    pub(crate) status: ExitStatus,
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
    pub(crate) action: TimeoutAction,
    pub(crate) timeout: Option<Duration>,
    pub(crate) linger: Duration,
}

impl CommandResult {
    pub(crate) fn new(command: String, completion: Completion) -> Self {
        let exit_code = completion.status.code();
        let signal = completion.status.signal();
        let failed = is_failure(exit_code, signal);
        let fail_reason = failed.then(|| {
            describe_failure(
                exit_code,
                signal,
                completion.action,
                completion.timeout,
                completion.linger,
            )
        });
        Self {
            pid: completion.pid,
            exit_code,
            signal,
            stdout: completion.stdout,
            stderr: completion.stderr,
            command,
            timeout_action: completion.action,
            fail_reason,
        }
    }

    /// Process id the command ran as. The process has been reaped.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit code, present when the process exited normally.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Number of the signal that killed the process.
    #[must_use]
    pub const fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// Captured standard output.
    #[must_use]
    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// Captured standard error.
    #[must_use]
    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Standard output followed by standard error.
    #[must_use]
    pub fn output(&self) -> Vec<u8> {
        let mut combined = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        combined.extend_from_slice(&self.stdout);
        combined.extend_from_slice(&self.stderr);
        combined
    }

    /// Rendered command line.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Escalation applied because of the timeout.
    #[must_use]
    pub const fn timeout_action(&self) -> TimeoutAction {
        self.timeout_action
    }

    /// `true` when the process was killed by a signal or exited non-zero.
    #[must_use]
    pub const fn failed(&self) -> bool {
        is_failure(self.exit_code, self.signal)
    }

    /// Why the command failed; `None` for successful commands.
    #[must_use]
    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }
}

const fn is_failure(exit_code: Option<i32>, signal: Option<i32>) -> bool {
    signal.is_some() || !matches!(exit_code, Some(0))
}

fn describe_failure(
    exit_code: Option<i32>,
    signal: Option<i32>,
    action: TimeoutAction,
    timeout: Option<Duration>,
    linger: Duration,
) -> String {
    let mut reasons = vec![match (signal, exit_code) {
        (Some(signal), _) => format!("terminated by signal {signal}"),
        (None, Some(code)) => format!("exited with exit code {code}"),
        (None, None) => String::from("unable to determine termination reason"),
    }];
    let timeout = timeout.unwrap_or_default();
    match action {
        TimeoutAction::None => {}
        TimeoutAction::Term => reasons.push(format!(
            "terminated after timeout of {} seconds",
            seconds(timeout)
        )),
        TimeoutAction::Kill => reasons.push(format!(
            "force termination after timeout of {} seconds and linger for another {} seconds",
            seconds(timeout),
            seconds(linger)
        )),
    }
    reasons.join(", ")
}

fn seconds(duration: Duration) -> String {
    format!("{:.2}", duration.as_secs_f64())
}
