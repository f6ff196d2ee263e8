//! Running external commands and supervising daemons.
//!
//! [`ProcessRunner`] is the entry point for every operation that creates a
//! child process. It carries the host's [`ForkPolicy`], so an embedding that
//! must never fork builds its runner with [`ForkPolicy::Disabled`] and every
//! such call fails with a programming error before anything is spawned.

mod command;
mod parts;
mod result;
mod run;

use std::time::Duration;

use warden_config::{Config, ForkPolicy};

use crate::error::ControlError;

pub use command::{CommandSpec, OutputSink};
pub use parts::{PartReport, PartStatus, PartsOptions};
pub use result::{CommandResult, TimeoutAction};

pub(crate) const EXEC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::exec");

/// Grace period granted to a timed-out child after the terminate signal.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(5);

/// Creates child processes according to a fork policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRunner {
    policy: ForkPolicy,
    linger: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(ForkPolicy::Allowed, DEFAULT_LINGER)
    }
}

impl ProcessRunner {
    /// Creates a runner with an explicit policy and linger period.
    #[must_use]
    pub const fn new(policy: ForkPolicy, linger: Duration) -> Self {
        Self { policy, linger }
    }

    /// Creates a runner from the shared configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self::new(config.fork_policy, config.linger_timeout())
    }

    /// Fork policy in force.
    #[must_use]
    pub const fn policy(&self) -> ForkPolicy {
        self.policy
    }

    /// Grace period after the terminate signal.
    #[must_use]
    pub const fn linger(&self) -> Duration {
        self.linger
    }

    pub(crate) fn ensure_fork_allowed(&self, operation: &str) -> Result<(), ControlError> {
        if self.policy.allows_fork() {
            Ok(())
        } else {
            Err(ControlError::programmer(format!(
                "cannot {operation}: forking is disabled for this runner"
            )))
        }
    }
}

#[cfg(test)]
mod tests;
