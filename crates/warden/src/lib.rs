//! Process and daemon control.
//!
//! The crate runs external commands under timeouts with captured output,
//! launches detached daemons through a double fork, guards single-instance
//! daemons with locked PID files, and offers signal primitives that are safe
//! to combine with `poll`-based event loops.
//!
//! Every operation that creates a process goes through a [`ProcessRunner`],
//! which carries the host's [`ForkPolicy`](warden_config::ForkPolicy).
//! Timeouts are expressed with [`TimeoutBudget`] and polling loops with
//! [`retry`](retry::retry).

pub mod daemon;
mod error;
pub mod exec;
pub mod fd;
pub mod pidfile;
pub mod process;
mod quote;
pub mod retry;
mod separate;
pub mod signals;
pub mod telemetry;
pub mod timeout;

pub use daemon::{DaemonOutput, DaemonSpec, DaemonizeHandle};
pub use error::ControlError;
pub use exec::{CommandResult, CommandSpec, OutputSink, ProcessRunner, TimeoutAction};
pub use pidfile::{PidFileLock, read_locked_pid_file, remove_pid_file, write_pid_file};
pub use process::{KillOptions, KillOutcome, is_process_alive, kill_process};
pub use quote::shell_quote_args;
pub use signals::{SignalHandler, SignalWakeupFd, with_signal_handlers};
pub use timeout::TimeoutBudget;

#[cfg(test)]
mod tests;
