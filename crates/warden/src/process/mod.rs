//! Liveness checks and escalating termination for arbitrary processes.

mod alive;
mod handling;
mod kill;

pub use alive::is_process_alive;
pub use handling::is_process_handling_signal;
pub use kill::{KillOptions, KillOutcome, kill_process};

pub(crate) use handling::status_path;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
