//! Fork policy shared by the command runner and the daemon supervisor.
//!
//! Some hosts must never fork (for example a single-threaded event loop that
//! embeds the library). They construct their runner with
//! [`ForkPolicy::Disabled`] so every operation that would create a child
//! process fails fast with a programming error instead.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Whether operations that create child processes are permitted.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ForkPolicy {
    /// Child processes may be created.
    #[default]
    Allowed,
    /// Creating a child process is a programming error.
    Disabled,
}

impl ForkPolicy {
    /// Returns `true` when child processes may be created.
    #[must_use]
    pub const fn allows_fork(self) -> bool {
        matches!(self, Self::Allowed)
    }
}
