//! Domain errors raised by process-control operations.
//!
//! The variants follow how callers are expected to react: programming errors
//! indicate a caller bug and are never retried, execution errors carry text
//! meant for the operator, and lock conflicts are a legitimate steady state
//! ("already running"). I/O errors are wrapped in `Arc` to keep the enum small
//! and cloneable.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;

/// Errors arising from process, daemon, PID-file, and signal operations.
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    /// The caller violated a precondition (forking disabled, invalid PID,
    /// conflicting parameters).
    #[error("programming error: {message}")]
    Programmer {
        /// Description of the violated precondition.
        message: String,
    },

    /// A command could not be executed or a daemon reported a startup
    /// failure.
    #[error("{message}")]
    Execution {
        /// Operator-facing diagnostic text.
        message: String,
    },

    /// The PID file is locked by another live process.
    #[error("PID file '{path}' is locked by another process: {source}")]
    Lock {
        /// Path of the contended PID file.
        path: PathBuf,
        /// Error returned by the lock attempt.
        #[source]
        source: Errno,
    },

    /// A locked PID file held something other than a process identifier.
    #[error("PID file '{path}' is locked but holds invalid content {content:?}")]
    InvalidPidFile {
        /// Path of the PID file.
        path: PathBuf,
        /// Content that failed to parse.
        content: String,
    },

    /// An I/O operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A system call failed.
    #[error("{operation} failed: {source}")]
    Os {
        /// Name of the failing operation.
        operation: &'static str,
        /// Error number reported by the kernel.
        #[source]
        source: Errno,
    },

    /// A bounded retry ran out of time.
    #[error("operation did not complete within {timeout:?}")]
    RetryTimeout {
        /// Budget that was exhausted.
        timeout: Duration,
    },
}

impl ControlError {
    pub(crate) fn programmer(message: impl Into<String>) -> Self {
        Self::Programmer {
            message: message.into(),
        }
    }

    pub(crate) fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) const fn os(operation: &'static str, source: Errno) -> Self {
        Self::Os { operation, source }
    }

    /// Returns `true` for errors caused by a caller bug.
    #[must_use]
    pub const fn is_programmer_error(&self) -> bool {
        matches!(self, Self::Programmer { .. })
    }

    /// Returns `true` for operator-facing execution failures.
    #[must_use]
    pub const fn is_execution_error(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}
