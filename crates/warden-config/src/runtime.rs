//! Derives runtime artefact paths shared by the CLI and managed daemons.
//!
//! Every daemon started through `warden` records itself in a locked PID file
//! named after the daemon. The CLI commands that start, inspect, and stop
//! daemons must agree on that layout, so the naming rules live here.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Longest accepted daemon name.
pub const MAX_SERVICE_NAME_LEN: usize = 128;

/// Canonical paths for runtime artefacts written by managed daemons.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the shared configuration, creating the
    /// runtime directory when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimePathsError::RuntimeDirectory`] when the directory
    /// cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let runtime_dir = config.runtime_dir.as_std_path().to_path_buf();
        fs::create_dir_all(&runtime_dir).map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: runtime_dir.clone(),
            source,
        })?;
        Ok(Self { runtime_dir })
    }

    /// Directory holding runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the PID file of the daemon called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimePathsError::InvalidName`] when `name` is not a valid
    /// daemon name (see [`validate_service_name`]).
    pub fn pid_path(&self, name: &str) -> Result<PathBuf, RuntimePathsError> {
        let valid = validate_service_name(name)?;
        Ok(self.runtime_dir.join(format!("{valid}.pid")))
    }
}

/// Checks that `name` is usable as a daemon name.
///
/// Names are between 1 and [`MAX_SERVICE_NAME_LEN`] characters drawn from
/// ASCII letters, digits, `-`, `_`, and `.`. This keeps PID file names free of
/// path separators.
///
/// # Errors
///
/// Returns [`RuntimePathsError::InvalidName`] describing the first violation.
pub fn validate_service_name(name: &str) -> Result<&str, RuntimePathsError> {
    let invalid = |reason: &'static str| RuntimePathsError::InvalidName {
        name: name.to_owned(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(invalid("name is longer than 128 characters"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        return Err(invalid(
            "only letters, digits, '-', '_' and '.' are allowed",
        ));
    }
    if matches!(name, "." | "..") {
        return Err(invalid("name must not be a directory reference"));
    }
    Ok(name)
}

/// Errors raised while deriving runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// The daemon name cannot be used to build a PID file name.
    #[error("invalid daemon name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name was rejected.
        reason: &'static str,
    },
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
