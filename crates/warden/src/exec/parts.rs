//! Running every executable in a directory, `run-parts` style.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

use nix::unistd::{AccessFlags, access};
use tracing::{debug, warn};

use super::{CommandResult, CommandSpec, EXEC_TARGET, ProcessRunner};
use crate::error::ControlError;

/// Environment for every part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartsOptions {
    /// Variables set for each part.
    pub env: BTreeMap<OsString, OsString>,
    /// Hand each part exactly `env` instead of the caller's environment.
    pub reset_env: bool,
}

/// What happened to one directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartStatus {
    /// Not run: hidden name, disallowed characters, or not an executable
    /// regular file.
    Skipped,
    /// The part could not be started.
    Failed(String),
    /// The part ran; inspect the result for its exit status.
    Ran(CommandResult),
}

/// Report entry for one directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReport {
    /// File name relative to the directory.
    pub name: String,
    /// Outcome.
    pub status: PartStatus,
}

impl ProcessRunner {
    /// Runs each executable regular file in `dir` in lexical order.
    ///
    /// Only names made of ASCII letters, digits, `-` and `_` are run; other
    /// visible entries are reported as [`PartStatus::Skipped`]. An unreadable
    /// directory yields an empty report.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Programmer`] when forking is disabled.
    pub fn run_parts(
        &self,
        dir: &Path,
        options: &PartsOptions,
    ) -> Result<Vec<PartReport>, ControlError> {
        self.ensure_fork_allowed("run parts")?;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(
                    target: EXEC_TARGET,
                    dir = %dir.display(),
                    error = %error,
                    "skipping parts directory; cannot list it"
                );
                return Ok(Vec::new());
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();

        let reports = names
            .into_iter()
            .map(|name| {
                let path = dir.join(&name);
                let status = if is_part_name(&name) && is_executable(&path) {
                    let spec = CommandSpec::new([path.as_os_str()])
                        .envs(options.env.clone())
                        .reset_env(options.reset_env);
                    match self.run(&spec) {
                        Ok(result) => PartStatus::Ran(result),
                        Err(error) => PartStatus::Failed(error.to_string()),
                    }
                } else {
                    PartStatus::Skipped
                };
                debug!(
                    target: EXEC_TARGET,
                    part = %name,
                    status = status_label(&status),
                    "processed part"
                );
                PartReport { name, status }
            })
            .collect();
        Ok(reports)
    }
}

fn is_part_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

const fn status_label(status: &PartStatus) -> &'static str {
    match status {
        PartStatus::Skipped => "skipped",
        PartStatus::Failed(_) => "failed",
        PartStatus::Ran(_) => "ran",
    }
}
