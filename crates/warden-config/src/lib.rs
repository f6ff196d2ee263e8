//! Shared configuration for the `warden` process-control toolkit.
//!
//! Layers are merged by `ortho_config` in increasing precedence: built-in
//! defaults, a TOML file (`--config-path`, `WARDEN_CONFIG_PATH` or a
//! discovered `.warden.toml`), `WARDEN_*` environment variables, then
//! command-line flags. [`Config::load_checked`] adds the checks the merge
//! cannot express.

mod defaults;
mod logging;
mod policy;
mod runtime;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_KILL_TIMEOUT_SECS, DEFAULT_LINGER_TIMEOUT_MS, DEFAULT_LOG_FILTER, RUNTIME_DIR_NAME,
    default_fork_policy, default_kill_timeout_secs, default_linger_timeout_ms,
    default_log_filter_string, default_log_format, default_runtime_dir,
};
pub use logging::LogFormat;
pub use policy::ForkPolicy;
pub use runtime::{MAX_SERVICE_NAME_LEN, RuntimePaths, RuntimePathsError, validate_service_name};

/// Effective configuration shared by the CLI and library consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "WARDEN")]
pub struct Config {
    /// Tracing filter expression (for example `info` or `warden=debug`).
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for log records.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Directory holding PID files of managed daemons.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: Utf8PathBuf,
    /// Grace period granted to a timed-out command after the terminate
    /// signal, in milliseconds.
    #[serde(default = "default_linger_timeout_ms")]
    pub linger_timeout_ms: u64,
    /// Seconds to wait for a stopped daemon before killing it outright.
    #[serde(default = "default_kill_timeout_secs")]
    pub kill_timeout_secs: u64,
    /// Whether operations that create child processes are permitted.
    #[serde(default = "default_fork_policy")]
    pub fork_policy: ForkPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            runtime_dir: default_runtime_dir(),
            linger_timeout_ms: default_linger_timeout_ms(),
            kill_timeout_secs: default_kill_timeout_secs(),
            fork_policy: default_fork_policy(),
        }
    }
}

impl Config {
    /// Loads every configuration layer and validates the result.
    ///
    /// `args` holds the program name followed by configuration flags only,
    /// matching [`std::env::args_os`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a layer is malformed or a value does
    /// not parse, and [`ConfigError::EmptyLogFilter`] for a blank filter.
    pub fn load_checked<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = Self::load_from_iter(args).map_err(ConfigError::Load)?;
        logging::check_log_filter(&config.log_filter)?;
        Ok(config)
    }

    /// Linger grace period as a [`Duration`].
    #[must_use]
    pub const fn linger_timeout(&self) -> Duration {
        Duration::from_millis(self.linger_timeout_ms)
    }

    /// Kill timeout as a [`Duration`].
    #[must_use]
    pub const fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration layer could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(#[source] Arc<OrthoError>),
    /// The log filter was set to an empty string.
    #[error("log filter must not be empty")]
    EmptyLogFilter,
}
