use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::logging::LogFormat;
use crate::policy::ForkPolicy;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Grace period, in milliseconds, granted to a child after it was asked to
/// terminate because its execution timeout expired.
pub const DEFAULT_LINGER_TIMEOUT_MS: u64 = 5_000;

/// Seconds to wait for a daemon to exit after the graceful signal before it
/// is killed outright.
pub const DEFAULT_KILL_TIMEOUT_SECS: u64 = 30;

/// Name of the directory grouping runtime artefacts.
pub const RUNTIME_DIR_NAME: &str = "warden";

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default fork policy; forking is permitted unless a host opts out.
pub const fn default_fork_policy() -> ForkPolicy {
    ForkPolicy::Allowed
}

/// Default linger timeout in milliseconds.
pub const fn default_linger_timeout_ms() -> u64 {
    DEFAULT_LINGER_TIMEOUT_MS
}

/// Default kill timeout in seconds.
pub const fn default_kill_timeout_secs() -> u64 {
    DEFAULT_KILL_TIMEOUT_SECS
}

/// Computes the default directory for PID files and other runtime artefacts.
///
/// Prefers the per-user runtime directory and falls back to a uid-scoped
/// directory below the system temporary directory.
pub fn default_runtime_dir() -> Utf8PathBuf {
    default_runtime_dir_inner()
}

#[cfg(unix)]
fn default_runtime_dir_inner() -> Utf8PathBuf {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push(RUNTIME_DIR_NAME);
    if apply_namespace {
        base.push(user_namespace());
    }
    base
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_runtime_dir_inner() -> Utf8PathBuf {
    let mut base = fallback_base_directory();
    base.push(RUNTIME_DIR_NAME);
    base
}
