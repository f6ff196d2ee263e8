//! Process-wide tracing subscriber for programs built on this crate.
//!
//! Records always go to file descriptor 2. In a process detached with
//! [`ProcessRunner::daemonize`](crate::ProcessRunner::daemonize) that
//! descriptor is the log file or the null device, so a daemon installs its
//! subscriber after detaching and asks for [`LogSink::Detached`].
//!
//! Nothing in this crate logs between `fork` and `exec`. A forked child owns
//! a copy of the subscriber's locks in whatever state another thread left
//! them, so those paths report through pipes instead.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};
use warden_config::{Config, LogFormat};

/// Where standard error leads when the subscriber is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    /// The invoking terminal or pipe. Colour is used on terminals only.
    Terminal,
    /// A daemon's log file or the null device. Never coloured.
    Detached,
}

impl LogSink {
    fn colour(self) -> bool {
        match self {
            Self::Terminal => io::stderr().is_terminal(),
            Self::Detached => false,
        }
    }
}

static INSTALLED: OnceCell<LogSink> = OnceCell::new();

/// Proof that the global subscriber is installed.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryHandle {
    sink: LogSink,
}

impl TelemetryHandle {
    /// Sink chosen by the call that installed the subscriber.
    #[must_use]
    pub const fn sink(&self) -> LogSink {
        self.sink
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter {filter:?}: {reason}")]
    Filter {
        /// Expression as configured.
        filter: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// Another global subscriber was installed first.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on first use.
///
/// Later calls leave the installed subscriber alone and report the sink it
/// was installed for.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an invalid filter and
/// [`TelemetryError::Subscriber`] when a foreign subscriber is already
/// global.
pub fn initialise(config: &Config, sink: LogSink) -> Result<TelemetryHandle, TelemetryError> {
    let installed = INSTALLED.get_or_try_init(|| install(config, sink).map(|()| sink))?;
    Ok(TelemetryHandle { sink: *installed })
}

fn parse_filter(filter: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter {
        filter: filter.to_owned(),
        reason: error.to_string(),
    })
}

fn install(config: &Config, sink: LogSink) -> Result<(), TelemetryError> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(parse_filter(&config.log_filter)?)
        .with_target(true)
        .with_writer(io::stderr)
        .with_ansi(sink.colour())
        .with_timer(UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unknown_level("info,warden=loudest")]
    #[case::unknown_target_level("warden=verbose")]
    fn rejects_invalid_filters(#[case] filter: &str) {
        let error = parse_filter(filter).expect_err("filter does not parse");
        assert!(
            matches!(&error, TelemetryError::Filter { filter: rejected, .. } if rejected == filter),
            "unexpected error: {error}"
        );
    }

    #[test]
    fn invalid_filter_installs_nothing() {
        let config = Config {
            log_filter: String::from("info,warden=loudest"),
            ..Config::default()
        };
        assert!(initialise(&config, LogSink::Detached).is_err());
        assert!(INSTALLED.get().is_none());
    }

    #[test]
    fn detached_output_is_never_coloured() {
        assert!(!LogSink::Detached.colour());
    }
}
