//! Log record format and filter checks.
//!
//! A detached daemon writes its records into the file given to
//! `warden serve --logfile`, where one JSON object per line is what log
//! shippers expect. Interactive runs usually prefer the compact form.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ConfigError;

/// Shape of each log record written to standard error.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per record, event fields flattened to the top level.
    #[default]
    Json,
    /// A single human-readable line per record.
    Compact,
}

impl LogFormat {
    /// Returns `true` when records are meant for machines rather than people.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Rejects a filter expression that would silence every record.
pub(crate) fn check_log_filter(filter: &str) -> Result<(), ConfigError> {
    if filter.trim().is_empty() {
        return Err(ConfigError::EmptyLogFilter);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::json("json", LogFormat::Json)]
    #[case::shouting("COMPACT", LogFormat::Compact)]
    fn parses_format_names(#[case] input: &str, #[case] expected: LogFormat) {
        assert_eq!(input.parse::<LogFormat>().expect("format parses"), expected);
    }

    #[test]
    fn only_json_is_structured() {
        assert!(LogFormat::Json.is_structured());
        assert!(!LogFormat::Compact.is_structured());
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank(" \t")]
    fn blank_filters_are_rejected(#[case] filter: &str) {
        assert!(matches!(
            check_log_filter(filter),
            Err(ConfigError::EmptyLogFilter)
        ));
    }

    #[test]
    fn directives_are_accepted() {
        assert!(check_log_filter("warden=debug,info").is_ok());
    }
}
