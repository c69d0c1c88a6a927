use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use leadrelay_core::errors::{ApplicationError, DomainError};

pub mod assignment;
pub mod cascade;

pub use assignment::SqlResponsibilityRecorder;
pub use cascade::SqlCascadeStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("constraint conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict(message) => {
                ApplicationError::Domain(DomainError::InvariantViolation(message))
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Fixed-width UTC text so that SQL string comparison orders timestamps.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use leadrelay_core::errors::{ApplicationError, DomainError};

    use super::{format_timestamp, parse_timestamp, RepositoryError};

    #[test]
    fn formatted_timestamps_sort_lexicographically() {
        let whole = DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .expect("valid")
            .with_timezone(&Utc);
        let fractional = DateTime::parse_from_rfc3339("2026-03-02T09:00:00.5Z")
            .expect("valid")
            .with_timezone(&Utc);

        let (left, right) = (format_timestamp(whole), format_timestamp(fractional));

        assert_eq!(left, "2026-03-02T09:00:00.000000Z");
        assert!(left < right);
        assert_eq!(parse_timestamp("started_at", right).expect("parse"), fractional);
    }

    #[test]
    fn conflicts_map_to_invariant_violations() {
        let error: ApplicationError = RepositoryError::Conflict("duplicate sequence".to_string()).into();
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvariantViolation(_))));

        let error: ApplicationError = RepositoryError::Decode("bad row".to_string()).into();
        assert!(matches!(error, ApplicationError::Persistence(ref message) if message.contains("bad row")));
    }
}
