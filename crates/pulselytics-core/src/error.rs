use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures the aggregation engine can surface. A fetch that returns zero
/// events is NOT an error; it produces a fully-formed all-zero report.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Period token did not match `^(\d+)([dwmy])$`.
    #[error("invalid period token: {0:?}")]
    InvalidPeriod(String),

    /// Explicit range with start after end.
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// The event-store fetch failed. All reducers of the request fail
    /// together; no partial results are produced.
    #[error("event query failed: {0}")]
    QueryFailure(#[source] anyhow::Error),

    /// The event-store fetch did not complete within the configured budget.
    #[error("event query timed out after {0:?}")]
    QueryTimeout(Duration),
}

impl EngineError {
    /// Stable machine-readable code, used in HTTP error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidPeriod(_) => "invalid_period",
            EngineError::InvalidTimeRange { .. } => "invalid_time_range",
            EngineError::QueryFailure(_) => "query_failure",
            EngineError::QueryTimeout(_) => "query_timeout",
        }
    }
}
