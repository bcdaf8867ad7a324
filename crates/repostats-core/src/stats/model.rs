//! Query and result shapes for the aggregation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Bucket width for timeseries results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interval {
    Hour,
    #[default]
    Day,
    Month,
}

impl Interval {
    /// Parses the wire value; an empty string selects the default.
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        match value {
            "hour" => Ok(Interval::Hour),
            "day" | "" => Ok(Interval::Day),
            "month" => Ok(Interval::Month),
            other => Err(ServiceError::InvalidPeriod(format!(
                "unknown interval {:?}",
                other
            ))),
        }
    }
}

/// A half-open query window `[start, end)` with an optional bucket width.
#[derive(Debug, Clone, Copy)]
pub struct Query {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
}

impl Query {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Query {
            start,
            end,
            interval: Interval::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub total_views: u64,
    pub unique_views: u64,
    pub total_downloads: u64,
    pub unique_downloads: u64,
}

/// One gap-filled bucket of a timeseries. Buckets ascend by `date` and
/// every bucket in the window is present, zero-filled when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesResult {
    pub date: DateTime<Utc>,
    pub total_views: u64,
    pub unique_views: u64,
    pub total_downloads: u64,
    pub unique_downloads: u64,
}

/// Per-PID aggregates, paginated. No inherent order beyond the store's
/// pid sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownResult {
    pub pid: String,
    pub total_views: u64,
    pub unique_views: u64,
    pub total_downloads: u64,
    pub unique_downloads: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parses_wire_values() {
        assert_eq!(Interval::parse("hour").unwrap(), Interval::Hour);
        assert_eq!(Interval::parse("day").unwrap(), Interval::Day);
        assert_eq!(Interval::parse("month").unwrap(), Interval::Month);
        assert_eq!(Interval::parse("").unwrap(), Interval::Day);
        assert!(matches!(
            Interval::parse("week"),
            Err(ServiceError::InvalidPeriod(_))
        ));
    }
}
