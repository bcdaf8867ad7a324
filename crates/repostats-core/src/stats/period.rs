//! Period resolution: `(period, date)` wire parameters to a half-open
//! `[start, end)` window.
//!
//! | period | date | start | end |
//! |---|---|---|---|
//! | `day` | `YYYY-MM-DD` or empty (today) | 00:00 of date | 00:00 of date+1 |
//! | `7d` | anchor date | anchor − 6 days | anchor + 1 day |
//! | `30d` (default) | anchor date | anchor − 29 days | anchor + 1 day |
//! | `custom` | `YYYY-MM-DD,YYYY-MM-DD` | first | second + 1 day |
//!
//! Day boundaries are UTC midnights; everything downstream stays zone-aware.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::ServiceError;

/// Resolves `period` and `date` against `now` (the anchor when `date` is
/// empty). Unknown periods, missing commas, and unparseable dates are all
/// `InvalidPeriod`.
pub fn resolve(
    period: &str,
    date: &str,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ServiceError> {
    match period {
        "day" => {
            let anchor = parse_anchor(date, now)?;
            Ok((midnight(anchor), midnight(anchor + Duration::days(1))))
        }
        "7d" => {
            let anchor = parse_anchor(date, now)?;
            Ok((
                midnight(anchor - Duration::days(6)),
                midnight(anchor + Duration::days(1)),
            ))
        }
        "30d" | "" => {
            let anchor = parse_anchor(date, now)?;
            Ok((
                midnight(anchor - Duration::days(29)),
                midnight(anchor + Duration::days(1)),
            ))
        }
        "custom" => {
            let (first, second) = date.split_once(',').ok_or_else(|| {
                ServiceError::InvalidPeriod("custom period needs \"start,end\"".to_string())
            })?;
            let start = parse_date(first.trim())?;
            let end = parse_date(second.trim())?;
            Ok((midnight(start), midnight(end + Duration::days(1))))
        }
        other => Err(ServiceError::InvalidPeriod(format!(
            "unknown period {:?}",
            other
        ))),
    }
}

fn parse_anchor(date: &str, now: DateTime<Utc>) -> Result<NaiveDate, ServiceError> {
    if date.is_empty() {
        Ok(now.date_naive())
    } else {
        parse_date(date)
    }
}

fn parse_date(date: &str) -> Result<NaiveDate, ServiceError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| ServiceError::InvalidPeriod(format!("bad date {:?}: {}", date, e)))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight always exists")
        .and_utc()
}
