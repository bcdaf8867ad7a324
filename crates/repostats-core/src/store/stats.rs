//! Execution of the aggregation queries.
//!
//! Counters are `u64` end to end; nothing here downcasts. Store-driver
//! failures surface as `StoreUnavailable` via the error conversion.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Months, Timelike, Utc};
use clickhouse::{Client, Row};
use serde::Deserialize;

use crate::error::ServiceError;
use crate::stats::model::{AggregateResult, BreakdownResult, Interval, Query, TimeseriesResult};
use crate::stats::{StatsStore, sql};

#[derive(Row, Deserialize)]
struct AggregateRow {
    total_views: u64,
    unique_views: u64,
    total_downloads: u64,
    unique_downloads: u64,
}

#[derive(Row, Deserialize)]
struct TimeseriesRow {
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    date: DateTime<Utc>,
    total_views: u64,
    unique_views: u64,
    total_downloads: u64,
    unique_downloads: u64,
}

#[derive(Row, Deserialize)]
struct BreakdownRow {
    pid: String,
    total_views: u64,
    unique_views: u64,
    total_downloads: u64,
    unique_downloads: u64,
}

#[derive(Row, Deserialize)]
struct UniquePidsRow {
    unique_pids: u64,
}

#[derive(Row, Deserialize)]
struct LastEventRow {
    n: u64,
    #[serde(with = "clickhouse::serde::chrono::datetime64::micros")]
    last: DateTime<Utc>,
}

pub struct ClickhouseStatsStore {
    client: Client,
}

impl ClickhouseStatsStore {
    pub fn new(client: Client) -> Self {
        ClickhouseStatsStore { client }
    }
}

#[async_trait]
impl StatsStore for ClickhouseStatsStore {
    async fn aggregate(
        &self,
        repo_id: &str,
        query: Query,
    ) -> Result<AggregateResult, ServiceError> {
        // Aggregation without GROUP BY always yields exactly one row, zeros
        // included when the window is empty.
        let row = self
            .client
            .query(&sql::aggregate_sql())
            .bind(repo_id)
            .bind(query.start.timestamp_micros())
            .bind(query.end.timestamp_micros())
            .fetch_one::<AggregateRow>()
            .await?;

        Ok(AggregateResult {
            total_views: row.total_views,
            unique_views: row.unique_views,
            total_downloads: row.total_downloads,
            unique_downloads: row.unique_downloads,
        })
    }

    async fn timeseries(
        &self,
        repo_id: &str,
        query: Query,
    ) -> Result<Vec<TimeseriesResult>, ServiceError> {
        // Monthly buckets fill through end + 1 month so the end month is
        // included; hour/day bounds already align with the half-open window.
        let fill_end = match query.interval {
            Interval::Month => query.end + Months::new(1),
            Interval::Hour | Interval::Day => query.end,
        };

        let rows = self
            .client
            .query(&sql::timeseries_sql(query.interval))
            .bind(repo_id)
            .bind(query.start.timestamp_micros())
            .bind(query.end.timestamp_micros())
            .bind(query.start.timestamp_micros())
            .bind(fill_end.timestamp_micros())
            .fetch_all::<TimeseriesRow>()
            .await?;

        let rows = rows
            .into_iter()
            .map(|row| TimeseriesResult {
                date: row.date,
                total_views: row.total_views,
                unique_views: row.unique_views,
                total_downloads: row.total_downloads,
                unique_downloads: row.unique_downloads,
            })
            .collect();

        // WITH FILL emits nothing at all over an empty result set, and a
        // partial set only fills between its own extent and the bounds.
        // Rebuilding the grid here keeps every bucket present either way.
        Ok(fill_gaps(rows, query.interval, query.start, fill_end))
    }

    async fn breakdown_by_pid(
        &self,
        repo_id: &str,
        query: Query,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<BreakdownResult>, ServiceError> {
        let offset = (page - 1) * page_size;

        let rows = self
            .client
            .query(&sql::breakdown_sql())
            .bind(repo_id)
            .bind(query.start.timestamp_micros())
            .bind(query.end.timestamp_micros())
            .bind(page_size)
            .bind(offset)
            .fetch_all::<BreakdownRow>()
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| BreakdownResult {
                pid: row.pid,
                total_views: row.total_views,
                unique_views: row.unique_views,
                total_downloads: row.total_downloads,
                unique_downloads: row.unique_downloads,
            })
            .collect())
    }

    async fn count_unique_pids(&self, repo_id: &str, query: Query) -> Result<u64, ServiceError> {
        let row = self
            .client
            .query(&sql::count_unique_pids_sql())
            .bind(repo_id)
            .bind(query.start.timestamp_micros())
            .bind(query.end.timestamp_micros())
            .fetch_one::<UniquePidsRow>()
            .await?;
        Ok(row.unique_pids)
    }

    async fn last_event_time(
        &self,
        repo_id: &str,
    ) -> Result<Option<DateTime<Utc>>, ServiceError> {
        let row = self
            .client
            .query(&sql::last_event_sql())
            .bind(repo_id)
            .fetch_one::<LastEventRow>()
            .await?;
        // max() over no rows reports the epoch; the row count disambiguates.
        if row.n == 0 {
            return Ok(None);
        }
        Ok(Some(row.last))
    }
}

/// Floors an instant to the start of its interval bucket.
fn floor_to(interval: Interval, t: DateTime<Utc>) -> DateTime<Utc> {
    let date = t.date_naive();
    let naive = match interval {
        Interval::Hour => date.and_hms_opt(t.hour(), 0, 0),
        Interval::Day => date.and_hms_opt(0, 0, 0),
        Interval::Month => date.with_day(1).and_then(|d| d.and_hms_opt(0, 0, 0)),
    };
    naive.expect("interval floor always exists").and_utc()
}

fn step(interval: Interval, t: DateTime<Utc>) -> DateTime<Utc> {
    match interval {
        Interval::Hour => t + Duration::hours(1),
        Interval::Day => t + Duration::days(1),
        Interval::Month => t + Months::new(1),
    }
}

/// Merges store rows over the bucket grid `[floor(start), floor(bound))`,
/// inserting zero rows for absent buckets. Rows outside the grid (a partial
/// trailing bucket) are kept.
fn fill_gaps(
    rows: Vec<TimeseriesResult>,
    interval: Interval,
    start: DateTime<Utc>,
    bound: DateTime<Utc>,
) -> Vec<TimeseriesResult> {
    let mut by_date: BTreeMap<DateTime<Utc>, TimeseriesResult> =
        rows.into_iter().map(|row| (row.date, row)).collect();

    let mut bucket = floor_to(interval, start);
    let bound = floor_to(interval, bound);
    while bucket < bound {
        by_date.entry(bucket).or_insert(TimeseriesResult {
            date: bucket,
            total_views: 0,
            unique_views: 0,
            total_downloads: 0,
            unique_downloads: 0,
        });
        bucket = step(interval, bucket);
    }

    by_date.into_values().collect()
}
