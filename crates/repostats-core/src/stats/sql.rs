//! SQL text for the aggregation queries.
//!
//! All three query shapes share one prelude: the 30-second deduplication
//! CTE. Identical `(name, pid, session_id)` rows whose timestamps floor to
//! the same 30-second boundary collapse into a single row before any
//! counting, which is the COUNTER "double-click" rule. Totals count rows of
//! the CTE; uniques count distinct sessions.
//!
//! Bind order is `repo_id`, then window bounds as microsecond epochs, then
//! any shape-specific parameters. Builders are pure so they can be checked
//! without a live store.

use super::model::Interval;

/// Shared dedup prelude. Binds: repo_id, start_micros, end_micros.
const DEDUP_CTE: &str = "\
WITH deduped AS
(
    SELECT
        name,
        pid,
        session_id,
        toStartOfInterval(timestamp, INTERVAL 30 SECOND) AS bucket
    FROM events
    WHERE repo_id = ?
      AND timestamp >= fromUnixTimestamp64Micro(?)
      AND timestamp < fromUnixTimestamp64Micro(?)
    GROUP BY name, pid, session_id, bucket
)";

const METRIC_COLUMNS: &str = "\
    countIf(name = 'view') AS total_views,
    uniqIf(session_id, name = 'view') AS unique_views,
    countIf(name = 'download') AS total_downloads,
    uniqIf(session_id, name = 'download') AS unique_downloads";

/// Four scalar metrics over the whole window.
pub(crate) fn aggregate_sql() -> String {
    format!("{DEDUP_CTE}\nSELECT\n{METRIC_COLUMNS}\nFROM deduped")
}

/// Per-PID metrics, pid-ordered so pagination is deterministic and
/// retryable. Extra binds: limit, offset.
pub(crate) fn breakdown_sql() -> String {
    format!(
        "{DEDUP_CTE}\nSELECT\n    pid,\n{METRIC_COLUMNS}\nFROM deduped\n\
         GROUP BY pid\nORDER BY pid\nLIMIT ? OFFSET ?"
    )
}

/// Bucketed metrics with gap filling: the store emits every interval step
/// between the fill bounds, zero-filled where the CTE has no rows. Extra
/// binds: fill start micros, fill end micros (callers pass `end + 1 month`
/// for monthly buckets so the end month is included).
pub(crate) fn timeseries_sql(interval: Interval) -> String {
    let (floor, step) = match interval {
        Interval::Hour => ("toStartOfHour", "INTERVAL 1 HOUR"),
        Interval::Day => ("toStartOfDay", "INTERVAL 1 DAY"),
        Interval::Month => ("toStartOfMonth", "INTERVAL 1 MONTH"),
    };
    format!(
        "{DEDUP_CTE}\nSELECT\n    {floor}(bucket) AS date,\n{METRIC_COLUMNS}\nFROM deduped\n\
         GROUP BY date\n\
         ORDER BY date WITH FILL\n\
         FROM {floor}(fromUnixTimestamp64Micro(?))\n\
         TO {floor}(fromUnixTimestamp64Micro(?))\n\
         STEP {step}"
    )
}

/// Count of distinct PIDs with any usage in the window.
pub(crate) fn count_unique_pids_sql() -> String {
    "SELECT uniqExact(pid) AS unique_pids\n\
     FROM events\n\
     WHERE repo_id = ?\n\
       AND timestamp >= fromUnixTimestamp64Micro(?)\n\
       AND timestamp < fromUnixTimestamp64Micro(?)"
        .to_string()
}

/// Row count and latest timestamp for a repository (liveness check).
pub(crate) fn last_event_sql() -> String {
    "SELECT count() AS n, max(timestamp) AS last\n\
     FROM events\n\
     WHERE repo_id = ?"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_shapes_share_the_dedup_prelude() {
        for sql in [
            aggregate_sql(),
            breakdown_sql(),
            timeseries_sql(Interval::Day),
        ] {
            assert!(sql.contains("toStartOfInterval(timestamp, INTERVAL 30 SECOND)"));
            assert!(sql.contains("GROUP BY name, pid, session_id, bucket"));
            assert!(sql.contains("timestamp >= fromUnixTimestamp64Micro(?)"));
            assert!(sql.contains("timestamp < fromUnixTimestamp64Micro(?)"));
        }
    }

    #[test]
    fn aggregate_projects_four_metrics() {
        let sql = aggregate_sql();
        assert!(sql.contains("countIf(name = 'view') AS total_views"));
        assert!(sql.contains("uniqIf(session_id, name = 'view') AS unique_views"));
        assert!(sql.contains("countIf(name = 'download') AS total_downloads"));
        assert!(sql.contains("uniqIf(session_id, name = 'download') AS unique_downloads"));
        assert!(!sql.contains("GROUP BY pid"));
    }

    #[test]
    fn breakdown_orders_and_paginates() {
        let sql = breakdown_sql();
        assert!(sql.contains("GROUP BY pid"));
        assert!(sql.contains("ORDER BY pid"));
        assert!(sql.contains("LIMIT ? OFFSET ?"));
    }

    #[test]
    fn timeseries_floors_per_interval() {
        let hour = timeseries_sql(Interval::Hour);
        assert!(hour.contains("toStartOfHour(bucket) AS date"));
        assert!(hour.contains("STEP INTERVAL 1 HOUR"));

        let day = timeseries_sql(Interval::Day);
        assert!(day.contains("toStartOfDay(bucket) AS date"));
        assert!(day.contains("STEP INTERVAL 1 DAY"));

        let month = timeseries_sql(Interval::Month);
        assert!(month.contains("toStartOfMonth(bucket) AS date"));
        assert!(month.contains("STEP INTERVAL 1 MONTH"));
    }

    #[test]
    fn timeseries_gap_fills_the_window() {
        let sql = timeseries_sql(Interval::Day);
        assert!(sql.contains("ORDER BY date WITH FILL"));
        assert!(sql.contains("FROM toStartOfDay(fromUnixTimestamp64Micro(?))"));
        assert!(sql.contains("TO toStartOfDay(fromUnixTimestamp64Micro(?))"));
    }
}
