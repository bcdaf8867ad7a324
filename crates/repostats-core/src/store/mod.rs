//! ClickHouse-backed store implementations.
//!
//! - `events` — append-only event writes
//! - `salts` — salt rows (append-only, latest wins)
//! - `stats` — the deduplicated aggregation queries
//!
//! The event table is partitioned by month and ordered by
//! `(repo_id, toDate(timestamp), user_id)` so per-repository window scans
//! touch few parts and `SAMPLE BY user_id` stays available for ad-hoc
//! estimates. Every DDL statement is idempotent and safe to run on startup.

pub mod events;
pub mod salts;
pub mod stats;

pub use clickhouse::Client;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::ServiceError;

pub use events::ClickhouseEventStore;
pub use salts::ClickhouseSaltStore;
pub use stats::ClickhouseStatsStore;

const MIGRATIONS: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS events
(
    timestamp  DateTime64(6, 'UTC') CODEC(Delta, ZSTD(1)),
    name       LowCardinality(String),
    repo_id    LowCardinality(String),
    pid        String,
    user_id    UInt64,
    session_id UInt64
)
ENGINE = MergeTree
PARTITION BY toYYYYMM(timestamp)
ORDER BY (repo_id, toDate(timestamp), user_id)
SAMPLE BY user_id
SETTINGS index_granularity = 8192",
    r"CREATE TABLE IF NOT EXISTS salts
(
    salt    String,
    created DateTime64(6, 'UTC')
)
ENGINE = MergeTree
ORDER BY created",
];

/// Builds a client from config. The connection is lazy; use [`ping`] to
/// verify it.
pub fn connect(config: &DatabaseConfig) -> Client {
    Client::default()
        .with_url(config.url())
        .with_user(config.user.as_str())
        .with_password(config.password.as_str())
        .with_database(config.dbname.as_str())
}

pub async fn ping(client: &Client) -> Result<(), ServiceError> {
    client.query("SELECT 1").execute().await?;
    Ok(())
}

/// Creates the schema if missing.
pub async fn migrate(client: &Client) -> Result<(), ServiceError> {
    for sql in MIGRATIONS {
        client.query(sql).execute().await?;
    }
    info!(statements = MIGRATIONS.len(), "store migrations complete");
    Ok(())
}
