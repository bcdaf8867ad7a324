//! Event writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::Serialize;

use crate::error::ServiceError;
use crate::event::{Event, EventStore};

/// Wire row for the `events` table. Field order matches the table columns.
#[derive(Row, Serialize)]
struct EventRow<'a> {
    #[serde(with = "clickhouse::serde::chrono::datetime64::micros")]
    timestamp: DateTime<Utc>,
    name: &'a str,
    repo_id: &'a str,
    pid: &'a str,
    user_id: u64,
    session_id: u64,
}

impl<'a> From<&'a Event> for EventRow<'a> {
    fn from(event: &'a Event) -> Self {
        EventRow {
            timestamp: event.timestamp,
            name: &event.name,
            repo_id: &event.repo_id,
            pid: &event.pid,
            user_id: event.user_id,
            session_id: event.session_id,
        }
    }
}

pub struct ClickhouseEventStore {
    client: Client,
}

impl ClickhouseEventStore {
    pub fn new(client: Client) -> Self {
        ClickhouseEventStore { client }
    }

    /// Appends a batch in one insert. Used by backfills and tests; the
    /// ingest path writes single rows.
    pub async fn insert_many(&self, events: &[Event]) -> Result<(), ServiceError> {
        let mut insert = self.client.insert("events")?;
        for event in events {
            insert.write(&EventRow::from(event)).await?;
        }
        insert.end().await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for ClickhouseEventStore {
    async fn insert(&self, event: &Event) -> Result<(), ServiceError> {
        self.insert_many(std::slice::from_ref(event)).await
    }
}
