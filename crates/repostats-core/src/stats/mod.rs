//! COUNTER-style deduplicated aggregation over the event table.
//!
//! - `model` — query and result shapes
//! - `period` — `(period, date)` wire parameters to `[start, end)` windows
//! - `sql` — query text shared by the store implementation
//!
//! The service validates windows and applies pagination defaults; the heavy
//! lifting (dedup, conditional counts, gap fill) happens inside the store.

pub mod model;
pub mod period;
pub(crate) mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ServiceError;
pub use model::{AggregateResult, BreakdownResult, Interval, Query, TimeseriesResult};

/// Pagination defaults for breakdown queries.
pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Read-only query boundary over the event table.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn aggregate(&self, repo_id: &str, query: Query) -> Result<AggregateResult, ServiceError>;

    async fn timeseries(
        &self,
        repo_id: &str,
        query: Query,
    ) -> Result<Vec<TimeseriesResult>, ServiceError>;

    async fn breakdown_by_pid(
        &self,
        repo_id: &str,
        query: Query,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<BreakdownResult>, ServiceError>;

    async fn count_unique_pids(&self, repo_id: &str, query: Query) -> Result<u64, ServiceError>;

    /// Timestamp of the repository's most recent event, if any.
    async fn last_event_time(&self, repo_id: &str)
    -> Result<Option<DateTime<Utc>>, ServiceError>;
}

pub struct StatsService {
    store: Arc<dyn StatsStore>,
}

impl StatsService {
    pub fn new(store: Arc<dyn StatsStore>) -> Self {
        StatsService { store }
    }

    pub async fn aggregate(
        &self,
        repo_id: &str,
        query: Query,
    ) -> Result<AggregateResult, ServiceError> {
        if check_window(&query)?.is_empty() {
            return Ok(AggregateResult::default());
        }
        self.store.aggregate(repo_id, query).await
    }

    pub async fn timeseries(
        &self,
        repo_id: &str,
        query: Query,
    ) -> Result<Vec<TimeseriesResult>, ServiceError> {
        if check_window(&query)?.is_empty() {
            return Ok(Vec::new());
        }
        self.store.timeseries(repo_id, query).await
    }

    pub async fn breakdown_by_pid(
        &self,
        repo_id: &str,
        query: Query,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<BreakdownResult>, ServiceError> {
        if check_window(&query)?.is_empty() {
            return Ok(Vec::new());
        }
        let page = if page == 0 { DEFAULT_PAGE } else { page };
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        self.store
            .breakdown_by_pid(repo_id, query, page, page_size)
            .await
    }

    pub async fn count_unique_pids(
        &self,
        repo_id: &str,
        query: Query,
    ) -> Result<u64, ServiceError> {
        if check_window(&query)?.is_empty() {
            return Ok(0);
        }
        self.store.count_unique_pids(repo_id, query).await
    }

    pub async fn last_event_time(
        &self,
        repo_id: &str,
    ) -> Result<Option<DateTime<Utc>>, ServiceError> {
        self.store.last_event_time(repo_id).await
    }
}

enum Window {
    Empty,
    Proper,
}

impl Window {
    fn is_empty(&self) -> bool {
        matches!(self, Window::Empty)
    }
}

fn check_window(query: &Query) -> Result<Window, ServiceError> {
    if query.end < query.start {
        return Err(ServiceError::InvalidRange);
    }
    if query.end == query.start {
        return Ok(Window::Empty);
    }
    Ok(Window::Proper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct PanickingStore;

    #[async_trait]
    impl StatsStore for PanickingStore {
        async fn aggregate(
            &self,
            _repo_id: &str,
            _query: Query,
        ) -> Result<AggregateResult, ServiceError> {
            panic!("store must not be reached");
        }

        async fn timeseries(
            &self,
            _repo_id: &str,
            _query: Query,
        ) -> Result<Vec<TimeseriesResult>, ServiceError> {
            panic!("store must not be reached");
        }

        async fn breakdown_by_pid(
            &self,
            _repo_id: &str,
            _query: Query,
            _page: u64,
            _page_size: u64,
        ) -> Result<Vec<BreakdownResult>, ServiceError> {
            panic!("store must not be reached");
        }

        async fn count_unique_pids(
            &self,
            _repo_id: &str,
            _query: Query,
        ) -> Result<u64, ServiceError> {
            panic!("store must not be reached");
        }

        async fn last_event_time(
            &self,
            _repo_id: &str,
        ) -> Result<Option<DateTime<Utc>>, ServiceError> {
            Ok(None)
        }
    }

    struct RecordingStore {
        pages: std::sync::Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl StatsStore for RecordingStore {
        async fn aggregate(
            &self,
            _repo_id: &str,
            _query: Query,
        ) -> Result<AggregateResult, ServiceError> {
            Ok(AggregateResult::default())
        }

        async fn timeseries(
            &self,
            _repo_id: &str,
            _query: Query,
        ) -> Result<Vec<TimeseriesResult>, ServiceError> {
            Ok(Vec::new())
        }

        async fn breakdown_by_pid(
            &self,
            _repo_id: &str,
            _query: Query,
            page: u64,
            page_size: u64,
        ) -> Result<Vec<BreakdownResult>, ServiceError> {
            self.pages.lock().unwrap().push((page, page_size));
            Ok(Vec::new())
        }

        async fn count_unique_pids(
            &self,
            _repo_id: &str,
            _query: Query,
        ) -> Result<u64, ServiceError> {
            Ok(0)
        }

        async fn last_event_time(
            &self,
            _repo_id: &str,
        ) -> Result<Option<DateTime<Utc>>, ServiceError> {
            Ok(None)
        }
    }

    fn window(start_day: u32, end_day: u32) -> Query {
        Query::new(
            Utc.with_ymd_and_hms(2022, 1, start_day, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 1, end_day, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn reversed_window_is_invalid_range() {
        let service = StatsService::new(Arc::new(PanickingStore));
        let err = service
            .aggregate("example.com", window(5, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRange));
    }

    #[tokio::test]
    async fn empty_window_short_circuits_without_store_access() {
        let service = StatsService::new(Arc::new(PanickingStore));

        let aggregate = service.aggregate("example.com", window(1, 1)).await.unwrap();
        assert_eq!(aggregate, AggregateResult::default());

        let timeseries = service
            .timeseries("example.com", window(1, 1))
            .await
            .unwrap();
        assert!(timeseries.is_empty());

        let breakdown = service
            .breakdown_by_pid("example.com", window(1, 1), 1, 100)
            .await
            .unwrap();
        assert!(breakdown.is_empty());
    }

    #[tokio::test]
    async fn pagination_defaults_apply_when_zero() {
        let store = Arc::new(RecordingStore {
            pages: std::sync::Mutex::new(Vec::new()),
        });
        let service = StatsService::new(store.clone());

        service
            .breakdown_by_pid("example.com", window(1, 2), 0, 0)
            .await
            .unwrap();
        service
            .breakdown_by_pid("example.com", window(1, 2), 3, 250)
            .await
            .unwrap();

        let pages = store.pages.lock().unwrap();
        assert_eq!(*pages, vec![(1, 100), (3, 250)]);
    }
}
