//! Dataset Master Report generation.
//!
//! A report run pages the per-PID breakdown at 1,000 rows a time and packs
//! the rows into successive report partitions of at most 50,000 datasets.
//! The paginator is pull-based: each `next` call produces one partition (or
//! `None` once the breakdown is exhausted), so a cancelled run stops
//! cleanly between partitions and a failed partition can be retried —
//! breakdown pagination is pid-ordered and therefore deterministic.

pub mod model;
pub mod sink;

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::error::ServiceError;
use crate::stats::{Query, StatsService};
pub use model::{
    CounterDatasetInstance, CounterDatasetPerformance, CounterDatasetReport, CounterDatasetUsage,
    CounterIdentifier, Exception, ReportHeader, ReportingPeriod, SharedData,
};
use crate::stats::model::BreakdownResult;

/// Maximum dataset rows per report partition.
const REPORT_SIZE: usize = 50_000;

/// Breakdown page size used internally by the paginator.
const PAGE_SIZE: u64 = 1_000;

pub struct ReportService {
    stats: Arc<StatsService>,
}

impl ReportService {
    pub fn new(stats: Arc<StatsService>) -> Self {
        ReportService { stats }
    }

    /// Starts a report run over `[start, end)`.
    ///
    /// `compressed` only signals how the caller intends to deliver the
    /// report; it adds the corresponding exception to every header.
    pub fn generate_dsr(
        &self,
        repo_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        shared: SharedData,
        compressed: bool,
    ) -> ReportPaginator {
        ReportPaginator {
            stats: self.stats.clone(),
            repo_id: repo_id.to_string(),
            start,
            end,
            shared,
            compressed,
            page: 1,
            first: true,
            done: false,
        }
    }
}

/// Lazy producer of report partitions.
pub struct ReportPaginator {
    stats: Arc<StatsService>,
    repo_id: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    shared: SharedData,
    compressed: bool,
    page: u64,
    first: bool,
    done: bool,
}

impl ReportPaginator {
    /// Produces the next partition.
    ///
    /// `Ok(None)` ends the run. A run whose very first partition would be
    /// empty fails with `NoResults` instead. Store errors propagate without
    /// consuming the failed page, so the same call can be retried.
    pub async fn next(&mut self) -> Result<Option<CounterDatasetReport>, ServiceError> {
        if self.done {
            return Ok(None);
        }

        let query = Query::new(self.start, self.end);
        let mut datasets: Vec<CounterDatasetUsage> = Vec::new();

        while datasets.len() < REPORT_SIZE {
            let batch = self
                .stats
                .breakdown_by_pid(&self.repo_id, query, self.page, PAGE_SIZE)
                .await?;
            if batch.is_empty() {
                self.done = true;
                break;
            }
            self.page += 1;
            datasets.extend(
                batch
                    .into_iter()
                    .map(|row| dataset_usage(self.start, self.end, row, &self.shared)),
            );
        }

        if datasets.is_empty() {
            self.done = true;
            if self.first {
                self.first = false;
                return Err(ServiceError::NoResults);
            }
            return Ok(None);
        }
        self.first = false;

        debug!(
            repo_id = %self.repo_id,
            datasets = datasets.len(),
            "report partition assembled"
        );

        Ok(Some(CounterDatasetReport {
            report_header: report_header(self.start, self.end, &self.shared, self.compressed),
            report_datasets: datasets,
        }))
    }
}

fn report_header(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    shared: &SharedData,
    compressed: bool,
) -> ReportHeader {
    let mut exceptions = Vec::new();

    // The dataset title would need a metadata lookup per PID, which is too
    // much overhead at report time; it is always absent.
    exceptions.push(Exception::missing_attribute(
        "dataset-title",
        "dataset-title is unavailable in this report, can be obtained from metadata lookup based on dataset-id",
    ));
    if shared.platform.is_empty() {
        exceptions.push(Exception::missing_attribute("platform", ""));
    }
    if shared.publisher.is_empty() {
        exceptions.push(Exception::missing_attribute(
            "publisher",
            "publisher is unavailable in this report, can be obtained from metadata lookup based on dataset-id",
        ));
    }
    if shared.publisher_id.is_empty() {
        exceptions.push(Exception::missing_attribute(
            "publisher-id",
            "publisher-id is unavailable in this report, can be obtained from metadata lookup based on dataset-id",
        ));
    }
    if compressed {
        exceptions.push(Exception::compressed());
    }

    let created_by = if shared.publisher_id.is_empty() {
        "datacite-analytics".to_string()
    } else {
        format!("da_{}", shared.publisher_id)
    };

    ReportHeader {
        report_name: "Dataset Master Report".to_string(),
        report_id: "dsr".to_string(),
        release: "rd1".to_string(),
        created: start.to_rfc3339_opts(SecondsFormat::Secs, true),
        created_by,
        reporting_period: ReportingPeriod {
            begin_date: start,
            end_date: end,
        },
        report_filters: Vec::new(),
        report_attributes: Vec::new(),
        exceptions,
    }
}

fn dataset_usage(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    row: BreakdownResult,
    shared: &SharedData,
) -> CounterDatasetUsage {
    let period = ReportingPeriod {
        begin_date: start,
        end_date: end,
    };

    let instance = |metric_type: &str, count: u64| CounterDatasetInstance {
        metric_type: metric_type.to_string(),
        count,
        access_method: "regular".to_string(),
    };

    let publisher_id = if shared.publisher_id.is_empty() {
        Vec::new()
    } else {
        vec![CounterIdentifier {
            identifier_type: "client-id".to_string(),
            value: shared.publisher_id.clone(),
        }]
    };

    CounterDatasetUsage {
        dataset_title: String::new(),
        dataset_id: CounterIdentifier {
            identifier_type: "DOI".to_string(),
            value: row.pid,
        },
        platform: shared.platform.clone(),
        publisher: shared.publisher.clone(),
        publisher_id,
        data_type: "dataset".to_string(),
        // COUNTER vocabulary: "requests" are downloads, "investigations"
        // are metadata views.
        performance: vec![CounterDatasetPerformance {
            period,
            instance: vec![
                instance("total-dataset-requests", row.total_downloads),
                instance("unique-dataset-requests", row.unique_downloads),
                instance("total-dataset-investigations", row.total_views),
                instance("unique-dataset-investigations", row.unique_views),
            ],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsStore;
    use crate::stats::model::{AggregateResult, TimeseriesResult};
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Serves a fixed number of synthetic breakdown rows, split into pages
    /// the way the real store would.
    struct FixtureStore {
        total: usize,
    }

    #[async_trait]
    impl StatsStore for FixtureStore {
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
            let from = ((page - 1) * page_size) as usize;
            let to = (from + page_size as usize).min(self.total);
            Ok((from..to.max(from))
                .map(|i| BreakdownResult {
                    pid: format!("10.1234/{:07}", i),
                    total_views: 100,
                    unique_views: 50,
                    total_downloads: 50,
                    unique_downloads: 25,
                })
                .collect())
        }

        async fn count_unique_pids(
            &self,
            _repo_id: &str,
            _query: Query,
        ) -> Result<u64, ServiceError> {
            Ok(self.total as u64)
        }

        async fn last_event_time(
            &self,
            _repo_id: &str,
        ) -> Result<Option<DateTime<Utc>>, ServiceError> {
            Ok(None)
        }
    }

    fn service(total: usize) -> ReportService {
        ReportService::new(Arc::new(StatsService::new(Arc::new(FixtureStore { total }))))
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2018, 12, 31, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn single_partition_report_has_expected_envelope() {
        let (start, end) = window();
        let shared = SharedData {
            platform: "datacite".to_string(),
            publisher: "datacite".to_string(),
            publisher_id: "datacite.test".to_string(),
        };
        let mut paginator = service(4).generate_dsr("datacite", start, end, shared, false);

        let report = paginator.next().await.unwrap().unwrap();
        let header = &report.report_header;
        assert_eq!(header.report_id, "dsr");
        assert_eq!(header.report_name, "Dataset Master Report");
        assert_eq!(header.release, "rd1");
        assert_eq!(header.created, "2018-01-01T00:00:00Z");
        assert_eq!(header.created_by, "da_datacite.test");
        assert_eq!(header.reporting_period.begin_date, start);
        assert_eq!(header.reporting_period.end_date, end);
        assert!(header.report_filters.is_empty());
        assert!(header.report_attributes.is_empty());

        assert_eq!(report.report_datasets.len(), 4);
        let first = &report.report_datasets[0];
        assert_eq!(first.dataset_title, "");
        assert_eq!(first.dataset_id.identifier_type, "DOI");
        assert_eq!(first.dataset_id.value, "10.1234/0000000");
        assert_eq!(first.publisher, "datacite");
        assert_eq!(first.publisher_id[0].value, "datacite.test");
        assert_eq!(first.data_type, "dataset");

        let instances = &first.performance[0].instance;
        assert_eq!(instances[0].metric_type, "total-dataset-requests");
        assert_eq!(instances[0].count, 50);
        assert_eq!(instances[1].metric_type, "unique-dataset-requests");
        assert_eq!(instances[1].count, 25);
        assert_eq!(instances[2].metric_type, "total-dataset-investigations");
        assert_eq!(instances[2].count, 100);
        assert_eq!(instances[3].metric_type, "unique-dataset-investigations");
        assert_eq!(instances[3].count, 50);
        assert!(instances.iter().all(|i| i.access_method == "regular"));

        assert!(paginator.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exceptions_reflect_missing_shared_fields_and_compression() {
        let (start, end) = window();
        let shared = SharedData {
            platform: String::new(),
            publisher: "DC".to_string(),
            publisher_id: String::new(),
        };
        let mut paginator = service(1).generate_dsr("datacite", start, end, shared, true);

        let report = paginator.next().await.unwrap().unwrap();
        let codes: Vec<(u32, &str)> = report
            .report_header
            .exceptions
            .iter()
            .map(|e| (e.code, e.message.as_str()))
            .collect();
        assert_eq!(
            codes,
            vec![
                (3071, "dataset-title"),
                (3071, "platform"),
                (3071, "publisher-id"),
                (69, "Report is compressed using gzip"),
            ]
        );
        assert!(
            report
                .report_header
                .exceptions
                .iter()
                .all(|e| e.severity == "warning")
        );
    }

    #[tokio::test]
    async fn created_by_defaults_without_publisher_id() {
        let (start, end) = window();
        let mut paginator =
            service(1).generate_dsr("datacite", start, end, SharedData::default(), false);
        let report = paginator.next().await.unwrap().unwrap();
        assert_eq!(report.report_header.created_by, "datacite-analytics");
        assert!(report.report_datasets[0].publisher_id.is_empty());
    }

    #[tokio::test]
    async fn empty_first_partition_is_no_results() {
        let (start, end) = window();
        let mut paginator =
            service(0).generate_dsr("datacite", start, end, SharedData::default(), false);

        let err = paginator.next().await.unwrap_err();
        assert!(matches!(err, ServiceError::NoResults));
        assert!(paginator.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn large_runs_partition_at_fifty_thousand_rows() {
        let (start, end) = window();
        let mut paginator =
            service(120_000).generate_dsr("datacite", start, end, SharedData::default(), false);

        let first = paginator.next().await.unwrap().unwrap();
        assert_eq!(first.report_datasets.len(), 50_000);
        let second = paginator.next().await.unwrap().unwrap();
        assert_eq!(second.report_datasets.len(), 50_000);
        let third = paginator.next().await.unwrap().unwrap();
        assert_eq!(third.report_datasets.len(), 20_000);
        assert!(paginator.next().await.unwrap().is_none());

        // No row is lost or duplicated across partitions.
        assert_eq!(first.report_datasets.last().unwrap().dataset_id.value, "10.1234/0049999");
        assert_eq!(second.report_datasets[0].dataset_id.value, "10.1234/0050000");
        assert_eq!(third.report_datasets.last().unwrap().dataset_id.value, "10.1234/0119999");
    }

    #[tokio::test]
    async fn rows_within_a_partition_stay_pid_sorted() {
        let (start, end) = window();
        let mut paginator =
            service(2_500).generate_dsr("datacite", start, end, SharedData::default(), false);
        let report = paginator.next().await.unwrap().unwrap();
        assert_eq!(report.report_datasets.len(), 2_500);
        let pids: Vec<&str> = report
            .report_datasets
            .iter()
            .map(|d| d.dataset_id.value.as_str())
            .collect();
        assert!(pids.windows(2).all(|w| w[0] < w[1]));
    }
}
