//! repostats report worker: generates one repository's Dataset Master
//! Report for a window and delivers the gzip-compressed partitions to the
//! Reports API. Meant to run as a scheduled one-shot job.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use tracing::{error, info, warn};

use repostats_core::config::Config;
use repostats_core::reports::sink::ReportSink;
use repostats_core::reports::{ReportService, SharedData};
use repostats_core::stats::{Query, StatsService};
use repostats_core::store::{ClickhouseStatsStore, connect, ping};

/// Delivery attempts per partition for retryable sink failures.
const SEND_ATTEMPTS: u32 = 3;

#[derive(Parser)]
#[command(name = "repostats-worker", about = "repostats report job", version = repostats_core::VERSION)]
struct Args {
    /// Repository to report on.
    #[arg(long, env = "REPO_ID")]
    repo_id: String,

    /// First day of the reporting period (YYYY-MM-DD).
    #[arg(long, env = "BEGIN_DATE")]
    begin_date: String,

    /// Last day of the reporting period (YYYY-MM-DD), inclusive.
    #[arg(long, env = "END_DATE")]
    end_date: String,

    /// Platform attribute shared by all dataset rows.
    #[arg(long, env = "PLATFORM", default_value = "")]
    platform: String,

    /// Publisher (repository name) attribute.
    #[arg(long, env = "PUBLISHER", default_value = "")]
    publisher: String,

    /// Publisher client-id attribute.
    #[arg(long, env = "PUBLISHER_ID", default_value = "")]
    publisher_id: String,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repostats_worker=info,repostats_core=info".parse().unwrap()),
        )
        .init();

    let exit_code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(run(args));
    process::exit(exit_code);
}

async fn run(args: Args) -> i32 {
    let config = Config::from_env();

    let (start, end) = match window(&args.begin_date, &args.end_date) {
        Ok(window) => window,
        Err(message) => {
            error!(%message, "bad reporting window");
            return 2;
        }
    };

    info!(
        repo_id = %args.repo_id,
        begin = %args.begin_date,
        end = %args.end_date,
        platform = %args.platform,
        publisher = %args.publisher,
        publisher_id = %args.publisher_id,
        "starting report generation"
    );

    let client = connect(&config.database);
    if let Err(e) = ping(&client).await {
        error!(error = %e, "store unreachable");
        return 1;
    }

    let stats = Arc::new(StatsService::new(Arc::new(ClickhouseStatsStore::new(
        client,
    ))));
    let reports = ReportService::new(stats.clone());
    let sink = ReportSink::new(&config.datacite_api_url, &config.datacite_jwt);

    match stats
        .count_unique_pids(&args.repo_id, Query::new(start, end))
        .await
    {
        Ok(count) => info!(unique_pids = count, "expected report size"),
        Err(e) => warn!(error = %e, "could not count unique pids"),
    }

    let shared = SharedData {
        platform: args.platform,
        publisher: args.publisher,
        publisher_id: args.publisher_id,
    };

    // The worker always delivers gzip bodies, so every header carries the
    // compression exception.
    let mut paginator = reports.generate_dsr(&args.repo_id, start, end, shared, true);

    let mut partitions = 0u32;
    loop {
        let report = match paginator.next().await {
            Ok(Some(report)) => report,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, partitions, "report generation failed");
                return 1;
            }
        };
        partitions += 1;

        if let Err(e) = send_with_retry(&sink, &report).await {
            error!(error = %e, partition = partitions, "report delivery failed");
            return 1;
        }
        info!(
            partition = partitions,
            datasets = report.report_datasets.len(),
            "partition delivered"
        );
    }

    info!(partitions, "report generation completed successfully");
    0
}

async fn send_with_retry(
    sink: &ReportSink,
    report: &repostats_core::reports::CounterDatasetReport,
) -> Result<(), repostats_core::reports::sink::SinkError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match sink.send(report).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < SEND_ATTEMPTS => {
                warn!(error = %e, attempt, "retrying partition delivery");
                tokio::time::sleep(Duration::from_secs(5 * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `[begin 00:00, end 00:00 + 1 day)` — the end date is inclusive.
fn window(begin: &str, end: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    let begin = parse_day(begin)?;
    let end = parse_day(end)?;
    let start = begin.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end = (end + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    if end <= start {
        return Err(format!("end date {} before begin date {}", end, start));
    }
    Ok((start, end))
}

fn parse_day(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("bad date {:?}: {}", value, e))
}
