//! repostats CLI: raw event ingestion for testing and report generation to
//! local JSON files.

use std::process;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use repostats_core::config::Config;
use repostats_core::doi::DoiClient;
use repostats_core::event::{EventRequest, EventService};
use repostats_core::reports::{ReportService, SharedData};
use repostats_core::salt::SaltService;
use repostats_core::stats::StatsService;
use repostats_core::store::{
    Client, ClickhouseEventStore, ClickhouseSaltStore, ClickhouseStatsStore, connect, migrate,
    ping,
};

#[derive(Parser)]
#[command(name = "repostats", about = "repostats command line tools", version = repostats_core::VERSION)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one raw event from a JSON payload (testing aid).
    Event {
        /// Full event request, e.g.
        /// '{"name":"view","repoId":"example.com","url":"http://example.com/page/10.1234/1","useragent":"test","clientIp":"127.0.0.1","pid":"10.1234/1"}'
        json: String,
    },
    /// Generate a Dataset Master Report and write one JSON file per
    /// partition, named `{repo}-{begin}-{end}-{index}.json`.
    Report {
        repo_id: String,
        /// First day of the reporting period (YYYY-MM-DD).
        begin_date: String,
        /// Last day of the reporting period (YYYY-MM-DD), inclusive.
        end_date: String,
        /// Mark the report as gzip-delivered (adds the exception header).
        #[arg(default_value_t = false)]
        compressed: bool,
        #[arg(default_value = "")]
        platform: String,
        #[arg(default_value = "")]
        publisher: String,
        #[arg(default_value = "")]
        publisher_id: String,
    },
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repostats=info,repostats_core=info".parse().unwrap()),
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

    let client = connect(&config.database);
    if let Err(e) = ping(&client).await {
        error!(error = %e, url = %config.database.url(), "store unreachable");
        return 1;
    }
    if let Err(e) = migrate(&client).await {
        error!(error = %e, "store migration failed");
        return 1;
    }

    match args.command {
        Command::Event { json } => ingest_event(&config, client, &json).await,
        Command::Report {
            repo_id,
            begin_date,
            end_date,
            compressed,
            platform,
            publisher,
            publisher_id,
        } => {
            let shared = SharedData {
                platform,
                publisher,
                publisher_id,
            };
            write_report(client, &repo_id, &begin_date, &end_date, shared, compressed).await
        }
    }
}

async fn ingest_event(config: &Config, client: Client, json: &str) -> i32 {
    let request: EventRequest = match serde_json::from_str(json) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "cannot parse event json");
            return 2;
        }
    };

    let salts = Arc::new(SaltService::new(Arc::new(ClickhouseSaltStore::new(
        client.clone(),
    ))));
    // DOI validation is skipped for hand-fed test events.
    let events = EventService::new(
        Arc::new(ClickhouseEventStore::new(client)),
        salts,
        DoiClient::new(config.datacite_api_url.clone()),
        false,
        false,
    );

    match events.create(&request).await {
        Ok(event) => {
            println!("{}", serde_json::to_string_pretty(&event).unwrap());
            0
        }
        Err(e) => {
            error!(error = %e, "event ingestion failed");
            1
        }
    }
}

async fn write_report(
    client: Client,
    repo_id: &str,
    begin_date: &str,
    end_date: &str,
    shared: SharedData,
    compressed: bool,
) -> i32 {
    let (start, end) = match window(begin_date, end_date) {
        Ok(window) => window,
        Err(message) => {
            error!(%message, "bad reporting window");
            return 2;
        }
    };

    let stats = Arc::new(StatsService::new(Arc::new(ClickhouseStatsStore::new(
        client,
    ))));
    let reports = ReportService::new(stats);
    let mut paginator = reports.generate_dsr(repo_id, start, end, shared, compressed);

    let mut index = 0u32;
    loop {
        let report = match paginator.next().await {
            Ok(Some(report)) => report,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "report generation failed");
                return 1;
            }
        };
        index += 1;

        let filename = format!("{}-{}-{}-{}.json", repo_id, begin_date, end_date, index);
        let json = match serde_json::to_vec_pretty(&report) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "cannot serialize report");
                return 1;
            }
        };
        if let Err(e) = std::fs::write(&filename, json) {
            error!(error = %e, filename, "cannot write report file");
            return 1;
        }
        info!(
            filename,
            datasets = report.report_datasets.len(),
            "wrote report partition"
        );
    }

    info!(partitions = index, "report generation completed");
    0
}

/// `[begin 00:00, end 00:00 + 1 day)` — the end date is inclusive.
fn window(begin: &str, end: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    let parse = |value: &str| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|e| format!("bad date {:?}: {}", value, e))
    };
    let start = parse(begin)?.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end = (parse(end)? + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    if end <= start {
        return Err(format!("end date {} before begin date {}", end, start));
    }
    Ok((start, end))
}
