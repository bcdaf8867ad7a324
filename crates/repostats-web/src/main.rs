//! repostats web API: event ingest plus aggregate stats queries.

mod auth;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use repostats_core::bots::BotFilter;
use repostats_core::config::Config;
use repostats_core::doi::DoiClient;
use repostats_core::event::EventService;
use repostats_core::salt::SaltService;
use repostats_core::stats::StatsService;
use repostats_core::store::{
    ClickhouseEventStore, ClickhouseSaltStore, ClickhouseStatsStore, connect, migrate, ping,
};

use auth::{AccessLogLayer, JwtConfig, JwtLayer};
use state::WebApp;

#[derive(Parser)]
#[command(name = "repostats-web", about = "repostats web API server", version = repostats_core::VERSION)]
struct Args {
    /// Listen address. A bare `:port` binds all interfaces.
    #[arg(long, default_value = ":8081", env = "HTTP_ADDR")]
    listen: String,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repostats_web=info,repostats_core=info".parse().unwrap()),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args));
}

async fn async_main(args: Args) {
    let config = Config::from_env();

    let client = connect(&config.database);
    if let Err(e) = ping(&client).await {
        error!(error = %e, url = %config.database.url(), "store unreachable");
        process::exit(1);
    }
    if let Err(e) = migrate(&client).await {
        error!(error = %e, "store migration failed");
        process::exit(1);
    }

    let salts = Arc::new(SaltService::new(Arc::new(ClickhouseSaltStore::new(
        client.clone(),
    ))));
    let events = EventService::new(
        Arc::new(ClickhouseEventStore::new(client.clone())),
        salts,
        DoiClient::new(config.datacite_api_url.clone()),
        config.validate_doi_existence,
        config.validate_doi_url,
    );
    let stats = StatsService::new(Arc::new(ClickhouseStatsStore::new(client)));

    let bots = match &config.bots_file {
        Some(path) => match BotFilter::from_file(path) {
            Ok(filter) => {
                info!(path = %path.display(), "loaded bot patterns");
                filter
            }
            Err(e) => {
                error!(error = %e, path = %path.display(), "cannot load bot patterns");
                process::exit(1);
            }
        },
        None => BotFilter::builtin(),
    };

    let shared = Arc::new(WebApp {
        events,
        stats,
        bots,
    });

    let mut app = Router::new()
        .route("/heartbeat", get(handlers::handle_heartbeat))
        .route("/api/metric", post(handlers::handle_create_metric))
        .route(
            "/api/stats/aggregate/{repo_id}",
            get(handlers::handle_aggregate),
        )
        .route(
            "/api/stats/timeseries/{repo_id}",
            get(handlers::handle_timeseries),
        )
        .route(
            "/api/stats/breakdown/{repo_id}",
            get(handlers::handle_breakdown),
        )
        .route("/api/check/{repo_id}", get(handlers::handle_check))
        .with_state(shared);

    // Access log goes before auth so it sees every request outcome
    // (axum layers: last .layer() = outermost; request flows outside-in).
    app = app.layer(AccessLogLayer);

    match &config.jwt_public_key {
        Some(pem) => match JwtConfig::from_pem(pem) {
            Ok(jwt) => {
                info!("jwt verification enabled for stats endpoints");
                app = app.layer(JwtLayer {
                    config: Arc::new(jwt),
                });
            }
            Err(e) => {
                error!(error = %e, "invalid JWT_PUBLIC_KEY");
                process::exit(1);
            }
        },
        None => info!("jwt verification disabled (JWT_PUBLIC_KEY not set)"),
    }

    let app = app
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new());

    let addr = listen_addr(&args.listen);
    info!(version = repostats_core::VERSION, %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}

/// Accepts both `host:port` and the bare `:port` shorthand.
fn listen_addr(listen: &str) -> SocketAddr {
    let normalized = if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    };
    normalized.parse().expect("invalid listen address")
}
