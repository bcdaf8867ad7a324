//! HTTP request handlers: ingest, stats queries, liveness check.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use repostats_core::error::ServiceError;
use repostats_core::event::EventRequest;
use repostats_core::stats::model::{Interval, Query as StatsQuery};
use repostats_core::stats::period;

use crate::state::SharedState;

fn error_response(err: &ServiceError) -> Response {
    let status = match err {
        ServiceError::ValidationRejected(_)
        | ServiceError::InvalidPeriod(_)
        | ServiceError::InvalidRange => StatusCode::BAD_REQUEST,
        ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
        ServiceError::NoResults => StatusCode::NOT_FOUND,
        ServiceError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        ServiceError::StoreUnavailable(_) | ServiceError::Fatal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    (status, err.to_string()).into_response()
}

// ============================================================
// Heartbeat
// ============================================================

pub(crate) async fn handle_heartbeat() -> &'static str {
    "ok"
}

// ============================================================
// Ingest
// ============================================================

/// Wire form of an ingest request; everything else comes from headers.
#[derive(Deserialize)]
pub(crate) struct MetricRequest {
    #[serde(rename = "n")]
    name: String,
    #[serde(rename = "i")]
    repo_id: String,
    #[serde(rename = "u")]
    url: String,
    #[serde(rename = "p")]
    pid: String,
}

/// Client IP: first `X-Forwarded-For` hop when present, else the peer
/// address.
fn remote_addr(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
    {
        let first = value.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    peer.ip().to_string()
}

pub(crate) async fn handle_create_metric(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(metric): Json<MetricRequest>,
) -> Response {
    let useragent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // Bot traffic never reaches identity derivation; the response does not
    // reveal the filtering.
    if state.bots.is_bot(&useragent) {
        debug!(repo_id = %metric.repo_id, "dropped bot event");
        return (StatusCode::OK, "ok").into_response();
    }

    let request = EventRequest {
        name: metric.name,
        repo_id: metric.repo_id,
        url: metric.url,
        useragent,
        client_ip: remote_addr(&headers, peer),
        pid: metric.pid,
    };

    if let Err(err) = state.events.validate(&request).await {
        if let ServiceError::ValidationRejected(reason) = &err {
            return (
                StatusCode::BAD_REQUEST,
                format!("{} - {}, Usage stats cannot be processed", request.pid, reason),
            )
                .into_response();
        }
        return error_response(&err);
    }

    match state.events.create(&request).await {
        Ok(_) => (StatusCode::OK, "ok").into_response(),
        Err(err) => error_response(&err),
    }
}

// ============================================================
// Stats queries
// ============================================================

#[derive(Deserialize, Default)]
pub(crate) struct StatsParams {
    #[serde(default)]
    period: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    interval: String,
    #[serde(default)]
    page: u64,
    #[serde(rename = "pageSize", default)]
    page_size: u64,
}

fn resolve_query(params: &StatsParams) -> Result<StatsQuery, ServiceError> {
    let (start, end) = period::resolve(&params.period, &params.date, chrono::Utc::now())?;
    let mut query = StatsQuery::new(start, end);
    query.interval = Interval::parse(&params.interval)?;
    Ok(query)
}

pub(crate) async fn handle_aggregate(
    State(state): State<SharedState>,
    Path(repo_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Response {
    let query = match resolve_query(&params) {
        Ok(q) => q,
        Err(err) => return error_response(&err),
    };
    match state.stats.aggregate(&repo_id, query).await {
        Ok(results) => Json(json!({ "results": results })).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn handle_timeseries(
    State(state): State<SharedState>,
    Path(repo_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Response {
    let query = match resolve_query(&params) {
        Ok(q) => q,
        Err(err) => return error_response(&err),
    };
    match state.stats.timeseries(&repo_id, query).await {
        Ok(results) => Json(json!({ "results": results })).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn handle_breakdown(
    State(state): State<SharedState>,
    Path(repo_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Response {
    let query = match resolve_query(&params) {
        Ok(q) => q,
        Err(err) => return error_response(&err),
    };
    match state
        .stats
        .breakdown_by_pid(&repo_id, query, params.page, params.page_size)
        .await
    {
        Ok(results) => Json(json!({ "results": results })).into_response(),
        Err(err) => error_response(&err),
    }
}

// ============================================================
// Liveness check
// ============================================================

/// Timestamp of the repository's most recent event; 404 when it has none.
pub(crate) async fn handle_check(
    State(state): State<SharedState>,
    Path(repo_id): Path<String>,
) -> Response {
    match state.stats.last_event_time(&repo_id).await {
        Ok(Some(timestamp)) => (
            StatusCode::OK,
            timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "no events for repository").into_response(),
        Err(err) => error_response(&err),
    }
}
