//! Event validation, enrichment, and persistence.
//!
//! An incoming request carries the raw client IP and user agent. Both are
//! consumed by identity derivation inside `create` and are absent from the
//! persisted `Event` — the stored row only ever contains the derived
//! `user_id`/`session_id`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::doi::DoiClient;
use crate::error::ServiceError;
use crate::identity::{derive_session_id, derive_user_id, strip_www};
use crate::salt::SaltService;

/// Metric event names with COUNTER semantics. Other names are legal input
/// and are stored, but the aggregation math ignores them.
pub const NAME_VIEW: &str = "view";
pub const NAME_DOWNLOAD: &str = "download";

/// An ingest request, as assembled by the HTTP boundary or the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub name: String,
    pub repo_id: String,
    pub url: String,
    pub useragent: String,
    pub client_ip: String,
    pub pid: String,
}

/// The persisted event row. Immutable once written; never carries the raw
/// IP or user agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub repo_id: String,
    pub pid: String,
    pub user_id: u64,
    pub session_id: u64,
}

/// Persistence boundary for events (append-only).
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(&self, event: &Event) -> Result<(), ServiceError>;
}

pub struct EventService {
    store: Arc<dyn EventStore>,
    salts: Arc<SaltService>,
    doi: DoiClient,
    validate_doi_existence: bool,
    validate_doi_url: bool,
}

impl EventService {
    pub fn new(
        store: Arc<dyn EventStore>,
        salts: Arc<SaltService>,
        doi: DoiClient,
        validate_doi_existence: bool,
        validate_doi_url: bool,
    ) -> Self {
        EventService {
            store,
            salts,
            doi,
            validate_doi_existence,
            validate_doi_url,
        }
    }

    /// Pre-write validation, exposed separately so the HTTP boundary can
    /// short-circuit with a 400 before any identity work happens.
    ///
    /// Only `view` events are checked, and each check has its own
    /// configuration gate: PID existence in the metadata API, and equality
    /// of the registered URL with the submitted one (modulo scheme and a
    /// single trailing slash).
    pub async fn validate(&self, request: &EventRequest) -> Result<(), ServiceError> {
        if request.name != NAME_VIEW {
            return Ok(());
        }
        if !self.validate_doi_existence && !self.validate_doi_url {
            return Ok(());
        }

        let registered = self.doi.get_url(&request.pid).await?;

        let Some(registered) = registered else {
            if self.validate_doi_existence {
                return Err(ServiceError::ValidationRejected(format!(
                    "PID {} is not registered",
                    request.pid
                )));
            }
            return Ok(());
        };

        if self.validate_doi_url && !urls_match(&registered, &request.url) {
            return Err(ServiceError::ValidationRejected(format!(
                "URL {} does not match the registered URL for {}",
                request.url, request.pid
            )));
        }

        Ok(())
    }

    /// Enriches the request with derived identity and appends it to the
    /// store. Success means the store accepted the row.
    pub async fn create(&self, request: &EventRequest) -> Result<Event, ServiceError> {
        let salt = self.salts.get_active().await?;
        let host_domain = host_domain(&request.url)?;
        let now = Utc::now();

        let user_id = derive_user_id(
            &salt.bytes,
            &request.client_ip,
            &request.useragent,
            &request.repo_id,
            &host_domain,
        );
        let session_id = derive_session_id(user_id, now);

        let event = Event {
            timestamp: now,
            name: request.name.clone(),
            repo_id: request.repo_id.clone(),
            pid: request.pid.clone(),
            user_id,
            session_id,
        };

        self.store.insert(&event).await?;
        debug!(repo_id = %event.repo_id, name = %event.name, pid = %event.pid, "event stored");

        Ok(event)
    }
}

/// Extracts the request URL's hostname with any leading `www.` stripped.
fn host_domain(raw: &str) -> Result<String, ServiceError> {
    let url = Url::parse(raw)
        .map_err(|e| ServiceError::ValidationRejected(format!("invalid url: {}", e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| ServiceError::ValidationRejected("url has no host".to_string()))?;
    Ok(strip_www(host).to_string())
}

/// Compares two URLs ignoring the scheme and at most one trailing slash on
/// the path. Query and fragment must match verbatim.
fn urls_match(a: &str, b: &str) -> bool {
    let (Ok(a), Ok(b)) = (Url::parse(a), Url::parse(b)) else {
        return false;
    };

    let trim = |p: &str| p.strip_suffix('/').map(str::to_string).unwrap_or_else(|| p.to_string());

    a.host_str() == b.host_str()
        && a.port() == b.port()
        && trim(a.path()) == trim(b.path())
        && a.query() == b.query()
        && a.fragment() == b.fragment()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_domain_strips_www() {
        assert_eq!(
            host_domain("http://www.example.com/page/10.1234/1").unwrap(),
            "example.com"
        );
        assert_eq!(
            host_domain("https://data.example.org/dataset").unwrap(),
            "data.example.org"
        );
    }

    #[test]
    fn host_domain_rejects_garbage() {
        let err = host_domain("not a url").unwrap_err();
        assert!(matches!(err, ServiceError::ValidationRejected(_)));
    }

    #[test]
    fn urls_match_ignores_scheme() {
        assert!(urls_match(
            "http://www.example.com/url?foo=bar&foo=baz#this_is_fragment",
            "https://www.example.com/url?foo=bar&foo=baz#this_is_fragment",
        ));
    }

    #[test]
    fn urls_match_ignores_one_trailing_slash() {
        assert!(urls_match("https://example.com/data", "https://example.com/data/"));
        assert!(urls_match("https://example.com/data/", "https://example.com/data"));
    }

    #[test]
    fn urls_match_compares_query_verbatim() {
        assert!(!urls_match(
            "https://example.com/data?a=1",
            "https://example.com/data?a=2",
        ));
        assert!(!urls_match(
            "https://example.com/data#x",
            "https://example.com/data#y",
        ));
    }

    #[test]
    fn urls_match_distinguishes_hosts() {
        assert!(!urls_match("https://example.com/data", "https://example.org/data"));
    }

    // Schema-level privacy check: the persisted shape must not grow raw
    // request attributes back.
    #[test]
    fn persisted_event_has_no_raw_request_fields() {
        let event = Event {
            timestamp: Utc::now(),
            name: "view".to_string(),
            repo_id: "example.com".to_string(),
            pid: "10.1234/1".to_string(),
            user_id: 1,
            session_id: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 6);
        for key in ["timestamp", "name", "repoId", "pid", "userId", "sessionId"] {
            assert!(object.contains_key(key), "missing {}", key);
        }
        for key in ["clientIp", "useragent", "url", "id"] {
            assert!(!object.contains_key(key), "unexpected {}", key);
        }
    }
}
