//! Delivery of finished reports to the Reports API.
//!
//! The sink accepts a gzip-compressed JSON body. A 201 acknowledges the
//! report; auth and payload errors are terminal (retrying the same body
//! cannot succeed), anything else is left to the caller to retry.

use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::info;

use super::model::CounterDatasetReport;

#[derive(Debug)]
pub enum SinkError {
    /// The sink rejected the report for good (401/403/415/422).
    Terminal(u16),
    /// A response worth retrying (5xx, 429, ...).
    Retryable(u16),
    /// Serialization or transport failure before any response.
    Transport(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Terminal(status) => write!(f, "reports sink rejected report: {}", status),
            SinkError::Retryable(status) => {
                write!(f, "reports sink temporary failure: {}", status)
            }
            SinkError::Transport(detail) => write!(f, "reports sink unreachable: {}", detail),
        }
    }
}

impl std::error::Error for SinkError {}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Retryable(_) | SinkError::Transport(_))
    }
}

pub struct ReportSink {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl ReportSink {
    pub fn new(api_url: &str, token: &str) -> Self {
        ReportSink {
            http: reqwest::Client::new(),
            endpoint: format!("{}/reports", api_url),
            token: token.to_string(),
        }
    }

    /// Serializes, compresses, and posts one report partition.
    pub async fn send(&self, report: &CounterDatasetReport) -> Result<(), SinkError> {
        let json = serde_json::to_vec(report).map_err(|e| SinkError::Transport(e.to_string()))?;
        let body = gzip(&json).map_err(|e| SinkError::Transport(e.to_string()))?;

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/gzip")
            .header(reqwest::header::CONTENT_ENCODING, "gzip")
            .bearer_auth(&self.token)
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            201 => {
                info!(
                    datasets = report.report_datasets.len(),
                    "report partition accepted"
                );
                Ok(())
            }
            status @ (401 | 403 | 415 | 422) => Err(SinkError::Terminal(status)),
            status => Err(SinkError::Retryable(status)),
        }
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
