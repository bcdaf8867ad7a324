//! DOI resolution client.
//!
//! Event validation asks the metadata API whether a PID exists and which
//! landing URL it is registered under: `GET {api}/dois/{pid}/get-url`.

use serde::Deserialize;

use crate::error::ServiceError;

#[derive(Debug, Deserialize)]
struct GetUrlResponse {
    url: String,
}

#[derive(Clone)]
pub struct DoiClient {
    http: reqwest::Client,
    api_url: String,
}

impl DoiClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        DoiClient {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    /// Resolves a PID to its registered URL. `Ok(None)` means the PID does
    /// not exist (404); transport and server errors are
    /// `UpstreamUnavailable`.
    pub async fn get_url(&self, pid: &str) -> Result<Option<String>, ServiceError> {
        let url = format!("{}/dois/{}/get-url", self.api_url, pid);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ServiceError::UpstreamUnavailable(format!(
                "doi lookup returned {}",
                response.status()
            )));
        }

        let body: GetUrlResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(e.to_string()))?;

        Ok(Some(body.url))
    }
}
