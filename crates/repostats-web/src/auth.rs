//! JWT verification and access logging middleware.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{StatusCode, header};
use tracing::{debug, info, warn};

// ============================================================
// JWT middleware (RS256, public-key verification)
// ============================================================

/// Stats and check endpoints require a bearer token; ingest and heartbeat
/// stay open.
fn path_requires_auth(path: &str) -> bool {
    path.starts_with("/api/stats/") || path.starts_with("/api/check/")
}

#[derive(serde::Deserialize)]
struct Claims {
    sub: Option<String>,
}

pub(crate) struct JwtConfig {
    pub(crate) decoding_key: jsonwebtoken::DecodingKey,
    pub(crate) validation: jsonwebtoken::Validation,
}

impl JwtConfig {
    /// Builds the verifier from an RSA public key in PEM form.
    pub(crate) fn from_pem(pem: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        let decoding_key = jsonwebtoken::DecodingKey::from_rsa_pem(pem.as_bytes())?;
        let validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
        Ok(JwtConfig {
            decoding_key,
            validation,
        })
    }
}

fn extract_bearer(req: &Request) -> Option<String> {
    let auth = req.headers().get(header::AUTHORIZATION)?;
    let value = auth.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_owned)
}

fn unauthorized_json() -> axum::response::Response {
    axum::response::Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"error":"unauthorized"}"#))
        .unwrap()
}

#[derive(Clone)]
pub(crate) struct JwtLayer {
    pub(crate) config: Arc<JwtConfig>,
}

impl<S> tower::Layer<S> for JwtLayer {
    type Service = JwtService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        JwtService {
            inner,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct JwtService<S> {
    inner: S,
    config: Arc<JwtConfig>,
}

impl<S> tower::Service<Request> for JwtService<S>
where
    S: tower::Service<Request, Response = axum::response::Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = axum::response::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let path = req.uri().path();
        if !path_requires_auth(path) {
            let mut inner = self.inner.clone();
            return Box::pin(async move { inner.call(req).await });
        }

        let config = self.config.clone();
        let mut inner = self.inner.clone();
        let req_path = path.to_owned();

        Box::pin(async move {
            let token = match extract_bearer(&req) {
                Some(t) => t,
                None => {
                    warn!(path = %req_path, "jwt: no bearer token");
                    return Ok(unauthorized_json());
                }
            };

            let claims = match jsonwebtoken::decode::<Claims>(
                &token,
                &config.decoding_key,
                &config.validation,
            ) {
                Ok(data) => data.claims,
                Err(e) => {
                    warn!(error = %e, path = %req_path, "jwt: invalid token");
                    return Ok(unauthorized_json());
                }
            };

            let subject = claims.sub.unwrap_or_default();
            debug!(subject = %subject, path = %req_path, "jwt: authenticated");
            req.extensions_mut().insert(AuthSubject(subject));
            inner.call(req).await
        })
    }
}

/// Authenticated token subject, inserted into request extensions.
#[derive(Clone)]
pub(crate) struct AuthSubject(#[allow(dead_code)] pub(crate) String);

// ============================================================
// Access log layer (tower Layer + Service)
// ============================================================

#[derive(Clone)]
pub(crate) struct AccessLogLayer;

impl<S> tower::Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Clone)]
pub(crate) struct AccessLogService<S> {
    inner: S,
}

impl<S> tower::Service<Request> for AccessLogService<S>
where
    S: tower::Service<Request, Response = axum::response::Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = axum::response::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let client = req
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "-".to_owned());
        let t0 = Instant::now();

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(req).await?;
            let latency_ms = t0.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            if path != "/heartbeat" {
                info!(client, status, latency_ms, "{method} {path}");
            }
            Ok(response)
        })
    }
}
