//! Error type shared across the core services.

/// Error type for the analytics core.
///
/// Variants map onto caller-visible outcomes: the web layer turns
/// `ValidationRejected`/`InvalidPeriod`/`InvalidRange` into 400 responses,
/// `Unauthorized` into 401, `StoreUnavailable` into 500 and
/// `UpstreamUnavailable` into 502. `NoResults` is only produced by report
/// generation when the very first partition would be empty.
#[derive(Debug)]
pub enum ServiceError {
    /// Event rejected before write (bad PID, URL mismatch, malformed input).
    ValidationRejected(String),
    /// Unparseable `period`/`date`/`interval` combination.
    InvalidPeriod(String),
    /// Query window with `end` before `start`.
    InvalidRange,
    /// The columnar store could not be reached or errored.
    StoreUnavailable(String),
    /// An upstream API (DOI resolution, Reports sink) failed.
    UpstreamUnavailable(String),
    /// Missing or invalid credentials.
    Unauthorized,
    /// Report generation found no usage at all for the window.
    NoResults,
    /// A bug or data corruption (salt parse failure, schema mismatch).
    Fatal(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::ValidationRejected(reason) => {
                write!(f, "validation rejected: {}", reason)
            }
            ServiceError::InvalidPeriod(detail) => write!(f, "invalid period: {}", detail),
            ServiceError::InvalidRange => write!(f, "invalid range: end before start"),
            ServiceError::StoreUnavailable(detail) => write!(f, "store unavailable: {}", detail),
            ServiceError::UpstreamUnavailable(detail) => {
                write!(f, "upstream unavailable: {}", detail)
            }
            ServiceError::Unauthorized => write!(f, "unauthorized"),
            ServiceError::NoResults => write!(f, "no results found for this query"),
            ServiceError::Fatal(detail) => write!(f, "fatal: {}", detail),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<clickhouse::error::Error> for ServiceError {
    fn from(err: clickhouse::error::Error) -> Self {
        ServiceError::StoreUnavailable(err.to_string())
    }
}
