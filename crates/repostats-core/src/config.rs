//! Environment-driven configuration.
//!
//! Every knob has a default so a bare `Config::from_env()` yields a working
//! local setup; production deployments override via environment variables.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl DatabaseConfig {
    /// HTTP endpoint of the ClickHouse server.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the web API, e.g. `:8081` or `127.0.0.1:8081`.
    pub http_addr: String,
    pub database: DatabaseConfig,
    /// Base URL for the DataCite DOI and Reports APIs.
    pub datacite_api_url: String,
    /// Bearer token for the Reports sink.
    pub datacite_jwt: String,
    /// RSA public key (PEM) for verifying incoming query JWTs.
    /// When unset, the stats endpoints are open.
    pub jwt_public_key: Option<String>,
    /// Check that a view event's PID resolves in DataCite.
    pub validate_doi_existence: bool,
    /// Check that a view event's URL matches the PID's registered URL.
    pub validate_doi_url: bool,
    /// Optional JSON file with bot user-agent patterns; a built-in list
    /// is used when unset.
    pub bots_file: Option<PathBuf>,
}

fn get_env(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            http_addr: get_env("HTTP_ADDR", ":8081"),
            database: DatabaseConfig {
                host: get_env("ANALYTICS_DATABASE_HOST", "localhost"),
                port: get_env("ANALYTICS_DATABASE_PORT", "8123"),
                user: get_env("ANALYTICS_DATABASE_USER", "repostats"),
                password: get_env("ANALYTICS_DATABASE_PASSWORD", "repostats"),
                dbname: get_env("ANALYTICS_DATABASE_DBNAME", "repostats"),
            },
            datacite_api_url: get_env("DATACITE_API_URL", "https://api.stage.datacite.org"),
            datacite_jwt: get_env("DATACITE_JWT", ""),
            jwt_public_key: env::var("JWT_PUBLIC_KEY").ok().filter(|s| !s.is_empty()),
            validate_doi_existence: get_env("VALIDATE_DOI_EXISTENCE", "true") == "true",
            validate_doi_url: get_env("VALIDATE_DOI_URL", "true") == "true",
            bots_file: env::var("BOTS_FILE").ok().map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_is_http() {
        let db = DatabaseConfig {
            host: "ch.internal".to_string(),
            port: "8123".to_string(),
            user: "u".to_string(),
            password: "p".to_string(),
            dbname: "analytics".to_string(),
        };
        assert_eq!(db.url(), "http://ch.internal:8123");
    }
}
