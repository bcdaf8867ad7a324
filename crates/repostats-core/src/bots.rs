//! User-agent bot filtering.
//!
//! The ingest boundary drops bot traffic before any identity derivation, so
//! the salt is never exercised for non-human requests. Patterns come from a
//! JSON file (a plain array of regex strings, matched case-insensitively);
//! without one a small built-in list is used.

use std::path::Path;

use regex::RegexSetBuilder;

use crate::error::ServiceError;

const DEFAULT_PATTERNS: &[&str] = &[
    "bot",
    "crawl",
    "spider",
    "slurp",
    "wget",
    "curl",
    "python-requests",
    "headless",
];

#[derive(Debug)]
pub struct BotFilter {
    set: regex::RegexSet,
}

impl BotFilter {
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| ServiceError::Fatal(format!("bad bot pattern: {}", e)))?;
        Ok(BotFilter { set })
    }

    /// Loads a JSON array of patterns from disk.
    pub fn from_file(path: &Path) -> Result<Self, ServiceError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Fatal(format!("cannot read bots file: {}", e)))?;
        let patterns: Vec<String> = serde_json::from_str(&data)
            .map_err(|e| ServiceError::Fatal(format!("cannot parse bots file: {}", e)))?;
        Self::from_patterns(patterns)
    }

    pub fn builtin() -> Self {
        Self::from_patterns(DEFAULT_PATTERNS).expect("built-in patterns are valid")
    }

    pub fn is_bot(&self, user_agent: &str) -> bool {
        self.set.is_match(user_agent)
    }
}
