//! Configuration management for Lambda functions.

use std::env;
use std::time::Duration;

use crate::{Error, Result};

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 30;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key supplied directly (local runs)
    pub gemini_api_key: Option<String>,
    /// ARN of the secret holding the Gemini API key
    pub gemini_api_key_secret_arn: Option<String>,
    /// Model used for chat, petitions and rewrites
    pub gemini_model: String,
    /// Model used for grounded case-law search
    pub search_model: String,
    /// Database host
    pub db_host: Option<String>,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: Option<String>,
    /// AWS region
    pub aws_region: String,
    /// Upper bound on waiting for the next streamed chunk
    pub chunk_timeout: Duration,
    /// Upper bound on a single case-law search
    pub search_timeout: Duration,
    /// Collapse repeated identical search_case_law calls within one chat
    pub deduplicate_searches: bool,
    /// Write a terminal error record when the stream fails mid-way
    pub emit_stream_error_marker: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let gemini_api_key = non_empty("GEMINI_API_KEY");
        let gemini_api_key_secret_arn = non_empty("GEMINI_API_KEY_SECRET_ARN");

        let gemini_model = non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let search_model = non_empty("GEMINI_SEARCH_MODEL").unwrap_or_else(|| gemini_model.clone());

        Ok(Self {
            gemini_api_key,
            gemini_api_key_secret_arn,
            gemini_model,
            search_model,
            db_host: non_empty("DATABASE_HOST"),
            db_name: non_empty("DATABASE_NAME").unwrap_or_else(|| "legal_assistant".to_string()),
            db_secret_arn: non_empty("DATABASE_SECRET_ARN"),
            aws_region: non_empty("AWS_REGION").unwrap_or_else(|| "eu-central-1".to_string()),
            chunk_timeout: parse_secs(non_empty("CHUNK_TIMEOUT_SECS"), DEFAULT_CHUNK_TIMEOUT_SECS, "CHUNK_TIMEOUT_SECS")?,
            search_timeout: parse_secs(non_empty("SEARCH_TIMEOUT_SECS"), DEFAULT_SEARCH_TIMEOUT_SECS, "SEARCH_TIMEOUT_SECS")?,
            deduplicate_searches: parse_flag(non_empty("DEDUPLICATE_SEARCHES"), false),
            emit_stream_error_marker: parse_flag(non_empty("EMIT_STREAM_ERROR_MARKER"), true),
        })
    }

    /// Database host, required by handlers that touch Postgres.
    pub fn require_db_host(&self) -> Result<&str> {
        self.db_host
            .as_deref()
            .ok_or_else(|| Error::Config("DATABASE_HOST not set".to_string()))
    }
}

fn parse_secs(value: Option<String>, default: u64, key: &str) -> Result<Duration> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Error::Config(format!("{} must be a whole number of seconds", key))),
        None => Ok(Duration::from_secs(default)),
    }
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::trim) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "k")])).unwrap();
        assert_eq!(config.gemini_model, DEFAULT_MODEL);
        assert_eq!(config.search_model, DEFAULT_MODEL);
        assert_eq!(config.chunk_timeout, Duration::from_secs(60));
        assert_eq!(config.search_timeout, Duration::from_secs(30));
        assert!(!config.deduplicate_searches);
        assert!(config.emit_stream_error_marker);
        assert!(config.require_db_host().is_err());
    }

    #[test]
    fn test_api_key_is_optional_until_resolved() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap();
        assert!(config.gemini_api_key.is_none());
        assert!(config.gemini_api_key_secret_arn.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY_SECRET_ARN", "arn:aws:secretsmanager:x"),
            ("GEMINI_MODEL", "gemini-2.5-pro"),
            ("SEARCH_TIMEOUT_SECS", "5"),
            ("DEDUPLICATE_SEARCHES", "true"),
            ("EMIT_STREAM_ERROR_MARKER", "0"),
            ("DATABASE_HOST", "db.internal"),
        ]))
        .unwrap();
        assert_eq!(config.search_model, "gemini-2.5-pro");
        assert_eq!(config.search_timeout, Duration::from_secs(5));
        assert!(config.deduplicate_searches);
        assert!(!config.emit_stream_error_marker);
        assert_eq!(config.require_db_host().unwrap(), "db.internal");
    }

    #[test]
    fn test_bad_timeout() {
        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k"),
            ("CHUNK_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CHUNK_TIMEOUT_SECS"));
    }
}
