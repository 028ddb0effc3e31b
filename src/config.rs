//! Configuration management for the Metabase MCP Server.
//!
//! Configuration is loaded from environment variables following the 12-factor app pattern.

use crate::constants::{
    DEFAULT_BATCH_CONCURRENCY, DEFAULT_CACHE_TTL_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_RETRY_INITIAL_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS, MAX_BATCH_IDS,
};
use crate::error::ServerError;
use crate::resilience::RetryConfig;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Metabase instance and credentials
    pub metabase: MetabaseConfig,

    /// Response cache configuration
    pub cache: CacheConfig,

    /// Query execution and batching configuration
    pub query: QueryConfig,

    /// Upstream retry policy
    pub retry: RetryConfig,
}

/// Metabase connection configuration.
#[derive(Debug, Clone)]
pub struct MetabaseConfig {
    /// Base URL without a trailing slash, e.g. `https://metabase.example.com`
    pub url: String,

    /// How requests authenticate
    pub credentials: Credentials,

    /// Per-request timeout
    pub request_timeout: Duration,
}

/// Metabase credentials. An API key wins when both forms are configured.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Sent as the `x-api-key` header.
    ApiKey(String),

    /// Exchanged for a session token via `POST /api/session`.
    Session { email: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credentials::Session { email, .. } => f
                .debug_struct("Session")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Time-to-live shared by every store
    pub ttl: Duration,
}

/// Query execution configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// Reject write statements before they reach Metabase
    pub read_only: bool,

    /// Maximum concurrent upstream fetches per batch
    pub batch_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            read_only: true,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Required
    /// - `METABASE_URL`: Base URL of the Metabase instance
    /// - `METABASE_API_KEY`, or both `METABASE_USER_EMAIL` and `METABASE_PASSWORD`
    ///
    /// ## Optional
    /// - `CACHE_TTL_MS`: Cache time-to-live in milliseconds (default: 600000)
    /// - `REQUEST_TIMEOUT_MS`: Upstream request timeout in milliseconds (default: 600000)
    /// - `METABASE_READ_ONLY_MODE`: Block write SQL (default: true)
    /// - `METABASE_BATCH_CONCURRENCY`: Concurrent fetches per batch, 1-50 (default: 8)
    /// - `METABASE_RETRY_MAX_ATTEMPTS`: Attempts per upstream call (default: 3)
    /// - `METABASE_RETRY_INITIAL_DELAY_MS`: First backoff delay (default: 250)
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Required: URL
        let raw_url = get("METABASE_URL")
            .ok_or_else(|| ServerError::config("METABASE_URL environment variable is required"))?;
        let url = normalize_url(&raw_url)?;

        // Required: one credential form
        let credentials = match (
            get("METABASE_API_KEY"),
            get("METABASE_USER_EMAIL"),
            get("METABASE_PASSWORD"),
        ) {
            (Some(key), _, _) => Credentials::ApiKey(key),
            (None, Some(email), Some(password)) => Credentials::Session { email, password },
            (None, Some(_), None) => {
                return Err(ServerError::config(
                    "METABASE_PASSWORD is required when METABASE_USER_EMAIL is set",
                ))
            }
            (None, None, Some(_)) => {
                return Err(ServerError::config(
                    "METABASE_USER_EMAIL is required when METABASE_PASSWORD is set",
                ))
            }
            (None, None, None) => {
                return Err(ServerError::config(
                    "Authentication required: set METABASE_API_KEY, or METABASE_USER_EMAIL and METABASE_PASSWORD",
                ))
            }
        };

        let request_timeout_ms: u64 =
            parse_var(&get, "REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        let cache_ttl_ms: u64 = parse_var(&get, "CACHE_TTL_MS", DEFAULT_CACHE_TTL_MS)?;

        let read_only = get("METABASE_READ_ONLY_MODE")
            .map(|v| {
                let v = v.trim().to_lowercase();
                v != "false" && v != "0" && v != "no"
            })
            .unwrap_or(true);

        let batch_concurrency: usize =
            parse_var(&get, "METABASE_BATCH_CONCURRENCY", DEFAULT_BATCH_CONCURRENCY)?;
        if !(1..=MAX_BATCH_IDS).contains(&batch_concurrency) {
            return Err(ServerError::config(format!(
                "METABASE_BATCH_CONCURRENCY must be between 1 and {MAX_BATCH_IDS}, got {batch_concurrency}"
            )));
        }

        let max_attempts: u32 =
            parse_var(&get, "METABASE_RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS)?;
        let initial_delay_ms: u64 = parse_var(
            &get,
            "METABASE_RETRY_INITIAL_DELAY_MS",
            DEFAULT_RETRY_INITIAL_DELAY_MS,
        )?;

        Ok(Config {
            metabase: MetabaseConfig {
                url,
                credentials,
                request_timeout: Duration::from_millis(request_timeout_ms),
            },
            cache: CacheConfig {
                ttl: Duration::from_millis(cache_ttl_ms),
            },
            query: QueryConfig {
                read_only,
                batch_concurrency,
            },
            retry: RetryConfig {
                max_attempts: max_attempts.max(1),
                initial_delay: Duration::from_millis(initial_delay_ms),
                ..RetryConfig::default()
            },
        })
    }

    /// Whether the API-key flow is in use.
    pub fn uses_api_key(&self) -> bool {
        matches!(self.metabase.credentials, Credentials::ApiKey(_))
    }
}

fn normalize_url(raw: &str) -> Result<String, ServerError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| ServerError::config(format!("METABASE_URL is not a valid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(ServerError::config(format!(
            "METABASE_URL must use http or https, got '{other}'"
        ))),
    }
}

fn parse_var<G, T>(get: &G, key: &str, default: T) -> Result<T, ServerError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ServerError::config(format!("{key} must be a non-negative integer, got '{value}'"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ServerError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_api_key() {
        let config = load(&[
            ("METABASE_URL", "https://metabase.example.com/"),
            ("METABASE_API_KEY", "mb_secret"),
        ])
        .unwrap();

        assert_eq!(config.metabase.url, "https://metabase.example.com");
        assert!(config.uses_api_key());
        assert_eq!(config.metabase.request_timeout, Duration::from_millis(600_000));
        assert_eq!(config.cache.ttl, Duration::from_millis(600_000));
        assert!(config.query.read_only);
        assert_eq!(config.query.batch_concurrency, 8);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_missing_url() {
        let err = load(&[("METABASE_API_KEY", "k")]).unwrap_err();
        assert!(err.to_string().contains("METABASE_URL"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        assert!(load(&[("METABASE_URL", "ftp://mb"), ("METABASE_API_KEY", "k")]).is_err());
        assert!(load(&[("METABASE_URL", "not a url"), ("METABASE_API_KEY", "k")]).is_err());
    }

    #[test]
    fn test_session_credentials() {
        let config = load(&[
            ("METABASE_URL", "http://localhost:3000"),
            ("METABASE_USER_EMAIL", "ana@example.com"),
            ("METABASE_PASSWORD", "hunter2"),
        ])
        .unwrap();

        assert!(!config.uses_api_key());
        let debug = format!("{:?}", config.metabase.credentials);
        assert!(debug.contains("ana@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_api_key_wins_over_session() {
        let config = load(&[
            ("METABASE_URL", "http://localhost:3000"),
            ("METABASE_API_KEY", "k"),
            ("METABASE_USER_EMAIL", "ana@example.com"),
            ("METABASE_PASSWORD", "hunter2"),
        ])
        .unwrap();
        assert_eq!(config.metabase.credentials, Credentials::ApiKey("k".into()));
    }

    #[test]
    fn test_partial_session_credentials() {
        let err = load(&[
            ("METABASE_URL", "http://localhost:3000"),
            ("METABASE_USER_EMAIL", "ana@example.com"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("METABASE_PASSWORD"));

        let err = load(&[("METABASE_URL", "http://localhost:3000")]).unwrap_err();
        assert!(err.to_string().contains("Authentication required"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("METABASE_URL", "http://localhost:3000"),
            ("METABASE_API_KEY", "k"),
            ("CACHE_TTL_MS", "1000"),
            ("REQUEST_TIMEOUT_MS", "5000"),
            ("METABASE_READ_ONLY_MODE", "false"),
            ("METABASE_BATCH_CONCURRENCY", "4"),
            ("METABASE_RETRY_MAX_ATTEMPTS", "1"),
        ])
        .unwrap();

        assert_eq!(config.cache.ttl, Duration::from_secs(1));
        assert_eq!(config.metabase.request_timeout, Duration::from_secs(5));
        assert!(!config.query.read_only);
        assert_eq!(config.query.batch_concurrency, 4);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_bad_numbers_are_rejected() {
        let err = load(&[
            ("METABASE_URL", "http://localhost:3000"),
            ("METABASE_API_KEY", "k"),
            ("CACHE_TTL_MS", "ten minutes"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("CACHE_TTL_MS"));
    }

    #[test]
    fn test_concurrency_range() {
        for bad in ["0", "51"] {
            assert!(load(&[
                ("METABASE_URL", "http://localhost:3000"),
                ("METABASE_API_KEY", "k"),
                ("METABASE_BATCH_CONCURRENCY", bad),
            ])
            .is_err());
        }
    }

    #[test]
    fn test_read_only_stays_on_for_unknown_values() {
        let config = load(&[
            ("METABASE_URL", "http://localhost:3000"),
            ("METABASE_API_KEY", "k"),
            ("METABASE_READ_ONLY_MODE", "maybe"),
        ])
        .unwrap();
        assert!(config.query.read_only);
    }
}
