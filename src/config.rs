//! Verifier configuration
//!
//! Values come from three layers, highest precedence first: an env file
//! passed to [`VerifierConfig::from_env_file`], the process environment, and
//! the built-in defaults. Reading an env file never mutates the process
//! environment.
//!
//! | Variable | Field |
//! |---|---|
//! | `BACKEND_BASE_URL` | `backend_base_url` |
//! | `CARDTRUST_REQUEST_TIMEOUT_MS` | `request_timeout` |
//! | `CARDTRUST_KEY_FETCH_SHORT_TIMEOUT_MS` | `key_fetch_short_timeout` |
//! | `CARDTRUST_KEY_FETCH_LONG_TIMEOUT_MS` | `key_fetch_long_timeout` |
//! | `CARDTRUST_ONLINE_TIMEOUT_MS` | `online_timeout` |
//! | `CARDTRUST_BUNDLED_KEY_PATH` | `bundled_key_path` |
//! | `CARDTRUST_KEY_CACHE_PATH` | `key_cache_path` |
//! | `CARDTRUST_FALLBACK_KEY_PATH` | `embedded_public_key_pem` (file contents) |
//! | `CARDTRUST_MASK_KEY` | `mask_key` |
//! | `CARDTRUST_SCAN_PAGE_LIMIT` | `scan_page_limit` |
//! | `CARDTRUST_PRESENCE_INTERVAL_MS` | `presence_interval` |

use cardtrust_crypto::{KeyError, MaskKey};
use cardtrust_protocol::{DATA_START_PAGE, DEFAULT_SCAN_END_PAGE};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BACKEND_BASE_URL: &str = "http://localhost:8000";

/// Key shipped with the crate, last tier of trust-key resolution
pub const EMBEDDED_PUBLIC_KEY_PEM: &str = include_str!("../resources/fallback_public_key.pem");

pub const ENV_BACKEND_BASE_URL: &str = "BACKEND_BASE_URL";
pub const ENV_REQUEST_TIMEOUT: &str = "CARDTRUST_REQUEST_TIMEOUT_MS";
pub const ENV_KEY_FETCH_SHORT_TIMEOUT: &str = "CARDTRUST_KEY_FETCH_SHORT_TIMEOUT_MS";
pub const ENV_KEY_FETCH_LONG_TIMEOUT: &str = "CARDTRUST_KEY_FETCH_LONG_TIMEOUT_MS";
pub const ENV_ONLINE_TIMEOUT: &str = "CARDTRUST_ONLINE_TIMEOUT_MS";
pub const ENV_BUNDLED_KEY_PATH: &str = "CARDTRUST_BUNDLED_KEY_PATH";
pub const ENV_KEY_CACHE_PATH: &str = "CARDTRUST_KEY_CACHE_PATH";
pub const ENV_FALLBACK_KEY_PATH: &str = "CARDTRUST_FALLBACK_KEY_PATH";
pub const ENV_MASK_KEY: &str = "CARDTRUST_MASK_KEY";
pub const ENV_SCAN_PAGE_LIMIT: &str = "CARDTRUST_SCAN_PAGE_LIMIT";
pub const ENV_PRESENCE_INTERVAL: &str = "CARDTRUST_PRESENCE_INTERVAL_MS";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("Env file error: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mask key error: {0}")]
    MaskKey(#[from] KeyError),
}

impl ConfigError {
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { .. } => {
                Some("Durations are whole milliseconds, URLs must be absolute")
            }
            Self::MaskKey(_) => Some("Unset the mask key variable instead of leaving it empty"),
            _ => None,
        }
    }
}

/// Everything the verification stack needs at construction
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub backend_base_url: Url,
    /// Upper bound for any single HTTP request
    pub request_timeout: Duration,
    pub key_fetch_short_timeout: Duration,
    pub key_fetch_long_timeout: Duration,
    /// Budget for the online verification path before falling back
    pub online_timeout: Duration,
    pub bundled_key_path: Option<PathBuf>,
    pub key_cache_path: Option<PathBuf>,
    pub embedded_public_key_pem: String,
    pub mask_key: Option<MaskKey>,
    /// Number of 4-byte pages scanned from the data-start page
    pub scan_page_limit: usize,
    pub presence_interval: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            backend_base_url: default_base_url(),
            request_timeout: Duration::from_secs(30),
            key_fetch_short_timeout: Duration::from_secs(3),
            key_fetch_long_timeout: Duration::from_secs(15),
            online_timeout: Duration::from_secs(10),
            bundled_key_path: None,
            key_cache_path: None,
            embedded_public_key_pem: EMBEDDED_PUBLIC_KEY_PEM.to_string(),
            mask_key: None,
            scan_page_limit: usize::from(DEFAULT_SCAN_END_PAGE - DATA_START_PAGE),
            presence_interval: Duration::from_millis(500),
        }
    }
}

fn default_base_url() -> Url {
    // Compile-time constant, always parses
    Url::parse(DEFAULT_BACKEND_BASE_URL).unwrap_or_else(|_| unreachable!())
}

impl VerifierConfig {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults, overlaid with the process environment, overlaid with `path`
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut file_vars = HashMap::new();
        for item in dotenvy::from_path_iter(path.as_ref())? {
            let (key, value) = item?;
            file_vars.insert(key, value);
        }
        Self::from_lookup(|key| {
            file_vars
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        })
    }

    /// Build from an arbitrary variable source; unset or blank values keep
    /// their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(raw) = get(ENV_BACKEND_BASE_URL) {
            config.backend_base_url = parse_url(ENV_BACKEND_BASE_URL, &raw)?;
        }
        if let Some(raw) = get(ENV_REQUEST_TIMEOUT) {
            config.request_timeout = parse_millis(ENV_REQUEST_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get(ENV_KEY_FETCH_SHORT_TIMEOUT) {
            config.key_fetch_short_timeout = parse_millis(ENV_KEY_FETCH_SHORT_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get(ENV_KEY_FETCH_LONG_TIMEOUT) {
            config.key_fetch_long_timeout = parse_millis(ENV_KEY_FETCH_LONG_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get(ENV_ONLINE_TIMEOUT) {
            config.online_timeout = parse_millis(ENV_ONLINE_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get(ENV_PRESENCE_INTERVAL) {
            config.presence_interval = parse_millis(ENV_PRESENCE_INTERVAL, &raw)?;
        }
        if let Some(raw) = get(ENV_SCAN_PAGE_LIMIT) {
            config.scan_page_limit = parse_page_limit(&raw)?;
        }
        config.bundled_key_path = get(ENV_BUNDLED_KEY_PATH).map(PathBuf::from);
        config.key_cache_path = get(ENV_KEY_CACHE_PATH).map(PathBuf::from);
        if let Some(raw) = get(ENV_FALLBACK_KEY_PATH) {
            let path = PathBuf::from(raw);
            config.embedded_public_key_pem = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::Io { path, source })?;
        }
        if let Some(raw) = lookup(ENV_MASK_KEY) {
            config.mask_key = Some(MaskKey::from_passphrase(&raw)?);
        }

        Ok(config)
    }

    pub fn with_backend_base_url(mut self, url: Url) -> Self {
        self.backend_base_url = url;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_key_fetch_timeouts(mut self, short: Duration, long: Duration) -> Self {
        self.key_fetch_short_timeout = short;
        self.key_fetch_long_timeout = long;
        self
    }

    pub fn with_online_timeout(mut self, timeout: Duration) -> Self {
        self.online_timeout = timeout;
        self
    }

    pub fn with_bundled_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundled_key_path = Some(path.into());
        self
    }

    pub fn with_key_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_cache_path = Some(path.into());
        self
    }

    pub fn with_embedded_public_key_pem(mut self, pem: impl Into<String>) -> Self {
        self.embedded_public_key_pem = pem.into();
        self
    }

    pub fn with_mask_key(mut self, key: MaskKey) -> Self {
        self.mask_key = Some(key);
        self
    }

    pub fn with_scan_page_limit(mut self, pages: usize) -> Self {
        self.scan_page_limit = pages;
        self
    }

    pub fn with_presence_interval(mut self, interval: Duration) -> Self {
        self.presence_interval = interval;
        self
    }

    /// Join an API path onto the backend base URL
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        self.backend_base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ConfigError::InvalidValue {
                key: ENV_BACKEND_BASE_URL,
                reason: e.to_string(),
            })
    }
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key,
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidValue {
            key,
            reason: format!("'{}' cannot be used as a base URL", raw),
        });
    }
    // Url::join drops the last segment unless the path ends with '/'
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::InvalidValue {
            key,
            reason: format!("'{}': {}", raw, e),
        })
}

fn parse_page_limit(raw: &str) -> Result<usize, ConfigError> {
    let max = usize::from(u8::MAX - DATA_START_PAGE) + 1;
    match raw.parse::<usize>() {
        Ok(pages) if (1..=max).contains(&pages) => Ok(pages),
        Ok(pages) => Err(ConfigError::InvalidValue {
            key: ENV_SCAN_PAGE_LIMIT,
            reason: format!("{} is outside 1..={}", pages, max),
        }),
        Err(e) => Err(ConfigError::InvalidValue {
            key: ENV_SCAN_PAGE_LIMIT,
            reason: e.to_string(),
        }),
    }
}
