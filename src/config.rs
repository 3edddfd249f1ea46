//! Service configuration.
//!
//! [`ServiceConfig`] holds every tunable the download service reads. The
//! binary builds one from defaults, an optional config file and command-line
//! flags, then calls [`ServiceConfig::validate`] before constructing the
//! service.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::download::{
    CacheSettings, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BASE_DELAY, DEFAULT_CACHE_MAX_BYTES,
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_SWEEP_INTERVAL, DEFAULT_CACHE_TTL,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL,
    DEFAULT_TOOL_PROGRAM, GateSettings, RetryPolicy,
};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default requests allowed per client per window.
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 10;

/// Default rate window (1 minute).
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Default hard ceiling on artifact size (500 MiB).
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 500 * 1024 * 1024;

/// Hosts accepted out of the box. Subdomains of each are accepted too.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "tiktok.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "fb.watch",
    "vimeo.com",
    "soundcloud.com",
    "reddit.com",
    "twitch.tv",
    "dailymotion.com",
];

/// Largest accepted slot count.
pub const MAX_CONCURRENT_LIMIT: usize = 64;

/// Largest accepted attempt count.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Configuration validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A single value is outside its accepted range.
    #[error("invalid value for `{field}`: {value} (expected {expected})")]
    OutOfRange {
        /// Field name as it appears in config files.
        field: &'static str,
        /// Offending value, rendered.
        value: String,
        /// Human-readable accepted range.
        expected: &'static str,
    },

    /// Two values contradict each other.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Every tunable of the download service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Address the HTTP server listens on.
    pub bind_addr: SocketAddr,
    /// Requests per client per window.
    pub rate_limit_max_requests: u32,
    /// Rate window length.
    pub rate_limit_window: Duration,
    /// Concurrent extraction slots.
    pub max_concurrent: usize,
    /// Admission wait ceiling.
    pub admission_max_wait: Duration,
    /// Poll interval while waiting for a slot.
    pub admission_poll_interval: Duration,
    /// Directory for cache-owned artifact copies.
    pub cache_dir: PathBuf,
    /// Cache entry lifetime.
    pub cache_ttl: Duration,
    /// Maintenance interval for the cache and rate table.
    pub cache_sweep_interval: Duration,
    /// Maximum cache entries.
    pub cache_max_entries: usize,
    /// Artifacts must be smaller than this to be cached.
    pub cache_max_bytes: u64,
    /// Artifacts larger than this are rejected.
    pub max_artifact_bytes: u64,
    /// Attempts per format strategy.
    pub retry_max_attempts: u32,
    /// Linear backoff unit.
    pub retry_base_delay: Duration,
    /// Per-attempt extraction timeout.
    pub attempt_timeout: Duration,
    /// Accepted source hosts.
    pub allowed_hosts: Vec<String>,
    /// Directory the extraction tool writes into.
    pub work_dir: PathBuf,
    /// Extraction tool binary.
    pub tool_program: String,
    /// Key rate limiting on `X-Forwarded-For` / `X-Real-IP`. Only enable
    /// behind a reverse proxy that overwrites these headers; otherwise any
    /// caller can pick its own rate limit key.
    pub trust_forwarded_headers: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            admission_max_wait: DEFAULT_MAX_WAIT,
            admission_poll_interval: DEFAULT_POLL_INTERVAL,
            cache_dir: tmp.join("mediagate-cache"),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_sweep_interval: DEFAULT_CACHE_SWEEP_INTERVAL,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            retry_max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_BASE_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            allowed_hosts: DEFAULT_ALLOWED_HOSTS
                .iter()
                .map(|h| (*h).to_string())
                .collect(),
            work_dir: tmp.join("mediagate-work"),
            tool_program: DEFAULT_TOOL_PROGRAM.to_string(),
            trust_forwarded_headers: false,
        }
    }
}

impl ServiceConfig {
    /// Checks every value against its accepted range and cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10_000).contains(&self.rate_limit_max_requests) {
            return Err(out_of_range(
                "rate_limit_max_requests",
                self.rate_limit_max_requests,
                "1..=10000",
            ));
        }
        check_duration(
            "rate_limit_window_secs",
            self.rate_limit_window,
            Duration::from_secs(1),
            Duration::from_secs(86_400),
            "1..=86400 seconds",
        )?;
        if !(1..=MAX_CONCURRENT_LIMIT).contains(&self.max_concurrent) {
            return Err(out_of_range("max_concurrent", self.max_concurrent, "1..=64"));
        }
        check_duration(
            "admission_max_wait_secs",
            self.admission_max_wait,
            Duration::ZERO,
            Duration::from_secs(600),
            "0..=600 seconds",
        )?;
        check_duration(
            "admission_poll_interval_ms",
            self.admission_poll_interval,
            Duration::from_millis(1),
            Duration::from_secs(10),
            "1..=10000 milliseconds",
        )?;
        check_duration(
            "cache_ttl_secs",
            self.cache_ttl,
            Duration::from_secs(1),
            Duration::from_secs(7 * 86_400),
            "1..=604800 seconds",
        )?;
        check_duration(
            "cache_sweep_interval_secs",
            self.cache_sweep_interval,
            Duration::from_secs(1),
            Duration::from_secs(86_400),
            "1..=86400 seconds",
        )?;
        if !(1..=100_000).contains(&self.cache_max_entries) {
            return Err(out_of_range(
                "cache_max_entries",
                self.cache_max_entries,
                "1..=100000",
            ));
        }
        if self.max_artifact_bytes == 0 {
            return Err(out_of_range("max_artifact_bytes", 0, "a positive size"));
        }
        if self.cache_max_bytes >= self.max_artifact_bytes {
            return Err(ConfigError::Inconsistent(format!(
                "cache_max_bytes ({}) must be smaller than max_artifact_bytes ({})",
                self.cache_max_bytes, self.max_artifact_bytes
            )));
        }
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.retry_max_attempts) {
            return Err(out_of_range(
                "retry_max_attempts",
                self.retry_max_attempts,
                "1..=10",
            ));
        }
        check_duration(
            "retry_base_delay_ms",
            self.retry_base_delay,
            Duration::ZERO,
            Duration::from_secs(60),
            "0..=60000 milliseconds",
        )?;
        check_duration(
            "attempt_timeout_secs",
            self.attempt_timeout,
            Duration::from_secs(1),
            Duration::from_secs(3600),
            "1..=3600 seconds",
        )?;
        if self.allowed_hosts.iter().all(|h| h.trim().is_empty()) {
            return Err(ConfigError::Inconsistent(
                "allowed_hosts must name at least one host".to_string(),
            ));
        }
        if self.tool_program.trim().is_empty() {
            return Err(ConfigError::Inconsistent(
                "tool_program must not be empty".to_string(),
            ));
        }
        if self.work_dir == self.cache_dir {
            return Err(ConfigError::Inconsistent(
                "work_dir and cache_dir must be different directories".to_string(),
            ));
        }
        Ok(())
    }

    /// Allowed hosts lowercased, trimmed, with empty entries dropped.
    #[must_use]
    pub fn normalized_hosts(&self) -> Vec<String> {
        self.allowed_hosts
            .iter()
            .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect()
    }

    /// Concurrency gate settings.
    #[must_use]
    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            max_concurrent: self.max_concurrent,
            max_wait: self.admission_max_wait,
            poll_interval: self.admission_poll_interval,
        }
    }

    /// Result cache settings.
    #[must_use]
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            dir: self.cache_dir.clone(),
            ttl: self.cache_ttl,
            sweep_interval: self.cache_sweep_interval,
            max_entries: self.cache_max_entries,
            max_cacheable_bytes: self.cache_max_bytes,
        }
    }

    /// Retry policy for each extraction strategy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_base_delay,
            self.attempt_timeout,
        )
    }
}

fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value: value.to_string(),
        expected,
    }
}

fn check_duration(
    field: &'static str,
    value: Duration,
    min: Duration,
    max: Duration,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(out_of_range(field, format!("{value:?}"), expected));
    }
    Ok(())
}
