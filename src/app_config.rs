//! Configuration file loading for service defaults.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use mediagate_core::ServiceConfig;

/// `key = value` file configuration. Every field is optional; absent fields
/// keep the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Listen address, e.g. `"0.0.0.0:8080"`.
    pub bind_addr: Option<SocketAddr>,
    pub rate_limit_max_requests: Option<u32>,
    pub rate_limit_window_secs: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub admission_max_wait_secs: Option<u64>,
    pub admission_poll_interval_ms: Option<u64>,
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl_secs: Option<u64>,
    pub cache_sweep_interval_secs: Option<u64>,
    pub cache_max_entries: Option<usize>,
    /// Artifacts at or above this size are streamed but never cached.
    pub cache_max_bytes: Option<u64>,
    pub max_artifact_bytes: Option<u64>,
    pub retry_max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub attempt_timeout_secs: Option<u64>,
    /// Comma-separated host names.
    pub allowed_hosts: Option<Vec<String>>,
    pub work_dir: Option<PathBuf>,
    pub tool_program: Option<String>,
    /// `true` only behind a proxy that sets `X-Forwarded-For`.
    pub trust_forwarded_headers: Option<bool>,
    /// SQLite file for download history. History is off when unset.
    pub history_db: Option<PathBuf>,
}

impl FileConfig {
    /// Overlays the values present in the file onto `config`.
    pub fn apply_to(&self, config: &mut ServiceConfig) {
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(n) = self.rate_limit_max_requests {
            config.rate_limit_max_requests = n;
        }
        if let Some(secs) = self.rate_limit_window_secs {
            config.rate_limit_window = Duration::from_secs(secs);
        }
        if let Some(n) = self.max_concurrent {
            config.max_concurrent = n;
        }
        if let Some(secs) = self.admission_max_wait_secs {
            config.admission_max_wait = Duration::from_secs(secs);
        }
        if let Some(ms) = self.admission_poll_interval_ms {
            config.admission_poll_interval = Duration::from_millis(ms);
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir.clone_from(dir);
        }
        if let Some(secs) = self.cache_ttl_secs {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = self.cache_sweep_interval_secs {
            config.cache_sweep_interval = Duration::from_secs(secs);
        }
        if let Some(n) = self.cache_max_entries {
            config.cache_max_entries = n;
        }
        if let Some(bytes) = self.cache_max_bytes {
            config.cache_max_bytes = bytes;
        }
        if let Some(bytes) = self.max_artifact_bytes {
            config.max_artifact_bytes = bytes;
        }
        if let Some(n) = self.retry_max_attempts {
            config.retry_max_attempts = n;
        }
        if let Some(ms) = self.retry_base_delay_ms {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.attempt_timeout_secs {
            config.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(hosts) = &self.allowed_hosts {
            config.allowed_hosts.clone_from(hosts);
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir.clone_from(dir);
        }
        if let Some(program) = &self.tool_program {
            config.tool_program.clone_from(program);
        }
        if let Some(trust) = self.trust_forwarded_headers {
            config.trust_forwarded_headers = trust;
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/mediagate/config.toml`
/// 2. `$HOME/.config/mediagate/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("mediagate")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("mediagate")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads `explicit` when given (it must exist), else the default path if a
/// file is present there.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    };

    if !path_ref.exists() {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
        loaded_from_file: true,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "bind_addr" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.bind_addr = Some(parsed.parse::<SocketAddr>().with_context(invalid)?);
            }
            "rate_limit_max_requests" => {
                cfg.rate_limit_max_requests =
                    Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "rate_limit_window_secs" => {
                cfg.rate_limit_window_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "max_concurrent" => {
                cfg.max_concurrent = Some(parse_integer_usize(value).with_context(invalid)?);
            }
            "admission_max_wait_secs" => {
                cfg.admission_max_wait_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "admission_poll_interval_ms" => {
                cfg.admission_poll_interval_ms =
                    Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "cache_dir" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.cache_dir = Some(PathBuf::from(parsed));
            }
            "cache_ttl_secs" => {
                cfg.cache_ttl_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "cache_sweep_interval_secs" => {
                cfg.cache_sweep_interval_secs =
                    Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "cache_max_entries" => {
                cfg.cache_max_entries = Some(parse_integer_usize(value).with_context(invalid)?);
            }
            "cache_max_bytes" => {
                cfg.cache_max_bytes = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "max_artifact_bytes" => {
                cfg.max_artifact_bytes = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "retry_max_attempts" => {
                cfg.retry_max_attempts = Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "retry_base_delay_ms" => {
                cfg.retry_base_delay_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "attempt_timeout_secs" => {
                cfg.attempt_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "allowed_hosts" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.allowed_hosts = Some(split_host_list(&parsed));
            }
            "work_dir" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.work_dir = Some(PathBuf::from(parsed));
            }
            "tool_program" => {
                cfg.tool_program = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "trust_forwarded_headers" => {
                cfg.trust_forwarded_headers = Some(parse_boolean(value).with_context(invalid)?);
            }
            "history_db" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.history_db = Some(PathBuf::from(parsed));
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    Ok(cfg)
}

/// Splits a comma-separated host list, dropping empty entries.
pub fn split_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow!("Integer value out of range for u64"))
}

fn parse_integer_u32(raw_value: &str) -> Result<u32> {
    let value = parse_integer_u64(raw_value)?;
    u32::try_from(value).map_err(|_| anyhow!("Integer value out of range for u32"))
}

fn parse_integer_usize(raw_value: &str) -> Result<usize> {
    let value = parse_integer_u64(raw_value)?;
    usize::try_from(value).map_err(|_| anyhow!("Integer value out of range for usize"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => bail!("Expected true or false, got '{other}'"),
    }
}
