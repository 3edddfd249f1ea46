//! CLI argument definitions using clap derive macros.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mediagate_core::ServiceConfig;

/// Rate-limited, cached media download gateway.
///
/// Mediagate accepts a media page URL over HTTP, fetches the media through an
/// external extraction tool, and streams the file back to the caller.
#[derive(Parser, Debug)]
#[command(name = "mediagate")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/mediagate/config.toml)
    #[arg(long, env = "MEDIAGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Record download history in this SQLite file
    #[arg(long, env = "MEDIAGATE_HISTORY_DB")]
    pub history_db: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "MEDIAGATE_BIND")]
    pub bind: Option<SocketAddr>,

    /// Maximum concurrent extractions (1-64)
    #[arg(short = 'c', long, env = "MEDIAGATE_MAX_CONCURRENT", value_parser = clap::value_parser!(u8).range(1..=64))]
    pub max_concurrent: Option<u8>,

    /// Requests allowed per client per rate window
    #[arg(short = 'l', long, env = "MEDIAGATE_RATE_LIMIT", value_parser = clap::value_parser!(u32).range(1..))]
    pub rate_limit: Option<u32>,

    /// Rate window length in seconds
    #[arg(long, env = "MEDIAGATE_RATE_WINDOW_SECS")]
    pub rate_window_secs: Option<u64>,

    /// Total extraction attempts per request (1-10)
    #[arg(short = 'r', long, env = "MEDIAGATE_MAX_ATTEMPTS", value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_attempts: Option<u8>,

    /// Per-attempt extraction timeout in seconds
    #[arg(long, env = "MEDIAGATE_ATTEMPT_TIMEOUT_SECS")]
    pub attempt_timeout_secs: Option<u64>,

    /// Cached artifact lifetime in seconds
    #[arg(long, env = "MEDIAGATE_CACHE_TTL_SECS")]
    pub cache_ttl_secs: Option<u64>,

    /// Extraction tool program
    #[arg(long, env = "MEDIAGATE_TOOL")]
    pub tool: Option<String>,

    /// Directory the extraction tool writes into
    #[arg(long, env = "MEDIAGATE_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Directory holding cached artifacts
    #[arg(long, env = "MEDIAGATE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Comma-separated list of accepted source hosts
    #[arg(long, env = "MEDIAGATE_ALLOWED_HOSTS", value_delimiter = ',')]
    pub allowed_hosts: Option<Vec<String>>,

    /// Key rate limiting on X-Forwarded-For (only behind a trusted proxy)
    #[arg(long, env = "MEDIAGATE_TRUST_FORWARDED_HEADERS")]
    pub trust_forwarded_headers: bool,

    /// Validate the configuration, print it, and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Args {
    /// Overlays flags that were given onto `config`.
    pub fn apply_to(&self, config: &mut ServiceConfig) {
        if let Some(addr) = self.bind {
            config.bind_addr = addr;
        }
        if let Some(n) = self.max_concurrent {
            config.max_concurrent = usize::from(n);
        }
        if let Some(n) = self.rate_limit {
            config.rate_limit_max_requests = n;
        }
        if let Some(secs) = self.rate_window_secs {
            config.rate_limit_window = Duration::from_secs(secs);
        }
        if let Some(n) = self.max_attempts {
            config.retry_max_attempts = u32::from(n);
        }
        if let Some(secs) = self.attempt_timeout_secs {
            config.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.cache_ttl_secs {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(tool) = &self.tool {
            config.tool_program.clone_from(tool);
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir.clone_from(dir);
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir.clone_from(dir);
        }
        if let Some(hosts) = &self.allowed_hosts {
            config.allowed_hosts = hosts
                .iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if self.trust_forwarded_headers {
            config.trust_forwarded_headers = true;
        }
    }
}
