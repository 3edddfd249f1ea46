//! Download orchestration engine.
//!
//! This module turns a media URL into a streamed artifact while protecting
//! the host from overload.
//!
//! # Components
//!
//! - [`RateLimiter`] - per-client fixed-window request counter
//! - [`ConcurrencyGate`] - bounded extraction slots with timed admission
//! - [`ResultCache`] - TTL and capacity bounded cache of finished artifacts
//! - [`RetryPolicy`] - linear-backoff retry with a per-attempt timeout
//! - [`ExtractionInvoker`] - runs the extraction tool with format fallback
//! - [`DownloadService`] - drives a request through all of the above
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediagate_core::download::{DownloadService, FetchRequest, YtDlpTool};
//! use mediagate_core::{NoopHistory, ServiceConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = DownloadService::new(
//!     ServiceConfig::default(),
//!     Arc::new(YtDlpTool::default()),
//!     Arc::new(NoopHistory),
//! );
//! service.prepare().await?;
//!
//! let response = service
//!     .fetch(FetchRequest {
//!         url: Some("https://youtu.be/dQw4w9WgXcQ".to_string()),
//!         client_key: "127.0.0.1".to_string(),
//!         identity: None,
//!     })
//!     .await?;
//! println!("{} ({} bytes)", response.filename, response.size_bytes);
//! # Ok(())
//! # }
//! ```

mod cache;
mod error;
mod extractor;
mod filename;
mod gate;
mod orchestrator;
pub mod rate_limiter;
mod retry;
mod stream;

pub use cache::{
    ArtifactMeta, CacheEntry, CacheError, CacheSettings, DEFAULT_CACHE_MAX_BYTES,
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_SWEEP_INTERVAL, DEFAULT_CACHE_TTL, ResultCache,
};
pub use error::{ExtractionError, FetchError};
pub use extractor::{
    DEFAULT_TOOL_PROGRAM, ExtractedFile, ExtractionInvoker, FormatStrategy, MediaTool,
    PARTIAL_MARKERS, ToolInvocation, ToolOutput, YtDlpTool, is_partial_file, locate_artifact,
};
pub use filename::{
    attachment_filename, cache_key, canonical_host, content_disposition, host_allowed,
    media_type_for, normalize_source_url, parse_source_url, platform_for, sanitize_display_name,
};
pub use gate::{
    ConcurrencyGate, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, GateError,
    GateSettings, Slot,
};
pub use orchestrator::{
    CacheStatus, DownloadService, FetchRequest, HealthSnapshot, MaintenanceReport, MediaResponse,
};
pub use rate_limiter::{RateDecision, RateLimiter};
pub use retry::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, RetryError, RetryPolicy,
};
pub use stream::{ArtifactStream, Cleanup};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, FetchError>` explicitly in function signatures.
