//! Top-level download request handling.
//!
//! [`DownloadService`] owns the rate limiter, concurrency gate, result cache
//! and extraction invoker, and drives one request through them:
//!
//! ```text
//! validate URL -> allow-list -> rate limit -> cache lookup
//!     hit  -> stream cached copy (no slot)
//!     miss -> acquire slot -> extract -> size check -> cache copy -> stream
//! ```
//!
//! Every path that acquired a slot hands it to a [`Cleanup`]; the slot and
//! the request's temporary files are released exactly once, whether the
//! request fails, the body finishes, or the client disconnects.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::cache::{ArtifactMeta, ResultCache};
use super::error::FetchError;
use super::extractor::{ExtractionInvoker, MediaTool};
use super::filename::{
    attachment_filename, cache_key, host_allowed, media_type_for, parse_source_url,
    platform_for,
};
use super::gate::ConcurrencyGate;
use super::rate_limiter::{RateDecision, RateLimiter};
use super::stream::{ArtifactStream, Cleanup};
use crate::config::ServiceConfig;
use crate::history::{DeliverySource, HistoryEntry, HistoryError, HistoryRecord, HistorySink};

/// One inbound download request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Source URL as submitted; `None` when the body had no URL.
    pub url: Option<String>,
    /// Rate limiting key (client address).
    pub client_key: String,
    /// Optional identity token; history is recorded only when present.
    pub identity: Option<String>,
}

/// Whether a response was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the result cache.
    Hit,
    /// Extracted for this request.
    Miss,
}

impl CacheStatus {
    /// Header value for `X-Cache`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// A successful download, ready to stream.
#[derive(Debug)]
pub struct MediaResponse {
    /// Attachment name.
    pub filename: String,
    /// Media type.
    pub media_type: String,
    /// Body length.
    pub size_bytes: u64,
    /// Cache hit or miss.
    pub cache_status: CacheStatus,
    /// Time spent producing the artifact (zero on a hit).
    pub elapsed: Duration,
    /// Slots in use when the response was built.
    pub active_downloads: usize,
    /// Configured slot count.
    pub max_concurrent: usize,
    /// The artifact bytes.
    pub body: ArtifactStream,
}

/// Point-in-time service counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Slots in use.
    pub active_downloads: usize,
    /// Configured slot count.
    pub max_concurrent: usize,
    /// Cache entries indexed.
    pub cached_entries: usize,
    /// Clients with a live rate window.
    pub tracked_clients: usize,
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Idle rate windows dropped.
    pub rate_windows: usize,
    /// Expired cache entries dropped.
    pub cache_entries: usize,
    /// Unindexed cache files deleted.
    pub orphaned_files: usize,
}

/// The download orchestrator.
pub struct DownloadService {
    config: ServiceConfig,
    allowed_hosts: Vec<String>,
    limiter: RateLimiter,
    gate: ConcurrencyGate,
    cache: ResultCache,
    invoker: ExtractionInvoker,
    history: Arc<dyn HistorySink>,
}

impl std::fmt::Debug for DownloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadService")
            .field("limiter", &self.limiter)
            .field("gate", &self.gate)
            .field("cache", &self.cache)
            .field("invoker", &self.invoker)
            .finish_non_exhaustive()
    }
}

impl DownloadService {
    /// Builds the service. `config` is expected to have passed
    /// [`ServiceConfig::validate`].
    #[must_use]
    pub fn new(
        config: ServiceConfig,
        tool: Arc<dyn MediaTool>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_max_requests, config.rate_limit_window);
        let gate = ConcurrencyGate::new(config.gate_settings());
        let cache = ResultCache::new(config.cache_settings());
        let invoker = ExtractionInvoker::new(tool, config.retry_policy(), config.work_dir.clone());
        Self {
            allowed_hosts: config.normalized_hosts(),
            config,
            limiter,
            gate,
            cache,
            invoker,
            history,
        }
    }

    /// Returns the configuration the service was built with.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Returns the result cache.
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Returns the concurrency gate.
    #[must_use]
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Creates the work and cache directories and clears leftovers from a
    /// previous run. Call once before serving requests.
    ///
    /// # Errors
    ///
    /// Returns the IO error if a directory cannot be created.
    #[instrument(skip(self), fields(work_dir = %self.config.work_dir.display()))]
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;

        let stale = clear_directory(&self.config.work_dir).await;
        let orphans = self.cache.remove_orphans().await;
        info!(stale, orphans, "service directories ready");
        Ok(())
    }

    /// Recent downloads recorded for `identity`, newest first.
    ///
    /// # Errors
    ///
    /// Returns the history store's error if the lookup fails.
    pub async fn recent_history(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        self.history.recent(identity, limit).await
    }

    /// Current counters for the health endpoint.
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            active_downloads: self.gate.active(),
            max_concurrent: self.gate.max_concurrent(),
            cached_entries: self.cache.len(),
            tracked_clients: self.limiter.tracked_clients(),
        }
    }

    /// Handles one download request.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] describing why no body can be served. Any
    /// slot and temporary file the request acquired is released first.
    #[instrument(skip(self, request), fields(client = %request.client_key))]
    pub async fn fetch(&self, request: FetchRequest) -> Result<MediaResponse, FetchError> {
        let raw_url = request
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| FetchError::InvalidRequest("URL is required".to_string()))?;
        let url = parse_source_url(raw_url)
            .ok_or_else(|| FetchError::InvalidRequest("Invalid URL".to_string()))?;

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !host_allowed(&host, &self.allowed_hosts) {
            info!(%host, "rejected host not on allow-list");
            return Err(FetchError::DomainNotAllowed { host });
        }

        if let RateDecision::Denied { retry_after_secs } = self.limiter.check(&request.client_key) {
            info!(retry_after_secs, "rate limit exceeded");
            return Err(FetchError::RateLimited { retry_after_secs });
        }

        let key = cache_key(&url);
        if let Some(response) = self.serve_cached(&key, &url, &request).await {
            return Ok(response);
        }

        self.extract(&key, url, &request).await
    }

    async fn serve_cached(
        &self,
        key: &str,
        url: &Url,
        request: &FetchRequest,
    ) -> Option<MediaResponse> {
        let entry = self.cache.get(key).await?;
        let body = match ArtifactStream::open(&entry.artifact_path, Cleanup::detached()).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "cached artifact vanished before streaming, extracting instead");
                return None;
            }
        };

        info!(size_bytes = entry.size_bytes, "serving from cache");
        self.notify_history(
            request,
            url,
            None,
            &entry.display_name,
            entry.size_bytes,
            DeliverySource::Cache,
        );

        Some(MediaResponse {
            filename: entry.display_name,
            media_type: entry.media_type,
            size_bytes: entry.size_bytes,
            cache_status: CacheStatus::Hit,
            elapsed: Duration::ZERO,
            active_downloads: self.gate.active(),
            max_concurrent: self.gate.max_concurrent(),
            body,
        })
    }

    async fn extract(
        &self,
        key: &str,
        url: Url,
        request: &FetchRequest,
    ) -> Result<MediaResponse, FetchError> {
        let started = Instant::now();
        let slot = self.gate.acquire().await?;

        let prefix = Uuid::new_v4().to_string();
        let cleanup = Cleanup::new(slot, &self.config.work_dir, &prefix);

        let extracted = match self.invoker.invoke(url.as_str(), &prefix).await {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, "extraction failed");
                cleanup.run();
                return Err(e.into());
            }
        };

        if extracted.size_bytes > self.config.max_artifact_bytes {
            warn!(
                size_bytes = extracted.size_bytes,
                max_bytes = self.config.max_artifact_bytes,
                "artifact exceeds size ceiling"
            );
            cleanup.run();
            return Err(FetchError::ArtifactTooLarge {
                size_bytes: extracted.size_bytes,
                max_bytes: self.config.max_artifact_bytes,
            });
        }

        let filename = attachment_filename(
            extracted.title.as_deref().unwrap_or_default(),
            &extracted.path,
        );
        let media_type = media_type_for(&extracted.path).to_string();

        if self.cache.is_eligible(extracted.size_bytes) {
            let meta = ArtifactMeta {
                display_name: filename.clone(),
                media_type: media_type.clone(),
                size_bytes: extracted.size_bytes,
            };
            if let Err(e) = self.cache.put(key, &extracted.path, meta).await {
                warn!(error = %e, "failed to cache artifact");
            }
        }

        let body = ArtifactStream::open(&extracted.path, cleanup)
            .await
            .map_err(|e| FetchError::Internal(format!("cannot open artifact: {e}")))?;

        let elapsed = started.elapsed();
        info!(
            size_bytes = extracted.size_bytes,
            elapsed_ms = elapsed.as_millis(),
            "download ready"
        );
        self.notify_history(
            request,
            &url,
            extracted.title.clone(),
            &filename,
            extracted.size_bytes,
            DeliverySource::Extraction,
        );

        Ok(MediaResponse {
            filename,
            media_type,
            size_bytes: extracted.size_bytes,
            cache_status: CacheStatus::Miss,
            elapsed,
            active_downloads: self.gate.active(),
            max_concurrent: self.gate.max_concurrent(),
            body,
        })
    }

    /// Records the download in the background. Anonymous requests are skipped.
    fn notify_history(
        &self,
        request: &FetchRequest,
        url: &Url,
        title: Option<String>,
        filename: &str,
        size_bytes: u64,
        source: DeliverySource,
    ) {
        let Some(identity) = request.identity.as_deref().filter(|i| !i.trim().is_empty()) else {
            return;
        };

        let record = HistoryRecord {
            client_identity: identity.to_string(),
            url: url.to_string(),
            title,
            filename: filename.to_string(),
            platform: platform_for(url),
            file_size: size_bytes,
            source,
        };
        let history = Arc::clone(&self.history);
        tokio::spawn(
            async move {
                if let Err(e) = history.record(&record).await {
                    warn!(error = %e, "failed to record download history");
                }
            }
            .instrument(info_span!("history")),
        );
    }

    /// Drops idle rate windows, expired cache entries and orphaned cache
    /// files.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            rate_windows: self.limiter.sweep(),
            cache_entries: self.cache.sweep().await,
            orphaned_files: self.cache.remove_orphans().await,
        };
        debug!(?report, "maintenance pass finished");
        report
    }

    /// Runs [`run_maintenance`](Self::run_maintenance) every
    /// `cache_sweep_interval` until the returned handle is aborted.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = self.config.cache_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.run_maintenance().await;
            }
        })
    }
}

/// Deletes every regular file directly inside `dir`.
async fn clear_directory(dir: &Path) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_file())
            && tokio::fs::remove_file(entry.path()).await.is_ok()
        {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use futures_util::StreamExt;
    use tempfile::TempDir;

    use super::*;
    use crate::download::error::ExtractionError;
    use crate::download::extractor::{FormatStrategy, ToolInvocation, ToolOutput};
    use crate::history::{HistoryError, NoopHistory};

    /// Writes `size` bytes as `<prefix>.mp4` and counts calls.
    struct FakeTool {
        size: usize,
        calls: AtomicU32,
        fail_preferred: bool,
    }

    impl FakeTool {
        fn new(size: usize) -> Self {
            Self {
                size,
                calls: AtomicU32::new(0),
                fail_preferred: false,
            }
        }
    }

    #[async_trait]
    impl MediaTool for FakeTool {
        async fn fetch(&self, inv: &ToolInvocation) -> Result<ToolOutput, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_preferred && inv.strategy == FormatStrategy::Preferred {
                return Err(ExtractionError::FormatUnavailable {
                    message: "Requested format is not available".to_string(),
                });
            }
            let path = inv.output_dir.join(format!("{}.mp4", inv.prefix));
            tokio::fs::write(path, vec![b'v'; self.size]).await.unwrap();
            Ok(ToolOutput {
                title: Some("Great Clip!".to_string()),
            })
        }
    }

    #[derive(Default)]
    struct RecordingHistory(Mutex<Vec<HistoryRecord>>);

    #[async_trait]
    impl HistorySink for RecordingHistory {
        async fn record(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn config(temp: &TempDir) -> ServiceConfig {
        ServiceConfig {
            work_dir: temp.path().join("work"),
            cache_dir: temp.path().join("cache"),
            cache_max_bytes: 1_000,
            max_artifact_bytes: 10_000,
            retry_base_delay: Duration::from_millis(1),
            admission_max_wait: Duration::from_millis(50),
            admission_poll_interval: Duration::from_millis(5),
            ..ServiceConfig::default()
        }
    }

    async fn service(
        config: ServiceConfig,
        tool: Arc<FakeTool>,
        history: Arc<dyn HistorySink>,
    ) -> DownloadService {
        let service = DownloadService::new(config, tool, history);
        service.prepare().await.unwrap();
        service
    }

    fn request(url: &str) -> FetchRequest {
        FetchRequest {
            url: Some(url.to_string()),
            client_key: "10.0.0.1".to_string(),
            identity: None,
        }
    }

    async fn drain(mut body: ArtifactStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_fetch_miss_streams_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let tool = Arc::new(FakeTool::new(100));
        let svc = service(config(&temp), tool.clone(), Arc::new(NoopHistory)).await;

        let response = svc.fetch(request("https://www.youtube.com/watch?v=abc")).await.unwrap();
        assert_eq!(response.cache_status, CacheStatus::Miss);
        assert_eq!(response.filename, "Great Clip.mp4");
        assert_eq!(response.media_type, "video/mp4");
        assert_eq!(response.size_bytes, 100);
        assert_eq!(response.active_downloads, 1);
        assert_eq!(svc.gate().active(), 1);

        assert_eq!(drain(response.body).await.len(), 100);
        assert_eq!(svc.gate().active(), 0);
        let leftovers = std::fs::read_dir(temp.path().join("work")).unwrap().count();
        assert_eq!(leftovers, 0);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_request_is_cache_hit_without_slot() {
        let temp = TempDir::new().unwrap();
        let tool = Arc::new(FakeTool::new(100));
        let svc = service(config(&temp), tool.clone(), Arc::new(NoopHistory)).await;

        let first = svc.fetch(request("https://youtu.be/abc")).await.unwrap();
        let first_bytes = drain(first.body).await;

        let second = svc.fetch(request("https://youtu.be/abc")).await.unwrap();
        assert_eq!(second.cache_status, CacheStatus::Hit);
        assert_eq!(second.elapsed, Duration::ZERO);
        assert_eq!(svc.gate().active(), 0);
        assert_eq!(drain(second.body).await, first_bytes);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_url_is_invalid_request() {
        let temp = TempDir::new().unwrap();
        let svc = service(config(&temp), Arc::new(FakeTool::new(1)), Arc::new(NoopHistory)).await;

        let err = svc.fetch(FetchRequest::default()).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        let err = svc.fetch(request("not a url")).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
        let err = svc.fetch(request("ftp://youtube.com/a")).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_disallowed_host_has_no_side_effects() {
        let temp = TempDir::new().unwrap();
        let tool = Arc::new(FakeTool::new(1));
        let svc = service(config(&temp), tool.clone(), Arc::new(NoopHistory)).await;

        let err = svc.fetch(request("https://evil.example/video")).await.unwrap_err();
        assert!(matches!(err, FetchError::DomainNotAllowed { ref host } if host == "evil.example"));
        assert_eq!(svc.health().tracked_clients, 0);
        assert_eq!(svc.gate().active(), 0);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_denies_after_max_requests() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(&temp);
        cfg.rate_limit_max_requests = 2;
        let svc = service(cfg, Arc::new(FakeTool::new(10)), Arc::new(NoopHistory)).await;

        for _ in 0..2 {
            let response = svc.fetch(request("https://youtu.be/abc")).await.unwrap();
            drain(response.body).await;
        }
        let err = svc.fetch(request("https://youtu.be/abc")).await.unwrap_err();
        match err {
            FetchError::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_artifact_is_rejected_and_deleted() {
        let temp = TempDir::new().unwrap();
        let svc = service(config(&temp), Arc::new(FakeTool::new(20_000)), Arc::new(NoopHistory)).await;

        let err = svc.fetch(request("https://youtu.be/big")).await.unwrap_err();
        assert!(matches!(err, FetchError::ArtifactTooLarge { size_bytes: 20_000, .. }));
        assert_eq!(svc.gate().active(), 0);
        assert_eq!(std::fs::read_dir(temp.path().join("work")).unwrap().count(), 0);
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn test_large_but_allowed_artifact_is_not_cached() {
        let temp = TempDir::new().unwrap();
        let svc = service(config(&temp), Arc::new(FakeTool::new(5_000)), Arc::new(NoopHistory)).await;

        let response = svc.fetch(request("https://youtu.be/mid")).await.unwrap();
        assert_eq!(drain(response.body).await.len(), 5_000);
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn test_format_fallback_runs_once() {
        let temp = TempDir::new().unwrap();
        let mut tool = FakeTool::new(10);
        tool.fail_preferred = true;
        let tool = Arc::new(tool);
        let svc = service(config(&temp), tool.clone(), Arc::new(NoopHistory)).await;

        let response = svc.fetch(request("https://youtu.be/abc")).await.unwrap();
        drain(response.body).await;
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_busy_when_all_slots_held() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(&temp);
        cfg.max_concurrent = 1;
        let svc = service(cfg, Arc::new(FakeTool::new(10)), Arc::new(NoopHistory)).await;

        let held = svc.fetch(request("https://youtu.be/one")).await.unwrap();
        let err = svc.fetch(request("https://youtu.be/two")).await.unwrap_err();
        assert!(matches!(err, FetchError::Busy { active: 1, max_concurrent: 1 }));
        assert_eq!(err.retry_after_secs(), Some(5));

        drop(held);
        assert_eq!(svc.gate().active(), 0);
    }

    #[tokio::test]
    async fn test_history_recorded_only_with_identity() {
        let temp = TempDir::new().unwrap();
        let history = Arc::new(RecordingHistory::default());
        let svc = service(config(&temp), Arc::new(FakeTool::new(10)), history.clone()).await;

        let anonymous = svc.fetch(request("https://vimeo.com/1")).await.unwrap();
        drain(anonymous.body).await;

        let mut named = request("https://vimeo.com/2");
        named.identity = Some("user-7".to_string());
        let response = svc.fetch(named).await.unwrap();
        drain(response.body).await;

        // Recording happens on a spawned task.
        for _ in 0..50 {
            if !history.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let records = history.0.lock().unwrap().clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].client_identity, "user-7");
        assert_eq!(records[0].platform, "vimeo");
        assert_eq!(records[0].filename, "Great Clip.mp4");
        assert_eq!(records[0].file_size, 10);
        assert_eq!(records[0].source, DeliverySource::Extraction);
    }

    #[tokio::test]
    async fn test_prepare_clears_stale_work_files() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        std::fs::create_dir_all(&cfg.work_dir).unwrap();
        std::fs::write(cfg.work_dir.join("old.mp4.part"), b"x").unwrap();

        let _svc = service(cfg.clone(), Arc::new(FakeTool::new(1)), Arc::new(NoopHistory)).await;
        assert!(!cfg.work_dir.join("old.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_maintenance_reports_sweeps() {
        let temp = TempDir::new().unwrap();
        let svc = service(config(&temp), Arc::new(FakeTool::new(1)), Arc::new(NoopHistory)).await;
        std::fs::write(temp.path().join("cache").join("stray.mp4"), b"x").unwrap();

        let report = svc.run_maintenance().await;
        assert_eq!(report.orphaned_files, 1);
        assert_eq!(report.cache_entries, 0);
    }
}
