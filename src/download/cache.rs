//! Bounded, TTL-based cache of finished download artifacts.
//!
//! The [`ResultCache`] maps a cache key (see [`cache_key`](super::cache_key))
//! to a durable copy of an artifact in the cache directory. The copy belongs
//! to the cache, so request-level cleanup of the original never affects it.
//!
//! # Lookup
//!
//! An entry is served only when it has not expired *and* its file still
//! exists. Either failure counts as a miss and the entry is dropped.
//!
//! # Eviction
//!
//! Capacity is a maximum entry count. When an insert pushes the cache over
//! capacity, expired entries go first, then the oldest insertions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Default entry lifetime (1 hour).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default background sweep interval (10 minutes).
pub const DEFAULT_CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Default maximum entry count.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 50;

/// Default cache-eligible size threshold (50 MiB).
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Suffix for copies that are still being written.
const PARTIAL_SUFFIX: &str = ".partial";

/// Errors from cache insertion.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The artifact is at or above the cache-eligible threshold.
    #[error("artifact of {size_bytes} bytes is not cache-eligible (limit {max_bytes})")]
    NotEligible {
        /// Artifact size.
        size_bytes: u64,
        /// Exclusive upper bound for cacheable artifacts.
        max_bytes: u64,
    },

    /// Copying the artifact into the cache directory failed.
    #[error("IO error caching {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Cache sizing and lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Directory holding the cache's own artifact copies.
    pub dir: PathBuf,
    /// Lifetime of an entry after insertion.
    pub ttl: Duration,
    /// How often the background task sweeps expired entries.
    pub sweep_interval: Duration,
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Artifacts must be strictly smaller than this to be cached.
    pub max_cacheable_bytes: u64,
}

impl CacheSettings {
    /// Default settings rooted at `dir`.
    #[must_use]
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: DEFAULT_CACHE_TTL,
            sweep_interval: DEFAULT_CACHE_SWEEP_INTERVAL,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            max_cacheable_bytes: DEFAULT_CACHE_MAX_BYTES,
        }
    }
}

/// Descriptive fields stored alongside a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
    /// Sanitized attachment name.
    pub display_name: String,
    /// Media type for the `Content-Type` header.
    pub media_type: String,
    /// Artifact size in bytes.
    pub size_bytes: u64,
}

/// A cached artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cache key (hash of the normalized source URL).
    pub key: String,
    /// The cache-owned copy of the artifact.
    pub artifact_path: PathBuf,
    /// Sanitized attachment name.
    pub display_name: String,
    /// Media type.
    pub media_type: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Entries at or past this instant are misses.
    pub expires_at: Instant,
    /// Monotonic insertion order, used for capacity eviction.
    inserted_seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Key → artifact cache with TTL and capacity bounds.
///
/// Designed to be shared behind an `Arc`. Each key's read-modify-write goes
/// through its `DashMap` entry; no `DashMap` guard is held across an await.
#[derive(Debug)]
pub struct ResultCache {
    settings: CacheSettings,
    entries: DashMap<String, CacheEntry>,
    next_seq: AtomicU64,
}

impl ResultCache {
    /// Creates an empty cache. The directory is created lazily on insert.
    #[must_use]
    #[instrument(skip_all, fields(dir = %settings.dir.display(), max_entries = settings.max_entries))]
    pub fn new(settings: CacheSettings) -> Self {
        debug!("creating result cache");
        Self {
            settings,
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Returns the cache settings.
    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Returns the number of entries currently indexed (expired ones included
    /// until they are swept or looked up).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no entries are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an artifact of `size_bytes` may be cached.
    #[must_use]
    pub fn is_eligible(&self, size_bytes: u64) -> bool {
        size_bytes < self.settings.max_cacheable_bytes
    }

    /// Looks up `key`, returning the entry only if it is live and its file
    /// still exists. Stale entries are purged.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key).map(|e| e.value().clone())?;

        if entry.is_expired(Instant::now()) {
            debug!("cache entry expired");
            self.purge(&entry).await;
            return None;
        }

        if !tokio::fs::try_exists(&entry.artifact_path)
            .await
            .unwrap_or(false)
        {
            warn!(path = %entry.artifact_path.display(), "cached artifact missing, dropping entry");
            self.entries
                .remove_if(key, |_, current| current.inserted_seq == entry.inserted_seq);
            return None;
        }

        debug!(size_bytes = entry.size_bytes, "cache hit");
        Some(entry)
    }

    /// Copies `artifact` into the cache under `key`.
    ///
    /// Replaces any existing entry for `key` and evicts as needed to stay
    /// within `max_entries`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotEligible`] when the artifact is too large and
    /// [`CacheError::Io`] when the copy fails. The index is unchanged on error.
    #[instrument(skip(self, artifact, meta), fields(size_bytes = meta.size_bytes))]
    pub async fn put(
        &self,
        key: &str,
        artifact: &Path,
        meta: ArtifactMeta,
    ) -> Result<CacheEntry, CacheError> {
        if !self.is_eligible(meta.size_bytes) {
            return Err(CacheError::NotEligible {
                size_bytes: meta.size_bytes,
                max_bytes: self.settings.max_cacheable_bytes,
            });
        }

        let dir = &self.settings.dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| CacheError::Io {
                path: dir.clone(),
                source,
            })?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let file_name = match artifact.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{key}-{seq}.{ext}"),
            None => format!("{key}-{seq}"),
        };
        let final_path = dir.join(&file_name);
        let partial_path = dir.join(format!("{file_name}{PARTIAL_SUFFIX}"));

        // Copy then rename so readers never see a half-written file.
        if let Err(source) = tokio::fs::copy(artifact, &partial_path).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(CacheError::Io {
                path: partial_path,
                source,
            });
        }
        if let Err(source) = tokio::fs::rename(&partial_path, &final_path).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(CacheError::Io {
                path: final_path,
                source,
            });
        }

        let entry = CacheEntry {
            key: key.to_string(),
            artifact_path: final_path,
            display_name: meta.display_name,
            media_type: meta.media_type,
            size_bytes: meta.size_bytes,
            expires_at: Instant::now() + self.settings.ttl,
            inserted_seq: seq,
        };

        if let Some(previous) = self.entries.insert(key.to_string(), entry.clone()) {
            remove_artifact(&previous.artifact_path).await;
        }
        debug!(path = %entry.artifact_path.display(), "artifact cached");

        self.enforce_capacity().await;
        Ok(entry)
    }

    /// Removes every expired entry and its file. Returns how many went.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<CacheEntry> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.value().clone())
            .collect();

        let mut removed = 0;
        for entry in &expired {
            if self.purge(entry).await {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "swept expired cache entries");
        }
        removed
    }

    /// Deletes files in the cache directory that no entry points at, such as
    /// copies left behind by a previous process.
    #[instrument(skip(self))]
    pub async fn remove_orphans(&self) -> usize {
        let Ok(mut dir) = tokio::fs::read_dir(&self.settings.dir).await else {
            return 0;
        };

        let mut removed = 0;
        while let Ok(Some(file)) = dir.next_entry().await {
            let path = file.path();
            // In-flight copies belong to a concurrent put.
            if path.to_string_lossy().ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            let indexed = self.entries.iter().any(|e| e.artifact_path == path);
            if !indexed && file.file_type().await.is_ok_and(|t| t.is_file()) {
                remove_artifact(&path).await;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "removed orphaned cache files");
        }
        removed
    }

    async fn enforce_capacity(&self) {
        if self.entries.len() <= self.settings.max_entries {
            return;
        }

        self.sweep().await;

        while self.entries.len() > self.settings.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.inserted_seq)
                .map(|e| e.value().clone());
            let Some(oldest) = oldest else {
                break;
            };
            debug!(key = %oldest.key, "evicting oldest cache entry");
            self.purge(&oldest).await;
        }
    }

    /// Removes `entry` from the index if it is still the current value for
    /// its key, then deletes its file.
    async fn purge(&self, entry: &CacheEntry) -> bool {
        let removed = self
            .entries
            .remove_if(&entry.key, |_, current| current.inserted_seq == entry.inserted_seq)
            .is_some();
        if removed {
            remove_artifact(&entry.artifact_path).await;
        }
        removed
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to delete cached artifact"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn settings(dir: &Path) -> CacheSettings {
        CacheSettings {
            dir: dir.join("cache"),
            ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            max_entries: 3,
            max_cacheable_bytes: 1024,
        }
    }

    fn meta(size_bytes: u64) -> ArtifactMeta {
        ArtifactMeta {
            display_name: "clip.mp4".to_string(),
            media_type: "video/mp4".to_string(),
            size_bytes,
        }
    }

    async fn write_artifact(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_put_then_get_returns_identical_copy() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(settings(temp.path()));
        let content = b"media bytes";
        let original = write_artifact(temp.path(), "req.mp4", content).await;

        let stored = cache.put("k1", &original, meta(11)).await.unwrap();
        let fetched = cache.get("k1").await.unwrap();

        assert_eq!(stored, fetched);
        assert_eq!(fetched.display_name, "clip.mp4");
        assert_eq!(fetched.media_type, "video/mp4");
        assert_eq!(fetched.size_bytes, 11);
        assert_ne!(fetched.artifact_path, original);
        assert_eq!(tokio::fs::read(&fetched.artifact_path).await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_cached_copy_survives_original_removal() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(settings(temp.path()));
        let original = write_artifact(temp.path(), "req.mp4", b"abc").await;

        cache.put("k1", &original, meta(3)).await.unwrap();
        tokio::fs::remove_file(&original).await.unwrap();

        let fetched = cache.get("k1").await.unwrap();
        assert_eq!(tokio::fs::read(&fetched.artifact_path).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_get_missing_artifact_is_purged_miss() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(settings(temp.path()));
        let original = write_artifact(temp.path(), "req.mp4", b"abc").await;

        let stored = cache.put("k1", &original, meta(3)).await.unwrap();
        tokio::fs::remove_file(&stored.artifact_path).await.unwrap();

        assert!(cache.get("k1").await.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_get_expired_entry_is_miss_and_deleted() {
        let temp = TempDir::new().unwrap();
        let mut s = settings(temp.path());
        s.ttl = Duration::from_millis(30);
        let cache = ResultCache::new(s);
        let original = write_artifact(temp.path(), "req.mp4", b"abc").await;

        let stored = cache.put("k1", &original, meta(3)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.get("k1").await.is_none());
        assert!(cache.is_empty());
        assert!(!stored.artifact_path.exists());
    }

    #[tokio::test]
    async fn test_put_rejects_ineligible_size() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(settings(temp.path()));
        let original = write_artifact(temp.path(), "req.mp4", b"abc").await;

        let result = cache.put("k1", &original, meta(1024)).await;
        assert!(matches!(result, Err(CacheError::NotEligible { .. })));
        assert!(cache.is_empty());
        assert!(cache.is_eligible(1023));
        assert!(!cache.is_eligible(1024));
    }

    #[tokio::test]
    async fn test_put_missing_source_is_io_error() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(settings(temp.path()));

        let result = cache
            .put("k1", &temp.path().join("nope.mp4"), meta(3))
            .await;
        assert!(matches!(result, Err(CacheError::Io { .. })));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_put_replaces_existing_key_and_deletes_old_copy() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(settings(temp.path()));
        let a = write_artifact(temp.path(), "a.mp4", b"first").await;
        let b = write_artifact(temp.path(), "b.mp4", b"second").await;

        let first = cache.put("k1", &a, meta(5)).await.unwrap();
        let second = cache.put("k1", &b, meta(6)).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert!(!first.artifact_path.exists());
        let fetched = cache.get("k1").await.unwrap();
        assert_eq!(fetched.artifact_path, second.artifact_path);
        assert_eq!(tokio::fs::read(&fetched.artifact_path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_insertion() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(settings(temp.path()));
        let src = write_artifact(temp.path(), "src.mp4", b"x").await;

        for key in ["k1", "k2", "k3", "k4"] {
            cache.put(key, &src, meta(1)).await.unwrap();
        }

        assert_eq!(cache.len(), 3);
        assert!(cache.get("k1").await.is_none());
        for key in ["k2", "k3", "k4"] {
            assert!(cache.get(key).await.is_some(), "{key} should remain");
        }
    }

    #[tokio::test]
    async fn test_capacity_prefers_evicting_expired_entries() {
        let temp = TempDir::new().unwrap();
        let mut s = settings(temp.path());
        s.max_entries = 2;
        s.ttl = Duration::from_millis(300);
        let cache = ResultCache::new(s);
        let src = write_artifact(temp.path(), "src.mp4", b"x").await;

        cache.put("old", &src, meta(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        cache.put("k2", &src, meta(1)).await.unwrap();
        cache.put("k3", &src, meta(1)).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.entries.contains_key("old"));
        assert!(cache.entries.contains_key("k2"));
        assert!(cache.entries.contains_key("k3"));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let temp = TempDir::new().unwrap();
        let mut s = settings(temp.path());
        s.ttl = Duration::from_millis(40);
        let cache = ResultCache::new(s);
        let src = write_artifact(temp.path(), "src.mp4", b"x").await;

        let old = cache.put("old", &src, meta(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.put("fresh", &src, meta(1)).await.unwrap();

        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len(), 1);
        assert!(!old.artifact_path.exists());
    }

    #[tokio::test]
    async fn test_remove_orphans_deletes_unindexed_files() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(settings(temp.path()));
        let src = write_artifact(temp.path(), "src.mp4", b"x").await;
        let kept = cache.put("k1", &src, meta(1)).await.unwrap();

        let orphan = cache.settings().dir.join("leftover.mp4");
        tokio::fs::write(&orphan, b"old").await.unwrap();
        let in_flight = cache.settings().dir.join("k2-9.mp4.partial");
        tokio::fs::write(&in_flight, b"new").await.unwrap();

        assert_eq!(cache.remove_orphans().await, 1);
        assert!(!orphan.exists());
        assert!(in_flight.exists());
        assert!(kept.artifact_path.exists());
    }
}
