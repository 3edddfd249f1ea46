//! Download history sink.
//!
//! After a successful download the orchestrator hands a [`HistoryRecord`] to
//! a [`HistorySink`] in a background task. The sink never affects the
//! response: failures are logged and dropped.
//!
//! [`SqliteHistory`] persists records to the `download_history` table and
//! answers `GET /api/history` lookups. [`NoopHistory`] discards them and is
//! used when no database is configured.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::db::Database;

const DEFAULT_RECENT_LIMIT: i64 = 50;
const MAX_RECENT_LIMIT: i64 = 1_000;

/// Errors from the history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Query or connection failure.
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The record has a size that does not fit the storage column.
    #[error("file size {0} is out of range")]
    SizeOutOfRange(u64),
}

/// Whether the artifact came from the cache or a fresh extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    /// Served from the result cache.
    Cache,
    /// Extracted for this request.
    Extraction,
}

impl DeliverySource {
    /// Returns the storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "hit",
            Self::Extraction => "miss",
        }
    }
}

impl fmt::Display for DeliverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeliverySource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "hit" => Ok(Self::Cache),
            "miss" => Ok(Self::Extraction),
            _ => Err(format!("invalid delivery source: {value}")),
        }
    }
}

/// One successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Identity token supplied with the request.
    pub client_identity: String,
    /// Source URL as submitted.
    pub url: String,
    /// Media title, when known.
    pub title: Option<String>,
    /// Attachment filename sent to the client.
    pub filename: String,
    /// Platform label derived from the source host.
    pub platform: String,
    /// Artifact size in bytes.
    pub file_size: u64,
    /// Cache hit or fresh extraction.
    pub source: DeliverySource,
}

/// Read model for stored history rows.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Row id.
    pub id: i64,
    /// Identity token.
    pub client_identity: String,
    /// Source URL.
    pub url: String,
    /// Media title.
    pub title: Option<String>,
    /// Attachment filename.
    pub filename: String,
    /// Platform label.
    pub platform: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Stored delivery source text.
    #[sqlx(rename = "cache_status")]
    #[serde(rename = "cacheStatus")]
    pub cache_status_str: String,
    /// UTC timestamp (RFC 3339).
    pub downloaded_at: String,
}

impl HistoryEntry {
    /// Parsed delivery source; unknown values read as a fresh extraction.
    #[must_use]
    pub fn source(&self) -> DeliverySource {
        self.cache_status_str
            .parse()
            .unwrap_or(DeliverySource::Extraction)
    }
}

/// Receiver of successful-download notifications.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Stores one record.
    async fn record(&self, record: &HistoryRecord) -> Result<(), HistoryError>;

    /// Most recent records for `client_identity`, newest first.
    ///
    /// A `limit` of 0 uses the default; larger values are clamped. Sinks
    /// that keep nothing return an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the query fails.
    async fn recent(
        &self,
        _client_identity: &str,
        _limit: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(Vec::new())
    }
}

/// Sink that discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHistory;

#[async_trait]
impl HistorySink for NoopHistory {
    async fn record(&self, _record: &HistoryRecord) -> Result<(), HistoryError> {
        Ok(())
    }
}

/// SQLite-backed history.
#[derive(Debug, Clone)]
pub struct SqliteHistory {
    db: Database,
}

impl SqliteHistory {
    /// Wraps an opened database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HistorySink for SqliteHistory {
    #[instrument(skip(self, record), fields(platform = %record.platform, file_size = record.file_size))]
    async fn record(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let file_size = i64::try_from(record.file_size)
            .map_err(|_| HistoryError::SizeOutOfRange(record.file_size))?;

        let id = sqlx::query(
            r"INSERT INTO download_history
                (client_identity, url, title, filename, platform, file_size, cache_status)
              VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.client_identity)
        .bind(&record.url)
        .bind(record.title.as_deref())
        .bind(&record.filename)
        .bind(&record.platform)
        .bind(file_size)
        .bind(record.source.as_str())
        .execute(self.db.pool())
        .await?
        .last_insert_rowid();

        debug!(id, "history record stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn recent(
        &self,
        client_identity: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let rows = sqlx::query_as::<_, HistoryEntry>(
            r"SELECT id, client_identity, url, title, filename, platform, file_size,
                     cache_status, downloaded_at
              FROM download_history
              WHERE client_identity = ?
              ORDER BY id DESC
              LIMIT ?",
        )
        .bind(client_identity)
        .bind(normalize_limit(limit))
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}

fn normalize_limit(limit: usize) -> i64 {
    if limit == 0 {
        return DEFAULT_RECENT_LIMIT;
    }
    i64::try_from(limit).map_or(MAX_RECENT_LIMIT, |l| l.min(MAX_RECENT_LIMIT))
}
