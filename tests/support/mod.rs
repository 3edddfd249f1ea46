//! Shared fixtures for integration tests: a scripted extraction tool, a
//! recording history sink, and a socket guard for server tests.

#![allow(dead_code)]

use std::net::TcpListener;
use std::panic::Location;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mediagate_core::download::{
    ExtractionError, FormatStrategy, MediaTool, ToolInvocation, ToolOutput,
};
use mediagate_core::{
    DownloadService, HistoryError, HistoryRecord, HistorySink, ServiceConfig,
};
use tempfile::TempDir;

/// How a [`FakeTool`] behaves on each call.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Writes `size` bytes as `<prefix>.mp4`.
    Produce { size: usize },
    /// Rejects the preferred format, then produces on fallback.
    FallbackOnly { size: usize },
    /// Fails with a tool error carrying `message`.
    Fail { message: String },
    /// Sleeps before producing, to hold a slot.
    Slow { size: usize, delay: Duration },
    /// Leaves a partial download behind and never finishes.
    Hang,
}

/// An extraction tool that writes files without spawning anything.
#[derive(Debug)]
pub struct FakeTool {
    behavior: Behavior,
    calls: AtomicU32,
    strategies: Mutex<Vec<FormatStrategy>>,
}

impl FakeTool {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
            strategies: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn strategies(&self) -> Vec<FormatStrategy> {
        self.strategies.lock().unwrap().clone()
    }
}

async fn produce(inv: &ToolInvocation, size: usize) -> Result<ToolOutput, ExtractionError> {
    let path = inv.output_dir.join(format!("{}.mp4", inv.prefix));
    tokio::fs::write(&path, vec![b'm'; size])
        .await
        .map_err(|e| ExtractionError::io(&path, e))?;
    Ok(ToolOutput {
        title: Some("Sunset: Timelapse / 4K".to_string()),
    })
}

#[async_trait]
impl MediaTool for FakeTool {
    async fn fetch(&self, inv: &ToolInvocation) -> Result<ToolOutput, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.strategies.lock().unwrap().push(inv.strategy);
        match &self.behavior {
            Behavior::Produce { size } => produce(inv, *size).await,
            Behavior::FallbackOnly { size } => {
                if inv.strategy == FormatStrategy::Preferred {
                    Err(ExtractionError::FormatUnavailable {
                        message: "Requested format is not available".to_string(),
                    })
                } else {
                    produce(inv, *size).await
                }
            }
            Behavior::Fail { message } => Err(ExtractionError::ToolFailed {
                code: Some(1),
                message: message.clone(),
            }),
            Behavior::Slow { size, delay } => {
                tokio::time::sleep(*delay).await;
                produce(inv, *size).await
            }
            Behavior::Hang => {
                let partial = inv.output_dir.join(format!("{}.mp4.part", inv.prefix));
                tokio::fs::write(&partial, b"partial")
                    .await
                    .map_err(|e| ExtractionError::io(&partial, e))?;
                std::future::pending().await
            }
        }
    }
}

/// History sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct RecordingHistory(Mutex<Vec<HistoryRecord>>);

impl RecordingHistory {
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistorySink for RecordingHistory {
    async fn record(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        self.0.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Config rooted in `temp` with short waits and small size limits.
pub fn test_config(temp: &TempDir) -> ServiceConfig {
    ServiceConfig {
        work_dir: temp.path().join("work"),
        cache_dir: temp.path().join("cache"),
        cache_max_bytes: 4_096,
        max_artifact_bytes: 65_536,
        retry_base_delay: Duration::from_millis(1),
        admission_max_wait: Duration::from_millis(100),
        admission_poll_interval: Duration::from_millis(10),
        ..ServiceConfig::default()
    }
}

/// Builds and prepares a service.
pub async fn prepared_service(
    config: ServiceConfig,
    tool: Arc<FakeTool>,
    history: Arc<dyn HistorySink>,
) -> Arc<DownloadService> {
    let service = Arc::new(DownloadService::new(config, tool, history));
    service.prepare().await.unwrap();
    service
}

/// Number of regular files directly inside `dir`.
pub fn file_count(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .count()
        })
        .unwrap_or(0)
}

/// Polls `condition` for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[must_use]
pub fn socket_tests_required() -> bool {
    std::env::var("MEDIAGATE_REQUIRE_SOCKET_TESTS")
        .ok()
        .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

#[track_caller]
#[must_use]
pub fn should_skip_socket_bound_test() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }

    let location = Location::caller();
    let message = format!(
        "[socket-bound-test] cannot bind localhost socket at {}:{}",
        location.file(),
        location.line()
    );
    if socket_tests_required() {
        panic!("{message}. Set MEDIAGATE_REQUIRE_SOCKET_TESTS=0 to allow local skip behavior.");
    }

    eprintln!(
        "{message}. Skipping test. Set MEDIAGATE_REQUIRE_SOCKET_TESTS=1 to fail-fast instead."
    );
    true
}
