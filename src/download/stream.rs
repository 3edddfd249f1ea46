//! Response body streaming with exactly-once cleanup.
//!
//! A request that went through extraction owns a gate [`Slot`] and some files
//! in the work directory. [`Cleanup`] gives both back; it runs on the first
//! call to [`Cleanup::run`] or when dropped, and never again after that.
//!
//! [`ArtifactStream`] reads an artifact in chunks and fires its cleanup when
//! the last chunk has been read, when reading fails, or when the body is
//! dropped early (the client went away).

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::gate::Slot;

/// One-shot release of a request's slot and temporary files.
#[derive(Debug)]
pub struct Cleanup {
    done: AtomicBool,
    slot: Option<Slot>,
    work_dir: Option<PathBuf>,
    prefix: String,
}

impl Cleanup {
    /// Cleanup for an extraction request: releases `slot` and deletes every
    /// file in `work_dir` whose name starts with `prefix`.
    #[must_use]
    pub fn new(slot: Slot, work_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            done: AtomicBool::new(false),
            slot: Some(slot),
            work_dir: Some(work_dir.into()),
            prefix: prefix.into(),
        }
    }

    /// Cleanup that owns nothing, for bodies served straight from the cache.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            done: AtomicBool::new(false),
            slot: None,
            work_dir: None,
            prefix: String::new(),
        }
    }

    /// Returns true once cleanup has run.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Releases the slot and removes the request's files. Only the first
    /// call does anything.
    pub fn run(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(dir) = &self.work_dir {
            let removed = remove_prefixed(dir, &self.prefix);
            debug!(prefix = %self.prefix, removed, "request files removed");
        }
        if let Some(slot) = &self.slot {
            slot.release();
        }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        self.run();
    }
}

/// Deletes files in `dir` starting with `prefix`, including partial ones.
/// Runs synchronously so it can be called from `Drop`.
fn remove_prefixed(dir: &Path, prefix: &str) -> usize {
    if prefix.is_empty() {
        return 0;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot scan work directory");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        if !matches {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove request file"),
        }
    }
    removed
}

/// Chunked file body that runs its [`Cleanup`] when it ends or is dropped.
#[derive(Debug)]
pub struct ArtifactStream {
    reader: Option<ReaderStream<File>>,
    cleanup: Cleanup,
}

impl ArtifactStream {
    /// Opens `path` for streaming. If opening fails, `cleanup` runs before
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the IO error from opening the file.
    pub async fn open(path: &Path, cleanup: Cleanup) -> std::io::Result<Self> {
        match File::open(path).await {
            Ok(file) => Ok(Self {
                reader: Some(ReaderStream::new(file)),
                cleanup,
            }),
            Err(e) => {
                cleanup.run();
                Err(e)
            }
        }
    }

    /// Returns true once the stream has finished and cleaned up.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cleanup.is_done()
    }

    fn finish(&mut self) {
        // Close the file handle before deleting it.
        self.reader = None;
        self.cleanup.run();
    }
}

impl Stream for ArtifactStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(reader) = this.reader.as_mut() else {
            return Poll::Ready(None);
        };

        match Pin::new(reader).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                warn!(error = %e, "artifact read failed mid-stream");
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ArtifactStream {
    fn drop(&mut self) {
        if !self.cleanup.is_done() {
            debug!("body dropped before completion");
        }
        self.finish();
    }
}
