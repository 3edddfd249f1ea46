//! Mediagate Core Library
//!
//! This library provides the core functionality for the mediagate service,
//! which accepts a media URL, fetches the media through an external
//! extraction tool, and streams the file back while protecting the host
//! from overload.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Service configuration and validation
//! - [`db`] - Database connection and schema management
//! - [`download`] - Rate limiting, admission control, caching, retries,
//!   extraction and the request orchestrator
//! - [`history`] - Download history sink
//! - [`server`] - HTTP routes

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod download;
pub mod history;
pub mod server;

// Re-export commonly used types
pub use config::{ConfigError, ServiceConfig};
pub use db::{Database, DbError};
pub use download::{
    DownloadService, ExtractionError, FetchError, FetchRequest, MediaTool, RateLimiter,
    RetryPolicy, YtDlpTool,
};
pub use history::{
    HistoryEntry, HistoryError, HistoryRecord, HistorySink, NoopHistory, SqliteHistory,
};
pub use server::{ServerHandle, router, serve};
