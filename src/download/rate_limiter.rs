//! Per-client fixed-window rate limiting for incoming download requests.
//!
//! This module provides the [`RateLimiter`] struct which counts requests per
//! client identifier inside a fixed window anchored to the first request the
//! client made in that window.
//!
//! # Overview
//!
//! Each client gets an independent counter. Requests from different clients
//! never contend with each other except on the shard of the concurrent map
//! they happen to share.
//!
//! Because the window is anchored to its first request rather than sliding,
//! a client that bursts at the very end of one window and the very start of
//! the next can get up to `2 × max_requests` requests through in a short span.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mediagate_core::download::{RateDecision, RateLimiter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = RateLimiter::new(2, Duration::from_secs(60));
//!
//! assert!(limiter.check("10.0.0.1").is_allowed());
//! assert!(limiter.check("10.0.0.1").is_allowed());
//! assert!(matches!(limiter.check("10.0.0.1"), RateDecision::Denied { .. }));
//!
//! // A different client has its own window
//! assert!(limiter.check("10.0.0.2").is_allowed());
//! # }
//! ```

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request fits in the client's current window.
    Allowed,

    /// The client exhausted its window.
    Denied {
        /// Whole seconds until the current window ends (always >= 1).
        retry_after_secs: u64,
    },
}

impl RateDecision {
    /// Returns true for [`RateDecision::Allowed`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Counter state for one client inside its current window.
#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    /// Requests admitted in this window. Always >= 1 while the entry exists.
    count: u32,
    /// Time of the first request of this window.
    window_start: Instant,
}

/// Fixed-window request counter keyed by client identifier.
///
/// Designed to be shared behind an `Arc`. Each key's read-modify-write runs
/// while holding that key's `DashMap` entry, so concurrent checks for the same
/// client are serialized while different clients proceed independently.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: DashMap<String, ClientWindow>,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_requests` per `window` per client.
    ///
    /// A `max_requests` of zero is treated as one so that a fresh client can
    /// always make its first request.
    #[must_use]
    #[instrument(skip_all, fields(max_requests, window_ms = window.as_millis()))]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            max_requests: max_requests.max(1),
            window,
            clients: DashMap::new(),
        }
    }

    /// Returns the per-window request budget.
    #[must_use]
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Returns the window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns the number of clients currently holding a window entry.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Records a request from `client_key` and decides whether it is allowed.
    #[instrument(skip(self))]
    pub fn check(&self, client_key: &str) -> RateDecision {
        let now = Instant::now();

        let mut entry = self
            .clients
            .entry(client_key.to_string())
            .or_insert_with(|| ClientWindow {
                count: 0,
                window_start: now,
            });
        let window = entry.value_mut();

        let elapsed = now.saturating_duration_since(window.window_start);

        if window.count == 0 || elapsed > self.window {
            window.count = 1;
            window.window_start = now;
            debug!("new rate window");
            return RateDecision::Allowed;
        }

        if window.count < self.max_requests {
            window.count += 1;
            debug!(count = window.count, "request within window");
            return RateDecision::Allowed;
        }

        let remaining = self.window.saturating_sub(elapsed);
        let retry_after_secs = remaining.as_millis().div_ceil(1000).max(1);
        #[allow(clippy::cast_possible_truncation)]
        let retry_after_secs = retry_after_secs as u64;

        debug!(
            count = window.count,
            retry_after_secs, "rate limit exceeded"
        );
        RateDecision::Denied { retry_after_secs }
    }

    /// Drops windows that have already expired.
    ///
    /// Not needed for correctness (an expired window resets on the next
    /// check) but keeps idle clients from accumulating.
    #[instrument(skip(self))]
    pub fn sweep(&self) -> usize {
        let before = self.clients.len();
        let window = self.window;
        let now = Instant::now();
        self.clients
            .retain(|_, state| now.saturating_duration_since(state.window_start) <= window);
        let removed = before.saturating_sub(self.clients.len());
        if removed > 0 {
            debug!(removed, "swept idle rate windows");
        }
        removed
    }
}
