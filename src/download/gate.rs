//! Bounded-slot admission control for extraction work.
//!
//! The [`ConcurrencyGate`] caps how many downloads may run extraction at the
//! same time. Callers that find every slot taken poll until one frees up or
//! until the admission wait ceiling passes, at which point they get
//! [`GateError::Busy`].
//!
//! Admitted callers hold a [`Slot`]. Releasing a slot is idempotent: the
//! first call (or the drop) gives the slot back, later calls do nothing.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mediagate_core::download::{ConcurrencyGate, GateSettings};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let gate = ConcurrencyGate::new(GateSettings {
//!     max_concurrent: 1,
//!     max_wait: Duration::from_millis(50),
//!     poll_interval: Duration::from_millis(10),
//! });
//!
//! let slot = gate.acquire().await.unwrap();
//! assert_eq!(gate.active(), 1);
//! assert!(gate.acquire().await.is_err());
//!
//! slot.release();
//! slot.release();
//! assert_eq!(gate.active(), 0);
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Default maximum concurrent extractions.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default admission wait ceiling (30 seconds).
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Default poll interval while waiting for a slot (500ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors returned by [`ConcurrencyGate::acquire`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum GateError {
    /// No slot freed up before the wait ceiling.
    #[error("server busy: {active} of {max_concurrent} download slots in use")]
    Busy {
        /// Slots in use when the wait gave up.
        active: usize,
        /// Configured slot count.
        max_concurrent: usize,
    },
}

/// Gate sizing and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    /// Number of slots (>= 1).
    pub max_concurrent: usize,
    /// Longest time `acquire` waits before reporting busy.
    pub max_wait: Duration,
    /// Sleep between slot checks while waiting.
    pub poll_interval: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_wait: DEFAULT_MAX_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Process-wide slot counter with timed admission.
#[derive(Debug)]
pub struct ConcurrencyGate {
    active: Arc<AtomicUsize>,
    settings: GateSettings,
}

impl ConcurrencyGate {
    /// Creates a gate with all slots free.
    #[must_use]
    pub fn new(settings: GateSettings) -> Self {
        let settings = GateSettings {
            max_concurrent: settings.max_concurrent.max(1),
            ..settings
        };
        debug!(
            max_concurrent = settings.max_concurrent,
            max_wait_ms = settings.max_wait.as_millis(),
            "creating concurrency gate"
        );
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            settings,
        }
    }

    /// Returns the number of slots currently held.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the configured slot count.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.settings.max_concurrent
    }

    /// Takes a slot if one is free, without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Slot> {
        let max = self.settings.max_concurrent;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()
            .map(|_| Slot {
                active: Arc::clone(&self.active),
                released: AtomicBool::new(false),
            })
    }

    /// Waits for a free slot, polling until `max_wait` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Busy`] when no slot frees up in time.
    #[instrument(skip(self), fields(max_concurrent = self.settings.max_concurrent))]
    pub async fn acquire(&self) -> Result<Slot, GateError> {
        let started = Instant::now();

        loop {
            if let Some(slot) = self.try_acquire() {
                debug!(
                    active = self.active(),
                    waited_ms = started.elapsed().as_millis(),
                    "slot acquired"
                );
                return Ok(slot);
            }

            let waited = started.elapsed();
            if waited >= self.settings.max_wait {
                let active = self.active();
                warn!(
                    active,
                    waited_ms = waited.as_millis(),
                    "gave up waiting for a download slot"
                );
                return Err(GateError::Busy {
                    active,
                    max_concurrent: self.settings.max_concurrent,
                });
            }

            let remaining = self.settings.max_wait - waited;
            tokio::time::sleep(self.settings.poll_interval.min(remaining)).await;
        }
    }
}

/// One admitted unit of gate capacity.
///
/// The slot is returned to the gate on the first [`Slot::release`] call or
/// when the value is dropped, whichever comes first.
#[derive(Debug)]
pub struct Slot {
    active: Arc<AtomicUsize>,
    released: AtomicBool,
}

impl Slot {
    /// Gives the slot back. Safe to call any number of times.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        // Never wraps below zero even if the counter was tampered with.
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });
        debug!(active = self.active.load(Ordering::SeqCst), "slot released");
    }

    /// Returns true once the slot has been given back.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.release();
    }
}
