//! Fixed-window rate limiting primitives.
//!
//! Flow Overview:
//! 1) Every request increments the counter for its key; the increment and the
//!    read are one atomic store operation.
//! 2) The first increment of a key opens a window and stamps `reset_at`.
//! 3) Once `reset_at` passes, the next increment opens a fresh window.
//!
//! Policy (window length, budget) belongs to the caller; the store only
//! counts. Scaling: swap [`MemoryCounterStore`] for a shared backend (Redis
//! `INCR`/`PEXPIRE`) behind the same [`CounterStore`] trait to synchronize
//! limits across service instances.

use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Ceiling on window length. Anything longer is counted as one year, which
/// keeps `reset_at` inside the range chrono can represent.
const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The backing counter store could not serve the request.
///
/// This is deliberately the only error a limiter can surface: callers decide
/// policy. The breach proxy treats it as "allowed" (fail open); an auth flow
/// would treat it as "limited" (fail closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Rate limit counter store unavailable")]
pub struct StoreUnavailable;

/// Counter state for one key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests observed in the window so far, this one included.
    pub count: u64,
    /// When the window expires and the counter restarts from zero.
    pub reset_at: DateTime<Utc>,
}

/// Atomic increment-and-read over a shared counter backend.
///
/// The single primitive keeps implementations honest: because the increment
/// and the read happen under the same key, two concurrent requests can never
/// both observe the last free slot of a window.
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, opening a fresh window of `window`
    /// length when none is active, and return the updated state.
    ///
    /// # Errors
    /// Returns [`StoreUnavailable`] when the backend cannot be reached.
    fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreUnavailable>;

    /// Liveness probe for health reporting.
    ///
    /// # Errors
    /// Returns [`StoreUnavailable`] when the backend cannot be reached.
    fn ping(&self) -> Result<(), StoreUnavailable>;
}

/// In-memory counter store: a mutex-guarded map of open windows.
///
/// Good for a single instance; counters are lost on restart, which for rate
/// limiting only means a briefly refreshed budget.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, WindowCount>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreUnavailable> {
        let now = Utc::now();

        // A poisoned lock means a writer panicked mid-update; report the
        // store as gone instead of guessing at its contents.
        let mut windows = self.windows.lock().map_err(|_| StoreUnavailable)?;

        // Expired windows are dropped lazily, on the next write.
        windows.retain(|_, entry| entry.reset_at > now);

        // Clamp before the date math; an absurd window would push `reset_at`
        // past what chrono can represent and panic on the addition.
        let window_ms =
            i64::try_from(window.min(MAX_WINDOW).as_millis()).unwrap_or(i64::MAX);
        let entry = windows.entry(key.to_string()).or_insert_with(|| WindowCount {
            count: 0,
            reset_at: now + chrono::Duration::milliseconds(window_ms),
        });
        entry.count = entry.count.saturating_add(1);

        Ok(*entry)
    }

    fn ping(&self) -> Result<(), StoreUnavailable> {
        self.windows.lock().map(|_| ()).map_err(|_| StoreUnavailable)
    }
}

/// Outcome of counting one request against a key's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request fits the budget for the current window.
    pub allowed: bool,
    /// When the window expires; denied callers may retry after this.
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up, never negative.
    /// This is the value a `Retry-After` header should carry.
    #[must_use]
    pub fn retry_after_seconds(&self) -> u64 {
        let remaining_ms = (self.reset_at - Utc::now()).num_milliseconds();
        if remaining_ms <= 0 {
            return 0;
        }
        u64::try_from((remaining_ms + 999) / 1000).unwrap_or(0)
    }
}

/// Fixed-window gate over a [`CounterStore`].
///
/// `check` counts first and compares second, so denied requests still burn
/// budget. The number of allowed requests per key and window never exceeds
/// `max` no matter how the calls interleave.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Count one request against `key` and decide whether it is admitted
    /// under a budget of `max` requests per `window`.
    ///
    /// # Errors
    /// Propagates [`StoreUnavailable`] from the store; the request was not
    /// counted and the caller picks its own failure policy.
    pub fn check(
        &self,
        key: &str,
        window: Duration,
        max: u64,
    ) -> Result<RateLimitDecision, StoreUnavailable> {
        let counted = self.store.increment(key, window)?;

        Ok(RateLimitDecision {
            allowed: counted.count <= max,
            reset_at: counted.reset_at,
        })
    }
}
