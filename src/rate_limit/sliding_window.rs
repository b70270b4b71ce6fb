//! Sliding-window rate limiter.
//!
//! Keeps a per-key ascending log of admission timestamps (epoch ms) and
//! decides on the count inside the rolling window `[now - window, now]`,
//! inclusive at the start, so a timestamp exactly `window` old still counts.
//!
//! Stale entries are pruned lazily, only on the over-limit path, with a
//! binary search for the boundary: amortized `O(log n + k)` where `k` is the
//! number of pruned entries. `remaining` never mutates state.

use crate::rate_limit::{KeyMetrics, RateLimitConfigError, Unit, MAX_WINDOW, MIN_WINDOW};
use crate::{Clock, MonotonicClock};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-key timestamp log with a rolling count.
pub struct SlidingWindow {
    unit: Unit,
    window: u64,
    limit: usize,
    window_ms: u64,
    log: DashMap<String, Vec<u64>>,
    blacklist: DashSet<String>,
    metrics: DashMap<String, KeyMetrics>,
    allowed: AtomicU64,
    denied: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SlidingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindow")
            .field("unit", &self.unit)
            .field("window", &self.window)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl SlidingWindow {
    /// Create a limiter allowing `limit` requests per key within a rolling
    /// window of `window` × `unit`.
    ///
    /// # Errors
    ///
    /// [`RateLimitConfigError::WindowOutOfRange`] outside
    /// `[MIN_WINDOW, MAX_WINDOW]`, [`RateLimitConfigError::ZeroLimit`] for a
    /// zero limit.
    pub fn new(unit: Unit, window: u64, limit: usize) -> Result<Self, RateLimitConfigError> {
        if !(MIN_WINDOW..=MAX_WINDOW).contains(&window) {
            return Err(RateLimitConfigError::WindowOutOfRange(window));
        }
        if limit == 0 {
            return Err(RateLimitConfigError::ZeroLimit);
        }
        Ok(Self {
            unit,
            window,
            limit,
            window_ms: window * unit.as_millis(),
            log: DashMap::new(),
            blacklist: DashSet::new(),
            metrics: DashMap::new(),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            clock: Arc::new(MonotonicClock::default()),
        })
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Total allowed requests across all keys since construction.
    pub fn allowed(&self) -> u64 {
        self.allowed.load(Ordering::Relaxed)
    }

    /// Total denied requests across all keys since construction.
    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }

    /// Per-key `[allowed, denied]` counters; zeroes for unseen keys.
    pub fn user_metrics(&self, key: &str) -> KeyMetrics {
        self.metrics.get(key).map(|m| *m).unwrap_or_default()
    }

    /// Deny all subsequent requests from `key` until removed.
    pub fn add_to_blacklist(&self, key: impl Into<String>) {
        self.blacklist.insert(key.into());
    }

    /// Re-admit `key`. Unknown keys are a no-op.
    pub fn remove_from_blacklist(&self, key: &str) {
        self.blacklist.remove(key);
    }

    /// Decide admission for one request from `key`.
    ///
    /// Blacklisted keys are denied outright without touching the metrics.
    /// Under the limit the timestamp is recorded immediately; at the limit
    /// out-of-window entries are pruned first and the count rechecked.
    pub fn allow(&self, key: &str) -> bool {
        if self.blacklist.contains(key) {
            tracing::debug!(key, "request denied: blacklisted");
            return false;
        }

        let now = self.clock.wall_now_millis();
        let mut log = self.log.entry(key.to_string()).or_default();

        if log.len() < self.limit {
            log.push(now);
            drop(log);
            self.account(key, true);
            return true;
        }

        // At the limit: prune entries strictly before the inclusive window
        // start, then recheck.
        let window_start = now.saturating_sub(self.window_ms);
        let boundary = log.partition_point(|&t| t < window_start);
        if boundary > 0 {
            log.drain(..boundary);
        }

        if log.len() < self.limit {
            log.push(now);
            drop(log);
            self.account(key, true);
            true
        } else {
            drop(log);
            self.account(key, false);
            tracing::debug!(key, limit = self.limit, "request denied: rolling window full");
            false
        }
    }

    /// Requests `key` may still make right now, clamped to `[0, limit]`.
    /// Read-only: neither prunes the log nor consults the blacklist.
    pub fn remaining(&self, key: &str) -> usize {
        let Some(log) = self.log.get(key) else {
            return self.limit;
        };
        let window_start = self.clock.wall_now_millis().saturating_sub(self.window_ms);
        let in_window = log.len() - log.partition_point(|&t| t < window_start);
        self.limit.saturating_sub(in_window)
    }

    /// Keys whose denied count exceeds their allowed count.
    pub fn bad_actors(&self) -> Vec<String> {
        self.metrics
            .iter()
            .filter(|entry| entry.denied > entry.allowed)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn account(&self, key: &str, allowed: bool) {
        let mut metrics = self.metrics.entry(key.to_string()).or_default();
        if allowed {
            metrics.allowed += 1;
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            metrics.denied += 1;
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }
}
