//! Fixed-window rate limiter.
//!
//! Divides wall time into discrete windows of one [`Unit`] shared by every
//! key; each key may make `limit` requests per window. When the current time
//! falls outside the window, all counts reset and the window restarts at
//! now. The check runs in both directions, so a backwards clock jump cannot
//! pin a stale counter alive.

use crate::rate_limit::{KeyMetrics, RateLimitConfigError, Unit};
use crate::{Clock, MonotonicClock};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-key counter with a single window start shared across keys.
pub struct FixedWindowCounter {
    unit: Unit,
    limit: u32,
    window_ms: u64,
    start_window: AtomicU64,
    counts: DashMap<String, u32>,
    blacklist: DashSet<String>,
    metrics: DashMap<String, KeyMetrics>,
    allowed: AtomicU64,
    denied: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FixedWindowCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowCounter")
            .field("unit", &self.unit)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl FixedWindowCounter {
    /// Create a limiter allowing `limit` requests per key per `unit` window.
    ///
    /// # Errors
    ///
    /// [`RateLimitConfigError::ZeroLimit`] when `limit` is zero.
    pub fn new(unit: Unit, limit: u32) -> Result<Self, RateLimitConfigError> {
        if limit == 0 {
            return Err(RateLimitConfigError::ZeroLimit);
        }
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
        Ok(Self {
            unit,
            limit,
            window_ms: unit.as_millis(),
            start_window: AtomicU64::new(clock.wall_now_millis()),
            counts: DashMap::new(),
            blacklist: DashSet::new(),
            metrics: DashMap::new(),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            clock,
        })
    }

    /// Override the clock (deterministic tests). Restarts the window at the
    /// new clock's current wall time.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self.start_window.store(self.clock.wall_now_millis(), Ordering::Release);
        self
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn limit(&self) -> u32 {
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

    /// Decide admission for one request from `key`, updating metrics.
    pub fn allow(&self, key: &str) -> bool {
        if self.blacklist.contains(key) {
            self.account(key, false);
            tracing::debug!(key, "request denied: blacklisted");
            return false;
        }

        self.roll_window_if_stale();

        let mut count = self.counts.entry(key.to_string()).or_insert(0);
        if *count >= self.limit {
            drop(count);
            self.account(key, false);
            tracing::debug!(key, limit = self.limit, "request denied: window limit reached");
            return false;
        }
        *count += 1;
        drop(count);
        self.account(key, true);
        true
    }

    /// Requests `key` may still make in the current window, clamped at zero.
    /// Advances a stale window first; never counts a request.
    pub fn remaining(&self, key: &str) -> u32 {
        self.roll_window_if_stale();
        let used = self.counts.get(key).map(|c| *c).unwrap_or(0);
        self.limit.saturating_sub(used)
    }

    /// Milliseconds until the current window expires, clamped at zero.
    pub fn time_until_reset(&self) -> u64 {
        let window_end = self.start_window.load(Ordering::Acquire) + self.window_ms;
        window_end.saturating_sub(self.clock.wall_now_millis())
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

    /// Restart the window when now falls outside `[start, start + window]`.
    fn roll_window_if_stale(&self) {
        let now = self.clock.wall_now_millis();
        let start = self.start_window.load(Ordering::Acquire);
        if now < start || now > start + self.window_ms {
            // One resetter wins; losers observe the fresh window.
            if self
                .start_window
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.counts.clear();
                tracing::debug!(window_ms = self.window_ms, "fixed window rolled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[derive(Debug, Clone, Default)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new(start: u64) -> Self {
            Self { now: Arc::new(AtomicU64::new(start)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }

        fn rewind(&self, millis: u64) {
            self.now.fetch_sub(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }

        fn wall_now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn limiter(limit: u32) -> (FixedWindowCounter, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let limiter = FixedWindowCounter::new(Unit::Second, limit).unwrap().with_clock(clock.clone());
        (limiter, clock)
    }

    #[test]
    fn rejects_zero_limit() {
        assert_eq!(
            FixedWindowCounter::new(Unit::Minute, 0).unwrap_err(),
            RateLimitConfigError::ZeroLimit
        );
    }

    #[test]
    fn enforces_limit_within_window() {
        let (limiter, _) = limiter(3);
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        assert_eq!(limiter.allowed(), 3);
        assert_eq!(limiter.denied(), 1);
        assert_eq!(limiter.user_metrics("k"), KeyMetrics { allowed: 3, denied: 1 });
    }

    #[test]
    fn keys_count_independently() {
        let (limiter, _) = limiter(1);
        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert!(!limiter.allow("a"));
        assert!(!limiter.allow("b"));
    }

    #[test]
    fn counts_reset_after_window_elapses() {
        let (limiter, clock) = limiter(1);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        clock.advance(1_001);
        assert!(limiter.allow("k"));
        assert_eq!(limiter.remaining("k"), 0);
    }

    #[test]
    fn backwards_clock_jump_also_resets() {
        let (limiter, clock) = limiter(1);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        clock.rewind(5_000);
        assert!(limiter.allow("k"));
    }

    #[test]
    fn remaining_is_read_only_and_window_aware() {
        let (limiter, clock) = limiter(3);
        assert_eq!(limiter.remaining("k"), 3);
        limiter.allow("k");
        limiter.allow("k");
        assert_eq!(limiter.remaining("k"), 1);
        assert_eq!(limiter.remaining("k"), 1);

        clock.advance(2_000);
        assert_eq!(limiter.remaining("k"), 3);
    }

    #[test]
    fn time_until_reset_clamps_at_zero() {
        let (limiter, clock) = limiter(1);
        assert_eq!(limiter.time_until_reset(), 1_000);
        clock.advance(400);
        assert_eq!(limiter.time_until_reset(), 600);
        clock.advance(2_000);
        assert_eq!(limiter.time_until_reset(), 0);
    }

    #[test]
    fn blacklist_denies_and_accounts() {
        let (limiter, _) = limiter(5);
        limiter.add_to_blacklist("abuser");
        assert!(!limiter.allow("abuser"));
        assert!(!limiter.allow("abuser"));
        assert_eq!(limiter.user_metrics("abuser"), KeyMetrics { allowed: 0, denied: 2 });

        limiter.remove_from_blacklist("abuser");
        assert!(limiter.allow("abuser"));
        limiter.remove_from_blacklist("never-seen");
    }

    #[test]
    fn bad_actors_are_keys_with_more_denials_than_admissions() {
        let (limiter, _) = limiter(1);
        assert!(limiter.allow("good"));
        assert!(limiter.allow("bad"));
        assert!(!limiter.allow("bad"));
        assert!(!limiter.allow("bad"));

        let actors = limiter.bad_actors();
        assert_eq!(actors, vec!["bad".to_string()]);
    }
}
