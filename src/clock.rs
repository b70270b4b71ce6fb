//! Clock abstractions used by the timed policies.
//!
//! Every component that compares times (circuit-breaker cooldowns, rate-limit
//! windows, latency accounting, task timestamps) reads the same injected
//! [`Clock`], so tests can drive time by hand.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
///
/// `now_millis` is monotonic and anchors cooldowns and latency measurements;
/// `wall_now_millis` is epoch wall time and stamps rate-limiter windows and
/// task completion records.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds elapsed since some fixed epoch; never goes backwards.
    fn now_millis(&self) -> u64;

    /// Milliseconds since the Unix epoch.
    fn wall_now_millis(&self) -> u64;
}

/// Monotonic readings backed by `Instant::now()`, wall readings by `SystemTime`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn wall_now_millis(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}
