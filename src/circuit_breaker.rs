//! Circuit breaker: a failure-rate state machine guarding a callable.
//!
//! States
//! - **Closed**: calls flow; outcomes update the closed counters. On entry to
//!   each call the observed failure rate `failure / (success + failure)` is
//!   compared against the threshold; once it reaches it, the breaker trips
//!   to Open and the *current* call is rejected ("trip on the next request
//!   after the threshold is reached").
//! - **Open**: calls are rejected until the cooldown measured from
//!   `opened_at` elapses, then the breaker moves to Half-Open with zeroed
//!   probe counters and the current call is handled there.
//! - **Half-Open**: up to `probe_budget` probe calls flow. Once the budget is
//!   consumed, the probe failure rate decides: at or below the threshold the
//!   breaker closes (closed counters reset) and the call runs Closed;
//!   otherwise it re-opens with a fresh `opened_at` and the call is rejected.
//!
//! Decisions are linearizable per call: admission and outcome accounting each
//! take the breaker's single critical section, and a call admitted under a
//! state is accounted under that state's counters even if other callers move
//! the breaker meanwhile. The guarded operation itself runs outside the lock.
//!
//! The breaker never raises for the protected error; it returns it as
//! `PolicyError::Inner`. Only constructor misconfiguration errors.

use crate::{Clock, MonotonicClock, PolicyError};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Errors returned when configuring a breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakerConfigError {
    /// The failure threshold must satisfy `0 < t <= 1`.
    InvalidFailureThreshold(f64),
    /// The cooldown must be greater than zero.
    ZeroCooldown,
    /// The probe budget must be greater than zero.
    ZeroProbeBudget,
}

impl std::fmt::Display for BreakerConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerConfigError::InvalidFailureThreshold(t) => {
                write!(f, "failure threshold must be within (0, 1], got {}", t)
            }
            BreakerConfigError::ZeroCooldown => write!(f, "cooldown must be greater than zero"),
            BreakerConfigError::ZeroProbeBudget => {
                write!(f, "probe budget must be greater than zero")
            }
        }
    }
}

impl std::error::Error for BreakerConfigError {}

/// Point-in-time snapshot of the breaker's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub success: u64,
    pub failure: u64,
    pub half_open_success: u64,
    pub half_open_failure: u64,
    /// Closed-counter failure rate, rounded to four decimal places.
    pub failure_rate: f64,
    /// Monotonic millis at which the breaker last opened, if it is open.
    pub opened_at: Option<u64>,
}

struct Inner {
    state: CircuitState,
    opened_at: Option<u64>,
    success: u64,
    failure: u64,
    half_success: u64,
    half_failure: u64,
}

impl Inner {
    fn closed_failure_rate(&self) -> f64 {
        let total = self.success + self.failure;
        if total == 0 {
            return 0.0;
        }
        round4(self.failure as f64 / total as f64)
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Which counter set a call was admitted under.
#[derive(Clone, Copy)]
enum Track {
    Closed,
    HalfOpen,
}

struct Rejection {
    failure_rate: f64,
    retry_in: Duration,
}

/// Closed/Open/Half-Open circuit breaker keyed by a caller-chosen name.
pub struct CircuitBreaker {
    key: String,
    failure_threshold: f64,
    cooldown: Duration,
    probe_budget: u64,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("key", &self.key)
            .field("failure_threshold", &self.failure_threshold)
            .field("cooldown", &self.cooldown)
            .field("probe_budget", &self.probe_budget)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a breaker.
    ///
    /// # Errors
    ///
    /// Rejects a threshold outside `(0, 1]`, a zero cooldown, or a zero
    /// probe budget.
    pub fn new(
        key: impl Into<String>,
        failure_threshold: f64,
        cooldown: Duration,
        probe_budget: u64,
    ) -> Result<Self, BreakerConfigError> {
        if !(failure_threshold > 0.0 && failure_threshold <= 1.0) {
            return Err(BreakerConfigError::InvalidFailureThreshold(failure_threshold));
        }
        if cooldown.is_zero() {
            return Err(BreakerConfigError::ZeroCooldown);
        }
        if probe_budget == 0 {
            return Err(BreakerConfigError::ZeroProbeBudget);
        }
        Ok(Self {
            key: key.into(),
            failure_threshold,
            cooldown,
            probe_budget,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
                success: 0,
                failure: 0,
                half_success: 0,
                half_failure: 0,
            }),
            clock: Arc::new(MonotonicClock::default()),
        })
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Run `operation` under the breaker.
    ///
    /// Returns the operation's value, its error as `PolicyError::Inner`
    /// (counted against the admitting state), or
    /// `PolicyError::CircuitOpen` when the call is rejected.
    pub async fn run<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, PolicyError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let track = match self.admit() {
            Ok(track) => track,
            Err(rejection) => {
                return Err(PolicyError::CircuitOpen {
                    failure_rate: rejection.failure_rate,
                    retry_in: rejection.retry_in,
                })
            }
        };

        let result = operation().await;

        let mut inner = self.lock();
        match (track, result.is_ok()) {
            (Track::Closed, true) => inner.success += 1,
            (Track::Closed, false) => inner.failure += 1,
            (Track::HalfOpen, true) => inner.half_success += 1,
            (Track::HalfOpen, false) => inner.half_failure += 1,
        }
        result
    }

    /// Like [`run`](Self::run), but on any error awaits `fallback` with the
    /// error and returns its result instead.
    pub async fn run_or_else<T, E, Fut, Op, FbFut, Fb>(
        &self,
        operation: Op,
        fallback: Fb,
    ) -> Result<T, PolicyError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
        FbFut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Fb: FnOnce(PolicyError<E>) -> FbFut + Send,
    {
        match self.run(operation).await {
            Ok(value) => Ok(value),
            Err(err) => fallback(err).await,
        }
    }

    /// Return to Closed with all counters zeroed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.success = 0;
        inner.failure = 0;
        inner.half_success = 0;
        inner.half_failure = 0;
        tracing::info!(key = %self.key, "circuit breaker reset → closed");
    }

    /// Time remaining until an Open breaker will consider probing.
    /// Zero unless the breaker is Open. Pure computation, never blocks.
    pub fn time_until_half_open(&self) -> Duration {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                self.cooldown.saturating_sub(Duration::from_millis(elapsed))
            }
            _ => Duration::ZERO,
        }
    }

    /// Snapshot of state and counters.
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock();
        BreakerMetrics {
            state: inner.state,
            success: inner.success,
            failure: inner.failure,
            half_open_success: inner.half_success,
            half_open_failure: inner.half_failure,
            failure_rate: inner.closed_failure_rate(),
            opened_at: inner.opened_at,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decide the fate of one call under a single critical section.
    fn admit(&self) -> Result<Track, Rejection> {
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        loop {
            match inner.state {
                CircuitState::Closed => {
                    let rate = inner.closed_failure_rate();
                    if rate >= self.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(now);
                        tracing::warn!(
                            key = %self.key,
                            failure_rate = rate,
                            threshold = self.failure_threshold,
                            "circuit breaker → open"
                        );
                        return Err(Rejection { failure_rate: rate, retry_in: self.cooldown });
                    }
                    return Ok(Track::Closed);
                }
                CircuitState::Open => {
                    // Invariant: opened_at is set whenever state is Open.
                    let opened_at = inner.opened_at.unwrap_or(now);
                    let elapsed = Duration::from_millis(now.saturating_sub(opened_at));
                    if elapsed >= self.cooldown {
                        inner.state = CircuitState::HalfOpen;
                        inner.half_success = 0;
                        inner.half_failure = 0;
                        tracing::info!(key = %self.key, "circuit breaker → half-open");
                        continue;
                    }
                    return Err(Rejection {
                        failure_rate: inner.closed_failure_rate(),
                        retry_in: self.cooldown - elapsed,
                    });
                }
                CircuitState::HalfOpen => {
                    let probes = inner.half_success + inner.half_failure;
                    if probes < self.probe_budget {
                        return Ok(Track::HalfOpen);
                    }
                    let probe_rate = round4(inner.half_failure as f64 / probes as f64);
                    if probe_rate <= self.failure_threshold {
                        inner.state = CircuitState::Closed;
                        inner.opened_at = None;
                        inner.success = 0;
                        inner.failure = 0;
                        tracing::info!(
                            key = %self.key,
                            probe_failure_rate = probe_rate,
                            "circuit breaker → closed"
                        );
                        continue;
                    }
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    tracing::warn!(
                        key = %self.key,
                        probe_failure_rate = probe_rate,
                        "probe window failed, circuit breaker → open"
                    );
                    return Err(Rejection { failure_rate: probe_rate, retry_in: self.cooldown });
                }
            }
        }
    }
}
