//! Timeout policy for bounding async operation duration.
//!
//! - Wraps an async operation and returns `PolicyError::Timeout` when the
//!   deadline elapses; [`TimeoutPolicy::execute_or_else`] runs an async
//!   fallback instead and returns its value.
//! - Uses `tokio::time::timeout`; on expiry the inner future is dropped, so
//!   cancellation-unsafe work may leave partial state behind.
//! - `elapsed` is measured from just before the operation is invoked and can
//!   slightly exceed the configured duration due to scheduling overhead.

use crate::PolicyError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Maximum allowed timeout (30 days). Guards accidental `u64::MAX`-style
/// configs; use [`TimeoutPolicy::new_with_max`] for longer horizons.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Errors returned when configuring timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    /// Duration must be greater than zero.
    ZeroDuration,
    /// Duration exceeded the configured maximum.
    ExceedsMaximum { requested: Duration, limit: Duration },
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutError::ZeroDuration => write!(f, "timeout duration must be > 0"),
            TimeoutError::ExceedsMaximum { requested, limit } => write!(
                f,
                "timeout duration {:?} exceeds maximum allowed {:?}",
                requested, limit
            ),
        }
    }
}

impl std::error::Error for TimeoutError {}

/// Policy that enforces a deadline on async operations.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Creates a timeout policy with the specified duration.
    ///
    /// # Errors
    ///
    /// [`TimeoutError::ZeroDuration`] for a zero duration,
    /// [`TimeoutError::ExceedsMaximum`] beyond [`MAX_TIMEOUT`].
    #[must_use = "the result must be checked for validation errors"]
    pub fn new(duration: Duration) -> Result<Self, TimeoutError> {
        Self::new_with_max(duration, MAX_TIMEOUT)
    }

    /// Construct with a caller-specified maximum allowed timeout.
    pub fn new_with_max(duration: Duration, max: Duration) -> Result<Self, TimeoutError> {
        if duration.is_zero() {
            return Err(TimeoutError::ZeroDuration);
        }
        if duration > max {
            return Err(TimeoutError::ExceedsMaximum { requested: duration, limit: max });
        }
        Ok(Self { duration })
    }

    #[must_use]
    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Execute an operation under the deadline.
    ///
    /// Returns `Ok(T)` when the operation finishes in time and
    /// `Err(PolicyError::Timeout { elapsed, timeout })` when the deadline
    /// elapses; operation errors pass through untouched.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, PolicyError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed = start.elapsed();
                tracing::debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    limit_ms = self.duration.as_millis() as u64,
                    "operation exceeded deadline"
                );
                Err(PolicyError::Timeout { elapsed, timeout: self.duration })
            }
        }
    }

    /// Execute an operation under the deadline; on expiry run `fallback`
    /// instead and return its value. The fallback may itself suspend and its
    /// result is awaited.
    pub async fn execute_or_else<T, E, Fut, Op, FbFut, Fb>(
        &self,
        operation: Op,
        fallback: Fb,
    ) -> Result<T, PolicyError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
        FbFut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Fb: FnOnce() -> FbFut + Send,
    {
        match self.execute(operation).await {
            Err(PolicyError::Timeout { elapsed, .. }) => {
                tracing::debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "deadline elapsed, running fallback"
                );
                fallback().await
            }
            other => other,
        }
    }
}
