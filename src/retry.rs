//! Retry policy: bounded re-attempts with optional exponential backoff.
//!
//! Semantics
//! - `attempts = N` means up to N re-attempts after the first invocation, so
//!   the operation runs at most N + 1 times; `attempts = 0` is a single try.
//! - Only operation errors accepted by the `should_retry` predicate are
//!   retried; anything else (including policy rejections from nested
//!   policies) propagates immediately with no sleep.
//! - The last attempt's error is surfaced verbatim, never wrapped.
//! - Delays come from the configured [`Backoff`]; jitter is off by default.

use crate::{Backoff, Jitter, PolicyError, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct RetryPolicy<E> {
    attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            attempts: self.attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter.clone(),
            should_retry: self.should_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Number of re-attempts after the first invocation.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Invoke `operation`, retrying matching failures until success or
    /// exhaustion.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, PolicyError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let mut attempt = 0usize;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(PolicyError::Inner(e)) => {
                    if !(self.should_retry)(&e) {
                        return Err(PolicyError::Inner(e));
                    }
                    if attempt == self.attempts {
                        return Err(PolicyError::Inner(e));
                    }
                    attempt += 1;
                    let delay = self.jitter.apply(self.backoff.delay(attempt));
                    tracing::debug!(
                        attempt,
                        remaining = self.attempts - attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "operation failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                // Timeouts, breaker rejections, and capacity rejections from
                // nested policies are not retried here.
                Err(other) => return Err(other),
            }
        }
    }
}

pub struct RetryPolicyBuilder<E> {
    attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::constant(Duration::from_millis(100)),
            jitter: Jitter::None,
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Re-attempts after the first invocation. Zero disables retrying.
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Restrict which operation errors are retried. Errors failing the
    /// predicate propagate immediately.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy<E> {
        RetryPolicy {
            attempts: self.attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
