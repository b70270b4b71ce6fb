//! Composition of retry, circuit breaking, and timeout into one call shape.
//!
//! The stack nests retry around the breaker around the timeout, so every
//! attempt gets its own deadline and the breaker sees each attempt as one
//! call: "bounded-retry call with per-attempt deadline".

use crate::{CircuitBreaker, PolicyError, RetryPolicy, TimeoutError, TimeoutPolicy};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Retry → circuit breaker → timeout, executed inside-out per attempt.
pub struct PolicyStack<E> {
    retry: RetryPolicy<E>,
    breaker: Option<Arc<CircuitBreaker>>,
    timeout: TimeoutPolicy,
}

impl<E> Clone for PolicyStack<E> {
    fn clone(&self) -> Self {
        Self {
            retry: self.retry.clone(),
            breaker: self.breaker.clone(),
            timeout: self.timeout,
        }
    }
}

impl<E> std::fmt::Debug for PolicyStack<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStack")
            .field("retry", &self.retry)
            .field("breaker", &self.breaker.as_ref().map(|b| b.key().to_string()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<E> PolicyStack<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn builder() -> PolicyStackBuilder<E> {
        PolicyStackBuilder::new()
    }

    /// Run `operation` through the stack. Each retry attempt runs under its
    /// own deadline and, when a breaker is configured, counts as one breaker
    /// call.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, PolicyError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let op_cell = Arc::new(Mutex::new(operation));

        self.retry
            .execute(|| {
                let op_cell = op_cell.clone();
                let timeout = self.timeout;
                let breaker = self.breaker.clone();
                async move {
                    match breaker {
                        Some(breaker) => {
                            breaker
                                .run(|| {
                                    let op_cell = op_cell.clone();
                                    async move {
                                        timeout
                                            .execute(|| {
                                                let mut op = op_cell
                                                    .lock()
                                                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                                                op()
                                            })
                                            .await
                                    }
                                })
                                .await
                        }
                        None => {
                            timeout
                                .execute(|| {
                                    let mut op = op_cell
                                        .lock()
                                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                                    op()
                                })
                                .await
                        }
                    }
                }
            })
            .await
    }
}

pub struct PolicyStackBuilder<E> {
    retry: Option<RetryPolicy<E>>,
    breaker: Option<Arc<CircuitBreaker>>,
    timeout: Option<TimeoutPolicy>,
}

impl<E> PolicyStackBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { retry: None, breaker: None, timeout: None }
    }

    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Per-attempt deadline; defaults to 30 s.
    pub fn timeout(mut self, duration: Duration) -> Result<Self, TimeoutError> {
        self.timeout = Some(TimeoutPolicy::new(duration)?);
        Ok(self)
    }

    pub fn build(self) -> PolicyStack<E> {
        PolicyStack {
            retry: self.retry.unwrap_or_else(|| RetryPolicy::builder().build()),
            breaker: self.breaker,
            timeout: self
                .timeout
                .unwrap_or_else(|| {
                    TimeoutPolicy::new(Duration::from_secs(30)).expect("default timeout is valid")
                }),
        }
    }
}

impl<E> Default for PolicyStackBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backoff, InstantSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn quick_retry(attempts: usize) -> RetryPolicy<TestError> {
        RetryPolicy::builder()
            .attempts(attempts)
            .backoff(Backoff::constant(Duration::from_millis(1)))
            .with_sleeper(InstantSleeper)
            .build()
    }

    #[tokio::test]
    async fn passes_through_success() {
        let stack: PolicyStack<TestError> = PolicyStack::builder().build();
        let result = stack.execute(|| async { Ok::<_, PolicyError<TestError>>(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn retries_through_the_stack() {
        let stack: PolicyStack<TestError> =
            PolicyStack::builder().retry(quick_retry(3)).build();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = stack
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PolicyError::Inner(TestError("transient")))
                    } else {
                        Ok(11)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 11);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn per_attempt_deadline_is_not_retried() {
        let stack: PolicyStack<TestError> = PolicyStack::builder()
            .retry(quick_retry(5))
            .timeout(Duration::from_millis(20))
            .unwrap()
            .build();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), _> = stack
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await;

        // The deadline converts to a policy rejection, which retry does not
        // recover.
        assert!(result.unwrap_err().is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_counts_each_attempt() {
        let breaker =
            Arc::new(CircuitBreaker::new("stack", 0.5, Duration::from_secs(60), 1).unwrap());
        let stack: PolicyStack<TestError> = PolicyStack::builder()
            .retry(quick_retry(5))
            .circuit_breaker(breaker.clone())
            .build();

        let result: Result<(), _> = stack
            .execute(|| async { Err(PolicyError::Inner(TestError("down"))) })
            .await;

        // First attempt fails inside the breaker; the second is rejected at
        // the breaker (rate 1.0 ≥ 0.5), which retry does not recover.
        assert!(result.unwrap_err().is_circuit_open());
        let metrics = breaker.metrics();
        assert_eq!(metrics.failure, 1);
        assert!(breaker.is_open());
    }
}
