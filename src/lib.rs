#![forbid(unsafe_code)]

//! # Switchyard
//!
//! Reusable building blocks for resilient, high-throughput request serving:
//! a load balancer with pluggable selection strategies, a circuit breaker,
//! fixed- and sliding-window rate limiters, a request-hedging client, a
//! prioritized task queue with a retrying worker, retry/timeout policies,
//! and a consistent-hashing ring.
//!
//! ## Design
//!
//! - **In-process, handler-style.** Nothing here opens sockets: the balancer
//!   and hedging client consume an abstract [`HttpClient`] port and every
//!   policy wraps a caller-supplied async operation.
//! - **Injected time.** Components that compare times take a [`Clock`];
//!   sleeps go through a [`Sleeper`]. Tests drive both by hand.
//! - **Expected rejections are values.** Rate limiters answer `bool`; the
//!   breaker and balancer return typed rejections through [`PolicyError`],
//!   distinct from transport and operation errors, which pass through
//!   verbatim.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use switchyard::{Backoff, PolicyError, PolicyStack, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PolicyError<std::io::Error>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!
//!     let retry: RetryPolicy<std::io::Error> = RetryPolicy::builder()
//!         .attempts(3)
//!         .backoff(Backoff::exponential(Duration::from_millis(50)))
//!         .build();
//!     let stack: PolicyStack<std::io::Error> = PolicyStack::builder()
//!         .retry(retry)
//!         .timeout(Duration::from_secs(2))
//!         .expect("valid timeout")
//!         .build();
//!
//!     let value = stack
//!         .execute(|| {
//!             let attempts = attempts.clone();
//!             async move {
//!                 if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
//!                     Err(PolicyError::Inner(std::io::Error::new(
//!                         std::io::ErrorKind::ConnectionReset,
//!                         "transient failure",
//!                     )))
//!                 } else {
//!                     Ok(42)
//!                 }
//!             }
//!         })
//!         .await?;
//!     assert_eq!(value, 42);
//!     Ok(())
//! }
//! ```

pub mod balancer;
pub mod rate_limit;

mod backoff;
mod breaker_registry;
mod circuit_breaker;
mod clock;
mod error;
mod hash_ring;
mod hedge;
mod http;
mod jitter;
mod retry;
mod sleeper;
mod stack;
mod task_queue;
mod timeout;
mod worker;

// Re-exports
pub use backoff::Backoff;
pub use balancer::{
    Backend, BackendBuilder, BackendHealth, BackendPerformance, BackendPool, BackendStats,
    BalancerConfig, ConfigError, LoadBalancer, NoHealthyBackend, ServerConfig, Strategy,
    StrategyKind, TrafficMetrics, UnknownStrategy,
};
pub use breaker_registry::{BreakerDefaults, BreakerRegistry};
pub use circuit_breaker::{BreakerConfigError, BreakerMetrics, CircuitBreaker, CircuitState};
pub use clock::{Clock, MonotonicClock};
pub use error::PolicyError;
pub use hash_ring::{HashRing, RingError};
pub use hedge::{HedgeConfigError, HedgingClient};
pub use http::{HttpClient, HttpError, HttpRequest, HttpResponse, Method};
pub use jitter::Jitter;
pub use rate_limit::{FixedWindowCounter, KeyMetrics, RateLimitConfigError, SlidingWindow, Unit};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{PolicyStack, PolicyStackBuilder};
pub use task_queue::{QueueError, Task, TaskError, TaskFuture, TaskQueue, TaskResult};
pub use timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT};
pub use worker::{Worker, WorkerConfigError};

pub mod prelude;
