//! Convenient re-exports for common Switchyard types.
pub use crate::{
    backoff::Backoff,
    balancer::{
        BackendBuilder, BalancerConfig, ConfigError, LoadBalancer, ServerConfig, Strategy,
        StrategyKind,
    },
    breaker_registry::{BreakerDefaults, BreakerRegistry},
    circuit_breaker::{BreakerConfigError, BreakerMetrics, CircuitBreaker, CircuitState},
    clock::{Clock, MonotonicClock},
    error::PolicyError,
    hash_ring::{HashRing, RingError},
    hedge::{HedgeConfigError, HedgingClient},
    http::{HttpClient, HttpError, HttpRequest, HttpResponse, Method},
    jitter::Jitter,
    rate_limit::{FixedWindowCounter, RateLimitConfigError, SlidingWindow, Unit},
    retry::{RetryPolicy, RetryPolicyBuilder},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    stack::{PolicyStack, PolicyStackBuilder},
    task_queue::{QueueError, Task, TaskError, TaskQueue, TaskResult},
    timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT},
    worker::{Worker, WorkerConfigError},
};
