//! Load balancer: owns the backend pool, dispatches per strategy, records
//! per-backend metrics, and maintains health.
//!
//! [`handle`](LoadBalancer::handle) is the template: the strategy selects a
//! backend, the balancer reserves an in-flight slot (failing with a
//! no-capacity rejection when the backend is at its cap), sends through the
//! HTTP-client port under the configured timeout, and folds the outcome into
//! the backend's stats; the in-flight counter is released on every exit
//! path. Health flips only at completion, derived from the success rate
//! against the healthy threshold.

pub mod backend;
pub mod config;
pub mod strategies;

pub use backend::{Backend, BackendBuilder, BackendPool, BackendStats};
pub use config::{BalancerConfig, ConfigError, ServerConfig};
pub use strategies::{
    LeastConnections, LeastTime, NoHealthyBackend, RoundRobin, Strategy, StrategyKind,
    UnknownStrategy, WeightedRoundRobin,
};

use crate::{Clock, HttpClient, HttpError, HttpRequest, HttpResponse, MonotonicClock, PolicyError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Process-wide traffic summary.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficMetrics {
    /// Requests per second since construction.
    pub request_rate: f64,
    /// In-flight requests across the pool.
    pub total_active: usize,
}

/// Per-backend performance summary.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendPerformance {
    pub id: String,
    pub total_requests: u64,
    pub total_time: Duration,
    pub avg_latency: Duration,
}

/// Per-backend health summary.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendHealth {
    pub id: String,
    pub healthy: bool,
    pub failures: u64,
}

/// Dispatches requests over a pool of backends through one strategy.
pub struct LoadBalancer {
    pool: RwLock<BackendPool>,
    strategy: Mutex<Box<dyn Strategy>>,
    client: Arc<dyn HttpClient>,
    timeout: Duration,
    healthy_threshold: f64,
    clock: Arc<dyn Clock>,
    started_at: u64,
    requests: AtomicU64,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("backends", &self.read_pool().len())
            .field("timeout", &self.timeout)
            .field("healthy_threshold", &self.healthy_threshold)
            .finish_non_exhaustive()
    }
}

/// Releases the reserved in-flight slot on every exit path.
struct ActiveGuard(Arc<Backend>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.end_request();
    }
}

impl LoadBalancer {
    /// Create a balancer over `backends` using the named strategy.
    ///
    /// # Errors
    ///
    /// Rejects an empty pool, a zero timeout, a healthy threshold outside
    /// `(0, 1)`, zero backend weights or caps, and duplicate backend ids.
    pub fn new(
        strategy: StrategyKind,
        timeout: Duration,
        backends: Vec<Backend>,
        healthy_threshold: f64,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::EmptyPool);
        }
        if timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if !(healthy_threshold > 0.0 && healthy_threshold < 1.0) {
            return Err(ConfigError::InvalidHealthyThreshold(healthy_threshold));
        }

        let mut pool = BackendPool::new();
        for backend in backends {
            Self::validate_backend(&backend)?;
            let id = backend.id().to_string();
            if !pool.insert(backend) {
                return Err(ConfigError::DuplicateBackend(id));
            }
        }

        let strategy = strategy.build(&pool);
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
        let started_at = clock.wall_now_millis();
        Ok(Self {
            pool: RwLock::new(pool),
            strategy: Mutex::new(strategy),
            client,
            timeout,
            healthy_threshold,
            clock,
            started_at,
            requests: AtomicU64::new(0),
        })
    }

    /// Build from a structured configuration.
    pub fn from_config(
        config: BalancerConfig,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, ConfigError> {
        let backends = config
            .servers
            .iter()
            .map(|server| {
                Backend::builder(&server.name, &server.url).with_weight(server.weight).build()
            })
            .collect();
        Self::new(
            config.strategy,
            Duration::from_secs(config.timeout),
            backends,
            config.healthy_threshold,
            client,
        )
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self.started_at = self.clock.wall_now_millis();
        self
    }

    /// Number of backends in the pool.
    pub fn len(&self) -> usize {
        self.read_pool().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_pool().is_empty()
    }

    /// Dispatch one request.
    ///
    /// Raises a no-capacity rejection when no eligible backend exists or the
    /// selected backend is at its cap; transport errors pass through as
    /// `PolicyError::Inner` after the stats update.
    pub async fn handle(
        &self,
        request: &HttpRequest,
    ) -> Result<HttpResponse, PolicyError<HttpError>> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        // Selection and slot reservation under the pool/strategy locks; both
        // are released before the request suspends.
        let (backend, guard) = {
            let pool = self.read_pool();
            let mut strategy = self.lock_strategy();
            let id = strategy
                .next(&pool)
                .map_err(|_| PolicyError::NoCapacity { detail: String::new() })?;
            let backend = pool
                .get(&id)
                .cloned()
                .ok_or_else(|| PolicyError::NoCapacity {
                    detail: format!("selected backend '{}' left the pool", id),
                })?;
            if !backend.begin_request() {
                tracing::warn!(backend = %id, "selected backend at max concurrency");
                return Err(PolicyError::NoCapacity {
                    detail: format!("backend '{}' at max concurrency", id),
                });
            }
            let guard = ActiveGuard(backend.clone());
            strategy.before_request(&backend, request);
            (backend, guard)
        };

        let started = self.clock.now_millis();
        let outcome = self.client.send(backend.endpoint(), request, self.timeout).await;
        let elapsed = Duration::from_millis(self.clock.now_millis().saturating_sub(started));

        // The slot frees at completion, before stats and hooks observe it.
        drop(guard);
        let stats = backend.record_completion(outcome.is_ok(), elapsed, self.healthy_threshold);

        {
            let mut strategy = self.lock_strategy();
            match &outcome {
                Ok(response) => strategy.after_success(&backend, response, elapsed),
                Err(error) => strategy.after_failure(&backend, error, elapsed),
            }
            if stats.success > 0 {
                strategy.on_complete(&backend, elapsed);
            }
        }

        match &outcome {
            Ok(response) => tracing::debug!(
                backend = %backend.id(),
                status = response.status,
                elapsed_ms = elapsed.as_millis() as u64,
                "request served"
            ),
            Err(error) => tracing::warn!(
                backend = %backend.id(),
                error = %error,
                elapsed_ms = elapsed.as_millis() as u64,
                "request failed"
            ),
        }

        outcome.map_err(PolicyError::Inner)
    }

    /// Insert a backend and rebuild the strategy's indices.
    ///
    /// # Errors
    ///
    /// Rejects invalid backends and duplicate ids.
    pub fn add_server(&self, backend: Backend) -> Result<(), ConfigError> {
        Self::validate_backend(&backend)?;
        let mut pool = self.write_pool();
        let id = backend.id().to_string();
        if !pool.insert(backend) {
            return Err(ConfigError::DuplicateBackend(id));
        }
        self.lock_strategy().on_pool_changed(&pool);
        tracing::info!(backend = %id, "backend added to pool");
        Ok(())
    }

    /// Remove a backend and rebuild the strategy's indices.
    pub fn remove_server(&self, id: &str) -> Option<Arc<Backend>> {
        let mut pool = self.write_pool();
        let removed = pool.remove(id)?;
        self.lock_strategy().on_pool_changed(&pool);
        tracing::info!(backend = %id, "backend removed from pool");
        Some(removed)
    }

    /// Ids of currently healthy backends.
    pub fn get_healthy_servers(&self) -> Vec<String> {
        self.read_pool().healthy_ids()
    }

    /// Request rate since construction and in-flight totals.
    pub fn traffic_metrics(&self) -> TrafficMetrics {
        let pool = self.read_pool();
        let total_active = pool.iter().map(|backend| backend.active()).sum();
        let elapsed_ms = self.clock.wall_now_millis().saturating_sub(self.started_at);
        let requests = self.requests.load(Ordering::Relaxed);
        let request_rate =
            if elapsed_ms > 0 { requests as f64 / (elapsed_ms as f64 / 1_000.0) } else { 0.0 };
        TrafficMetrics { request_rate, total_active }
    }

    /// Per-backend request counts and latencies, in pool order.
    pub fn performance_metrics(&self) -> Vec<BackendPerformance> {
        self.read_pool()
            .iter()
            .map(|backend| {
                let stats = backend.stats();
                BackendPerformance {
                    id: backend.id().to_string(),
                    total_requests: stats.total,
                    total_time: stats.total_time,
                    avg_latency: stats.avg_latency(),
                }
            })
            .collect()
    }

    /// Per-backend health flags and failure counts, in pool order.
    pub fn health_metrics(&self) -> Vec<BackendHealth> {
        self.read_pool()
            .iter()
            .map(|backend| BackendHealth {
                id: backend.id().to_string(),
                healthy: backend.is_healthy(),
                failures: backend.stats().failure,
            })
            .collect()
    }

    fn validate_backend(backend: &Backend) -> Result<(), ConfigError> {
        if backend.weight() == 0 {
            return Err(ConfigError::InvalidBackend {
                id: backend.id().to_string(),
                reason: "weight must be at least 1".to_string(),
            });
        }
        if backend.max_concurrent() == 0 {
            return Err(ConfigError::InvalidBackend {
                id: backend.id().to_string(),
                reason: "max_concurrent must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn read_pool(&self) -> RwLockReadGuard<'_, BackendPool> {
        self.pool.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_pool(&self) -> RwLockWriteGuard<'_, BackendPool> {
        self.pool.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_strategy(&self) -> MutexGuard<'_, Box<dyn Strategy>> {
        self.strategy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
