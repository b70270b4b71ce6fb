//! Backends and the pool the load balancer owns.
//!
//! A [`Backend`] is a routable target: endpoint, weight, a cap on in-flight
//! requests, an atomic in-flight counter, an atomic health flag, and a
//! mutex-guarded stats record updated at every completion. Health flips only
//! when a request completes, derived from the success rate against the
//! balancer's threshold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Running counters for one backend. `success_rate` starts at 1.0: a
/// backend is presumed good until a completion says otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    /// `success / (success + failure)`, rounded to five decimal places.
    pub success_rate: f64,
    /// Cumulative time spent in completed requests.
    pub total_time: Duration,
    /// Number of recorded latency samples.
    pub samples: u64,
    /// Latency of the most recent completion.
    pub last_latency: Duration,
}

impl Default for BackendStats {
    fn default() -> Self {
        Self {
            total: 0,
            success: 0,
            failure: 0,
            success_rate: 1.0,
            total_time: Duration::ZERO,
            samples: 0,
            last_latency: Duration::ZERO,
        }
    }
}

impl BackendStats {
    /// Mean latency over the recorded samples; zero before any completion.
    pub fn avg_latency(&self) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }
        self.total_time / self.samples as u32
    }
}

fn round5(x: f64) -> f64 {
    (x * 100_000.0).round() / 100_000.0
}

/// A routable target owned by the load balancer.
pub struct Backend {
    id: String,
    endpoint: String,
    weight: u32,
    max_concurrent: usize,
    active: AtomicUsize,
    healthy: AtomicBool,
    stats: Mutex<BackendStats>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("weight", &self.weight)
            .field("max_concurrent", &self.max_concurrent)
            .field("active", &self.active())
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

impl Backend {
    pub fn builder(id: impl Into<String>, endpoint: impl Into<String>) -> BackendBuilder {
        BackendBuilder::new(id, endpoint)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Requests currently in flight.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Whether another request fits under the concurrency cap.
    pub fn has_capacity(&self) -> bool {
        self.active() < self.max_concurrent
    }

    /// Snapshot of the stats record.
    pub fn stats(&self) -> BackendStats {
        self.lock_stats().clone()
    }

    /// Force the health flag; normally it is derived at completion.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    /// Reserve an in-flight slot unless the cap is reached.
    pub(crate) fn begin_request(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.max_concurrent).then_some(active + 1)
            })
            .is_ok()
    }

    /// Release an in-flight slot.
    pub(crate) fn end_request(&self) {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                Some(active.saturating_sub(1))
            })
            .ok();
    }

    /// Fold one completion into the stats and re-derive health.
    /// Returns the updated snapshot.
    pub(crate) fn record_completion(
        &self,
        success: bool,
        elapsed: Duration,
        healthy_threshold: f64,
    ) -> BackendStats {
        let mut stats = self.lock_stats();
        if success {
            stats.success += 1;
        } else {
            stats.failure += 1;
        }
        stats.total += 1;
        let completed = stats.success + stats.failure;
        if completed > 0 {
            stats.success_rate = round5(stats.success as f64 / completed as f64);
        }
        stats.total_time += elapsed;
        stats.samples += 1;
        stats.last_latency = elapsed;
        self.healthy.store(stats.success_rate > healthy_threshold, Ordering::Release);
        stats.clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, BackendStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fluent constructor for backends.
#[derive(Debug, Clone)]
pub struct BackendBuilder {
    id: String,
    endpoint: String,
    weight: u32,
    max_concurrent: usize,
}

impl BackendBuilder {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { id: id.into(), endpoint: endpoint.into(), weight: 1, max_concurrent: 100 }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn build(self) -> Backend {
        Backend {
            id: self.id,
            endpoint: self.endpoint,
            weight: self.weight,
            max_concurrent: self.max_concurrent,
            active: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            stats: Mutex::new(BackendStats::default()),
        }
    }
}

/// Mapping from id to backend, iterated in insertion order so strategies see
/// a stable sequence.
#[derive(Debug, Default)]
pub struct BackendPool {
    backends: HashMap<String, Arc<Backend>>,
    order: Vec<String>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Backend>> {
        self.backends.get(id)
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Backends in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.order.iter().filter_map(|id| self.backends.get(id))
    }

    /// Insert a backend; returns `false` (and leaves the pool unchanged)
    /// when the id is already present.
    pub fn insert(&mut self, backend: Backend) -> bool {
        if self.backends.contains_key(backend.id()) {
            return false;
        }
        self.order.push(backend.id().to_string());
        self.backends.insert(backend.id().to_string(), Arc::new(backend));
        true
    }

    /// Remove a backend. Strategy indices must be rebuilt afterwards; no
    /// value survives in them past removal.
    pub fn remove(&mut self, id: &str) -> Option<Arc<Backend>> {
        let removed = self.backends.remove(id)?;
        self.order.retain(|known| known != id);
        Some(removed)
    }

    /// Force a backend's health flag.
    pub fn update_health(&self, id: &str, healthy: bool) -> bool {
        match self.backends.get(id) {
            Some(backend) => {
                backend.set_healthy(healthy);
                true
            }
            None => false,
        }
    }

    /// Ids of currently healthy backends, in insertion order.
    pub fn healthy_ids(&self) -> Vec<String> {
        self.iter().filter(|b| b.is_healthy()).map(|b| b.id().to_string()).collect()
    }

    /// Smallest weight in the pool; `None` when empty.
    pub fn min_weight(&self) -> Option<u32> {
        self.iter().map(|b| b.weight()).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let backend = Backend::builder("api-1", "http://10.0.0.1:8080").build();
        assert_eq!(backend.id(), "api-1");
        assert_eq!(backend.weight(), 1);
        assert_eq!(backend.max_concurrent(), 100);
        assert_eq!(backend.active(), 0);
        assert!(backend.is_healthy());
        assert_eq!(backend.stats().success_rate, 1.0);
    }

    #[test]
    fn begin_request_respects_cap() {
        let backend = Backend::builder("api-1", "http://x").with_max_concurrent(2).build();
        assert!(backend.begin_request());
        assert!(backend.begin_request());
        assert!(!backend.has_capacity());
        assert!(!backend.begin_request());
        assert_eq!(backend.active(), 2);

        backend.end_request();
        assert!(backend.has_capacity());
        assert!(backend.begin_request());
    }

    #[test]
    fn end_request_never_goes_negative() {
        let backend = Backend::builder("api-1", "http://x").build();
        backend.end_request();
        assert_eq!(backend.active(), 0);
    }

    #[test]
    fn completion_updates_stats_and_health() {
        let backend = Backend::builder("api-1", "http://x").build();

        let stats = backend.record_completion(true, Duration::from_millis(100), 0.5);
        assert_eq!((stats.total, stats.success, stats.failure), (1, 1, 0));
        assert_eq!(stats.success_rate, 1.0);
        assert!(backend.is_healthy());

        let stats = backend.record_completion(false, Duration::from_millis(300), 0.5);
        assert_eq!((stats.total, stats.success, stats.failure), (2, 1, 1));
        assert_eq!(stats.success_rate, 0.5);
        // 0.5 is not strictly above the threshold.
        assert!(!backend.is_healthy());
        assert_eq!(stats.last_latency, Duration::from_millis(300));
        assert_eq!(stats.avg_latency(), Duration::from_millis(200));
    }

    #[test]
    fn success_rate_rounds_to_five_places() {
        let backend = Backend::builder("api-1", "http://x").build();
        backend.record_completion(true, Duration::ZERO, 0.5);
        backend.record_completion(true, Duration::ZERO, 0.5);
        let stats = backend.record_completion(false, Duration::ZERO, 0.5);
        assert_eq!(stats.success_rate, 0.66667);
    }

    #[test]
    fn pool_iterates_in_insertion_order() {
        let mut pool = BackendPool::new();
        for id in ["c", "a", "b"] {
            assert!(pool.insert(Backend::builder(id, format!("http://{}", id)).build()));
        }
        let ids: Vec<&str> = pool.ids().collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(!pool.insert(Backend::builder("a", "http://dup").build()));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn pool_remove_and_health() {
        let mut pool = BackendPool::new();
        pool.insert(Backend::builder("a", "http://a").build());
        pool.insert(Backend::builder("b", "http://b").build());

        assert!(pool.update_health("a", false));
        assert!(!pool.update_health("ghost", false));
        assert_eq!(pool.healthy_ids(), vec!["b".to_string()]);

        assert!(pool.remove("a").is_some());
        assert!(pool.remove("a").is_none());
        let ids: Vec<&str> = pool.ids().collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn min_weight_over_pool() {
        let mut pool = BackendPool::new();
        assert!(pool.min_weight().is_none());
        pool.insert(Backend::builder("a", "http://a").with_weight(4).build());
        pool.insert(Backend::builder("b", "http://b").with_weight(2).build());
        assert_eq!(pool.min_weight(), Some(2));
    }
}
