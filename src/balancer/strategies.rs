//! Backend selection strategies.
//!
//! A [`Strategy`] answers one question, which backend takes the next
//! request, and may observe the request lifecycle through optional hooks.
//! The balancer notifies it on pool changes so cursor- and quota-based
//! strategies can rebuild their indices.

use crate::balancer::backend::{Backend, BackendPool};
use crate::{HttpError, HttpRequest, HttpResponse};
use rand::prelude::IndexedRandom;
use rand::Rng;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Raised when a full scan finds no healthy backend below its cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoHealthyBackend;

impl std::fmt::Display for NoHealthyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("no healthy server with capacity")
    }
}

impl std::error::Error for NoHealthyBackend {}

/// Selection strategy with lifecycle hooks.
///
/// Only [`next`](Strategy::next) is required; the hooks default to no-ops.
/// `on_complete` fires after the stats update and only once the backend has
/// at least one recorded success, so latency-cache strategies see settled
/// numbers.
pub trait Strategy: Send {
    /// Id of the backend that should take the next request.
    fn next(&mut self, pool: &BackendPool) -> Result<String, NoHealthyBackend>;

    /// The pool gained or lost backends; rebuild any internal indices.
    fn on_pool_changed(&mut self, pool: &BackendPool) {
        let _ = pool;
    }

    fn before_request(&mut self, backend: &Backend, request: &HttpRequest) {
        let _ = (backend, request);
    }

    fn after_success(&mut self, backend: &Backend, response: &HttpResponse, elapsed: Duration) {
        let _ = (backend, response, elapsed);
    }

    fn after_failure(&mut self, backend: &Backend, error: &HttpError, elapsed: Duration) {
        let _ = (backend, error, elapsed);
    }

    fn on_complete(&mut self, backend: &Backend, elapsed: Duration) {
        let _ = (backend, elapsed);
    }
}

/// The built-in strategies, by configuration name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LeastConnections,
    RoundRobin,
    WeightedRoundRobin,
    LeastTime,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::LeastConnections => "least_connections",
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::WeightedRoundRobin => "weighted_round_robin",
            StrategyKind::LeastTime => "least_time",
        }
    }

    /// Instantiate the strategy over the given pool.
    pub(crate) fn build(self, pool: &BackendPool) -> Box<dyn Strategy> {
        match self {
            StrategyKind::LeastConnections => Box::new(LeastConnections),
            StrategyKind::RoundRobin => Box::new(RoundRobin::new(pool)),
            StrategyKind::WeightedRoundRobin => Box::new(WeightedRoundRobin::new(pool)),
            StrategyKind::LeastTime => Box::new(LeastTime::new()),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "least_connections" => Ok(StrategyKind::LeastConnections),
            "round_robin" => Ok(StrategyKind::RoundRobin),
            "weighted_round_robin" => Ok(StrategyKind::WeightedRoundRobin),
            "least_time" => Ok(StrategyKind::LeastTime),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Strategy name not among the built-ins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStrategy(pub String);

impl std::fmt::Display for UnknownStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown strategy '{}', expected least_connections|round_robin|weighted_round_robin|least_time",
            self.0
        )
    }
}

impl std::error::Error for UnknownStrategy {}

/// Pick the backend with the fewest in-flight requests. Ties resolve to the
/// first in pool order, so a scan is stable.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl Strategy for LeastConnections {
    fn next(&mut self, pool: &BackendPool) -> Result<String, NoHealthyBackend> {
        pool.iter()
            .min_by_key(|backend| backend.active())
            .map(|backend| backend.id().to_string())
            .ok_or(NoHealthyBackend)
    }
}

/// Rotate through the pool, skipping unhealthy or saturated backends. One
/// full fruitless rotation is an error.
#[derive(Debug)]
pub struct RoundRobin {
    order: Vec<String>,
    cursor: usize,
}

impl RoundRobin {
    pub fn new(pool: &BackendPool) -> Self {
        let order: Vec<String> = pool.ids().map(str::to_string).collect();
        let cursor = if order.is_empty() { 0 } else { rand::rng().random_range(0..order.len()) };
        Self { order, cursor }
    }
}

impl Strategy for RoundRobin {
    fn next(&mut self, pool: &BackendPool) -> Result<String, NoHealthyBackend> {
        let n = self.order.len();
        if n == 0 {
            return Err(NoHealthyBackend);
        }
        for _ in 0..n {
            self.cursor = (self.cursor + 1) % n;
            let id = &self.order[self.cursor];
            let Some(backend) = pool.get(id) else { continue };
            if backend.is_healthy() && backend.has_capacity() {
                return Ok(id.clone());
            }
        }
        Err(NoHealthyBackend)
    }

    fn on_pool_changed(&mut self, pool: &BackendPool) {
        self.order = pool.ids().map(str::to_string).collect();
        if !self.order.is_empty() {
            self.cursor %= self.order.len();
        }
    }
}

#[derive(Debug)]
struct QuotaEntry {
    id: String,
    /// Requests this backend takes per round: `weight / min_weight`.
    quota: u32,
    served: u32,
}

/// Weighted rotation: each backend serves `weight / min_weight` requests per
/// round. At-quota backends are skipped; when a full rotation finds every
/// eligible backend at quota, the round ends and all counters reset.
#[derive(Debug)]
pub struct WeightedRoundRobin {
    entries: Vec<QuotaEntry>,
    cursor: usize,
}

impl WeightedRoundRobin {
    pub fn new(pool: &BackendPool) -> Self {
        let entries = Self::build_entries(pool);
        let cursor = if entries.is_empty() { 0 } else { rand::rng().random_range(0..entries.len()) };
        Self { entries, cursor }
    }

    fn build_entries(pool: &BackendPool) -> Vec<QuotaEntry> {
        let min_weight = pool.min_weight().unwrap_or(1).max(1);
        pool.iter()
            .map(|backend| QuotaEntry {
                id: backend.id().to_string(),
                quota: (backend.weight() / min_weight).max(1),
                served: 0,
            })
            .collect()
    }
}

impl Strategy for WeightedRoundRobin {
    fn next(&mut self, pool: &BackendPool) -> Result<String, NoHealthyBackend> {
        let n = self.entries.len();
        if n == 0 {
            return Err(NoHealthyBackend);
        }
        // Second pass only runs right after a round reset, so it always
        // finds an entry when any backend is eligible.
        for _pass in 0..2 {
            let mut saw_quota_limited = false;
            for _ in 0..n {
                self.cursor = (self.cursor + 1) % n;
                let entry = &mut self.entries[self.cursor];
                let Some(backend) = pool.get(&entry.id) else { continue };
                if !backend.is_healthy() || !backend.has_capacity() {
                    continue;
                }
                if entry.served < entry.quota {
                    entry.served += 1;
                    return Ok(entry.id.clone());
                }
                saw_quota_limited = true;
            }
            if !saw_quota_limited {
                break;
            }
            for entry in &mut self.entries {
                entry.served = 0;
            }
            tracing::trace!("weighted round complete, quotas reset");
        }
        Err(NoHealthyBackend)
    }

    fn on_pool_changed(&mut self, pool: &BackendPool) {
        self.entries = Self::build_entries(pool);
        if !self.entries.is_empty() {
            self.cursor %= self.entries.len();
        }
    }
}

/// Route to the backend with the lowest observed average latency. Before any
/// completion has been seen, pick a healthy backend at random (any backend
/// if none are healthy).
#[derive(Debug, Default)]
pub struct LeastTime {
    fastest: Option<(Duration, String)>,
}

impl LeastTime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for LeastTime {
    fn next(&mut self, pool: &BackendPool) -> Result<String, NoHealthyBackend> {
        if let Some((_, id)) = &self.fastest {
            if pool.contains(id) {
                return Ok(id.clone());
            }
        }
        let healthy = pool.healthy_ids();
        let candidates = if healthy.is_empty() {
            pool.ids().map(str::to_string).collect::<Vec<_>>()
        } else {
            healthy
        };
        candidates.choose(&mut rand::rng()).cloned().ok_or(NoHealthyBackend)
    }

    fn on_complete(&mut self, backend: &Backend, _elapsed: Duration) {
        if !backend.is_healthy() {
            return;
        }
        let latency = backend.stats().avg_latency();
        let better = match &self.fastest {
            Some((best, _)) => latency < *best,
            None => true,
        };
        if better {
            self.fastest = Some((latency, backend.id().to_string()));
        }
    }

    fn on_pool_changed(&mut self, pool: &BackendPool) {
        if let Some((_, id)) = &self.fastest {
            if !pool.contains(id) {
                self.fastest = None;
            }
        }
    }
}
