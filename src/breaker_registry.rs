//! Registry for managing named circuit breakers.
//!
//! A process typically guards many dependencies, each behind its own
//! breaker. The registry hands out shared breakers by key, creating them on
//! first use from a default configuration, and offers fleet-wide inspection
//! and reset.

use crate::{BreakerConfigError, BreakerMetrics, CircuitBreaker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default configuration applied by [`BreakerRegistry::get_or_create`].
#[derive(Debug, Clone, Copy)]
pub struct BreakerDefaults {
    pub failure_threshold: f64,
    pub cooldown: Duration,
    pub probe_budget: u64,
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self { failure_threshold: 0.5, cooldown: Duration::from_secs(30), probe_budget: 3 }
    }
}

/// Registry keyed by breaker key; clones share the same underlying map.
#[derive(Clone)]
pub struct BreakerRegistry {
    defaults: BreakerDefaults,
    inner: Arc<Mutex<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("defaults", &self.defaults)
            .field("breakers", &self.lock().len())
            .finish()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerDefaults::default())
    }
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerDefaults) -> Self {
        Self { defaults, inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register a breaker under its own key. An existing entry with the same
    /// key is replaced.
    pub fn register(&self, breaker: CircuitBreaker) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(breaker);
        self.lock().insert(breaker.key().to_string(), breaker.clone());
        breaker
    }

    /// Fetch the breaker for `key`, creating one from the registry defaults
    /// when absent.
    ///
    /// # Errors
    ///
    /// Propagates [`BreakerConfigError`] when the defaults are invalid.
    pub fn get_or_create(&self, key: &str) -> Result<Arc<CircuitBreaker>, BreakerConfigError> {
        let mut map = self.lock();
        if let Some(breaker) = map.get(key) {
            return Ok(breaker.clone());
        }
        let breaker = Arc::new(CircuitBreaker::new(
            key,
            self.defaults.failure_threshold,
            self.defaults.cooldown,
            self.defaults.probe_budget,
        )?);
        map.insert(key.to_string(), breaker.clone());
        tracing::debug!(key, "circuit breaker created from registry defaults");
        Ok(breaker)
    }

    /// Look up a breaker without creating one.
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().get(key).cloned()
    }

    /// Drop a breaker from the registry; existing handles keep working.
    pub fn remove(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().remove(key)
    }

    /// Reset one breaker by key; `false` when the key is unknown.
    pub fn reset(&self, key: &str) -> bool {
        match self.get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every registered breaker.
    pub fn reset_all(&self) {
        for breaker in self.lock().values() {
            breaker.reset();
        }
    }

    /// Metrics for every registered breaker, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, BreakerMetrics)> {
        let map = self.lock();
        let mut entries: Vec<(String, BreakerMetrics)> =
            map.iter().map(|(key, breaker)| (key.clone(), breaker.metrics())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitState, PolicyError};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError;

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("test error")
        }
    }

    impl std::error::Error for TestError {}

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = BreakerRegistry::default();
        let first = registry.get_or_create("db").unwrap();
        let second = registry.get_or_create("db").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.get("db").is_some());
        assert!(registry.get("cache").is_none());
    }

    #[test]
    fn register_replaces_by_key() {
        let registry = BreakerRegistry::default();
        registry.register(
            CircuitBreaker::new("db", 0.5, Duration::from_secs(1), 1).unwrap(),
        );
        let replacement = registry.register(
            CircuitBreaker::new("db", 0.9, Duration::from_secs(9), 9).unwrap(),
        );
        assert!(Arc::ptr_eq(&registry.get("db").unwrap(), &replacement));
    }

    #[test]
    fn invalid_defaults_surface_on_create() {
        let registry = BreakerRegistry::new(BreakerDefaults {
            failure_threshold: 2.0,
            ..BreakerDefaults::default()
        });
        assert!(registry.get_or_create("db").is_err());
    }

    #[tokio::test]
    async fn reset_all_returns_every_breaker_to_closed() {
        let registry = BreakerRegistry::new(BreakerDefaults {
            failure_threshold: 0.5,
            cooldown: Duration::from_secs(60),
            probe_budget: 1,
        });

        for key in ["db", "cache"] {
            let breaker = registry.get_or_create(key).unwrap();
            let _ = breaker
                .run(|| async { Err::<(), _>(PolicyError::Inner(TestError)) })
                .await;
            let _ = breaker.run(|| async { Ok::<_, PolicyError<TestError>>(()) }).await;
            assert!(breaker.is_open());
        }

        registry.reset_all();
        for (key, metrics) in registry.snapshot() {
            assert_eq!(metrics.state, CircuitState::Closed, "{} should be closed", key);
            assert_eq!(metrics.failure, 0);
        }
    }

    #[test]
    fn remove_detaches_but_keeps_handles_alive() {
        let registry = BreakerRegistry::default();
        let breaker = registry.get_or_create("db").unwrap();
        assert!(registry.remove("db").is_some());
        assert!(registry.get("db").is_none());
        assert!(!registry.reset("db"));
        breaker.reset();
    }

    #[test]
    fn snapshot_is_sorted_by_key() {
        let registry = BreakerRegistry::default();
        for key in ["zeta", "alpha", "mid"] {
            registry.get_or_create(key).unwrap();
        }
        let keys: Vec<String> = registry.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["alpha".to_string(), "mid".to_string(), "zeta".to_string()]);
    }
}
