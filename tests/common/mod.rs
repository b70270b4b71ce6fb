//! Shared helpers for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard::{Clock, HttpClient, HttpError, HttpRequest, HttpResponse};

/// Hand-driven clock: both readings share one counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(start)) }
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn wall_now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// What a [`StubHttpClient`] does for one endpoint.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Respond with the given status after the given latency.
    Respond { status: u16, latency: Duration },
    /// Fail with a network error after the given latency.
    Fail { latency: Duration },
}

/// Scripted transport: behavior per endpoint, with a call log.
pub struct StubHttpClient {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<String>>,
    sends: AtomicUsize,
}

impl StubHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            sends: AtomicUsize::new(0),
        })
    }

    pub fn respond(self: &Arc<Self>, endpoint: &str, status: u16, latency: Duration) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), Behavior::Respond { status, latency });
    }

    pub fn fail(self: &Arc<Self>, endpoint: &str, latency: Duration) {
        self.behaviors.lock().unwrap().insert(endpoint.to_string(), Behavior::Fail { latency });
    }

    /// Endpoints hit, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for StubHttpClient {
    async fn send(
        &self,
        endpoint: &str,
        _request: &HttpRequest,
        deadline: Duration,
    ) -> Result<HttpResponse, HttpError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(endpoint.to_string());

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or(Behavior::Respond { status: 200, latency: Duration::ZERO });

        let latency = match &behavior {
            Behavior::Respond { latency, .. } | Behavior::Fail { latency } => *latency,
        };
        if latency >= deadline {
            tokio::time::sleep(deadline).await;
            return Err(HttpError::DeadlineElapsed(deadline));
        }
        tokio::time::sleep(latency).await;

        match behavior {
            Behavior::Respond { status, .. } => Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: endpoint.as_bytes().to_vec(),
            }),
            Behavior::Fail { .. } => Err(HttpError::Network(format!("{} unreachable", endpoint))),
        }
    }
}
