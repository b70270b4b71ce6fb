//! Request hedging: a delayed second attempt against tail latency.
//!
//! `request` fires attempt A immediately and waits up to `delay` for it. If A
//! is still running, attempt B starts and the two race under the remaining
//! overall budget; the first to finish wins and the loser is cancelled. A
//! winner that failed falls back to the still-running loser (bounded by the
//! same budget) and returns its result or its error. Both attempts pending at
//! the overall deadline is a timeout.
//!
//! Attempts run as spawned tasks behind abort-on-drop guards, so cancelling
//! the caller cancels both attempts; nothing keeps running after the call
//! returns.

use crate::{HttpClient, HttpError, HttpRequest, HttpResponse, Method, PolicyError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Errors returned when configuring a hedging client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeConfigError {
    /// The hedge delay must be greater than zero.
    ZeroDelay,
    /// The overall timeout must be greater than zero.
    ZeroTimeout,
}

impl std::fmt::Display for HedgeConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HedgeConfigError::ZeroDelay => write!(f, "hedge delay must be greater than zero"),
            HedgeConfigError::ZeroTimeout => write!(f, "overall timeout must be greater than zero"),
        }
    }
}

impl std::error::Error for HedgeConfigError {}

/// One in-flight attempt; aborted when dropped.
struct Attempt(JoinHandle<Result<HttpResponse, HttpError>>);

impl Drop for Attempt {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Issues a delayed secondary attempt and returns the first winner.
pub struct HedgingClient {
    client: Arc<dyn HttpClient>,
    endpoint: String,
    delay: Duration,
    overall_timeout: Duration,
}

impl std::fmt::Debug for HedgingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HedgingClient")
            .field("endpoint", &self.endpoint)
            .field("delay", &self.delay)
            .field("overall_timeout", &self.overall_timeout)
            .finish_non_exhaustive()
    }
}

impl HedgingClient {
    /// Create a hedging client. `delay_micros` is the tail-latency threshold
    /// after which the second attempt fires.
    ///
    /// # Errors
    ///
    /// [`HedgeConfigError::ZeroDelay`] / [`HedgeConfigError::ZeroTimeout`]
    /// for zero parameters.
    pub fn new(
        client: Arc<dyn HttpClient>,
        endpoint: impl Into<String>,
        delay_micros: u64,
        overall_timeout: Duration,
    ) -> Result<Self, HedgeConfigError> {
        if delay_micros == 0 {
            return Err(HedgeConfigError::ZeroDelay);
        }
        if overall_timeout.is_zero() {
            return Err(HedgeConfigError::ZeroTimeout);
        }
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            delay: Duration::from_micros(delay_micros),
            overall_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a hedged request and return the winning attempt's response.
    pub async fn request(
        &self,
        method: Method,
        headers: HashMap<String, String>,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, PolicyError<HttpError>> {
        let mut request = HttpRequest::new(method, "");
        request.headers = headers;
        request.body = body;
        let request = Arc::new(request);

        let started = Instant::now();
        let mut primary = self.spawn_attempt(&request);

        // Phase 1: give the primary `delay` to finish on its own.
        if let Ok(outcome) = tokio::time::timeout(self.delay, &mut primary.0).await {
            return flatten(outcome).map_err(PolicyError::Inner);
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            delay_us = self.delay.as_micros() as u64,
            "primary attempt slow, firing hedge"
        );
        let mut hedge = self.spawn_attempt(&request);

        let Some(budget) = self.remaining(started) else {
            return Err(self.timed_out(started));
        };

        // Phase 2: first of the two attempts wins.
        let race = async {
            tokio::select! {
                outcome = &mut primary.0 => (flatten(outcome), true),
                outcome = &mut hedge.0 => (flatten(outcome), false),
            }
        };
        let (winner, primary_won) = match tokio::time::timeout(budget, race).await {
            Ok(decided) => decided,
            Err(_) => return Err(self.timed_out(started)),
        };

        match winner {
            Ok(response) => {
                tracing::debug!(primary_won, "hedged request resolved");
                Ok(response)
            }
            Err(error) => {
                // The winner failed; fall back to the attempt still in
                // flight, under what is left of the overall budget.
                tracing::debug!(primary_won, error = %error, "winner failed, awaiting other attempt");
                let mut loser = if primary_won { hedge } else { primary };
                let Some(budget) = self.remaining(started) else {
                    return Err(self.timed_out(started));
                };
                match tokio::time::timeout(budget, &mut loser.0).await {
                    Ok(outcome) => flatten(outcome).map_err(PolicyError::Inner),
                    Err(_) => Err(self.timed_out(started)),
                }
            }
        }
    }

    fn spawn_attempt(&self, request: &Arc<HttpRequest>) -> Attempt {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let request = request.clone();
        let deadline = self.overall_timeout;
        Attempt(tokio::spawn(async move { client.send(&endpoint, &request, deadline).await }))
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        let budget = self.overall_timeout.checked_sub(started.elapsed())?;
        (!budget.is_zero()).then_some(budget)
    }

    fn timed_out(&self, started: Instant) -> PolicyError<HttpError> {
        PolicyError::Timeout { elapsed: started.elapsed(), timeout: self.overall_timeout }
    }
}

fn flatten(
    outcome: Result<Result<HttpResponse, HttpError>, tokio::task::JoinError>,
) -> Result<HttpResponse, HttpError> {
    match outcome {
        Ok(result) => result,
        Err(join_error) => Err(HttpError::Network(format!("hedged attempt aborted: {}", join_error))),
    }
}
