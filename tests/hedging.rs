//! Hedged-request scenarios over a scripted transport.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard::{HedgingClient, HttpClient, HttpError, HttpRequest, HttpResponse, Method};
use tokio::time::Instant;

/// Transport whose n-th call takes the n-th scripted latency.
struct SequencedClient {
    latencies: Vec<Duration>,
    calls: AtomicUsize,
}

impl SequencedClient {
    fn new(latencies: Vec<Duration>) -> Arc<Self> {
        Arc::new(Self { latencies, calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for SequencedClient {
    async fn send(
        &self,
        _endpoint: &str,
        _request: &HttpRequest,
        _deadline: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latencies.get(call).copied().unwrap_or(Duration::from_secs(3600));
        tokio::time::sleep(latency).await;
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: format!("attempt-{}", call).into_bytes(),
        })
    }
}

/// Scenario: the first attempt needs 1 s, the hedge (fired at +50 ms)
/// returns in 100 ms, so the hedge's body comes back well under 250 ms.
#[tokio::test(start_paused = true)]
async fn hedge_beats_a_slow_primary() {
    let transport =
        SequencedClient::new(vec![Duration::from_secs(1), Duration::from_millis(100)]);
    let client = HedgingClient::new(
        transport.clone(),
        "http://upstream/search",
        50_000, // 50 ms expressed in microseconds
        Duration::from_secs(5),
    )
    .unwrap();

    let started = Instant::now();
    let response = client.request(Method::Get, HashMap::new(), None).await.unwrap();

    assert_eq!(response.body, b"attempt-1");
    assert_eq!(transport.calls(), 2);
    assert!(started.elapsed() <= Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn fast_primary_never_hedges() {
    let transport = SequencedClient::new(vec![Duration::from_millis(10)]);
    let client = HedgingClient::new(
        transport.clone(),
        "http://upstream",
        50_000,
        Duration::from_secs(5),
    )
    .unwrap();

    let response = client.request(Method::Get, HashMap::new(), None).await.unwrap();
    assert_eq!(response.body, b"attempt-0");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn overall_deadline_wins_over_two_stuck_attempts() {
    let transport =
        SequencedClient::new(vec![Duration::from_secs(120), Duration::from_secs(120)]);
    let client = HedgingClient::new(
        transport.clone(),
        "http://upstream",
        5_000,
        Duration::from_millis(300),
    )
    .unwrap();

    let started = Instant::now();
    let err = client.request(Method::Post, HashMap::new(), Some(vec![])).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() <= Duration::from_millis(400));
    assert_eq!(transport.calls(), 2);
}
