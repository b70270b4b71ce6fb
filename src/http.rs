//! The HTTP-client port consumed by the load balancer and hedging client.
//!
//! The toolkit never speaks a wire protocol itself; it hands a request record
//! to an injected [`HttpClient`] and interprets the outcome. Implementations
//! must honor the per-call deadline: once it elapses the send is aborted and
//! any partial response is dropped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Request methods understood by the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request record handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query: Option<HashMap<String, String>>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: HashMap::new(), query: None, body: None }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Response record with the transport's raw payload. No parsing is mandated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport failures surfaced by the port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("network error: {0}")]
    Network(String),
    #[error("transport deadline elapsed after {0:?}")]
    DeadlineElapsed(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Abstract "send a request, get a response or error" capability.
///
/// `endpoint` is an opaque base address owned by the caller (a backend URL);
/// the implementation combines it with `request.path`. When `deadline`
/// elapses the implementation must return [`HttpError::DeadlineElapsed`]
/// rather than block.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        request: &HttpRequest,
        deadline: Duration,
    ) -> Result<HttpResponse, HttpError>;
}
