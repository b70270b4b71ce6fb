//! Structured configuration for the load balancer.
//!
//! A [`BalancerConfig`] deserializes from any serde format:
//!
//! ```json
//! {
//!   "strategy": "weighted_round_robin",
//!   "timeout": 10,
//!   "healthy_threshold": 0.5,
//!   "servers": [
//!     { "name": "api-1", "url": "http://10.0.0.1:8080", "weight": 4 },
//!     { "name": "api-2", "url": "http://10.0.0.2:8080" }
//!   ]
//! }
//! ```
//!
//! `timeout` (seconds) defaults to 30, `healthy_threshold` to 0.5 and
//! per-server `weight` to 1.

use crate::balancer::strategies::StrategyKind;
use serde::Deserialize;
use thiserror::Error;

/// Top-level load-balancer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    pub strategy: StrategyKind,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// A backend is healthy while its success rate stays strictly above this.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: f64,
    pub servers: Vec<ServerConfig>,
}

/// One backend entry in the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_healthy_threshold() -> f64 {
    0.5
}

fn default_weight() -> u32 {
    1
}

/// Errors from load-balancer construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("load balancer requires at least one backend")]
    EmptyPool,
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("healthy threshold must be within (0, 1), got {0}")]
    InvalidHealthyThreshold(f64),
    #[error("backend '{id}': {reason}")]
    InvalidBackend { id: String, reason: String },
    #[error("duplicate backend id '{0}'")]
    DuplicateBackend(String),
}
