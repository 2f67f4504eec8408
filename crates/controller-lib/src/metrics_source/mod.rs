//! Metrics source queries
//!
//! The controller only ever asks for a single scalar per expression. Absence
//! of signal is reported as `0.0` so the control loop never stalls on a
//! flaky metrics backend.

mod prometheus_http;

pub use prometheus_http::{PrometheusClient, QueryError, DEFAULT_QUERY_TIMEOUT};

use async_trait::async_trait;

/// Scalar query capability over a time-series backend
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Evaluate `expression` and return its scalar value
    ///
    /// Never fails: transport errors, bad statuses and empty or invalid
    /// result sets all yield `0.0`.
    async fn query(&self, expression: &str) -> f64;
}
