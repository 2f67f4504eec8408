//! Prometheus HTTP API client
//!
//! Issues instant queries against `/api/v1/query` and reduces the returned
//! series to one scalar by averaging their finite values.

use super::MetricsSource;
use crate::health::{Component, HealthRegistry};
use crate::observability::ControllerMetrics;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Default per-query timeout
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const QUERY_PATH: &str = "api/v1/query";

/// Why a query produced no usable value
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid metrics source URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("request to metrics source failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metrics source returned HTTP {0}")]
    Status(StatusCode),

    #[error("metrics source reported {error_type}: {message}")]
    Upstream { error_type: String, message: String },

    #[error("malformed query response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("query returned no finite samples")]
    NoData,
}

/// Top-level Prometheus response envelope
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<Series>),
    Matrix(Vec<Series>),
    Scalar(Value),
    String(Value),
}

/// One series of a vector or matrix result; labels are not needed
#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    values: Vec<Value>,
}

impl QueryData {
    /// Candidate values, one per series (latest point for range vectors)
    fn sample_values(&self) -> Vec<f64> {
        match self {
            QueryData::Vector(series) => series
                .iter()
                .filter_map(|s| s.value.as_ref().and_then(pair_value))
                .collect(),
            QueryData::Matrix(series) => series
                .iter()
                .filter_map(|s| s.values.last().and_then(pair_value))
                .collect(),
            QueryData::Scalar(pair) => pair_value(pair).into_iter().collect(),
            QueryData::String(_) => Vec::new(),
        }
    }
}

/// Extract the value of a `[timestamp, "value"]` pair
fn pair_value(pair: &Value) -> Option<f64> {
    match pair.as_array()?.get(1)? {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Average of the finite values, `None` if there are none
fn average_finite(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(finite.iter().sum::<f64>() / finite.len() as f64)
}

/// Client for the Prometheus instant query API
pub struct PrometheusClient {
    client: Client,
    query_url: Url,
    metrics: ControllerMetrics,
    health: Option<HealthRegistry>,
}

impl PrometheusClient {
    /// Create a client for the Prometheus server at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let client = Client::builder().timeout(timeout).build()?;

        // Keep any path prefix (e.g. behind a reverse proxy) when joining
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let query_url = base.join(QUERY_PATH)?;

        Ok(Self {
            client,
            query_url,
            metrics: ControllerMetrics::new(),
            health: None,
        })
    }

    /// Report query failures as degraded `metrics_source` health
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Query endpoint this client talks to
    pub fn query_url(&self) -> &Url {
        &self.query_url
    }

    /// Evaluate `expression`, surfacing every failure
    pub async fn try_query(&self, expression: &str) -> Result<f64, QueryError> {
        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", expression)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Status(status));
        }

        let body = response.bytes().await?;
        let envelope: QueryResponse = serde_json::from_slice(&body)?;

        if envelope.status != "success" {
            return Err(QueryError::Upstream {
                error_type: envelope.error_type.unwrap_or_else(|| envelope.status.clone()),
                message: envelope.error.unwrap_or_default(),
            });
        }

        let values = envelope
            .data
            .map(|data| data.sample_values())
            .unwrap_or_default();

        average_finite(&values).ok_or(QueryError::NoData)
    }
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    async fn query(&self, expression: &str) -> f64 {
        let start = Instant::now();
        let result = self.try_query(expression).await;
        self.metrics
            .observe_query_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(value) => {
                debug!(query = %expression.trim(), value = value, "Metrics query succeeded");
                if let Some(health) = &self.health {
                    health.set_healthy(Component::MetricsSource).await;
                }
                value
            }
            // Idle series: reported, but the source itself is still answering
            Err(QueryError::NoData) => {
                self.metrics.inc_query_empty();
                warn!(query = %expression.trim(), "Metrics query returned no data, using 0.0");
                0.0
            }
            Err(e) => {
                self.metrics.inc_query_failures();
                warn!(query = %expression.trim(), error = %e, "Metrics query failed, using 0.0");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(Component::MetricsSource, e.to_string())
                        .await;
                }
                0.0
            }
        }
    }
}
