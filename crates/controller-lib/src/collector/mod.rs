//! Sample collection from the metrics source
//!
//! Turns the fixed set of health queries into one [`MetricSample`] per tick.

use crate::metrics_source::MetricsSource;
use crate::models::MetricSample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default request-rate expression
pub const DEFAULT_REQUEST_RATE_QUERY: &str = "rate(http_requests_total[1m])";

/// Default p95 latency expression
pub const DEFAULT_LATENCY_P95_QUERY: &str =
    "histogram_quantile(0.95, rate(http_request_latency_seconds_bucket[1m]))";

/// Default resident memory expression
pub const DEFAULT_MEMORY_QUERY: &str = "process_resident_memory_bytes";

/// Trait for anything that produces one sample per tick
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Take one sample of the target workload
    async fn collect(&self) -> MetricSample;
}

/// Query expressions for each sample field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySet {
    pub request_rate: String,
    pub latency_p95: String,
    pub memory: String,
}

impl Default for QuerySet {
    fn default() -> Self {
        Self {
            request_rate: DEFAULT_REQUEST_RATE_QUERY.to_string(),
            latency_p95: DEFAULT_LATENCY_P95_QUERY.to_string(),
            memory: DEFAULT_MEMORY_QUERY.to_string(),
        }
    }
}

/// Collects samples by running the query set against a metrics source
pub struct SampleCollector {
    source: Arc<dyn MetricsSource>,
    queries: QuerySet,
}

impl SampleCollector {
    pub fn new(source: Arc<dyn MetricsSource>, queries: QuerySet) -> Self {
        Self { source, queries }
    }

    pub fn queries(&self) -> &QuerySet {
        &self.queries
    }
}

#[async_trait]
impl SampleSource for SampleCollector {
    async fn collect(&self) -> MetricSample {
        let (request_rate, latency_p95, memory_bytes) = tokio::join!(
            self.source.query(&self.queries.request_rate),
            self.source.query(&self.queries.latency_p95),
            self.source.query(&self.queries.memory),
        );

        MetricSample::new(request_rate, latency_p95, memory_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Metrics source answering from a fixed expression table
    struct TableSource {
        values: HashMap<String, f64>,
        calls: AtomicUsize,
    }

    impl TableSource {
        fn new(entries: &[(&str, f64)]) -> Self {
            Self {
                values: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MetricsSource for TableSource {
        async fn query(&self, expression: &str) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.values.get(expression).copied().unwrap_or(0.0)
        }
    }

    #[tokio::test]
    async fn test_collect_maps_each_query() {
        let source = Arc::new(TableSource::new(&[
            (DEFAULT_REQUEST_RATE_QUERY, 50.0),
            (DEFAULT_LATENCY_P95_QUERY, 0.2),
            (DEFAULT_MEMORY_QUERY, 1.2e8),
        ]));
        let collector = SampleCollector::new(source.clone(), QuerySet::default());

        let sample = collector.collect().await;

        assert_eq!(sample, MetricSample::new(50.0, 0.2, 1.2e8));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_collect_normalises_bad_readings() {
        let source = Arc::new(TableSource::new(&[
            (DEFAULT_REQUEST_RATE_QUERY, f64::NAN),
            (DEFAULT_LATENCY_P95_QUERY, -1.0),
        ]));
        let collector = SampleCollector::new(source, QuerySet::default());

        let sample = collector.collect().await;

        assert!(sample.is_degenerate());
        assert_eq!(sample.memory_bytes, 0.0);
    }

    #[tokio::test]
    async fn test_collect_uses_custom_queries() {
        let queries = QuerySet {
            request_rate: "sum(rate(requests[5m]))".to_string(),
            ..QuerySet::default()
        };
        let source = Arc::new(TableSource::new(&[("sum(rate(requests[5m]))", 12.5)]));
        let collector = SampleCollector::new(source, queries);

        let sample = collector.collect().await;

        assert_eq!(sample.request_rate, 12.5);
        assert!(!sample.is_degenerate());
    }
}
