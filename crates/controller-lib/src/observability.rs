//! Observability infrastructure for the controller
//!
//! Provides:
//! - Prometheus metrics (tick outcomes, query latency, remediations, anomaly score)
//! - Structured JSON logging with tracing

use crate::models::{MetricSample, WorkloadRef};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for upstream query latency (in seconds)
const QUERY_LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    ticks_total: IntCounterVec,
    query_latency_seconds: Histogram,
    query_failures: IntCounter,
    query_empty: IntCounter,
    remediations_total: IntCounterVec,
    notification_failures: IntCounter,
    anomaly_score: Gauge,
    baseline_samples: IntGauge,
    phase: IntGauge,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            ticks_total: register_int_counter_vec!(
                "aegis_controller_ticks_total",
                "Steady-state ticks by outcome",
                &["outcome"]
            )
            .expect("Failed to register ticks_total"),

            query_latency_seconds: register_histogram!(
                "aegis_controller_query_latency_seconds",
                "Time spent querying the metrics source",
                QUERY_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register query_latency_seconds"),

            query_failures: register_int_counter!(
                "aegis_controller_query_failures_total",
                "Metrics queries that fell back to zero"
            )
            .expect("Failed to register query_failures"),

            query_empty: register_int_counter!(
                "aegis_controller_query_empty_total",
                "Metrics queries that returned no finite sample"
            )
            .expect("Failed to register query_empty"),

            remediations_total: register_int_counter_vec!(
                "aegis_controller_remediations_total",
                "Remediation dispatch attempts by action and result",
                &["action", "result"]
            )
            .expect("Failed to register remediations_total"),

            notification_failures: register_int_counter!(
                "aegis_controller_notification_failures_total",
                "Incident notifications that could not be delivered"
            )
            .expect("Failed to register notification_failures"),

            anomaly_score: register_gauge!(
                "aegis_controller_anomaly_score",
                "Anomaly score of the most recently scored sample"
            )
            .expect("Failed to register anomaly_score"),

            baseline_samples: register_int_gauge!(
                "aegis_controller_baseline_samples",
                "Non-degenerate samples retained for the baseline"
            )
            .expect("Failed to register baseline_samples"),

            phase: register_int_gauge!(
                "aegis_controller_phase",
                "Controller phase (0 = warmup, 1 = steady, 2 = failed)"
            )
            .expect("Failed to register phase"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn inc_tick(&self, outcome: &str) {
        self.inner().ticks_total.with_label_values(&[outcome]).inc();
    }

    pub fn observe_query_latency(&self, duration_secs: f64) {
        self.inner().query_latency_seconds.observe(duration_secs);
    }

    pub fn inc_query_failures(&self) {
        self.inner().query_failures.inc();
    }

    pub fn inc_query_empty(&self) {
        self.inner().query_empty.inc();
    }

    pub fn query_empty_total(&self) -> u64 {
        self.inner().query_empty.get()
    }

    pub fn inc_remediation(&self, action: &str, result: &str) {
        self.inner()
            .remediations_total
            .with_label_values(&[action, result])
            .inc();
    }

    pub fn inc_notification_failures(&self) {
        self.inner().notification_failures.inc();
    }

    pub fn set_anomaly_score(&self, score: f64) {
        self.inner().anomaly_score.set(score);
    }

    pub fn set_baseline_samples(&self, count: i64) {
        self.inner().baseline_samples.set(count);
    }

    pub fn set_phase(&self, phase: i64) {
        self.inner().phase.set(phase);
    }

    /// Text exposition of the default registry
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.inner();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for controller events
///
/// Every event carries the supervised workload so log lines can be
/// correlated across restarts.
#[derive(Clone)]
pub struct StructuredLogger {
    workload: String,
}

impl StructuredLogger {
    pub fn new(target: &WorkloadRef) -> Self {
        Self {
            workload: target.to_string(),
        }
    }

    pub fn log_startup(&self, version: &str, policy: &str) {
        info!(
            event = "controller_started",
            workload = %self.workload,
            controller_version = %version,
            baseline_policy = %policy,
            "Remediation controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            workload = %self.workload,
            reason = %reason,
            "Remediation controller shutting down"
        );
    }

    pub fn log_baseline_sample(&self, sample: &MetricSample, retained: usize) {
        info!(
            event = "baseline_sample",
            workload = %self.workload,
            request_rate = sample.request_rate,
            latency_p95 = sample.latency_p95,
            memory_bytes = sample.memory_bytes,
            retained = retained,
            "Baseline sample retained"
        );
    }

    pub fn log_baseline_skipped(&self, sample: &MetricSample) {
        info!(
            event = "baseline_skipped",
            workload = %self.workload,
            request_rate = sample.request_rate,
            latency_p95 = sample.latency_p95,
            memory_bytes = sample.memory_bytes,
            "Skipping cold-start sample"
        );
    }

    pub fn log_baseline_waiting(&self, retained: usize, required: usize) {
        info!(
            event = "baseline_waiting",
            workload = %self.workload,
            retained = retained,
            required = required,
            "Waiting for sufficient baseline traffic"
        );
    }

    pub fn log_baseline_insufficient(&self, retained: usize, required: usize, attempts: usize) {
        error!(
            event = "baseline_insufficient",
            workload = %self.workload,
            retained = retained,
            required = required,
            attempts = attempts,
            "Insufficient baseline data"
        );
    }

    pub fn log_baseline_trained(&self, samples: usize, attempts: usize) {
        info!(
            event = "baseline_trained",
            workload = %self.workload,
            samples = samples,
            attempts = attempts,
            "Baseline trained, monitoring for anomalies"
        );
    }

    pub fn log_tick(&self, outcome: &str, sample: &MetricSample, score: Option<f64>) {
        info!(
            event = "tick",
            workload = %self.workload,
            outcome = %outcome,
            request_rate = sample.request_rate,
            latency_p95 = sample.latency_p95,
            memory_bytes = sample.memory_bytes,
            anomaly_score = ?score,
            "Tick evaluated"
        );
    }

    pub fn log_remediation(&self, action: &str, sample: &MetricSample, score: f64) {
        warn!(
            event = "remediation_dispatched",
            workload = %self.workload,
            action = %action,
            request_rate = sample.request_rate,
            latency_p95 = sample.latency_p95,
            memory_bytes = sample.memory_bytes,
            anomaly_score = score,
            "Anomaly detected, remediation accepted"
        );
    }

    pub fn log_remediation_failed(&self, action: &str, reason: &str) {
        error!(
            event = "remediation_failed",
            workload = %self.workload,
            action = %action,
            reason = %reason,
            "Anomaly detected, remediation failed; cooldown still applies"
        );
    }

    pub fn log_anomaly_suppressed(&self, score: f64, cooldown_remaining_secs: i64) {
        info!(
            event = "anomaly_suppressed",
            workload = %self.workload,
            anomaly_score = score,
            cooldown_remaining_secs = cooldown_remaining_secs,
            "Anomaly detected but cooldown active, skipping remediation"
        );
    }
}
