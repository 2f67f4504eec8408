//! Core data models for the remediation controller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

/// Health observations for the target workload taken at one instant
///
/// Every field is a non-negative finite value. Readings that are negative,
/// NaN or infinite are normalised to `0.0` when the sample is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Requests per second
    pub request_rate: f64,
    /// 95th percentile request latency in seconds
    pub latency_p95: f64,
    /// Resident memory in bytes
    pub memory_bytes: f64,
}

impl MetricSample {
    pub fn new(request_rate: f64, latency_p95: f64, memory_bytes: f64) -> Self {
        Self {
            request_rate: sanitize(request_rate),
            latency_p95: sanitize(latency_p95),
            memory_bytes: sanitize(memory_bytes),
        }
    }

    /// True for cold-start/idle samples: no requests and no latency signal
    pub fn is_degenerate(&self) -> bool {
        self.request_rate == 0.0 && self.latency_p95 == 0.0
    }

    /// True when the workload served no requests, even if a stale latency
    /// reading is still around
    pub fn has_no_traffic(&self) -> bool {
        self.request_rate == 0.0
    }

    /// Fixed-order feature vector used by the anomaly model
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [self.request_rate, self.latency_p95, self.memory_bytes]
    }
}

impl fmt::Display for MetricSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rps={:.3} latency_p95={:.3}s memory_bytes={:.0}",
            self.request_rate, self.latency_p95, self.memory_bytes
        )
    }
}

/// Number of features in a [`MetricSample`]
pub const FEATURE_COUNT: usize = 3;

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Identity of the supervised workload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub name: String,
    pub namespace: String,
}

impl WorkloadRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Corrective action taken when an anomaly passes the cooldown gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationAction {
    /// Set the deployment's desired replica count
    ScaleDeployment {
        target: WorkloadRef,
        replicas: NonZeroU32,
    },
    /// Trigger a rolling restart of the deployment
    RestartDeployment { target: WorkloadRef },
}

impl RemediationAction {
    pub fn target(&self) -> &WorkloadRef {
        match self {
            RemediationAction::ScaleDeployment { target, .. } => target,
            RemediationAction::RestartDeployment { target } => target,
        }
    }

    /// Short label used in metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            RemediationAction::ScaleDeployment { .. } => "scale",
            RemediationAction::RestartDeployment { .. } => "restart",
        }
    }
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationAction::ScaleDeployment { replicas, .. } => {
                write!(f, "Auto-scaled to {} replicas", replicas)
            }
            RemediationAction::RestartDeployment { .. } => write!(f, "Rolling restart triggered"),
        }
    }
}

/// Model classification for a single sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Normal,
    Anomalous,
}

/// Classification plus the raw anomaly score in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    pub classification: Classification,
    pub score: f64,
}

impl Verdict {
    pub fn is_anomalous(&self) -> bool {
        self.classification == Classification::Anomalous
    }
}

/// Control plane acknowledgement of a remediation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub action: &'static str,
    pub target: WorkloadRef,
    pub accepted_at: DateTime<Utc>,
}
