//! Closed-loop remediation controller library
//!
//! This crate provides the core functionality for:
//! - Sampling workload health from a Prometheus-compatible metrics source
//! - Learning a baseline of normal behaviour with an isolation forest
//! - Cooldown-gated anomaly detection and remediation dispatch
//! - Incident notification, health checks and observability

pub mod baseline;
pub mod clock;
pub mod collector;
pub mod controller;
pub mod detector;
pub mod health;
pub mod metrics_source;
pub mod model;
pub mod models;
pub mod notifier;
pub mod observability;
pub mod remediation;

#[cfg(test)]
pub(crate) mod test_support;

pub use baseline::{BaselineConfig, BaselineError, BaselinePolicy, BaselineTrainer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::Controller;
pub use detector::{CooldownState, DetectorConfig, DetectorLoop, TickOutcome};
pub use health::{
    Component, ComponentHealth, ComponentStatus, ControllerPhase, HealthRegistry,
    HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
