//! Remediation dispatch against the orchestration control plane
//!
//! Dispatch is fire-and-forget: a request counts as done once the control
//! plane accepts it. Every failure comes back as a [`DispatchError`] and
//! never escapes further than the detector tick that triggered it.

mod kube_api;
mod kubectl;

pub use kube_api::{KubeControlPlane, RESTARTED_AT_ANNOTATION};
pub use kubectl::KubectlControlPlane;

use crate::models::{Ack, RemediationAction, WorkloadRef};
use crate::observability::ControllerMetrics;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default upper bound on a single control plane call
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a remediation request was not accepted
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("workload {0} not found")]
    NotFound(WorkloadRef),

    #[error("control plane rejected credentials: {0}")]
    Unauthorized(String),

    #[error("control plane API error: {0}")]
    Api(String),

    #[error("could not reach control plane: {0}")]
    Connection(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("control plane did not answer within {0:?}")]
    Timeout(Duration),

    #[error("no remediation action configured")]
    NotConfigured,
}

/// Operations the controller needs from the orchestration layer
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Set the desired replica count of a deployment
    async fn set_replicas(&self, target: &WorkloadRef, replicas: u32) -> Result<(), DispatchError>;

    /// Trigger a rolling restart of a deployment
    async fn restart(&self, target: &WorkloadRef) -> Result<(), DispatchError>;
}

/// Performs remediation actions with a bounded wait
pub struct RemediationDispatcher {
    control_plane: Arc<dyn ControlPlane>,
    timeout: Duration,
    metrics: ControllerMetrics,
}

impl RemediationDispatcher {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            timeout: DEFAULT_DISPATCH_TIMEOUT,
            metrics: ControllerMetrics::new(),
        }
    }

    /// Set custom dispatch timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the control plane to perform `action`
    pub async fn dispatch(&self, action: &RemediationAction) -> Result<Ack, DispatchError> {
        let request = async {
            match action {
                RemediationAction::ScaleDeployment { target, replicas } => {
                    self.control_plane.set_replicas(target, replicas.get()).await
                }
                RemediationAction::RestartDeployment { target } => {
                    self.control_plane.restart(target).await
                }
            }
        };

        let result = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
        };

        match result {
            Ok(()) => {
                self.metrics.inc_remediation(action.kind(), "accepted");
                info!(
                    action = action.kind(),
                    workload = %action.target(),
                    "Remediation request accepted by control plane"
                );
                Ok(Ack {
                    action: action.kind(),
                    target: action.target().clone(),
                    accepted_at: Utc::now(),
                })
            }
            Err(e) => {
                self.metrics.inc_remediation(action.kind(), "failed");
                warn!(
                    action = action.kind(),
                    workload = %action.target(),
                    error = %e,
                    "Remediation request failed"
                );
                Err(e)
            }
        }
    }
}
