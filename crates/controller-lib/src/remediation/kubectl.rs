//! `kubectl` command control plane
//!
//! Equivalent to the API backend for environments where only the CLI is
//! available (e.g. a sidecar with a mounted kubeconfig).

use super::{ControlPlane, DispatchError};
use crate::models::WorkloadRef;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Control plane that shells out to `kubectl`
pub struct KubectlControlPlane {
    program: PathBuf,
}

impl KubectlControlPlane {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<(), DispatchError> {
        let program = self.program.display().to_string();
        debug!(program = %program, args = ?args, "Running kubectl");

        // Dropped on dispatch timeout; the child must not outlive the tick
        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DispatchError::Spawn {
                program: program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(DispatchError::Command {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Default for KubectlControlPlane {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

fn scale_args(target: &WorkloadRef, replicas: u32) -> Vec<String> {
    vec![
        "scale".to_string(),
        format!("deployment/{}", target.name),
        "-n".to_string(),
        target.namespace.clone(),
        format!("--replicas={}", replicas),
    ]
}

fn restart_args(target: &WorkloadRef) -> Vec<String> {
    vec![
        "rollout".to_string(),
        "restart".to_string(),
        format!("deployment/{}", target.name),
        "-n".to_string(),
        target.namespace.clone(),
    ]
}

#[async_trait]
impl ControlPlane for KubectlControlPlane {
    async fn set_replicas(&self, target: &WorkloadRef, replicas: u32) -> Result<(), DispatchError> {
        self.run(scale_args(target, replicas)).await
    }

    async fn restart(&self, target: &WorkloadRef) -> Result<(), DispatchError> {
        self.run(restart_args(target)).await
    }
}
