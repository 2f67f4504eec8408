//! Kubernetes API control plane
//!
//! Scaling patches the Deployment `scale` subresource. Restarts patch the
//! pod template annotation that `kubectl rollout restart` uses, which makes
//! the Deployment controller roll every pod.

use super::{ControlPlane, DispatchError};
use crate::models::WorkloadRef;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

/// Pod template annotation bumped to trigger a rolling restart
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Control plane backed by the Kubernetes API server
///
/// The client is created on first use from the in-cluster service account
/// or the local kubeconfig, so a missing cluster configuration surfaces as
/// a dispatch error instead of a startup failure.
pub struct KubeControlPlane {
    client: OnceCell<Client>,
}

impl KubeControlPlane {
    pub fn new() -> Self {
        Self {
            client: OnceCell::new(),
        }
    }

    /// Use an already configured client
    pub fn with_client(client: Client) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
        }
    }

    async fn deployments(&self, namespace: &str) -> Result<Api<Deployment>, DispatchError> {
        let client = self
            .client
            .get_or_try_init(|| async {
                Client::try_default()
                    .await
                    .map_err(|e| DispatchError::Connection(e.to_string()))
            })
            .await?;

        Ok(Api::namespaced(client.clone(), namespace))
    }
}

impl Default for KubeControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of the scale subresource patch
pub(crate) fn scale_patch(replicas: u32) -> serde_json::Value {
    json!({ "spec": { "replicas": replicas } })
}

/// Body of the rolling restart patch
pub(crate) fn restart_patch(restarted_at: &str) -> serde_json::Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": { RESTARTED_AT_ANNOTATION: restarted_at }
                }
            }
        }
    })
}

fn map_kube_error(err: kube::Error, target: &WorkloadRef) -> DispatchError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => DispatchError::NotFound(target.clone()),
        kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => {
            DispatchError::Unauthorized(resp.message)
        }
        kube::Error::Api(resp) => DispatchError::Api(format!("{} ({})", resp.message, resp.code)),
        other => DispatchError::Connection(other.to_string()),
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn set_replicas(&self, target: &WorkloadRef, replicas: u32) -> Result<(), DispatchError> {
        let api = self.deployments(&target.namespace).await?;
        let scale = api
            .patch_scale(
                &target.name,
                &PatchParams::default(),
                &Patch::Merge(&scale_patch(replicas)),
            )
            .await
            .map_err(|e| map_kube_error(e, target))?;

        debug!(
            workload = %target,
            replicas = ?scale.spec.and_then(|s| s.replicas),
            "Scale subresource patched"
        );
        Ok(())
    }

    async fn restart(&self, target: &WorkloadRef) -> Result<(), DispatchError> {
        let api = self.deployments(&target.namespace).await?;
        let restarted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        api.patch(
            &target.name,
            &PatchParams::default(),
            &Patch::Merge(&restart_patch(&restarted_at)),
        )
        .await
        .map_err(|e| map_kube_error(e, target))?;

        debug!(workload = %target, restarted_at = %restarted_at, "Pod template annotated for restart");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {}", code),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_scale_patch_body() {
        assert_eq!(scale_patch(4), json!({"spec": {"replicas": 4}}));
    }

    #[test]
    fn test_restart_patch_body() {
        let body = restart_patch("2024-01-01T00:00:00Z");
        assert_eq!(
            body["spec"]["template"]["metadata"]["annotations"][RESTARTED_AT_ANNOTATION],
            "2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_kube_error_mapping() {
        let target = WorkloadRef::new("aegisops-app", "aegisops");

        assert!(matches!(
            map_kube_error(api_error(404), &target),
            DispatchError::NotFound(t) if t == target
        ));
        assert!(matches!(
            map_kube_error(api_error(403), &target),
            DispatchError::Unauthorized(_)
        ));
        assert!(matches!(
            map_kube_error(api_error(409), &target),
            DispatchError::Api(_)
        ));
    }
}
