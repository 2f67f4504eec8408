//! Incident notifications over an incoming-webhook channel
//!
//! Delivery is best effort: a missing endpoint or a failed POST is logged
//! and swallowed, never surfaced to the detector loop.

use crate::health::{Component, HealthRegistry};
use crate::models::{Ack, MetricSample, RemediationAction, WorkloadRef};
use crate::observability::ControllerMetrics;
use crate::remediation::DispatchError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Default timeout for a single notification POST
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable consulted when no endpoint is configured
pub const WEBHOOK_URL_ENV: &str = "SLACK_WEBHOOK_URL";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook returned HTTP {0}")]
    Status(StatusCode),
}

/// Outbound incident channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message`; failures are handled internally
    async fn notify(&self, message: &str);
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Posts `{"text": ...}` to an incoming webhook
pub struct WebhookNotifier {
    client: Client,
    endpoint: Option<Url>,
    metrics: ControllerMetrics,
    health: Option<HealthRegistry>,
}

impl WebhookNotifier {
    pub fn new(endpoint: Option<Url>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            metrics: ControllerMetrics::new(),
            health: None,
        })
    }

    /// Report delivery failures as degraded `notifier` health
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    /// Post `message`, surfacing every failure
    pub async fn try_notify(&self, endpoint: &Url, message: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(endpoint.clone())
            .json(&WebhookPayload { text: message })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) {
        let Some(endpoint) = &self.endpoint else {
            warn!("No webhook endpoint configured, incident notification skipped");
            return;
        };

        match self.try_notify(endpoint, message).await {
            Ok(()) => {
                debug!("Incident notification delivered");
                if let Some(health) = &self.health {
                    health.set_healthy(Component::Notifier).await;
                }
            }
            Err(e) => {
                self.metrics.inc_notification_failures();
                warn!(error = %e, "Failed to deliver incident notification");
                if let Some(health) = &self.health {
                    health.set_degraded(Component::Notifier, e.to_string()).await;
                }
            }
        }
    }
}

/// Everything an operator needs to know about one remediation attempt
pub struct IncidentReport<'a> {
    pub target: &'a WorkloadRef,
    pub action: Option<&'a RemediationAction>,
    pub outcome: &'a Result<Ack, DispatchError>,
    pub sample: &'a MetricSample,
    pub score: f64,
    pub at: DateTime<Utc>,
}

impl IncidentReport<'_> {
    /// Render the human-readable incident message
    pub fn message(&self) -> String {
        let action = match self.action {
            Some(action) => action.to_string(),
            None => "None configured".to_string(),
        };
        let outcome = match self.outcome {
            Ok(_) => "accepted by control plane".to_string(),
            Err(e) => format!("failed ({})", e),
        };

        format!(
            "*AegisOps Incident Detected*\n\
             Service: {}\n\
             Namespace: {}\n\
             Action: {}\n\
             Dispatch: {}\n\
             Metrics: {} anomaly_score={:.3}\n\
             Time: {}",
            self.target.name,
            self.target.namespace,
            action,
            outcome,
            self.sample,
            self.score,
            self.at.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;
    use std::num::NonZeroU32;

    fn notifier_for(url: &str) -> WebhookNotifier {
        WebhookNotifier::new(Some(Url::parse(url).unwrap()), DEFAULT_NOTIFY_TIMEOUT).unwrap()
    }

    #[tokio::test]
    async fn test_posts_text_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({"text": "disk on fire"})))
            .with_status(200)
            .create_async()
            .await;

        let notifier = notifier_for(&format!("{}/hook", server.url()));
        notifier.notify("disk on fire").await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported_by_try_notify() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/hook", server.url())).unwrap();
        let notifier = WebhookNotifier::new(Some(url.clone()), DEFAULT_NOTIFY_TIMEOUT).unwrap();

        let err = notifier.try_notify(&url, "hello").await.unwrap_err();
        assert!(matches!(err, NotifyError::Status(StatusCode::INTERNAL_SERVER_ERROR)));

        // Swallowed through the trait
        notifier.notify("hello").await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_swallowed() {
        let health = HealthRegistry::new();
        let notifier = notifier_for("http://127.0.0.1:1/hook").with_health(health.clone());

        notifier.notify("hello").await;

        let report = health.health().await;
        assert_eq!(
            report.components[&Component::Notifier].status,
            crate::health::ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_noop() {
        let notifier = WebhookNotifier::new(None, DEFAULT_NOTIFY_TIMEOUT).unwrap();
        assert!(notifier.endpoint().is_none());
        notifier.notify("hello").await;
    }

    #[test]
    fn test_incident_message_contents() {
        let target = WorkloadRef::new("aegisops-app", "aegisops");
        let action = RemediationAction::ScaleDeployment {
            target: target.clone(),
            replicas: NonZeroU32::new(4).unwrap(),
        };
        let sample = MetricSample::new(500.0, 9.0, 5e9);
        let outcome = Ok(Ack {
            action: "scale",
            target: target.clone(),
            accepted_at: Utc::now(),
        });

        let message = IncidentReport {
            target: &target,
            action: Some(&action),
            outcome: &outcome,
            sample: &sample,
            score: 0.71,
            at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
        .message();

        assert!(message.starts_with("*AegisOps Incident Detected*"));
        assert!(message.contains("Service: aegisops-app"));
        assert!(message.contains("Namespace: aegisops"));
        assert!(message.contains("Action: Auto-scaled to 4 replicas"));
        assert!(message.contains("Dispatch: accepted by control plane"));
        assert!(message.contains("rps=500.000"));
        assert!(message.contains("Time: 2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_incident_message_reports_dispatch_failure() {
        let target = WorkloadRef::new("aegisops-app", "aegisops");
        let sample = MetricSample::new(500.0, 9.0, 5e9);
        let outcome = Err(DispatchError::NotFound(target.clone()));

        let message = IncidentReport {
            target: &target,
            action: None,
            outcome: &outcome,
            sample: &sample,
            score: 0.8,
            at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
        .message();

        assert!(message.contains("Action: None configured"));
        assert!(message.contains("Dispatch: failed (workload aegisops/aegisops-app not found)"));
    }
}
