//! Controller status served on `/healthz` and `/readyz`
//!
//! A report carries the lifecycle phase, the time of the last detector tick
//! and one entry per collaborator. Collaborators only ever degrade: the
//! detector keeps ticking through a failing metrics source, control plane or
//! webhook. A baseline that cannot be established is the one unhealthy
//! state, and the process exits right after reporting it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lifecycle phase, also exported as the `aegis_controller_phase` gauge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerPhase {
    /// Collecting baseline samples
    #[default]
    Warmup,
    /// Baseline trained, detector loop running
    Steady,
    /// Baseline could not be established
    Failed,
}

impl ControllerPhase {
    pub fn gauge_value(self) -> i64 {
        match self {
            ControllerPhase::Warmup => 0,
            ControllerPhase::Steady => 1,
            ControllerPhase::Failed => 2,
        }
    }
}

/// Collaborators tracked in the status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    MetricsSource,
    Baseline,
    Detector,
    Dispatcher,
    Notifier,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::MetricsSource,
        Component::Baseline,
        Component::Detector,
        Component::Dispatcher,
        Component::Notifier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Component::MetricsSource => "metrics_source",
            Component::Baseline => "baseline",
            Component::Detector => "detector",
            Component::Dispatcher => "dispatcher",
            Component::Notifier => "notifier",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component status, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Whether the controller still does useful work in this state
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component entered its current status
    pub since: DateTime<Utc>,
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub phase: ControllerPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick: Option<DateTime<Utc>>,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub phase: ControllerPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct ControllerStatus {
    phase: ControllerPhase,
    last_tick: Option<DateTime<Utc>>,
    components: BTreeMap<Component, ComponentHealth>,
}

impl ControllerStatus {
    fn worst_component(&self) -> Option<(Component, &ComponentHealth)> {
        self.components
            .iter()
            .max_by_key(|(_, health)| health.status)
            .map(|(component, health)| (*component, health))
    }
}

/// Shared, cloneable view of the controller's status
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    status: Arc<RwLock<ControllerStatus>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy; no-op if already tracked
    pub async fn register(&self, component: Component) {
        let mut status = self.status.write().await;
        status
            .components
            .entry(component)
            .or_insert_with(|| ComponentHealth {
                status: ComponentStatus::Healthy,
                message: None,
                since: Utc::now(),
            });
    }

    pub async fn set_healthy(&self, component: Component) {
        self.transition(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.transition(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.transition(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Record a status; `since` only moves when the status changes
    async fn transition(
        &self,
        component: Component,
        new_status: ComponentStatus,
        message: Option<String>,
    ) {
        let now = Utc::now();
        let mut status = self.status.write().await;
        let entry = status
            .components
            .entry(component)
            .or_insert_with(|| ComponentHealth {
                status: new_status,
                message: None,
                since: now,
            });

        if entry.status != new_status {
            entry.status = new_status;
            entry.since = now;
        }
        entry.message = message;
    }

    pub async fn set_phase(&self, phase: ControllerPhase) {
        self.status.write().await.phase = phase;
    }

    pub async fn phase(&self) -> ControllerPhase {
        self.status.read().await.phase
    }

    /// Note that the detector completed a tick at `at`
    pub async fn record_tick(&self, at: DateTime<Utc>) {
        self.status.write().await.last_tick = Some(at);
    }

    pub async fn health(&self) -> HealthResponse {
        let status = self.status.read().await;
        let worst = status
            .worst_component()
            .map_or(ComponentStatus::Healthy, |(_, health)| health.status);
        let overall = if status.phase == ControllerPhase::Failed {
            ComponentStatus::Unhealthy
        } else {
            worst
        };

        HealthResponse {
            status: overall,
            phase: status.phase,
            last_tick: status.last_tick,
            components: status.components.clone(),
        }
    }

    /// Ready once the detector loop runs and nothing is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let status = self.status.read().await;

        let reason = match status.phase {
            ControllerPhase::Warmup => Some("Baseline training in progress".to_string()),
            ControllerPhase::Failed => Some("Baseline could not be established".to_string()),
            ControllerPhase::Steady => match status.worst_component() {
                Some((component, health)) if !health.status.is_operational() => {
                    Some(format!("Component {} unhealthy", component))
                }
                _ => None,
            },
        };

        ReadinessResponse {
            ready: reason.is_none(),
            phase: status.phase,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn registry_with_all() -> HealthRegistry {
        let registry = HealthRegistry::new();
        for component in Component::ALL {
            registry.register(component).await;
        }
        registry
    }

    #[tokio::test]
    async fn test_new_registry_is_warming_up() {
        let registry = HealthRegistry::new();

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.phase, ControllerPhase::Warmup);
        assert!(health.last_tick.is_none());
        assert!(health.components.is_empty());

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Baseline training in progress"));
    }

    #[tokio::test]
    async fn test_degraded_collaborator_keeps_controller_ready() {
        let registry = registry_with_all().await;
        registry.set_phase(ControllerPhase::Steady).await;
        registry
            .set_degraded(Component::Dispatcher, "workload aegisops/aegisops-app not found")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.status.is_operational());
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_failed_phase_is_unhealthy_and_not_ready() {
        let registry = registry_with_all().await;
        registry
            .set_unhealthy(Component::Baseline, "insufficient baseline data")
            .await;
        registry.set_phase(ControllerPhase::Failed).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(health.phase, ControllerPhase::Failed);

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Baseline could not be established")
        );
    }

    #[tokio::test]
    async fn test_unhealthy_component_blocks_steady_readiness() {
        let registry = registry_with_all().await;
        registry.set_phase(ControllerPhase::Steady).await;
        registry
            .set_unhealthy(Component::MetricsSource, "connection refused")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.phase, ControllerPhase::Steady);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Component metrics_source unhealthy")
        );
    }

    #[tokio::test]
    async fn test_since_only_moves_on_status_change() {
        let registry = registry_with_all().await;
        registry.set_degraded(Component::Notifier, "timeout").await;
        let first = registry.health().await.components[&Component::Notifier].since;

        registry.set_degraded(Component::Notifier, "status 500").await;
        let health = registry.health().await;
        let notifier = &health.components[&Component::Notifier];

        assert_eq!(notifier.since, first);
        assert_eq!(notifier.message.as_deref(), Some("status 500"));
    }

    #[tokio::test]
    async fn test_register_keeps_existing_status() {
        let registry = HealthRegistry::new();
        registry.set_degraded(Component::MetricsSource, "status 503").await;
        registry.register(Component::MetricsSource).await;

        let health = registry.health().await;
        assert_eq!(
            health.components[&Component::MetricsSource].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_report_serializes_phase_and_last_tick() {
        let registry = registry_with_all().await;
        registry.set_phase(ControllerPhase::Steady).await;
        let tick = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        registry.record_tick(tick).await;

        let body = serde_json::to_value(registry.health().await).unwrap();

        assert_eq!(body["phase"], "steady");
        assert_eq!(body["last_tick"], "2024-01-01T12:00:00Z");
        assert_eq!(body["components"]["metrics_source"]["status"], "healthy");
    }

    #[test]
    fn test_phase_gauge_values() {
        assert_eq!(ControllerPhase::Warmup.gauge_value(), 0);
        assert_eq!(ControllerPhase::Steady.gauge_value(), 1);
        assert_eq!(ControllerPhase::Failed.gauge_value(), 2);
    }
}
