//! Steady-state detector loop
//!
//! Each tick collects one sample, scores it against the frozen baseline model
//! and, when the sample is anomalous and the cooldown gate is open, dispatches
//! the configured remediation and notifies the incident channel. Ticks are
//! strictly sequential; the cooldown state is owned by the loop.

use crate::clock::Clock;
use crate::collector::SampleSource;
use crate::health::{Component, HealthRegistry};
use crate::model::AnomalyModel;
use crate::models::{MetricSample, RemediationAction, WorkloadRef};
use crate::notifier::{IncidentReport, Notifier};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::remediation::{DispatchError, RemediationDispatcher};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

/// Default pause between steady-state ticks
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Default minimum time between two remediation dispatches
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);

/// Configuration for the detector loop
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub monitor_interval: Duration,
    pub cooldown: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Time of the last remediation attempt, successful or not
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownState {
    last_remediation: Option<DateTime<Utc>>,
}

impl CooldownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_remediation(&self) -> Option<DateTime<Utc>> {
        self.last_remediation
    }

    /// A remediation may fire when none happened yet or strictly more than
    /// `cooldown` has elapsed since the last one.
    ///
    /// A clock that went backwards keeps the gate closed.
    pub fn is_open(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.last_remediation {
            None => true,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed > cooldown,
                Err(_) => false,
            },
        }
    }

    /// Time until the gate opens again
    pub fn remaining(&self, now: DateTime<Utc>, cooldown: Duration) -> Duration {
        match self.last_remediation {
            None => Duration::ZERO,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => cooldown.saturating_sub(elapsed),
                Err(_) => cooldown,
            },
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.last_remediation = Some(at);
    }
}

/// What a single tick decided
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No requests served; the model is not consulted
    NoTraffic,
    Normal { score: f64 },
    /// Remediation attempted; `accepted` reports the control plane answer
    Remediated { score: f64, accepted: bool },
    /// Anomalous, but inside the cooldown window
    AnomalySuppressed { score: f64 },
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::NoTraffic => "no_traffic",
            TickOutcome::Normal { .. } => "normal",
            TickOutcome::Remediated { .. } => "remediated",
            TickOutcome::AnomalySuppressed { .. } => "anomaly_suppressed",
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            TickOutcome::NoTraffic => None,
            TickOutcome::Normal { score }
            | TickOutcome::Remediated { score, .. }
            | TickOutcome::AnomalySuppressed { score } => Some(*score),
        }
    }
}

/// The steady-state control loop
pub struct DetectorLoop {
    target: WorkloadRef,
    config: DetectorConfig,
    source: Arc<dyn SampleSource>,
    model: Arc<dyn AnomalyModel>,
    dispatcher: RemediationDispatcher,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    action: Option<RemediationAction>,
    cooldown: CooldownState,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
    metrics: ControllerMetrics,
}

impl DetectorLoop {
    pub fn new(
        target: WorkloadRef,
        config: DetectorConfig,
        source: Arc<dyn SampleSource>,
        model: Arc<dyn AnomalyModel>,
        dispatcher: RemediationDispatcher,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let logger = StructuredLogger::new(&target);
        Self {
            target,
            config,
            source,
            model,
            dispatcher,
            notifier,
            clock,
            action: None,
            cooldown: CooldownState::new(),
            health: None,
            logger,
            metrics: ControllerMetrics::new(),
        }
    }

    /// Remediation to perform on anomalies; `None` only notifies
    pub fn with_action(mut self, action: Option<RemediationAction>) -> Self {
        self.action = action;
        self
    }

    /// Report component health
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn cooldown(&self) -> &CooldownState {
        &self.cooldown
    }

    /// Run ticks until a shutdown signal arrives
    ///
    /// The signal is checked between ticks; a tick in progress always
    /// completes.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            target_workload = %self.target,
            interval_secs = self.config.monitor_interval.as_secs(),
            cooldown_secs = self.config.cooldown.as_secs(),
            "Starting detector loop"
        );

        loop {
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }

            self.tick().await;

            tokio::select! {
                biased;

                _ = shutdown.recv() => break,
                _ = self.clock.sleep(self.config.monitor_interval) => {}
            }
        }

        self.logger.log_shutdown("shutdown signal received");
    }

    /// Collect, classify and maybe remediate once
    pub async fn tick(&mut self) -> TickOutcome {
        let sample = self.source.collect().await;

        let outcome = if sample.has_no_traffic() {
            TickOutcome::NoTraffic
        } else {
            let verdict = self.model.evaluate(&sample);
            self.metrics.set_anomaly_score(verdict.score);

            if !verdict.is_anomalous() {
                TickOutcome::Normal {
                    score: verdict.score,
                }
            } else {
                let now = self.clock.now();
                if self.cooldown.is_open(now, self.config.cooldown) {
                    let accepted = self.remediate(&sample, verdict.score, now).await;
                    self.cooldown.record(now);
                    TickOutcome::Remediated {
                        score: verdict.score,
                        accepted,
                    }
                } else {
                    let remaining = self.cooldown.remaining(now, self.config.cooldown);
                    self.logger
                        .log_anomaly_suppressed(verdict.score, remaining.as_secs() as i64);
                    TickOutcome::AnomalySuppressed {
                        score: verdict.score,
                    }
                }
            }
        };

        self.metrics.inc_tick(outcome.label());
        self.logger.log_tick(outcome.label(), &sample, outcome.score());
        if let Some(health) = &self.health {
            health.set_healthy(Component::Detector).await;
            health.record_tick(self.clock.now()).await;
        }

        outcome
    }

    async fn remediate(&self, sample: &MetricSample, score: f64, now: DateTime<Utc>) -> bool {
        let result = match &self.action {
            Some(action) => self.dispatcher.dispatch(action).await,
            None => {
                warn!("Anomaly detected but no remediation action is configured");
                Err(DispatchError::NotConfigured)
            }
        };
        let kind = self.action.as_ref().map_or("none", RemediationAction::kind);

        match &result {
            Ok(_) => {
                self.logger.log_remediation(kind, sample, score);
                if let Some(health) = &self.health {
                    health.set_healthy(Component::Dispatcher).await;
                }
            }
            Err(e) => {
                self.logger.log_remediation_failed(kind, &e.to_string());
                if let Some(health) = &self.health {
                    health
                        .set_degraded(Component::Dispatcher, e.to_string())
                        .await;
                }
            }
        }

        let report = IncidentReport {
            target: &self.target,
            action: self.action.as_ref(),
            outcome: &result,
            sample,
            score,
            at: now,
        };
        self.notifier.notify(&report.message()).await;

        result.is_ok()
    }
}
