//! Controller lifecycle: warm-up training followed by steady-state detection

use crate::baseline::{BaselineConfig, BaselineError, BaselineTrainer};
use crate::clock::Clock;
use crate::collector::SampleSource;
use crate::detector::{DetectorConfig, DetectorLoop};
use crate::health::{Component, ControllerPhase, HealthRegistry};
use crate::model::AnomalyModelFitter;
use crate::models::{RemediationAction, WorkloadRef};
use crate::notifier::Notifier;
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::remediation::RemediationDispatcher;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Supervises one workload for the lifetime of the process
pub struct Controller {
    target: WorkloadRef,
    source: Arc<dyn SampleSource>,
    fitter: Arc<dyn AnomalyModelFitter>,
    dispatcher: RemediationDispatcher,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    baseline: BaselineConfig,
    detector: DetectorConfig,
    action: Option<RemediationAction>,
    health: HealthRegistry,
    metrics: ControllerMetrics,
}

impl Controller {
    pub fn new(
        target: WorkloadRef,
        source: Arc<dyn SampleSource>,
        fitter: Arc<dyn AnomalyModelFitter>,
        dispatcher: RemediationDispatcher,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        baseline: BaselineConfig,
    ) -> Self {
        Self {
            target,
            source,
            fitter,
            dispatcher,
            notifier,
            clock,
            baseline,
            detector: DetectorConfig::default(),
            action: None,
            health: HealthRegistry::new(),
            metrics: ControllerMetrics::new(),
        }
    }

    pub fn with_detector_config(mut self, config: DetectorConfig) -> Self {
        self.detector = config;
        self
    }

    pub fn with_action(mut self, action: Option<RemediationAction>) -> Self {
        self.action = action;
        self
    }

    /// Share a health registry with the management API
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Train the baseline, then run the detector until shutdown
    ///
    /// Returns an error only when the baseline cannot be established under
    /// the strict policy or the model cannot be fitted.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), BaselineError> {
        let logger = StructuredLogger::new(&self.target);
        logger.log_startup(env!("CARGO_PKG_VERSION"), &self.baseline.policy.to_string());

        for component in Component::ALL {
            self.health.register(component).await;
        }
        self.enter(ControllerPhase::Warmup).await;

        let trainer = BaselineTrainer::new(
            self.source.clone(),
            self.fitter.clone(),
            self.clock.clone(),
            self.baseline.clone(),
            logger.clone(),
        );

        let trained = tokio::select! {
            biased;

            _ = shutdown.recv() => {
                logger.log_shutdown("shutdown during baseline training");
                return Ok(());
            }
            result = trainer.train() => result,
        };

        let trained = match trained {
            Ok(trained) => trained,
            Err(e) => {
                self.health
                    .set_unhealthy(Component::Baseline, e.to_string())
                    .await;
                self.enter(ControllerPhase::Failed).await;
                return Err(e);
            }
        };

        self.health.set_healthy(Component::Baseline).await;
        self.enter(ControllerPhase::Steady).await;

        DetectorLoop::new(
            self.target,
            self.detector,
            self.source,
            trained.model,
            self.dispatcher,
            self.notifier,
            self.clock,
        )
        .with_action(self.action)
        .with_health(self.health)
        .run(shutdown)
        .await;

        Ok(())
    }

    async fn enter(&self, phase: ControllerPhase) {
        self.metrics.set_phase(phase.gauge_value());
        self.health.set_phase(phase).await;
    }
}
