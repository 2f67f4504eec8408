//! Baseline acquisition and model training
//!
//! Runs once at startup: gathers non-degenerate samples until the baseline
//! is large enough, fits the anomaly model over them and hands back the
//! frozen model.

use crate::clock::Clock;
use crate::collector::SampleSource;
use crate::model::{AnomalyModel, AnomalyModelFitter, ModelError};
use crate::models::MetricSample;
use crate::observability::{ControllerMetrics, StructuredLogger};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default number of warm-up sampling attempts
pub const DEFAULT_BASELINE_SAMPLES: usize = 30;

/// Default pause between warm-up samples
pub const DEFAULT_BASELINE_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum number of valid samples required to fit the model
pub const MIN_BASELINE_SAMPLES: usize = 10;

/// What to do when the warm-up attempts yield too few valid samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselinePolicy {
    /// Fail startup; the controller cannot run without a trustworthy baseline
    Strict,
    /// Keep sampling until the minimum is reached
    Patient,
}

impl fmt::Display for BaselinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaselinePolicy::Strict => write!(f, "strict"),
            BaselinePolicy::Patient => write!(f, "patient"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown baseline policy {0:?}, expected \"strict\" or \"patient\"")]
pub struct ParsePolicyError(String);

impl FromStr for BaselinePolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(BaselinePolicy::Strict),
            "patient" => Ok(BaselinePolicy::Patient),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

/// Baseline failures
#[derive(Debug, Error, PartialEq)]
pub enum BaselineError {
    #[error(
        "insufficient baseline data: {retained} valid samples after {attempts} attempts, \
         at least {required} required"
    )]
    Insufficient {
        retained: usize,
        required: usize,
        attempts: usize,
    },

    #[error("failed to fit anomaly model: {0}")]
    Model(#[from] ModelError),
}

/// Samples collected during warm-up, in collection order
#[derive(Debug, Clone, Default)]
pub struct BaselineSet {
    samples: Vec<MetricSample>,
}

impl BaselineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }
}

/// Configuration for baseline acquisition
#[derive(Debug, Clone)]
pub struct BaselineConfig {
    /// Number of sampling attempts in the fixed warm-up window
    pub attempts: usize,
    /// Pause after each sample
    pub interval: Duration,
    /// Valid samples required before fitting
    pub min_samples: usize,
    /// Behaviour when the warm-up window yields too few samples
    pub policy: BaselinePolicy,
}

impl BaselineConfig {
    /// Defaults for everything except the policy, which must be chosen
    pub fn new(policy: BaselinePolicy) -> Self {
        Self {
            attempts: DEFAULT_BASELINE_SAMPLES,
            interval: DEFAULT_BASELINE_INTERVAL,
            min_samples: MIN_BASELINE_SAMPLES,
            policy,
        }
    }
}

/// Result of a successful training run
pub struct TrainedBaseline {
    /// Frozen model, shared read-only with the detector
    pub model: Arc<dyn AnomalyModel>,
    /// Valid samples the model was fitted on
    pub samples_retained: usize,
    /// Total sampling attempts, including skipped ones
    pub attempts: usize,
}

impl fmt::Debug for TrainedBaseline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainedBaseline")
            .field("samples_retained", &self.samples_retained)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Collects the baseline and fits the anomaly model once
pub struct BaselineTrainer {
    source: Arc<dyn SampleSource>,
    fitter: Arc<dyn AnomalyModelFitter>,
    clock: Arc<dyn Clock>,
    config: BaselineConfig,
    logger: StructuredLogger,
    metrics: ControllerMetrics,
}

impl BaselineTrainer {
    pub fn new(
        source: Arc<dyn SampleSource>,
        fitter: Arc<dyn AnomalyModelFitter>,
        clock: Arc<dyn Clock>,
        config: BaselineConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            source,
            fitter,
            clock,
            config,
            logger,
            metrics: ControllerMetrics::new(),
        }
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Gather the baseline set, applying the configured insufficiency policy
    ///
    /// Returns the set and the number of attempts it took.
    pub async fn collect_baseline(&self) -> Result<(BaselineSet, usize), BaselineError> {
        let mut baseline = BaselineSet::new();
        let mut attempts = 0usize;

        for _ in 0..self.config.attempts {
            let sample = self.source.collect().await;
            attempts += 1;
            self.offer(&mut baseline, sample);
            self.clock.sleep(self.config.interval).await;
        }

        if baseline.len() < self.config.min_samples {
            match self.config.policy {
                BaselinePolicy::Strict => {
                    self.logger.log_baseline_insufficient(
                        baseline.len(),
                        self.config.min_samples,
                        attempts,
                    );
                    return Err(BaselineError::Insufficient {
                        retained: baseline.len(),
                        required: self.config.min_samples,
                        attempts,
                    });
                }
                BaselinePolicy::Patient => {
                    while baseline.len() < self.config.min_samples {
                        self.logger
                            .log_baseline_waiting(baseline.len(), self.config.min_samples);
                        self.clock.sleep(self.config.interval).await;
                        let sample = self.source.collect().await;
                        attempts += 1;
                        self.offer(&mut baseline, sample);
                    }
                }
            }
        }

        Ok((baseline, attempts))
    }

    /// Collect the baseline and fit the model over it
    pub async fn train(&self) -> Result<TrainedBaseline, BaselineError> {
        let (baseline, attempts) = self.collect_baseline().await?;
        let model = self.fitter.fit(baseline.samples())?;

        self.logger.log_baseline_trained(baseline.len(), attempts);

        Ok(TrainedBaseline {
            model: Arc::from(model),
            samples_retained: baseline.len(),
            attempts,
        })
    }

    fn offer(&self, baseline: &mut BaselineSet, sample: MetricSample) {
        if sample.is_degenerate() {
            self.logger.log_baseline_skipped(&sample);
            return;
        }
        baseline.push(sample);
        self.metrics.set_baseline_samples(baseline.len() as i64);
        self.logger.log_baseline_sample(&sample, baseline.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::IsolationForestConfig;
    use crate::models::WorkloadRef;
    use crate::test_support::ScriptedSamples;

    fn trainer(
        samples: Arc<ScriptedSamples>,
        clock: Arc<ManualClock>,
        policy: BaselinePolicy,
    ) -> BaselineTrainer {
        BaselineTrainer::new(
            samples,
            Arc::new(IsolationForestConfig::default()),
            clock,
            BaselineConfig::new(policy),
            StructuredLogger::new(&WorkloadRef::new("aegisops-app", "aegisops")),
        )
    }

    fn degenerate() -> MetricSample {
        MetricSample::new(0.0, 0.0, 1e8)
    }

    fn normal() -> MetricSample {
        MetricSample::new(50.0, 0.2, 1.2e8)
    }

    #[tokio::test]
    async fn test_alternating_cold_start_retains_half() {
        let script: Vec<MetricSample> = (0..30)
            .map(|i| if i % 2 == 0 { degenerate() } else { normal() })
            .collect();
        let samples = Arc::new(ScriptedSamples::new(script));
        let clock = Arc::new(ManualClock::default());
        let trainer = trainer(samples.clone(), clock.clone(), BaselinePolicy::Strict);
        let start = clock.now();

        let trained = trainer.train().await.unwrap();

        assert_eq!(trained.samples_retained, 15);
        assert_eq!(trained.attempts, 30);
        assert_eq!(trained.model.training_size(), 15);
        assert_eq!(samples.calls(), 30);
        // 30 samples, each followed by the baseline interval
        assert_eq!((clock.now() - start).num_seconds(), 150);
    }

    #[tokio::test]
    async fn test_strict_policy_fails_on_insufficient_baseline() {
        let script: Vec<MetricSample> = (0..30)
            .map(|i| if i < 9 { normal() } else { degenerate() })
            .collect();
        let samples = Arc::new(ScriptedSamples::new(script));
        let trainer = trainer(
            samples.clone(),
            Arc::new(ManualClock::default()),
            BaselinePolicy::Strict,
        );

        let err = trainer.train().await.unwrap_err();

        assert_eq!(
            err,
            BaselineError::Insufficient {
                retained: 9,
                required: 10,
                attempts: 30
            }
        );
        assert_eq!(samples.calls(), 30);
    }

    #[tokio::test]
    async fn test_patient_policy_keeps_sampling_until_minimum() {
        // 30 idle attempts, then a mix where only every third sample is valid
        let mut script: Vec<MetricSample> = vec![degenerate(); 30];
        for i in 0..30 {
            script.push(if i % 3 == 0 { normal() } else { degenerate() });
        }
        let samples = Arc::new(ScriptedSamples::new(script));
        let trainer = trainer(
            samples.clone(),
            Arc::new(ManualClock::default()),
            BaselinePolicy::Patient,
        );

        let trained = trainer.train().await.unwrap();

        assert_eq!(trained.samples_retained, 10);
        // 10th valid sample is extra attempt index 27
        assert_eq!(trained.attempts, 58);
        assert_eq!(samples.calls(), 58);
    }

    #[tokio::test]
    async fn test_patient_policy_skips_degenerate_but_keeps_stale_latency() {
        // Zero traffic with a stale latency reading is not degenerate
        let mut script: Vec<MetricSample> = vec![degenerate(); 30];
        script.extend(vec![MetricSample::new(0.0, 0.4, 1e8); 10]);
        let samples = Arc::new(ScriptedSamples::new(script));
        let trainer = trainer(
            samples,
            Arc::new(ManualClock::default()),
            BaselinePolicy::Patient,
        );

        let (baseline, attempts) = trainer.collect_baseline().await.unwrap();

        assert_eq!(baseline.len(), 10);
        assert_eq!(attempts, 40);
        assert!(baseline.samples().iter().all(|s| !s.is_degenerate()));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("strict".parse::<BaselinePolicy>(), Ok(BaselinePolicy::Strict));
        assert_eq!(" Patient ".parse::<BaselinePolicy>(), Ok(BaselinePolicy::Patient));
        assert!("lenient".parse::<BaselinePolicy>().is_err());
        assert_eq!(BaselinePolicy::Patient.to_string(), "patient");
    }
}
