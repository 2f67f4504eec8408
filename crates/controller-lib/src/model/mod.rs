//! Anomaly scoring model
//!
//! The control loop only relies on a fit/evaluate pair. The shipped
//! implementation is an isolation forest; any outlier method honouring
//! these traits can be swapped in.

mod isolation_forest;

pub use isolation_forest::{
    IsolationForest, IsolationForestConfig, DEFAULT_CONTAMINATION, DEFAULT_MAX_SAMPLES,
    DEFAULT_NUM_TREES, DEFAULT_SEED,
};

use crate::models::{MetricSample, Verdict};
use thiserror::Error;

/// Errors raised while fitting a model
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("need at least {required} samples to fit, got {actual}")]
    TooFewSamples { required: usize, actual: usize },

    #[error("contamination must be in (0, 0.5], got {0}")]
    InvalidContamination(f64),

    #[error("number of trees must be positive")]
    NoTrees,
}

/// A fitted, immutable scoring function
pub trait AnomalyModel: Send + Sync {
    /// Score and classify one sample
    fn evaluate(&self, sample: &MetricSample) -> Verdict;

    /// Number of samples the model was fitted on
    fn training_size(&self) -> usize;
}

/// Builds an [`AnomalyModel`] from baseline samples
pub trait AnomalyModelFitter: Send + Sync {
    fn fit(&self, samples: &[MetricSample]) -> Result<Box<dyn AnomalyModel>, ModelError>;
}
