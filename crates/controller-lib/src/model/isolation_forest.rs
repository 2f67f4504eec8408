//! Isolation forest outlier model
//!
//! Each tree recursively splits a random sub-sample on a random feature at a
//! random threshold. Outliers are isolated close to the root, so a short
//! average path length means a high anomaly score:
//!
//! ```text
//! score(x) = 2 ^ ( -mean_path(x) / c(sample_size) )
//! ```
//!
//! where `c(n)` is the average path length of an unsuccessful BST search.
//!
//! Each tree is grown on at most half of the training set. The decision
//! threshold is the `1 - contamination` quantile of the training scores,
//! where every training sample is scored only by the trees that never saw
//! it. Fresh samples from the baseline distribution then cross the
//! threshold at roughly the contamination rate.
//!
//! Splits only see the ordering of values, so a point far beyond the
//! sub-sample range would follow the same path as the most extreme training
//! point. A tree therefore isolates at its root any point that lies further
//! outside its sub-sample range than that range is wide. For a baseline of
//! identical samples the range is empty and any deviation counts.

use super::{AnomalyModel, AnomalyModelFitter, ModelError};
use crate::models::{Classification, MetricSample, Verdict, FEATURE_COUNT};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Default number of trees in the forest
pub const DEFAULT_NUM_TREES: usize = 100;

/// Default sub-sample size per tree
pub const DEFAULT_MAX_SAMPLES: usize = 256;

/// Default expected outlier fraction of the baseline
pub const DEFAULT_CONTAMINATION: f64 = 0.15;

/// Default random seed, fixed for reproducible fits
pub const DEFAULT_SEED: u64 = 42;

/// Minimum number of samples for a meaningful fit
const MIN_FIT_SAMPLES: usize = 2;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

type Point = [f64; FEATURE_COUNT];

/// Isolation forest hyper-parameters
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForestConfig {
    pub num_trees: usize,
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            num_trees: DEFAULT_NUM_TREES,
            max_samples: DEFAULT_MAX_SAMPLES,
            contamination: DEFAULT_CONTAMINATION,
            seed: DEFAULT_SEED,
        }
    }
}

impl IsolationForestConfig {
    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject hyper-parameters that cannot produce a usable model
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.num_trees == 0 {
            return Err(ModelError::NoTrees);
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(ModelError::InvalidContamination(self.contamination));
        }
        Ok(())
    }
}

impl AnomalyModelFitter for IsolationForestConfig {
    fn fit(&self, samples: &[MetricSample]) -> Result<Box<dyn AnomalyModel>, ModelError> {
        Ok(Box::new(IsolationForest::fit(self, samples)?))
    }
}

/// Isolation tree node
#[derive(Debug)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf { size: usize },
}

impl Node {
    fn build(points: &[Point], depth: usize, height_limit: usize, rng: &mut ChaCha8Rng) -> Node {
        let (lower, upper) = bounds(points);

        if depth >= height_limit || points.len() <= 1 {
            return Node::Leaf { size: points.len() };
        }

        // Constant features cannot separate anything
        let splittable: Vec<usize> = (0..FEATURE_COUNT)
            .filter(|&f| upper[f] > lower[f])
            .collect();
        if splittable.is_empty() {
            return Node::Leaf { size: points.len() };
        }

        let feature = splittable[rng.gen_range(0..splittable.len())];
        let threshold = rng.gen_range(lower[feature]..upper[feature]);
        let (left, right): (Vec<Point>, Vec<Point>) = points
            .iter()
            .copied()
            .partition(|p| p[feature] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Node::build(&left, depth + 1, height_limit, rng)),
            right: Box::new(Node::build(&right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, point: &Point) -> f64 {
        let mut node = self;
        let mut depth = 0usize;

        loop {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold {
                        left
                    } else {
                        right
                    };
                    depth += 1;
                }
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
            }
        }
    }
}

/// Isolation tree together with the range of its sub-sample
#[derive(Debug)]
struct IsolationTree {
    root: Node,
    lower: Point,
    upper: Point,
}

impl IsolationTree {
    fn grow(points: &[Point], height_limit: usize, rng: &mut ChaCha8Rng) -> Self {
        let (lower, upper) = bounds(points);
        Self {
            root: Node::build(points, 0, height_limit, rng),
            lower,
            upper,
        }
    }

    /// Further outside the sub-sample range than the range is wide
    fn is_far_outside(&self, point: &Point) -> bool {
        (0..FEATURE_COUNT).any(|f| {
            let width = self.upper[f] - self.lower[f];
            point[f] < self.lower[f] - width || point[f] > self.upper[f] + width
        })
    }

    fn path_length(&self, point: &Point) -> f64 {
        if self.is_far_outside(point) {
            return 0.0;
        }
        self.root.path_length(point)
    }
}

/// Per-feature minimum and maximum
fn bounds(points: &[Point]) -> (Point, Point) {
    let mut lower = [f64::INFINITY; FEATURE_COUNT];
    let mut upper = [f64::NEG_INFINITY; FEATURE_COUNT];
    for point in points {
        for f in 0..FEATURE_COUNT {
            lower[f] = lower[f].min(point[f]);
            upper[f] = upper[f].max(point[f]);
        }
    }
    (lower, upper)
}

/// Average path length of an unsuccessful search in a BST of `n` nodes
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated quantile, `q` in `[0, 1]`
fn quantile(values: &mut [f64], q: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (pos - lo as f64)
}

/// Fitted isolation forest
#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    threshold: f64,
    training_size: usize,
}

impl IsolationForest {
    /// Fit a forest over `samples`
    pub fn fit(config: &IsolationForestConfig, samples: &[MetricSample]) -> Result<Self, ModelError> {
        config.validate()?;
        if samples.len() < MIN_FIT_SAMPLES {
            return Err(ModelError::TooFewSamples {
                required: MIN_FIT_SAMPLES,
                actual: samples.len(),
            });
        }

        let points: Vec<Point> = samples.iter().map(MetricSample::features).collect();
        let sample_size = config
            .max_samples
            .min((points.len() + 1) / 2)
            .max(MIN_FIT_SAMPLES);
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut trees = Vec::with_capacity(config.num_trees);
        let mut in_bag = Vec::with_capacity(config.num_trees);
        for _ in 0..config.num_trees {
            let mut members = vec![false; points.len()];
            let subset: Vec<Point> = index::sample(&mut rng, points.len(), sample_size)
                .iter()
                .map(|i| {
                    members[i] = true;
                    points[i]
                })
                .collect();
            trees.push(IsolationTree::grow(&subset, height_limit, &mut rng));
            in_bag.push(members);
        }

        let mut forest = Self {
            trees,
            sample_size,
            threshold: 0.0,
            training_size: points.len(),
        };

        let mut scores: Vec<f64> = points
            .iter()
            .enumerate()
            .map(|(i, point)| {
                let held_out = forest
                    .trees
                    .iter()
                    .zip(&in_bag)
                    .filter(|(_, members)| !members[i])
                    .map(|(tree, _)| tree);
                // Tiny baselines can put a sample in every tree
                forest
                    .score_over(held_out, point)
                    .unwrap_or_else(|| forest.score_point(point))
            })
            .collect();
        forest.threshold = quantile(&mut scores, 1.0 - config.contamination);

        Ok(forest)
    }

    /// Decision threshold; scores strictly above it are anomalous
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Anomaly score in `[0, 1]`, higher is more unusual
    pub fn score(&self, sample: &MetricSample) -> f64 {
        self.score_point(&sample.features())
    }

    fn score_point(&self, point: &Point) -> f64 {
        self.score_over(self.trees.iter(), point).unwrap_or(1.0)
    }

    /// Score against a subset of the trees, `None` when the subset is empty
    fn score_over<'a>(
        &self,
        trees: impl Iterator<Item = &'a IsolationTree>,
        point: &Point,
    ) -> Option<f64> {
        let (total, count) = trees.fold((0.0, 0usize), |(total, count), tree| {
            (total + tree.path_length(point), count + 1)
        });
        if count == 0 {
            return None;
        }
        let mean_path = total / count as f64;
        Some(2f64.powf(-mean_path / average_path_length(self.sample_size)))
    }
}

impl AnomalyModel for IsolationForest {
    fn evaluate(&self, sample: &MetricSample) -> Verdict {
        let score = self.score(sample);
        let classification = if score > self.threshold {
            Classification::Anomalous
        } else {
            Classification::Normal
        };
        Verdict {
            classification,
            score,
        }
    }

    fn training_size(&self) -> usize {
        self.training_size
    }
}
