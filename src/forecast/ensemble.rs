//! Случайный лес из CART-деревьев регрессии с фиксированным зерном генератора.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FeatureSet, ForecastError, Regressor};

const DEFAULT_TREES: usize = 100;
const DEFAULT_SEED: u64 = 42;
const DEFAULT_MIN_SAMPLES_SPLIT: usize = 2;
const MIN_IMPURITY_DECREASE: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnsembleConfig {
    pub n_estimators: usize,
    pub seed: u64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_TREES,
            seed: DEFAULT_SEED,
            max_depth: None,
            min_samples_split: DEFAULT_MIN_SAMPLES_SPLIT,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Clone, Debug, PartialEq)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if features[feature] <= threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForestModel {
    feature_set: FeatureSet,
    trees: Vec<RegressionTree>,
}

impl ForestModel {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for ForestModel {
    fn feature_set(&self) -> FeatureSet {
        self.feature_set
    }

    fn predict(&self, features: &[f64]) -> f64 {
        debug_assert_eq!(features.len(), self.feature_set.width());
        let sum: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        sum / self.trees.len() as f64
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
    pivot: usize,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    config: EnsembleConfig,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    const fn new(x: &'a [Vec<f64>], y: &'a [f64], config: EnsembleConfig) -> Self {
        Self {
            x,
            y,
            config,
            nodes: Vec::new(),
        }
    }

    fn build(mut self, mut samples: Vec<usize>) -> RegressionTree {
        self.grow(&mut samples, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn mean(&self, samples: &[usize]) -> f64 {
        samples.iter().map(|&idx| self.y[idx]).sum::<f64>() / samples.len() as f64
    }

    fn sse(&self, samples: &[usize]) -> f64 {
        let mean = self.mean(samples);
        samples
            .iter()
            .map(|&idx| {
                let diff = self.y[idx] - mean;
                diff * diff
            })
            .sum()
    }

    /// Рекурсивно растит узел; возвращает его индекс в арене.
    fn grow(&mut self, samples: &mut [usize], depth: usize) -> usize {
        let slot = self.nodes.len();
        let leaf = self.mean(samples);
        self.nodes.push(Node::Leaf(leaf));

        let depth_exhausted = self.config.max_depth.is_some_and(|max| depth >= max);
        if depth_exhausted || samples.len() < self.config.min_samples_split.max(2) {
            return slot;
        }
        let parent_sse = self.sse(samples);
        if parent_sse <= MIN_IMPURITY_DECREASE {
            return slot;
        }

        let Some(best) = self.best_split(samples, parent_sse) else {
            return slot;
        };

        samples.sort_by(|&a, &b| {
            self.x[a][best.feature]
                .partial_cmp(&self.x[b][best.feature])
                .unwrap_or(Ordering::Equal)
        });
        let (left_samples, right_samples) = samples.split_at_mut(best.pivot);
        let left = self.grow(left_samples, depth + 1);
        let right = self.grow(right_samples, depth + 1);
        self.nodes[slot] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        slot
    }

    /// Перебирает пороги между соседними различными значениями каждого признака.
    fn best_split(&self, samples: &[usize], parent_sse: f64) -> Option<BestSplit> {
        let n = samples.len();
        let total_sum: f64 = samples.iter().map(|&idx| self.y[idx]).sum();
        let total_sq: f64 = samples.iter().map(|&idx| self.y[idx] * self.y[idx]).sum();
        let width = self.x[samples[0]].len();
        let mut best: Option<BestSplit> = None;
        let mut order = samples.to_vec();

        for feature in 0..width {
            order.sort_by(|&a, &b| {
                self.x[a][feature]
                    .partial_cmp(&self.x[b][feature])
                    .unwrap_or(Ordering::Equal)
            });
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 1..n {
                let prev = order[pos - 1];
                left_sum += self.y[prev];
                left_sq += self.y[prev] * self.y[prev];

                let lo = self.x[prev][feature];
                let hi = self.x[order[pos]][feature];
                if hi <= lo {
                    continue;
                }
                let left_n = pos as f64;
                let right_n = (n - pos) as f64;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sum * left_sum).mul_add(-1.0 / left_n, left_sq)
                    + (right_sum * right_sum).mul_add(-1.0 / right_n, right_sq);
                if parent_sse - sse <= MIN_IMPURITY_DECREASE {
                    continue;
                }
                if best.as_ref().is_none_or(|current| sse < current.sse) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (lo + hi) / 2.0,
                        sse,
                        pivot: pos,
                    });
                }
            }
        }
        best
    }
}

/// Обучает лес: каждое дерево строится на бутстреп-выборке из общего генератора с фиксированным зерном.
pub fn fit_forest(
    x: &[Vec<f64>],
    y: &[f64],
    feature_set: FeatureSet,
    config: EnsembleConfig,
) -> Result<ForestModel, ForecastError> {
    if x.is_empty() || x.len() != y.len() {
        return Err(ForecastError::InsufficientData {
            stage: "ensemble fit",
            available: x.len().min(y.len()),
            required: 1,
        });
    }
    let n = x.len();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let trees = (0..config.n_estimators.max(1))
        .map(|_| {
            let samples: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            TreeBuilder::new(x, y, config).build(samples)
        })
        .collect();

    Ok(ForestModel { feature_set, trees })
}
