//! Binary decision trees shared by both ensembles.
//!
//! Trees are stored as a flat node vector so they serialize compactly and
//! evaluate without recursion. Growing a tree is generic over a
//! [`Criterion`]: the forest uses Gini impurity over class counts, boosting
//! uses the second-order gain over gradient/hessian sums.

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// One node of a fitted tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: Vec<f64>,
    },
    /// Samples with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted tree. Node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Leaf value reached by `row`.
    pub fn predict(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Split quality measure over accumulated per-sample statistics.
///
/// The gain of a split is `score(left) + score(right) - score(parent)`.
pub(crate) trait Criterion {
    type Stats: Clone;

    fn empty(&self) -> Self::Stats;
    fn add(&self, stats: &mut Self::Stats, sample: usize);
    fn remove(&self, stats: &mut Self::Stats, sample: usize);
    fn score(&self, stats: &Self::Stats) -> f64;
    /// Whether a child with these statistics may become a node.
    fn admissible(&self, stats: &Self::Stats) -> bool;
    fn leaf(&self, stats: &Self::Stats) -> Vec<f64>;
}

/// Gini impurity over class labels. Leaves hold class probabilities.
pub(crate) struct Gini<'a> {
    pub labels: &'a [usize],
    pub n_classes: usize,
    pub min_samples_leaf: f64,
}

impl Criterion for Gini<'_> {
    type Stats = Vec<f64>;

    fn empty(&self) -> Vec<f64> {
        vec![0.0; self.n_classes]
    }

    fn add(&self, stats: &mut Vec<f64>, sample: usize) {
        stats[self.labels[sample]] += 1.0;
    }

    fn remove(&self, stats: &mut Vec<f64>, sample: usize) {
        stats[self.labels[sample]] -= 1.0;
    }

    // n * (1 - gini) - n, i.e. minus the weighted impurity
    fn score(&self, stats: &Vec<f64>) -> f64 {
        let n: f64 = stats.iter().sum();
        if n <= 0.0 {
            return 0.0;
        }
        stats.iter().map(|c| c * c).sum::<f64>() / n - n
    }

    fn admissible(&self, stats: &Vec<f64>) -> bool {
        let n: f64 = stats.iter().sum();
        n > 0.0 && n >= self.min_samples_leaf
    }

    fn leaf(&self, stats: &Vec<f64>) -> Vec<f64> {
        let n: f64 = stats.iter().sum();
        if n <= 0.0 {
            return vec![1.0 / self.n_classes as f64; self.n_classes];
        }
        stats.iter().map(|c| c / n).collect()
    }
}

/// Second-order boosting gain with L2 regularization `lambda`.
/// Leaves hold the single optimal weight `-G / (H + lambda)`.
pub(crate) struct SecondOrder<'a> {
    pub gradients: &'a [f64],
    pub hessians: &'a [f64],
    pub lambda: f64,
    pub min_child_weight: f64,
}

impl Criterion for SecondOrder<'_> {
    /// (gradient sum, hessian sum, count)
    type Stats = (f64, f64, usize);

    fn empty(&self) -> Self::Stats {
        (0.0, 0.0, 0)
    }

    fn add(&self, stats: &mut Self::Stats, sample: usize) {
        stats.0 += self.gradients[sample];
        stats.1 += self.hessians[sample];
        stats.2 += 1;
    }

    fn remove(&self, stats: &mut Self::Stats, sample: usize) {
        stats.0 -= self.gradients[sample];
        stats.1 -= self.hessians[sample];
        stats.2 -= 1;
    }

    fn score(&self, stats: &Self::Stats) -> f64 {
        stats.0 * stats.0 / (stats.1 + self.lambda)
    }

    fn admissible(&self, stats: &Self::Stats) -> bool {
        stats.2 > 0 && stats.1 >= self.min_child_weight
    }

    fn leaf(&self, stats: &Self::Stats) -> Vec<f64> {
        vec![-stats.0 / (stats.1 + self.lambda)]
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Grows one tree over the given sample indices.
pub(crate) struct TreeBuilder<'a, C: Criterion> {
    pub x: ArrayView2<'a, f64>,
    pub criterion: &'a C,
    pub max_depth: usize,
    /// Features this tree may split on
    pub features: &'a [usize],
    /// Features drawn from `features` at each split
    pub features_per_split: usize,
}

impl<C: Criterion> TreeBuilder<'_, C> {
    pub fn build(&self, samples: Vec<usize>, rng: &mut StdRng) -> DecisionTree {
        let mut nodes = Vec::new();
        self.grow(samples, 0, rng, &mut nodes);
        DecisionTree { nodes }
    }

    fn grow(&self, samples: Vec<usize>, depth: usize, rng: &mut StdRng, nodes: &mut Vec<Node>) -> usize {
        let mut totals = self.criterion.empty();
        for &s in &samples {
            self.criterion.add(&mut totals, s);
        }

        let idx = nodes.len();
        nodes.push(Node::Leaf {
            value: self.criterion.leaf(&totals),
        });

        if depth >= self.max_depth || samples.len() < 2 {
            return idx;
        }

        let Some(best) = self.best_split(&samples, &totals, rng) else {
            return idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&s| self.x[[s, best.feature]] <= best.threshold);

        let left_idx = self.grow(left, depth + 1, rng, nodes);
        let right_idx = self.grow(right, depth + 1, rng, nodes);
        nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left_idx,
            right: right_idx,
        };
        idx
    }

    fn best_split(&self, samples: &[usize], totals: &C::Stats, rng: &mut StdRng) -> Option<BestSplit> {
        let candidates: Vec<usize> = if self.features_per_split < self.features.len() {
            let mut picked: Vec<usize> = self
                .features
                .choose_multiple(rng, self.features_per_split)
                .copied()
                .collect();
            picked.sort_unstable();
            picked
        } else {
            self.features.to_vec()
        };

        let parent_score = self.criterion.score(totals);
        let mut best: Option<BestSplit> = None;
        let mut sorted = samples.to_vec();

        for &feature in &candidates {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left = self.criterion.empty();
            let mut right = totals.clone();

            for pair in sorted.windows(2) {
                let (s, next) = (pair[0], pair[1]);
                self.criterion.add(&mut left, s);
                self.criterion.remove(&mut right, s);

                let (v, v_next) = (self.x[[s, feature]], self.x[[next, feature]]);
                if v == v_next {
                    continue;
                }
                if !self.criterion.admissible(&left) || !self.criterion.admissible(&right) {
                    continue;
                }

                let gain = self.criterion.score(&left) + self.criterion.score(&right) - parent_score;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mid = v + (v_next - v) / 2.0;
                    let threshold = if mid < v_next { mid } else { v };
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }

        best
    }
}
