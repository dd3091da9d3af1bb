//! Random forest of Gini trees.

use super::tree::{DecisionTree, Gini, TreeBuilder};
use crate::config::TrainingConfig;
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    n_classes: usize,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit `n_estimators` trees on bootstrap samples of `(x, labels)`.
    ///
    /// Each tree gets its own RNG derived from the seed, so trees are built
    /// in parallel and the result does not depend on scheduling.
    pub fn fit(x: ArrayView2<'_, f64>, labels: &[usize], n_classes: usize, params: &TrainingConfig) -> Self {
        let (n_samples, n_features) = x.dim();
        let bootstrap_size = ((params.subsample * n_samples as f64).round() as usize).max(1);
        let features: Vec<usize> = (0..n_features).collect();
        let features_per_split = ((n_features as f64).sqrt() * params.colsample_bytree)
            .round()
            .clamp(1.0, n_features as f64) as usize;

        let criterion = Gini {
            labels,
            n_classes,
            min_samples_leaf: params.min_child_weight,
        };
        let builder = TreeBuilder {
            x: x.view(),
            criterion: &criterion,
            max_depth: params.max_depth,
            features: &features,
            features_per_split,
        };

        let n_trees = if n_samples == 0 { 0 } else { params.n_estimators };
        let trees = (0..n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let samples: Vec<usize> = (0..bootstrap_size).map(|_| rng.gen_range(0..n_samples)).collect();
                builder.build(samples, &mut rng)
            })
            .collect();

        Self {
            n_classes,
            n_features,
            trees,
        }
    }

    /// Mean of the per-tree leaf class probabilities.
    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (p, v) in proba.iter_mut().zip(tree.predict(row)) {
                *p += v;
            }
        }
        let n = self.trees.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
