//! Softmax gradient boosting with second-order regression trees.

use super::tree::{DecisionTree, SecondOrder, TreeBuilder};
use crate::config::TrainingConfig;
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const LAMBDA: f64 = 1.0;
const MIN_HESSIAN: f64 = 1e-16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    n_classes: usize,
    n_features: usize,
    learning_rate: f64,
    /// `rounds[r][k]` is the tree for class `k` in round `r`
    rounds: Vec<Vec<DecisionTree>>,
}

impl GradientBoosting {
    pub fn fit(x: ArrayView2<'_, f64>, labels: &[usize], n_classes: usize, params: &TrainingConfig) -> Self {
        let (n_samples, n_features) = x.dim();
        let row_count = ((params.subsample * n_samples as f64).round() as usize).clamp(1, n_samples.max(1));
        let col_count = ((params.colsample_bytree * n_features as f64).round() as usize).clamp(1, n_features.max(1));

        let mut margins = Array2::<f64>::zeros((n_samples, n_classes));
        let mut rounds = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            if n_samples == 0 {
                break;
            }
            let proba = softmax_rows(&margins);

            let trees: Vec<DecisionTree> = (0..n_classes)
                .into_par_iter()
                .map(|k| {
                    let seed = params
                        .seed
                        .wrapping_add((round * n_classes + k) as u64)
                        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
                    let mut rng = StdRng::seed_from_u64(seed);

                    let gradients: Vec<f64> = (0..n_samples)
                        .map(|i| proba[[i, k]] - if labels[i] == k { 1.0 } else { 0.0 })
                        .collect();
                    let hessians: Vec<f64> = (0..n_samples)
                        .map(|i| (proba[[i, k]] * (1.0 - proba[[i, k]])).max(MIN_HESSIAN))
                        .collect();

                    let mut features = index::sample(&mut rng, n_features, col_count).into_vec();
                    features.sort_unstable();
                    let mut rows = index::sample(&mut rng, n_samples, row_count).into_vec();
                    rows.sort_unstable();

                    let criterion = SecondOrder {
                        gradients: &gradients,
                        hessians: &hessians,
                        lambda: LAMBDA,
                        min_child_weight: params.min_child_weight,
                    };
                    let builder = TreeBuilder {
                        x: x.view(),
                        criterion: &criterion,
                        max_depth: params.max_depth,
                        features: &features,
                        features_per_split: features.len(),
                    };
                    builder.build(rows, &mut rng)
                })
                .collect();

            for (i, row) in x.outer_iter().enumerate() {
                let row = row.to_vec();
                for (k, tree) in trees.iter().enumerate() {
                    margins[[i, k]] += params.learning_rate * tree.predict(&row)[0];
                }
            }
            rounds.push(trees);
        }

        Self {
            n_classes,
            n_features,
            learning_rate: params.learning_rate,
            rounds,
        }
    }

    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let mut margin = vec![0.0; self.n_classes];
        for trees in &self.rounds {
            for (m, tree) in margin.iter_mut().zip(trees) {
                *m += self.learning_rate * tree.predict(row)[0];
            }
        }
        softmax(&margin)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }
}

fn softmax(margin: &[f64]) -> Vec<f64> {
    let max = margin.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = margin.iter().map(|m| (m - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

fn softmax_rows(margins: &Array2<f64>) -> Array2<f64> {
    let mut out = margins.clone();
    for mut row in out.outer_iter_mut() {
        let p = softmax(&row.to_vec());
        row.iter_mut().zip(p).for_each(|(dst, v)| *dst = v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_bands() -> (Array2<f64>, Vec<usize>) {
        let mut x = Array2::zeros((60, 3));
        let mut y = Vec::new();
        for i in 0..60 {
            let class = i % 3;
            x[[i, 0]] = class as f64 * 10.0 + (i as f64 * 0.01);
            x[[i, 1]] = (i % 7) as f64;
            x[[i, 2]] = 1.0;
            y.push(class);
        }
        (x, y)
    }

    #[test]
    fn test_softmax_is_stable() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-12);
        let p = softmax(&[0.0, f64::ln(3.0)]);
        assert!((p[1] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_learns_three_classes() {
        let (x, y) = three_bands();
        let params = TrainingConfig {
            n_estimators: 20,
            max_depth: 3,
            subsample: 1.0,
            ..Default::default()
        };
        let model = GradientBoosting::fit(x.view(), &y, 3, &params);
        assert_eq!(model.n_rounds(), 20);

        for class in 0..3 {
            let p = model.predict_proba(&[class as f64 * 10.0 + 0.2, 3.0, 1.0]);
            let best = p
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap();
            assert_eq!(best, class, "{:?}", p);
        }
    }

    #[test]
    fn test_deterministic_for_seed() {
        let (x, y) = three_bands();
        let params = TrainingConfig {
            n_estimators: 5,
            ..Default::default()
        };
        assert_eq!(
            GradientBoosting::fit(x.view(), &y, 3, &params),
            GradientBoosting::fit(x.view(), &y, 3, &params)
        );
    }
}
