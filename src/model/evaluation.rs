//! Held-out evaluation metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Test samples whose true label is this class
    pub support: usize,
}

/// Metrics computed on the test partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub per_class: BTreeMap<String, ClassMetrics>,
    /// `confusion_matrix[predicted][actual]`, indexed like `class_names`
    pub confusion_matrix: Vec<Vec<usize>>,
    pub class_names: Vec<String>,
    pub test_samples: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl EvaluationMetrics {
    /// Score class indices `predicted` against `actual`.
    /// Both index into `class_names`.
    pub fn compute(actual: &[usize], predicted: &[usize], class_names: &[String]) -> Self {
        let k = class_names.len();
        let mut matrix = vec![vec![0usize; k]; k];
        for (&a, &p) in actual.iter().zip(predicted) {
            matrix[p][a] += 1;
        }

        let correct: usize = (0..k).map(|i| matrix[i][i]).sum();
        let total = actual.len().min(predicted.len());

        let per_class = class_names
            .iter()
            .enumerate()
            .map(|(c, name)| {
                let predicted_as_c: usize = matrix[c].iter().sum();
                let actually_c: usize = matrix.iter().map(|row| row[c]).sum();
                let precision = ratio(matrix[c][c], predicted_as_c);
                let recall = ratio(matrix[c][c], actually_c);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                (
                    name.clone(),
                    ClassMetrics {
                        precision,
                        recall,
                        f1,
                        support: actually_c,
                    },
                )
            })
            .collect();

        Self {
            accuracy: ratio(correct, total),
            per_class,
            confusion_matrix: matrix,
            class_names: class_names.to_vec(),
            test_samples: total,
        }
    }

    pub fn macro_f1(&self) -> f64 {
        if self.per_class.is_empty() {
            return 0.0;
        }
        self.per_class.values().map(|m| m.f1).sum::<f64>() / self.per_class.len() as f64
    }
}

impl std::fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Accuracy: {:.3} on {} samples | macro F1: {:.3}",
            self.accuracy,
            self.test_samples,
            self.macro_f1()
        )?;
        for (name, m) in &self.per_class {
            write!(
                f,
                " | {}: P {:.2} R {:.2} F1 {:.2} (n={})",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        Ok(())
    }
}
