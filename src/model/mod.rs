//! Classifier training: train/test split, tree ensembles, evaluation.

mod boosting;
mod evaluation;
mod forest;
mod split;
mod trainer;
pub(crate) mod tree;

pub use boosting::GradientBoosting;
pub use evaluation::{ClassMetrics, EvaluationMetrics};
pub use forest::RandomForest;
pub use split::{split_rows, TrainTestSplit};
pub use trainer::{Classifier, ModelArtifact, ModelTrainer, TrainedModel};
pub use tree::DecisionTree;

use serde::{Deserialize, Serialize};

/// Ensemble family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    RandomForest,
    GradientBoosting,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::RandomForest => f.write_str("random_forest"),
            ModelType::GradientBoosting => f.write_str("gradient_boosting"),
        }
    }
}

/// How rows are divided between training and evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMethod {
    /// Whole polygons go to one side
    #[default]
    Feature,
    /// Individual rows are split; pixels of one polygon can land on both sides
    Pixel,
}
