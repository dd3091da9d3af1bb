//! Fit and evaluate a classifier for one period.

use super::boosting::GradientBoosting;
use super::evaluation::EvaluationMetrics;
use super::forest::RandomForest;
use super::split::split_rows;
use super::ModelType;
use crate::config::TrainingConfig;
use crate::error::{PipelineError, Result};
use crate::features::FeatureRow;
use crate::period::Period;
use crate::publish::publish;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A fitted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Classifier {
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
}

impl Classifier {
    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        match self {
            Classifier::RandomForest(m) => m.predict_proba(row),
            Classifier::GradientBoosting(m) => m.predict_proba(row),
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Classifier::RandomForest(m) => m.n_features(),
            Classifier::GradientBoosting(m) => m.n_features(),
        }
    }
}

/// The predictive part of a model: classifier plus its label ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Class labels; the classifier's output index `i` is `class_names[i]`
    pub class_names: Vec<String>,
    pub classifier: Classifier,
}

impl ModelArtifact {
    pub fn class_count(&self) -> usize {
        self.class_names.len()
    }

    pub fn n_features(&self) -> usize {
        self.classifier.n_features()
    }

    /// Index of the most probable class. Ties go to the lower index.
    pub fn predict_index(&self, row: &[f64]) -> usize {
        let proba = self.classifier.predict_proba(row);
        let mut best = 0;
        for (i, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = i;
            }
        }
        best
    }

    pub fn predict_label(&self, row: &[f64]) -> &str {
        &self.class_names[self.predict_index(row)]
    }
}

/// A trained, evaluated model and everything needed to trace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub id: Uuid,
    pub model_type: ModelType,
    pub parameters: TrainingConfig,
    pub metrics: EvaluationMetrics,
    pub period: Period,
    pub trained_at: DateTime<Utc>,
    pub training_data_source: String,
    pub training_samples: usize,
    pub artifact: ModelArtifact,
}

impl TrainedModel {
    /// `model_<YYYY>_<MM>_<uuid>.json`
    pub fn filename(&self) -> String {
        format!("model_{:04}_{:02}_{}.json", self.period.year, self.period.month, self.id)
    }

    /// Write the model as JSON into `dir`, publishing it with an atomic rename.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .map_err(|e| PipelineError::io(format!("cannot create models directory {}", dir.display()), e))?;
        let path = dir.join(self.filename());

        let tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| PipelineError::io(format!("cannot create temporary file in {}", dir.display()), e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, self)
                .map_err(|e| PipelineError::io(format!("cannot serialize model {}", self.id), e))?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        publish(tmp, &path)?;

        tracing::info!("Saved model {} to {}", self.id, path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| PipelineError::io(format!("cannot open model {}", path.display()), e))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| PipelineError::Data(format!("invalid model artifact {}: {}", path.display(), e)))
    }
}

/// Splits, fits and evaluates according to a [`TrainingConfig`].
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: TrainingConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        let c = &config;
        let problems = [
            (c.n_estimators == 0, "n_estimators must be > 0"),
            (c.max_depth == 0, "max_depth must be > 0"),
            (!(c.learning_rate > 0.0 && c.learning_rate <= 1.0), "learning_rate must be in (0, 1]"),
            (!(c.min_child_weight >= 0.0), "min_child_weight must be >= 0"),
            (!(c.subsample > 0.0 && c.subsample <= 1.0), "subsample must be in (0, 1]"),
            (!(c.colsample_bytree > 0.0 && c.colsample_bytree <= 1.0), "colsample_bytree must be in (0, 1]"),
            (!(c.train_test_split > 0.0 && c.train_test_split < 1.0), "train_test_split must be in (0, 1)"),
        ];
        if let Some((_, message)) = problems.iter().find(|(bad, _)| *bad) {
            return Err(PipelineError::Validation(message.to_string()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train on `rows` (already sampled) and evaluate on a held-out split.
    pub fn train(&self, rows: &[FeatureRow], period: Period, training_data_source: &str) -> Result<TrainedModel> {
        let n_features = rows
            .first()
            .map(|r| r.values.len())
            .ok_or_else(|| PipelineError::InsufficientData("no feature rows to train on".into()))?;
        if n_features == 0 {
            return Err(PipelineError::Data("feature rows have no band values".into()));
        }
        if let Some(bad) = rows.iter().find(|r| r.values.len() != n_features) {
            return Err(PipelineError::Data(format!(
                "row from polygon {} has {} bands, expected {}",
                bad.polygon_id,
                bad.values.len(),
                n_features
            )));
        }

        let class_names: Vec<String> = rows
            .iter()
            .map(|r| r.class_label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let labels: Vec<usize> = rows
            .iter()
            .map(|r| class_names.binary_search(&r.class_label).unwrap_or_default())
            .collect();

        let split = split_rows(rows, self.config.train_test_split, self.config.split_method, self.config.seed)?;
        if split.test.is_empty() {
            return Err(PipelineError::InsufficientData("test partition is empty".into()));
        }
        let mut train_counts = vec![0usize; class_names.len()];
        for &i in &split.train {
            train_counts[labels[i]] += 1;
        }
        let starved: Vec<String> = class_names
            .iter()
            .zip(&train_counts)
            .filter(|(_, &n)| n < 2)
            .map(|(name, n)| format!("{} ({})", name, n))
            .collect();
        if !starved.is_empty() {
            return Err(PipelineError::InsufficientData(format!(
                "classes with fewer than 2 training samples: {}",
                starved.join(", ")
            )));
        }

        let x = Array2::from_shape_fn((split.train.len(), n_features), |(i, j)| rows[split.train[i]].values[j]);
        let y: Vec<usize> = split.train.iter().map(|&i| labels[i]).collect();

        tracing::info!(
            "Training {} for {} on {} rows ({} held out), {} classes, {} bands",
            self.config.model_type,
            period,
            split.train.len(),
            split.test.len(),
            class_names.len(),
            n_features
        );

        let classifier = match self.config.model_type {
            ModelType::RandomForest => {
                Classifier::RandomForest(RandomForest::fit(x.view(), &y, class_names.len(), &self.config))
            }
            ModelType::GradientBoosting => {
                Classifier::GradientBoosting(GradientBoosting::fit(x.view(), &y, class_names.len(), &self.config))
            }
        };
        let artifact = ModelArtifact {
            class_names: class_names.clone(),
            classifier,
        };

        let actual: Vec<usize> = split.test.iter().map(|&i| labels[i]).collect();
        let predicted: Vec<usize> = split
            .test
            .iter()
            .map(|&i| artifact.predict_index(&rows[i].values))
            .collect();
        let metrics = EvaluationMetrics::compute(&actual, &predicted, &class_names);
        tracing::info!("Model for {}: {}", period, metrics);

        Ok(TrainedModel {
            id: Uuid::new_v4(),
            model_type: self.config.model_type,
            parameters: self.config.clone(),
            metrics,
            period,
            trained_at: Utc::now(),
            training_data_source: training_data_source.to_string(),
            training_samples: split.train.len(),
            artifact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SplitMethod;

    /// Two classes, five polygons each, cleanly separable on band 1.
    fn separable_rows() -> Vec<FeatureRow> {
        let mut rows = Vec::new();
        for (class, base) in [("forest", 0.0), ("non-forest", 1.0)] {
            for p in 0..5 {
                for i in 0..20 {
                    rows.push(FeatureRow {
                        values: vec![base + (i as f64) * 0.001, 10.0, 20.0 + p as f64, 30.0],
                        class_label: class.to_string(),
                        polygon_id: format!("{}-{}", class, p),
                        centroid: (p as f64 * 100.0, 0.0),
                    });
                }
            }
        }
        rows
    }

    fn period() -> Period {
        Period::new(2023, 6).unwrap()
    }

    #[test]
    fn test_rejects_bad_hyperparameters() {
        for config in [
            TrainingConfig {
                n_estimators: 0,
                ..Default::default()
            },
            TrainingConfig {
                learning_rate: 0.0,
                ..Default::default()
            },
            TrainingConfig {
                train_test_split: 1.0,
                ..Default::default()
            },
            TrainingConfig {
                subsample: 1.5,
                ..Default::default()
            },
        ] {
            let err = ModelTrainer::new(config).err().unwrap();
            assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        }
    }

    #[test]
    fn test_random_forest_on_separable_data() {
        let trainer = ModelTrainer::new(TrainingConfig {
            n_estimators: 20,
            ..Default::default()
        })
        .unwrap();
        let model = trainer.train(&separable_rows(), period(), "test").unwrap();

        assert_eq!(model.artifact.class_names, vec!["forest", "non-forest"]);
        assert_eq!(model.metrics.confusion_matrix.len(), 2);
        assert!(model.metrics.accuracy >= 0.9, "{}", model.metrics);
        // one polygon of each class (20 rows each) held out
        assert_eq!(model.metrics.test_samples, 40);
        assert_eq!(model.training_samples, 160);
        assert_eq!(model.artifact.predict_label(&[0.0, 10.0, 22.0, 30.0]), "forest");
        assert_eq!(model.artifact.predict_label(&[1.0, 10.0, 22.0, 30.0]), "non-forest");
    }

    #[test]
    fn test_gradient_boosting_on_separable_data() {
        let trainer = ModelTrainer::new(TrainingConfig {
            model_type: ModelType::GradientBoosting,
            n_estimators: 20,
            ..Default::default()
        })
        .unwrap();
        let model = trainer.train(&separable_rows(), period(), "test").unwrap();
        assert!(model.metrics.accuracy >= 0.9, "{}", model.metrics);
        assert!(matches!(model.artifact.classifier, Classifier::GradientBoosting(_)));
    }

    #[test]
    fn test_single_polygon_class_is_insufficient() {
        // a lone polygon stays in training, and one row is not enough
        let mut rows = separable_rows();
        rows.push(FeatureRow {
            values: vec![5.0, 5.0, 5.0, 5.0],
            class_label: "water".into(),
            polygon_id: "w".into(),
            centroid: (0.0, 0.0),
        });
        let trainer = ModelTrainer::new(TrainingConfig::default()).unwrap();
        let err = trainer.train(&rows, period(), "test").err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::InsufficientData);
    }

    #[test]
    fn test_empty_test_partition_is_insufficient() {
        // one polygon per class, so the feature split cannot hold any out
        let rows: Vec<FeatureRow> = separable_rows()
            .into_iter()
            .filter(|r| r.polygon_id.ends_with("-0"))
            .collect();
        let trainer = ModelTrainer::new(TrainingConfig {
            split_method: SplitMethod::Feature,
            ..Default::default()
        })
        .unwrap();
        let err = trainer.train(&rows, period(), "test").err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::InsufficientData);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = ModelTrainer::new(TrainingConfig {
            n_estimators: 3,
            ..Default::default()
        })
        .unwrap();
        let model = trainer.train(&separable_rows(), period(), "polygons.json").unwrap();

        let path = model.save(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap().to_string_lossy(), model.filename());
        assert!(model.filename().starts_with("model_2023_06_"));

        let loaded = TrainedModel::load(&path).unwrap();
        assert_eq!(loaded.id, model.id);
        assert_eq!(loaded.period, model.period);
        assert_eq!(loaded.artifact.class_names, model.artifact.class_names);
        for row in separable_rows().iter().step_by(7) {
            assert_eq!(loaded.artifact.predict_index(&row.values), model.artifact.predict_index(&row.values));
        }

        // no temporary files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_model_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let trainer = ModelTrainer::new(TrainingConfig {
            n_estimators: 2,
            ..Default::default()
        })
        .unwrap();
        let path = trainer.train(&separable_rows(), period(), "test").unwrap().save(dir.path()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
