//! Configuration for the land-cover classification pipeline.

use crate::features::Aggregation;
use crate::model::{ModelType, SplitMethod};
use crate::period::Period;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    pub input: InputConfig,

    /// Periods to process
    pub periods: PeriodConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// Classifier hyperparameters
    #[serde(default)]
    pub training: TrainingConfig,

    /// Training sample selection
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Full-mosaic inference
    #[serde(default)]
    pub prediction: PredictionConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Input data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Mosaic path pattern with `{year}` and `{month}` placeholders
    pub mosaic_pattern: String,

    /// JSON or YAML file of labeled training polygons
    pub polygons_path: String,

    /// NODATA value override (default: read from band 1 of the mosaic)
    #[serde(default)]
    pub nodata: Option<f64>,

    /// Allowed class labels. Polygons with any other label are rejected.
    #[serde(default)]
    pub classes: Option<Vec<String>>,
}

/// Period range configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodConfig {
    /// First period, `YYYY-MM`
    #[serde(default)]
    pub start: Option<String>,

    /// Last period (inclusive), `YYYY-MM`
    #[serde(default)]
    pub end: Option<String>,

    /// Explicit list of periods; takes precedence over start/end
    #[serde(default)]
    pub list: Option<Vec<String>>,
}

impl PeriodConfig {
    /// Resolve the configured periods in ascending order.
    pub fn resolve(&self) -> anyhow::Result<Vec<Period>> {
        if let Some(list) = &self.list {
            let mut periods = list
                .iter()
                .map(|p| p.parse::<Period>())
                .collect::<anyhow::Result<Vec<_>>>()?;
            periods.sort();
            periods.dedup();
            return Ok(periods);
        }

        match (&self.start, &self.end) {
            (Some(start), Some(end)) => {
                let start: Period = start.parse()?;
                let end: Period = end.parse()?;
                if start > end {
                    anyhow::bail!("Period start {} is after end {}", start, end);
                }
                Ok(Period::range(start, end))
            }
            (Some(start), None) => Ok(vec![start.parse()?]),
            _ => anyhow::bail!("Must specify either periods.list or periods.start"),
        }
    }
}

/// Output locations and raster profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for serialized model artifacts
    pub models_dir: String,

    /// Directory for classified rasters
    pub predictions_dir: String,

    /// SQLite provenance database path
    pub database_path: String,

    /// If set, the sampled training features are saved here as parquet
    #[serde(default)]
    pub features_dir: Option<String>,

    /// Window size in pixels for reading and writing (also the GeoTIFF tile size)
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// GeoTIFF compression for classified rasters
    #[serde(default = "default_compression")]
    pub compression: String,
}

/// Classifier hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Ensemble family
    #[serde(default)]
    pub model_type: ModelType,

    /// Number of trees (boosting rounds for gradient boosting)
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    /// Maximum tree depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Shrinkage applied to each boosting round
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Minimum hessian sum (boosting) or sample count (forest) per leaf
    #[serde(default = "default_min_child_weight")]
    pub min_child_weight: f64,

    /// Fraction of training rows drawn per tree
    #[serde(default = "default_subsample")]
    pub subsample: f64,

    /// Fraction of features considered per tree
    #[serde(default = "default_colsample_bytree")]
    pub colsample_bytree: f64,

    /// Fraction of data reserved for evaluation, in (0, 1)
    #[serde(default = "default_train_test_split")]
    pub train_test_split: f64,

    /// Whether to split by whole polygons or by individual rows
    #[serde(default)]
    pub split_method: SplitMethod,

    /// RNG seed for splitting and tree construction
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::default(),
            n_estimators: default_n_estimators(),
            max_depth: default_max_depth(),
            learning_rate: default_learning_rate(),
            min_child_weight: default_min_child_weight(),
            subsample: default_subsample(),
            colsample_bytree: default_colsample_bytree(),
            train_test_split: default_train_test_split(),
            split_method: SplitMethod::default(),
            seed: default_seed(),
        }
    }
}

/// Training sample selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Maximum rows kept per class per period
    #[serde(default = "default_target_per_class")]
    pub target_per_class: usize,

    /// Grid cell size (raster CRS units) used to spread samples geographically
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,

    /// RNG seed for sampling
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// How pixel values under a polygon become feature rows
    #[serde(default)]
    pub aggregation: Aggregation,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            target_per_class: default_target_per_class(),
            cell_size: default_cell_size(),
            seed: default_seed(),
            aggregation: Aggregation::default(),
        }
    }
}

/// Full-mosaic inference configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Classifier worker threads (default: rayon's thread count)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Bounded queue depth between read, classify and write stages
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Area of interest in raster CRS [min_x, min_y, max_x, max_y].
    /// Pixels outside it are written as NODATA.
    #[serde(default)]
    pub aoi: Option<[f64; 4]>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_depth: default_queue_depth(),
            aoi: None,
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of periods processed concurrently
    #[serde(default = "default_period_workers")]
    pub period_workers: usize,

    /// Rayon thread pool size for CPU-bound work
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Log prediction metrics after each period
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            period_workers: default_period_workers(),
            rayon_threads: None,
            enable_metrics: true,
            metrics_output_path: None,
        }
    }
}

const COMPRESSIONS: [&str; 5] = ["DEFLATE", "LZW", "ZSTD", "PACKBITS", "NONE"];

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.mosaic_pattern.trim().is_empty() {
            anyhow::bail!("input.mosaic_pattern must not be empty");
        }
        if self.input.polygons_path.trim().is_empty() {
            anyhow::bail!("input.polygons_path must not be empty");
        }
        if let Some(classes) = &self.input.classes {
            if classes.len() < 2 {
                anyhow::bail!("input.classes must list at least two classes");
            }
            if classes.len() > 255 {
                anyhow::bail!("At most 255 classes fit in a classified raster");
            }
        }

        self.periods.resolve()?;

        if self.output.block_size == 0 || self.output.block_size % 16 != 0 {
            anyhow::bail!("Block size must be a positive multiple of 16");
        }
        let compression = self.output.compression.to_ascii_uppercase();
        if !COMPRESSIONS.contains(&compression.as_str()) {
            anyhow::bail!(
                "Unsupported compression '{}', expected one of {:?}",
                self.output.compression,
                COMPRESSIONS
            );
        }

        let t = &self.training;
        if t.n_estimators == 0 {
            anyhow::bail!("n_estimators must be > 0");
        }
        if t.max_depth == 0 {
            anyhow::bail!("max_depth must be > 0");
        }
        if !(t.learning_rate > 0.0) {
            anyhow::bail!("learning_rate must be > 0");
        }
        if t.min_child_weight < 0.0 {
            anyhow::bail!("min_child_weight must be >= 0");
        }
        if !(t.subsample > 0.0 && t.subsample <= 1.0) {
            anyhow::bail!("subsample must be in (0, 1]");
        }
        if !(t.colsample_bytree > 0.0 && t.colsample_bytree <= 1.0) {
            anyhow::bail!("colsample_bytree must be in (0, 1]");
        }
        if !(t.train_test_split > 0.0 && t.train_test_split < 1.0) {
            anyhow::bail!("train_test_split must be in (0, 1)");
        }

        if self.sampling.target_per_class == 0 {
            anyhow::bail!("sampling.target_per_class must be > 0");
        }
        if !(self.sampling.cell_size > 0.0) {
            anyhow::bail!("sampling.cell_size must be > 0");
        }

        if self.prediction.queue_depth == 0 {
            anyhow::bail!("prediction.queue_depth must be > 0");
        }
        if self.prediction.workers == Some(0) {
            anyhow::bail!("prediction.workers must be > 0");
        }
        if let Some(aoi) = &self.prediction.aoi {
            if aoi.iter().any(|v| !v.is_finite()) || aoi[0] >= aoi[2] || aoi[1] >= aoi[3] {
                anyhow::bail!("prediction.aoi must be finite [min_x, min_y, max_x, max_y]");
            }
        }

        if self.processing.period_workers == 0 {
            anyhow::bail!("processing.period_workers must be > 0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_block_size() -> usize { 256 }
fn default_compression() -> String { "DEFLATE".to_string() }
fn default_n_estimators() -> usize { 100 }
fn default_max_depth() -> usize { 8 }
fn default_learning_rate() -> f64 { 0.1 }
fn default_min_child_weight() -> f64 { 1.0 }
fn default_subsample() -> f64 { 0.8 }
fn default_colsample_bytree() -> f64 { 1.0 }
fn default_train_test_split() -> f64 { 0.2 }
fn default_seed() -> u64 { 42 }
fn default_target_per_class() -> usize { 50 }
fn default_cell_size() -> f64 { 1000.0 }
fn default_queue_depth() -> usize { 16 }
fn default_period_workers() -> usize { 1 }
fn default_true() -> bool { true }
