//! Drives each period through extraction, sampling, training, prediction and
//! provenance recording.
//!
//! A period that fails stops at the failing stage and is reported; the other
//! periods carry on. Periods run one after another, or concurrently on a
//! dedicated rayon pool when `processing.period_workers > 1`.

use super::metrics::{Metrics, MetricsSnapshot};
use super::progress::{ProgressEvent, ProgressPublisher, Stage};
use crate::config::Config;
use crate::crs::{self, Bounds};
use crate::error::{ErrorKind, PipelineError, Result};
use crate::features::{dataset, JsonPolygonSource, PolygonFeatureExtractor, PolygonSource};
use crate::model::{ModelTrainer, TrainedModel};
use crate::period::Period;
use crate::predict::{prediction_filename, PredictionStats, PredictorOptions, WindowedPredictor};
use crate::provenance::{ModelRecord, PredictionRecord, ProvenanceRecorder};
use crate::raster::RasterAccessor;
use crate::sampling::{SamplingReport, StratifiedSampler};
use anyhow::Context;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Everything produced for a period that reached `Done`.
#[derive(Debug, Clone)]
pub struct CompletedPeriod {
    pub period: Period,
    pub model_id: Uuid,
    pub model_path: PathBuf,
    pub prediction_path: PathBuf,
    pub accuracy: f64,
    pub macro_f1: f64,
    pub training_samples: usize,
    pub sampling: SamplingReport,
    pub prediction: PredictionStats,
    /// Row id in `ml_models`
    pub model_record_id: i64,
    /// Row id in `raster_predictions`
    pub prediction_record_id: i64,
}

#[derive(Debug, Clone)]
pub struct FailedPeriod {
    pub period: Period,
    /// Stage the period was in when it failed
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum PeriodOutcome {
    Done(CompletedPeriod),
    Failed(FailedPeriod),
}

impl PeriodOutcome {
    pub fn period(&self) -> Period {
        match self {
            PeriodOutcome::Done(done) => done.period,
            PeriodOutcome::Failed(failed) => failed.period,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, PeriodOutcome::Done(_))
    }
}

/// Result of a whole run, one outcome per period in period order.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcomes: Vec<PeriodOutcome>,
    pub elapsed: Duration,
    pub metrics: MetricsSnapshot,
}

impl RunSummary {
    pub fn completed(&self) -> impl Iterator<Item = &CompletedPeriod> {
        self.outcomes.iter().filter_map(|o| match o {
            PeriodOutcome::Done(done) => Some(done),
            PeriodOutcome::Failed(_) => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &FailedPeriod> {
        self.outcomes.iter().filter_map(|o| match o {
            PeriodOutcome::Failed(failed) => Some(failed),
            PeriodOutcome::Done(_) => None,
        })
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(PeriodOutcome::is_done)
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let done = self.completed().count();
        writeln!(
            f,
            "Periods: {} done, {} failed, {} total in {:.1}s",
            done,
            self.outcomes.len() - done,
            self.outcomes.len(),
            self.elapsed.as_secs_f64()
        )?;
        for outcome in &self.outcomes {
            match outcome {
                PeriodOutcome::Done(d) => writeln!(
                    f,
                    "  {} done: accuracy {:.3}, macro F1 {:.3}, {} samples -> {}",
                    d.period,
                    d.accuracy,
                    d.macro_f1,
                    d.training_samples,
                    d.prediction_path.display()
                )?,
                PeriodOutcome::Failed(e) => {
                    writeln!(f, "  {} failed at {}: {} ({})", e.period, e.stage, e.kind, e.message)?
                }
            }
        }
        write!(f, "{}", self.metrics)
    }
}

/// Runs the per-period stage machine over every configured period.
pub struct PipelineOrchestrator {
    config: Arc<Config>,
    source: Arc<dyn PolygonSource>,
    recorder: Arc<ProvenanceRecorder>,
    progress: ProgressPublisher,
    metrics: Arc<Metrics>,
    cancel: Arc<AtomicBool>,
}

impl PipelineOrchestrator {
    pub fn new(config: Arc<Config>, source: Arc<dyn PolygonSource>, recorder: Arc<ProvenanceRecorder>) -> Self {
        Self {
            config,
            source,
            recorder,
            progress: ProgressPublisher::new(),
            metrics: Metrics::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load the polygon file and open the provenance store named in `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let source = JsonPolygonSource::load(&config.input.polygons_path, config.input.classes.as_deref())
            .with_context(|| format!("Failed to load polygons from {}", config.input.polygons_path))?;
        let recorder = ProvenanceRecorder::open(&config.output.database_path)
            .with_context(|| format!("Failed to open provenance store {}", config.output.database_path))?;
        Ok(Self::new(Arc::new(config), Arc::new(source), Arc::new(recorder)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn progress(&self) -> &ProgressPublisher {
        &self.progress
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn recorder(&self) -> &Arc<ProvenanceRecorder> {
        &self.recorder
    }

    /// Flag that stops the run at the next window or stage boundary once set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Process every configured period.
    pub fn run(&self) -> anyhow::Result<RunSummary> {
        let started = Instant::now();
        let periods = self.config.periods.resolve()?;
        let workers = self.config.processing.period_workers.clamp(1, periods.len().max(1));

        tracing::info!(
            "Processing {} periods ({} at a time) with polygons from {}",
            periods.len(),
            workers,
            self.source.describe()
        );

        let outcomes: Vec<PeriodOutcome> = if workers == 1 {
            periods.iter().map(|&p| self.run_period(p)).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("period-{}", i))
                .build()
                .context("Failed to build period thread pool")?;
            pool.install(|| periods.par_iter().map(|&p| self.run_period(p)).collect())
        };

        let summary = RunSummary {
            outcomes,
            elapsed: started.elapsed(),
            metrics: self.metrics.snapshot(),
        };
        tracing::info!("Run complete: {}", summary);
        Ok(summary)
    }

    /// Take one period from `Pending` to `Done` or `Failed`.
    pub fn run_period(&self, period: Period) -> PeriodOutcome {
        let mut stage = Stage::Pending;
        self.publish(period, stage, stage.base_percent(), "queued".to_string());

        match self.execute(period, &mut stage) {
            Ok(done) => {
                self.publish(
                    period,
                    Stage::Done,
                    Stage::Done.base_percent(),
                    format!("accuracy {:.3}", done.accuracy),
                );
                if self.config.processing.enable_metrics {
                    tracing::info!("[{}] {}", period, self.metrics.snapshot());
                }
                PeriodOutcome::Done(done)
            }
            Err(err) => {
                self.metrics.add_failure();
                tracing::error!("[{}] failed during {}: {}", period, stage, err);
                self.publish(period, Stage::Failed, Stage::Failed.base_percent(), err.to_string());
                PeriodOutcome::Failed(FailedPeriod {
                    period,
                    stage,
                    kind: err.kind(),
                    message: err.to_string(),
                })
            }
        }
    }

    fn publish(&self, period: Period, stage: Stage, percent: f64, message: String) {
        self.progress.publish(ProgressEvent {
            period,
            stage,
            percent,
            message,
        });
    }

    /// Move to the stage after `stage`, honouring cancellation.
    fn advance(&self, period: Period, stage: &mut Stage, message: &str) -> Result<()> {
        let next = stage
            .next()
            .ok_or_else(|| PipelineError::Validation(format!("{} has already finished ({})", period, stage)))?;
        // Outputs already published are always recorded.
        if next != Stage::Recording && self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        *stage = next;
        tracing::info!("[{}] {}: {}", period, next, message);
        self.publish(period, next, next.base_percent(), message.to_string());
        Ok(())
    }

    fn execute(&self, period: Period, stage: &mut Stage) -> Result<CompletedPeriod> {
        let config = &self.config;

        self.advance(period, stage, "extracting training features")?;
        let mosaic_path = PathBuf::from(period.resolve_pattern(&config.input.mosaic_pattern));
        let accessor = RasterAccessor::open(&mosaic_path)?.with_nodata_override(config.input.nodata);
        let polygons = self.source.polygons_for(period)?;
        if polygons.is_empty() {
            return Err(PipelineError::Validation(format!(
                "no training polygons for {} in {}",
                period,
                self.source.describe()
            )));
        }
        let (rows, extraction) =
            PolygonFeatureExtractor::new(&accessor, polygons, config.sampling.aggregation).extract_all()?;
        tracing::info!("[{}] {}", period, extraction);

        self.advance(period, stage, "selecting training samples")?;
        let sampler = StratifiedSampler::from_config(&config.sampling)?;
        let (samples, sampling) = sampler.sample(rows);
        tracing::info!("[{}] {}", period, sampling);
        if let Some(dir) = &config.output.features_dir {
            self.save_features(Path::new(dir), period, &samples)?;
        }

        self.advance(period, stage, "training classifier")?;
        let trainer = ModelTrainer::new(config.training.clone())?;
        let model = trainer.train(&samples, period, &self.source.describe())?;
        let model_path = model.save(Path::new(&config.output.models_dir))?;

        self.advance(period, stage, "classifying mosaic")?;
        let aoi = self.aoi_definition(&accessor.metadata().bounds());
        let prediction_path = Path::new(&config.output.predictions_dir).join(prediction_filename(period, model.id));
        let prediction = match self.predict(period, &model, accessor, &prediction_path) {
            Ok(stats) => stats,
            Err(err) => {
                // An unrecorded model has no prediction to pair with.
                if let Err(e) = std::fs::remove_file(&model_path) {
                    tracing::warn!("Could not remove model {}: {}", model_path.display(), e);
                }
                return Err(err);
            }
        };

        self.advance(period, stage, "recording provenance")?;
        let model_record = ModelRecord::from_model(&model)?;
        let prediction_record = PredictionRecord::new(&prediction_path, &mosaic_path, period, aoi);
        let (model_record_id, prediction_record_id) =
            self.recorder.record_or_mark(&model_record, &prediction_record)?;

        *stage = Stage::Done;
        Ok(CompletedPeriod {
            period,
            model_id: model.id,
            model_path,
            prediction_path,
            accuracy: model.metrics.accuracy,
            macro_f1: model.metrics.macro_f1(),
            training_samples: model.training_samples,
            sampling,
            prediction,
            model_record_id,
            prediction_record_id,
        })
    }

    fn predict(
        &self,
        period: Period,
        model: &TrainedModel,
        accessor: RasterAccessor,
        output_path: &Path,
    ) -> Result<PredictionStats> {
        let from = Stage::Predicting.base_percent();
        let span = Stage::Recording.base_percent() - from;
        let predictor = WindowedPredictor::new(&model.artifact, PredictorOptions::from_config(&self.config))
            .with_metrics(self.metrics.clone())
            .with_cancel_flag(self.cancel.clone())
            .with_progress(move |done, total| {
                // One event per tenth of the windows
                if done == total || done * 10 / total != (done - 1) * 10 / total {
                    self.publish(
                        period,
                        Stage::Predicting,
                        from + span * done as f64 / total as f64,
                        format!("{}/{} windows", done, total),
                    );
                }
            });
        predictor.predict(accessor, output_path)
    }

    fn save_features(&self, dir: &Path, period: Period, rows: &[crate::features::FeatureRow]) -> Result<()> {
        std::fs::create_dir_all(dir)
            .map_err(|e| PipelineError::io(format!("cannot create features directory {}", dir.display()), e))?;
        let path = dir.join(format!("features_{:04}_{:02}.parquet", period.year, period.month));
        dataset::write_features(&path, rows)
            .map_err(|e| PipelineError::io_msg(format!("cannot write {}: {:#}", path.display(), e)))?;
        tracing::info!("[{}] Saved {} sampled rows to {}", period, rows.len(), path.display());
        Ok(())
    }

    /// WKT of the area actually classified, in raster CRS.
    fn aoi_definition(&self, raster_bounds: &Bounds) -> String {
        let area = self
            .config
            .prediction
            .aoi
            .and_then(|aoi| crs::intersect_bounds(&aoi, raster_bounds))
            .unwrap_or(*raster_bounds);
        crs::bounds_to_wkt(&area)
    }
}
