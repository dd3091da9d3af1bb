//! Land-cover classification pipeline
//!
//! Trains a per-period classifier from labeled polygons drawn over monthly
//! basemap mosaics, classifies every pixel of the mosaic, and records the
//! provenance of each model and prediction.
//!
//! # Architecture
//!
//! For each period:
//!
//! - **Raster**: GDAL-backed windowed reads and writes with explicit CRS checks
//! - **Features**: polygon rasterization into per-pixel or per-polygon feature rows
//! - **Sampling**: per-class caps spread across a spatial grid
//! - **Model**: train/test split, random forest or gradient boosting, evaluation
//! - **Predict**: reader → classifier pool → writer over bounded channels
//! - **Provenance**: SQLite records of every model/prediction pair
//! - **Pipeline**: the per-period stage machine, progress events and metrics
//!
//! # Usage
//!
//! ```no_run
//! use landcover_pipeline::{run_pipeline, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let summary = run_pipeline(config)?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crs;
pub mod error;
pub mod features;
pub mod model;
pub mod period;
pub mod pipeline;
pub mod predict;
pub mod provenance;
mod publish;
pub mod raster;
pub mod sampling;

pub use config::Config;
pub use error::{ErrorKind, PipelineError};
pub use features::{FeatureRow, PolygonFeatureExtractor, PolygonSource, TrainingPolygon};
pub use model::{ModelTrainer, TrainedModel};
pub use period::Period;
pub use pipeline::{Metrics, PeriodOutcome, PipelineOrchestrator, RunSummary};
pub use predict::WindowedPredictor;
pub use provenance::ProvenanceRecorder;
pub use raster::RasterAccessor;
pub use sampling::StratifiedSampler;

use anyhow::Result;

/// Run every configured period and return the per-period outcomes.
///
/// Period failures are reported in the summary rather than as an error;
/// only configuration and setup problems fail the call.
pub fn run_pipeline(config: Config) -> Result<RunSummary> {
    config.validate()?;

    tracing::info!("Starting land-cover pipeline");
    let metrics_path = config.processing.metrics_output_path.clone();

    let orchestrator = PipelineOrchestrator::from_config(config)?;
    let logger = orchestrator.progress().spawn_log_subscriber();

    let summary = orchestrator.run();
    orchestrator.progress().close();
    if logger.join().is_err() {
        tracing::warn!("Progress log subscriber panicked");
    }
    let summary = summary?;

    if let Some(path) = metrics_path {
        summary.metrics.save_to_file(&path)?;
    }

    Ok(summary)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
