//! Land-cover pipeline CLI
//!
//! Trains a classifier per basemap period and classifies the whole mosaic.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use landcover_pipeline::features::JsonPolygonSource;
use landcover_pipeline::{init_rayon, run_pipeline, Config, PolygonSource, ProvenanceRecorder, RasterAccessor};

#[derive(Parser)]
#[command(name = "landcover-pipeline")]
#[command(about = "Train and apply per-period land-cover classifiers", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override the number of periods processed concurrently
    #[arg(long, global = true)]
    period_workers: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default if no command specified)
    Run,

    /// Inspect mosaics and polygons without processing
    Analyze,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Complete provenance records left pending by failed writes
    Reconcile,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, cli.period_workers)?;
        }

        Some(Commands::Analyze) => {
            analyze_command(cli.config)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }

        Some(Commands::Reconcile) => {
            reconcile_command(cli.config)?;
        }
    }

    Ok(())
}

fn load_config(config_path: &PathBuf) -> Result<Config> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    config.validate()?;
    Ok(config)
}

fn run_command(config_path: PathBuf, period_workers: Option<usize>) -> Result<()> {
    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    // Apply overrides
    if let Some(workers) = period_workers {
        config.processing.period_workers = workers;
    }

    config.validate()?;

    // Initialize Rayon
    init_rayon(config.processing.rayon_threads)?;

    let summary = run_pipeline(config)?;
    println!("{}", summary);

    let failed = summary.failed().count();
    if failed > 0 {
        anyhow::bail!("{} of {} periods failed", failed, summary.outcomes.len());
    }
    Ok(())
}

fn analyze_command(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let periods = config.periods.resolve()?;
    let source = JsonPolygonSource::load(&config.input.polygons_path, config.input.classes.as_deref())?;

    println!("\n=== Work Analysis ===");
    println!("Polygons: {}", source.describe());
    println!("Periods: {}", periods.len());

    let mut ready = 0;
    for period in &periods {
        let mosaic = period.resolve_pattern(&config.input.mosaic_pattern);
        println!("\n--- {} ---", period);

        let mut by_class: BTreeMap<String, usize> = BTreeMap::new();
        for polygon in source.polygons_for(*period)? {
            *by_class.entry(polygon.class_label).or_default() += 1;
        }
        if by_class.is_empty() {
            println!("Polygons: none");
        } else {
            let counts: Vec<String> = by_class.iter().map(|(c, n)| format!("{}={}", c, n)).collect();
            println!("Polygons: {}", counts.join(", "));
        }

        match RasterAccessor::open(&mosaic) {
            Ok(accessor) => {
                let meta = accessor.metadata();
                let grid = meta.block_grid(config.output.block_size);
                println!("Mosaic: {}", mosaic);
                println!(
                    "  {}x{} pixels, {} bands, crs {}, nodata {:?}",
                    meta.width,
                    meta.height,
                    meta.band_count,
                    meta.crs(),
                    config.input.nodata.or(meta.nodata)
                );
                println!(
                    "  {} windows of {}px ({:.1} MB of band data)",
                    grid.num_blocks(),
                    config.output.block_size,
                    (meta.width * meta.height * meta.band_count * std::mem::size_of::<f64>()) as f64
                        / (1024.0 * 1024.0)
                );
                if by_class.len() >= 2 {
                    ready += 1;
                } else {
                    println!("  needs labeled polygons of at least two classes");
                }
            }
            Err(e) => println!("Mosaic: {} (unavailable: {})", mosaic, e),
        }
    }

    println!("\n{} of {} periods ready to process", ready, periods.len());
    println!("=====================\n");
    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    load_config(&config_path)?;
    println!("Configuration is valid");
    Ok(())
}

fn reconcile_command(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let recorder = ProvenanceRecorder::open(&config.output.database_path)?;
    let predictions = Path::new(&config.output.predictions_dir);

    let report = recorder.reconcile(predictions)?;
    println!("{}", report);

    let untracked = recorder.untracked_predictions(predictions)?;
    if !untracked.is_empty() {
        println!("Predictions without provenance records:");
        for path in &untracked {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Land-Cover Pipeline Configuration

# === INPUT: Mosaics and training polygons ===
input:
  # One mosaic per period; {year} and {month} (zero-padded) are substituted
  mosaic_pattern: "/data/basemaps/{year}_{month}.tif"

  # Labeled polygons as a JSON or YAML list of
  # {id, class_label, wkt, crs, year, month}
  polygons_path: "/data/labels/polygons.json"

  # Override the NODATA value stored in the mosaic
  # nodata: 0

  # Reject polygons with labels outside this set
  # classes: ["forest", "non-forest"]

# === PERIODS: Which months to process ===
periods:
  start: "2024-01"
  end: "2024-06"
  # Or an explicit list (takes precedence)
  # list: ["2024-01", "2024-04"]

# === OUTPUT ===
output:
  models_dir: "/data/models"
  predictions_dir: "/data/predictions"
  database_path: "/data/provenance.db"

  # Save sampled training features as parquet
  # features_dir: "/data/features"

  # Window and GeoTIFF tile size in pixels (multiple of 16)
  block_size: 256

  # DEFLATE, LZW, ZSTD, PACKBITS or NONE
  compression: "DEFLATE"

# === TRAINING: Classifier hyperparameters ===
training:
  # random_forest or gradient_boosting
  model_type: "random_forest"
  n_estimators: 100
  max_depth: 8
  learning_rate: 0.1
  min_child_weight: 1.0
  subsample: 0.8
  colsample_bytree: 1.0

  # Fraction held out for evaluation
  train_test_split: 0.2

  # feature: whole polygons on one side; pixel: rows split independently
  split_method: "feature"
  seed: 42

# === SAMPLING: Training sample selection ===
sampling:
  target_per_class: 50

  # Spatial grid cell in raster CRS units
  cell_size: 1000.0
  seed: 42

  # per_pixel or mean_per_polygon
  aggregation: "per_pixel"

# === PREDICTION: Full-mosaic inference ===
prediction:
  # Classifier threads (null = num CPUs)
  # workers: 8

  # Windows buffered between read, classify and write
  queue_depth: 16

  # Classify only inside [min_x, min_y, max_x, max_y] in raster CRS
  # aoi: [500000.0, 4190000.0, 510000.0, 4200000.0]

# === PROCESSING: Performance tuning ===
processing:
  # Periods processed concurrently
  period_workers: 1

  # Rayon thread pool size for CPU work (null = num CPUs)
  # rayon_threads: 16

  # Log metrics after each period
  enable_metrics: true

  # Save run metrics as JSON
  # metrics_output_path: "/data/metrics.json"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
