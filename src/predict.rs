//! Full-mosaic inference, one window at a time.
//!
//! Three stages connected by bounded channels:
//!
//! ```text
//! ┌────────┐   windows   ┌──────────────┐   labels   ┌────────┐
//! │ Reader │────────────▶│ Classifier×N │───────────▶│ Writer │
//! └────────┘             └──────────────┘            └────────┘
//! ```
//!
//! The reader owns the input dataset and the writer owns the output dataset,
//! so neither GDAL handle is shared between threads. The bounded queues keep
//! at most `queue_depth` windows in flight per stage. A failing stage closes
//! both channels and the others drain out.
//!
//! Output goes to a temporary file beside the destination and is renamed
//! into place only after every window has been written.

use crate::config::Config;
use crate::crs::Bounds;
use crate::error::{PipelineError, Result};
use crate::model::ModelArtifact;
use crate::period::Period;
use crate::pipeline::Metrics;
use crate::publish::publish;
use crate::raster::{nodata_mask, GeoTransform, OutputProfile, PixelWindow, RasterAccessor};
use ndarray::{Array2, Array3, ArrayView2};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Label written for NODATA pixels and pixels outside the AOI.
pub const NODATA_CLASS: u8 = 255;

/// Largest number of classes a `u8` raster can hold next to [`NODATA_CLASS`].
pub const MAX_CLASSES: usize = 255;

/// `classified_<YYYY>_<MM>_<uuid>.tif`
pub fn prediction_filename(period: Period, id: Uuid) -> String {
    format!("classified_{:04}_{:02}_{}.tif", period.year, period.month, id)
}

/// Anything that maps pixel band vectors to class indices.
pub trait PixelClassifier: Send + Sync {
    fn class_count(&self) -> usize;

    fn n_features(&self) -> usize;

    /// Classify a `(pixels, bands)` matrix, one class index per row.
    fn classify(&self, pixels: ArrayView2<'_, f64>) -> Vec<u8>;
}

impl PixelClassifier for ModelArtifact {
    fn class_count(&self) -> usize {
        ModelArtifact::class_count(self)
    }

    fn n_features(&self) -> usize {
        ModelArtifact::n_features(self)
    }

    fn classify(&self, pixels: ArrayView2<'_, f64>) -> Vec<u8> {
        pixels
            .outer_iter()
            .map(|row| {
                let row = row.to_vec();
                self.predict_index(&row) as u8
            })
            .collect()
    }
}

/// Tuning for a prediction run.
#[derive(Debug, Clone)]
pub struct PredictorOptions {
    pub block_size: usize,
    pub workers: usize,
    pub queue_depth: usize,
    /// Area of interest in raster CRS; pixels whose centre lies outside are NODATA
    pub aoi: Option<Bounds>,
    pub compression: String,
}

impl Default for PredictorOptions {
    fn default() -> Self {
        Self {
            block_size: 256,
            workers: rayon::current_num_threads(),
            queue_depth: 16,
            aoi: None,
            compression: "DEFLATE".to_string(),
        }
    }
}

impl PredictorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            block_size: config.output.block_size,
            workers: config.prediction.workers.unwrap_or_else(rayon::current_num_threads),
            queue_depth: config.prediction.queue_depth,
            aoi: config.prediction.aoi,
            compression: config.output.compression.clone(),
        }
    }
}

/// Counters from one prediction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PredictionStats {
    pub windows_total: usize,
    pub windows_classified: usize,
    pub windows_nodata: usize,
    pub pixels_classified: u64,
    pub pixels_nodata: u64,
}

impl std::fmt::Display for PredictionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Windows: {} ({} classified, {} NODATA-only) | Pixels: {} classified, {} NODATA",
            self.windows_total, self.windows_classified, self.windows_nodata, self.pixels_classified, self.pixels_nodata
        )
    }
}

struct ReadWindow {
    window: PixelWindow,
    block: Array3<f64>,
}

struct LabeledWindow {
    window: PixelWindow,
    labels: Array2<u8>,
    classified: usize,
}

/// Shared first-error slot so later stages do not overwrite the cause.
#[derive(Default)]
struct FirstError(Mutex<Option<PipelineError>>);

impl FirstError {
    fn set(&self, err: PipelineError) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(err);
        }
    }

    fn take(&self) -> Option<PipelineError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

type ProgressFn<'a> = Box<dyn Fn(usize, usize) + Send + Sync + 'a>;

/// Classifies every window of a mosaic into a new single-band raster.
pub struct WindowedPredictor<'a, C: PixelClassifier> {
    classifier: &'a C,
    options: PredictorOptions,
    metrics: Option<Arc<Metrics>>,
    cancel: Option<Arc<AtomicBool>>,
    on_progress: Option<ProgressFn<'a>>,
}

impl<'a, C: PixelClassifier> WindowedPredictor<'a, C> {
    pub fn new(classifier: &'a C, options: PredictorOptions) -> Self {
        Self {
            classifier,
            options,
            metrics: None,
            cancel: None,
            on_progress: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Called by the writer with `(windows_done, windows_total)`.
    pub fn with_progress(mut self, f: impl Fn(usize, usize) + Send + Sync + 'a) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }

    fn validate(&self, input: &RasterAccessor) -> Result<()> {
        let classes = self.classifier.class_count();
        if classes == 0 || classes > MAX_CLASSES {
            return Err(PipelineError::Validation(format!(
                "model has {} classes; a u8 output holds 1 to {}",
                classes, MAX_CLASSES
            )));
        }
        if self.options.block_size == 0 || self.options.block_size % 16 != 0 {
            return Err(PipelineError::Validation(format!(
                "block size must be a positive multiple of 16, got {}",
                self.options.block_size
            )));
        }

        let meta = input.metadata();
        if self.classifier.n_features() != meta.band_count {
            return Err(PipelineError::Data(format!(
                "model expects {} bands but {} has {}",
                self.classifier.n_features(),
                input.path().display(),
                meta.band_count
            )));
        }

        if let Some(aoi) = &self.options.aoi {
            let [min_x, min_y, max_x, max_y] = *aoi;
            if aoi.iter().any(|v| !v.is_finite()) || min_x >= max_x || min_y >= max_y {
                return Err(PipelineError::Validation(format!("malformed AOI {:?}", aoi)));
            }
            if crate::crs::intersect_bounds(aoi, &meta.bounds()).is_none() {
                return Err(PipelineError::Validation(format!(
                    "AOI {:?} does not intersect raster bounds {:?}",
                    aoi,
                    meta.bounds()
                )));
            }
        }
        Ok(())
    }

    /// Classify `input` into a new raster at `output_path`.
    ///
    /// The file appears at `output_path` only if every window succeeds; on
    /// error or cancellation nothing is left behind.
    pub fn predict(&self, input: RasterAccessor, output_path: &Path) -> Result<PredictionStats> {
        self.validate(&input)?;

        let dir = match output_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| PipelineError::io(format!("cannot create output directory {}", dir.display()), e))?;

        let tmp = tempfile::Builder::new()
            .prefix(".classified-")
            .suffix(".tif")
            .tempfile_in(&dir)
            .map_err(|e| PipelineError::io(format!("cannot create temporary output in {}", dir.display()), e))?;

        let meta = input.metadata().clone();
        let profile = OutputProfile::matching(&meta, NODATA_CLASS, self.options.block_size, &self.options.compression);
        let output = RasterAccessor::create(tmp.path(), &profile)?;

        let total = meta.block_grid(self.options.block_size).num_blocks();
        tracing::info!(
            "Classifying {} ({}x{}, {} windows of {}px) with {} workers",
            input.path().display(),
            meta.width,
            meta.height,
            total,
            self.options.block_size,
            self.options.workers.max(1)
        );

        let stats = self.run_stages(input, output, total)?;

        if self.cancelled() {
            return Err(PipelineError::Cancelled);
        }

        publish(tmp, output_path)?;

        tracing::info!("Wrote {}: {}", output_path.display(), stats);
        Ok(stats)
    }

    fn run_stages(&self, input: RasterAccessor, mut output: RasterAccessor, total: usize) -> Result<PredictionStats> {
        let depth = self.options.queue_depth.max(1);
        let (read_tx, read_rx) = async_channel::bounded::<ReadWindow>(depth);
        let (label_tx, label_rx) = async_channel::bounded::<LabeledWindow>(depth);
        let first_error = FirstError::default();

        let stop = |err: PipelineError| {
            first_error.set(err);
            read_rx.close();
            label_rx.close();
        };

        let nodata = input.metadata().nodata;
        let geo_transform = input.metadata().geo_transform;
        let block_size = self.options.block_size;

        let stats = std::thread::scope(|scope| {
            // Reader: takes ownership of the input dataset
            let reader_tx = read_tx;
            let stop = &stop;
            scope.spawn(move || {
                for window in input.windows(block_size) {
                    if self.cancelled() {
                        stop(PipelineError::Cancelled);
                        break;
                    }
                    let started = Instant::now();
                    let block = match input.read(&window) {
                        Ok(block) => block,
                        Err(e) => {
                            stop(e);
                            break;
                        }
                    };
                    if let Some(m) = &self.metrics {
                        m.add_read_time(started.elapsed());
                        m.add_window_read((block.len() * std::mem::size_of::<f64>()) as u64);
                    }
                    if reader_tx.send_blocking(ReadWindow { window, block }).is_err() {
                        break;
                    }
                }
                reader_tx.close();
            });

            // Classifiers
            for _ in 0..self.options.workers.max(1) {
                let rx = read_rx.clone();
                let tx = label_tx.clone();
                let stop = stop;
                scope.spawn(move || {
                    while let Ok(item) = rx.recv_blocking() {
                        let started = Instant::now();
                        let labeled = match self.label_window(item, nodata, &geo_transform) {
                            Ok(labeled) => labeled,
                            Err(e) => {
                                stop(e);
                                break;
                            }
                        };
                        if let Some(m) = &self.metrics {
                            m.add_classify_time(started.elapsed());
                        }
                        if tx.send_blocking(labeled).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(label_tx);

            // Writer: runs on this thread and owns the output dataset
            let mut stats = PredictionStats {
                windows_total: total,
                ..Default::default()
            };
            let mut done = 0;
            while let Ok(item) = label_rx.recv_blocking() {
                let started = Instant::now();
                if let Err(e) = output.write(&item.window, &item.labels) {
                    stop(e);
                    break;
                }

                let pixels = item.window.pixel_count();
                let nodata_pixels = (pixels - item.classified) as u64;
                if item.classified == 0 {
                    stats.windows_nodata += 1;
                } else {
                    stats.windows_classified += 1;
                }
                stats.pixels_classified += item.classified as u64;
                stats.pixels_nodata += nodata_pixels;

                if let Some(m) = &self.metrics {
                    m.add_write_time(started.elapsed());
                    m.add_bytes_written(pixels as u64);
                    if item.classified == 0 {
                        m.add_window_skipped(nodata_pixels);
                    } else {
                        m.add_window_classified(item.classified as u64, nodata_pixels);
                    }
                }

                done += 1;
                tracing::debug!("Wrote window {} ({}/{})", item.window, done, total);
                if let Some(progress) = &self.on_progress {
                    progress(done, total);
                }
            }
            stats
        });

        if let Some(err) = first_error.take() {
            return Err(err);
        }
        if stats.windows_classified + stats.windows_nodata != total {
            return Err(PipelineError::io_msg(format!(
                "only {} of {} windows were written",
                stats.windows_classified + stats.windows_nodata,
                total
            )));
        }

        output.close()?;
        Ok(stats)
    }

    fn label_window(&self, item: ReadWindow, nodata: Option<f64>, gt: &GeoTransform) -> Result<LabeledWindow> {
        let ReadWindow { window, block } = item;
        let mut mask = nodata_mask(&block, nodata);

        if let Some([min_x, min_y, max_x, max_y]) = self.options.aoi {
            for ((row, col), masked) in mask.indexed_iter_mut() {
                let (x, y) = gt.pixel_center(window.x + col, window.y + row);
                if x < min_x || x > max_x || y < min_y || y > max_y {
                    *masked = true;
                }
            }
        }

        let valid: Vec<(usize, usize)> = mask
            .indexed_iter()
            .filter(|(_, &masked)| !masked)
            .map(|(idx, _)| idx)
            .collect();

        let mut labels = Array2::from_elem((window.height, window.width), NODATA_CLASS);
        if valid.is_empty() {
            return Ok(LabeledWindow {
                window,
                labels,
                classified: 0,
            });
        }

        let bands = block.dim().0;
        let pixels = Array2::from_shape_fn((valid.len(), bands), |(i, b)| {
            let (row, col) = valid[i];
            block[[b, row, col]]
        });
        let classes = self.classifier.classify(pixels.view());
        if classes.len() != valid.len() {
            return Err(PipelineError::Data(format!(
                "classifier returned {} labels for {} pixels in window {}",
                classes.len(),
                valid.len(),
                window
            )));
        }

        for (&(row, col), class) in valid.iter().zip(classes) {
            labels[[row, col]] = class;
        }
        Ok(LabeledWindow {
            window,
            labels,
            classified: valid.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::test_support::{create_mosaic, utm_transform};
    use std::sync::atomic::AtomicUsize;

    /// Class 1 when band 1 is above `threshold`, else class 0. Counts calls.
    struct Threshold {
        threshold: f64,
        bands: usize,
        calls: AtomicUsize,
    }

    impl Threshold {
        fn new(threshold: f64, bands: usize) -> Self {
            Self {
                threshold,
                bands,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl PixelClassifier for Threshold {
        fn class_count(&self) -> usize {
            2
        }

        fn n_features(&self) -> usize {
            self.bands
        }

        fn classify(&self, pixels: ArrayView2<'_, f64>) -> Vec<u8> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            pixels.outer_iter().map(|p| u8::from(p[0] > self.threshold)).collect()
        }
    }

    /// Returns the wrong number of labels.
    struct Broken;

    impl PixelClassifier for Broken {
        fn class_count(&self) -> usize {
            2
        }
        fn n_features(&self) -> usize {
            1
        }
        fn classify(&self, _pixels: ArrayView2<'_, f64>) -> Vec<u8> {
            Vec::new()
        }
    }

    fn options(block_size: usize) -> PredictorOptions {
        PredictorOptions {
            block_size,
            workers: 3,
            queue_depth: 2,
            ..Default::default()
        }
    }

    fn read_labels(path: &Path) -> Array2<u8> {
        let accessor = RasterAccessor::open(path).unwrap();
        let meta = accessor.metadata();
        let block = accessor.read(&PixelWindow::new(0, 0, meta.width, meta.height)).unwrap();
        block.index_axis(ndarray::Axis(0), 0).mapv(|v| v as u8)
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_prediction_filename() {
        let id = Uuid::nil();
        assert_eq!(
            prediction_filename(Period::new(2024, 3).unwrap(), id),
            "classified_2024_03_00000000-0000-0000-0000-000000000000.tif"
        );
    }

    #[test]
    fn test_nodata_windows_skip_classifier() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        // left half NODATA (0), right half 1 or 100 by row
        create_mosaic(&mosaic, 64, 64, 2, Some(0.0), |_, row, col| {
            if col < 32 {
                0
            } else if row < 32 {
                1
            } else {
                100
            }
        });

        let classifier = Threshold::new(50.0, 2);
        let out = dir.path().join("out").join("classified.tif");
        let stats = WindowedPredictor::new(&classifier, options(32))
            .predict(RasterAccessor::open(&mosaic).unwrap(), &out)
            .unwrap();

        assert_eq!(stats.windows_total, 4);
        assert_eq!(stats.windows_nodata, 2);
        assert_eq!(stats.windows_classified, 2);
        assert_eq!(stats.pixels_classified, 2 * 32 * 32);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);

        let labels = read_labels(&out);
        assert_eq!(labels[[0, 0]], NODATA_CLASS);
        assert_eq!(labels[[63, 31]], NODATA_CLASS);
        assert_eq!(labels[[0, 32]], 0);
        assert_eq!(labels[[63, 63]], 1);
    }

    #[test]
    fn test_output_profile_matches_input() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        create_mosaic(&mosaic, 40, 24, 1, None, |_, _, col| col as u16);

        let out = dir.path().join("classified.tif");
        WindowedPredictor::new(&Threshold::new(20.0, 1), options(16))
            .predict(RasterAccessor::open(&mosaic).unwrap(), &out)
            .unwrap();

        let accessor = RasterAccessor::open(&out).unwrap();
        let meta = accessor.metadata();
        assert_eq!((meta.width, meta.height, meta.band_count), (40, 24, 1));
        assert_eq!(meta.geo_transform, utm_transform());
        assert_eq!(meta.nodata, Some(255.0));
        assert_eq!(meta.crs_code.as_deref(), Some("EPSG:32610"));

        let labels = read_labels(&out);
        assert_eq!(labels[[5, 20]], 0);
        assert_eq!(labels[[5, 21]], 1);
    }

    #[test]
    fn test_runs_are_pixel_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        create_mosaic(&mosaic, 50, 50, 1, Some(0.0), |_, row, col| ((row * 7 + col * 3) % 11) as u16);

        let classifier = Threshold::new(5.0, 1);
        let a = dir.path().join("a.tif");
        let b = dir.path().join("b.tif");
        for out in [&a, &b] {
            WindowedPredictor::new(&classifier, options(16))
                .predict(RasterAccessor::open(&mosaic).unwrap(), out)
                .unwrap();
        }
        assert_eq!(read_labels(&a), read_labels(&b));
    }

    #[cfg(unix)]
    #[test]
    fn test_published_raster_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        create_mosaic(&mosaic, 32, 32, 1, None, |_, row, _| row as u16);

        let out = dir.path().join("out").join("classified.tif");
        WindowedPredictor::new(&Threshold::new(10.0, 1), options(16))
            .predict(RasterAccessor::open(&mosaic).unwrap(), &out)
            .unwrap();

        let mode = std::fs::metadata(&out).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_aoi_masks_outside_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        create_mosaic(&mosaic, 32, 32, 1, None, |_, _, _| 100);

        // top-left 10x10 pixels
        let aoi = [500000.0, 4199900.0, 500100.0, 4200000.0];
        let out = dir.path().join("classified.tif");
        let stats = WindowedPredictor::new(
            &Threshold::new(50.0, 1),
            PredictorOptions {
                aoi: Some(aoi),
                ..options(16)
            },
        )
        .predict(RasterAccessor::open(&mosaic).unwrap(), &out)
        .unwrap();

        assert_eq!(stats.pixels_classified, 100);
        assert_eq!(stats.windows_nodata, 3);
        let labels = read_labels(&out);
        assert_eq!(labels[[9, 9]], 1);
        assert_eq!(labels[[10, 9]], NODATA_CLASS);
        assert_eq!(labels[[31, 31]], NODATA_CLASS);
    }

    #[test]
    fn test_malformed_aoi_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        create_mosaic(&mosaic, 16, 16, 1, None, |_, _, _| 1);
        let classifier = Threshold::new(0.0, 1);

        for aoi in [[1.0, 1.0, 0.0, 2.0], [f64::NAN, 0.0, 1.0, 1.0], [0.0, 0.0, 1.0, 1.0]] {
            let err = WindowedPredictor::new(
                &classifier,
                PredictorOptions {
                    aoi: Some(aoi),
                    ..options(16)
                },
            )
            .predict(RasterAccessor::open(&mosaic).unwrap(), &dir.path().join("x.tif"))
            .err()
            .unwrap();
            assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        }
    }

    #[test]
    fn test_band_mismatch_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        create_mosaic(&mosaic, 16, 16, 3, None, |_, _, _| 1);

        let err = WindowedPredictor::new(&Threshold::new(0.0, 4), options(16))
            .predict(RasterAccessor::open(&mosaic).unwrap(), &dir.path().join("x.tif"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
    }

    #[test]
    fn test_cancelled_run_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        create_mosaic(&mosaic, 64, 64, 1, None, |_, _, _| 1);
        let out_dir = dir.path().join("out");

        let cancel = Arc::new(AtomicBool::new(true));
        let err = WindowedPredictor::new(&Threshold::new(0.0, 1), options(16))
            .with_cancel_flag(cancel)
            .predict(RasterAccessor::open(&mosaic).unwrap(), &out_dir.join("classified.tif"))
            .err()
            .unwrap();

        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert!(files_in(&out_dir).is_empty());
    }

    #[test]
    fn test_failed_run_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        create_mosaic(&mosaic, 64, 64, 1, None, |_, _, _| 1);
        let out_dir = dir.path().join("out");

        let err = WindowedPredictor::new(&Broken, options(16))
            .predict(RasterAccessor::open(&mosaic).unwrap(), &out_dir.join("classified.tif"))
            .err()
            .unwrap();

        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
        assert!(files_in(&out_dir).is_empty());
    }

    #[test]
    fn test_progress_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = dir.path().join("mosaic.tif");
        create_mosaic(&mosaic, 48, 32, 1, None, |_, _, _| 1);

        let metrics = Metrics::new();
        let seen = Mutex::new(Vec::new());
        let classifier = Threshold::new(0.0, 1);
        WindowedPredictor::new(&classifier, options(16))
            .with_metrics(metrics.clone())
            .with_progress(|done, total| seen.lock().unwrap().push((done, total)))
            .predict(RasterAccessor::open(&mosaic).unwrap(), &dir.path().join("c.tif"))
            .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&(6, 6)));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.windows_read, 6);
        assert_eq!(snapshot.windows_classified, 6);
        assert_eq!(snapshot.pixels_classified, 48 * 32);
    }
}
