//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters shared by every stage of a run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Windows read from mosaics
    pub windows_read: AtomicU64,

    /// Windows that went through the classifier
    pub windows_classified: AtomicU64,

    /// Windows written straight as NODATA
    pub windows_skipped: AtomicU64,

    /// Pixels assigned a class
    pub pixels_classified: AtomicU64,

    /// Pixels written as NODATA (source NODATA or outside the AOI)
    pub nodata_pixels: AtomicU64,

    /// Total bytes of band data read
    pub bytes_read: AtomicU64,

    /// Total bytes of class labels written
    pub bytes_written: AtomicU64,

    /// Number of failed periods
    pub failures: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-stage timing (in microseconds, summed across threads)
    /// Time spent reading windows
    pub read_us: AtomicU64,

    /// Time spent classifying pixels
    pub classify_us: AtomicU64,

    /// Time spent writing blocks
    pub write_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_window_read(&self, bytes: u64) {
        self.windows_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_window_classified(&self, pixels: u64, nodata_pixels: u64) {
        self.windows_classified.fetch_add(1, Ordering::Relaxed);
        self.pixels_classified.fetch_add(pixels, Ordering::Relaxed);
        self.nodata_pixels.fetch_add(nodata_pixels, Ordering::Relaxed);
    }

    pub fn add_window_skipped(&self, nodata_pixels: u64) {
        self.windows_skipped.fetch_add(1, Ordering::Relaxed);
        self.nodata_pixels.fetch_add(nodata_pixels, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_read_time(&self, duration: Duration) {
        self.read_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_classify_time(&self, duration: Duration) {
        self.classify_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_write_time(&self, duration: Duration) {
        self.write_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Classified pixels per second of wall time.
    pub fn pixels_per_second(&self) -> f64 {
        let pixels = self.pixels_classified.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            pixels as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            windows_read: self.windows_read.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            windows_skipped: self.windows_skipped.load(Ordering::Relaxed),
            pixels_classified: self.pixels_classified.load(Ordering::Relaxed),
            nodata_pixels: self.nodata_pixels.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            pixels_per_second: self.pixels_per_second(),
            read_secs: self.read_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            classify_secs: self.classify_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            write_secs: self.write_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub windows_read: u64,
    pub windows_classified: u64,
    pub windows_skipped: u64,
    pub pixels_classified: u64,
    pub nodata_pixels: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub pixels_per_second: f64,
    /// Total time spent reading (seconds, summed across threads)
    pub read_secs: f64,
    /// Total time spent classifying (seconds, summed across threads)
    pub classify_secs: f64,
    /// Total time spent writing (seconds)
    pub write_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total_stage_time = self.read_secs + self.classify_secs + self.write_secs;
        let (read_pct, classify_pct, write_pct) = if total_stage_time > 0.0 {
            (
                self.read_secs / total_stage_time * 100.0,
                self.classify_secs / total_stage_time * 100.0,
                self.write_secs / total_stage_time * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Windows: {} read, {} classified, {} NODATA-only | \
             Pixels: {} classified, {} NODATA | \
             Read: {:.2} MB | Write: {:.2} MB | Rate: {:.0} px/s | \
             Failures: {} | Elapsed: {:.1}s | \
             Time: read {:.0}% | classify {:.0}% | write {:.0}%",
            self.windows_read,
            self.windows_classified,
            self.windows_skipped,
            self.pixels_classified,
            self.nodata_pixels,
            self.bytes_read as f64 / (1024.0 * 1024.0),
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.pixels_per_second,
            self.failures,
            self.elapsed.as_secs_f64(),
            read_pct,
            classify_pct,
            write_pct,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.add_window_read(1000);
        metrics.add_window_read(500);

        assert_eq!(metrics.windows_read.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.bytes_read.load(Ordering::Relaxed), 1500);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = Metrics::new();

        metrics.add_window_classified(100, 20);
        metrics.add_window_classified(50, 0);
        metrics.add_window_skipped(64);
        metrics.add_failure();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.windows_classified, 2);
        assert_eq!(snapshot.windows_skipped, 1);
        assert_eq!(snapshot.pixels_classified, 150);
        assert_eq!(snapshot.nodata_pixels, 84);
        assert_eq!(snapshot.failures, 1);
    }

    #[test]
    fn test_timing_metrics() {
        let metrics = Metrics::new();

        metrics.add_read_time(Duration::from_millis(100));
        metrics.add_classify_time(Duration::from_millis(50));
        metrics.add_write_time(Duration::from_millis(25));

        let snapshot = metrics.snapshot();

        assert!((snapshot.read_secs - 0.1).abs() < 0.001);
        assert!((snapshot.classify_secs - 0.05).abs() < 0.001);
        assert!((snapshot.write_secs - 0.025).abs() < 0.001);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = MetricsSnapshot {
            windows_read: 100,
            windows_classified: 90,
            windows_skipped: 10,
            pixels_classified: 5_000_000,
            nodata_pixels: 1000,
            bytes_read: 1024 * 1024,
            bytes_written: 512 * 1024,
            failures: 2,
            elapsed: Duration::from_secs(10),
            pixels_per_second: 500_000.0,
            read_secs: 5.0,
            classify_secs: 4.0,
            write_secs: 1.0,
        };

        let display = format!("{}", snapshot);

        assert!(display.contains("100 read"));
        assert!(display.contains("10 NODATA-only"));
        assert!(display.contains("Failures: 2"));
        assert!(display.contains("read 50%"));
    }

    #[test]
    fn test_zero_elapsed_no_panic() {
        let metrics = Metrics {
            start_time: None,
            ..Default::default()
        };

        metrics.add_window_classified(1000, 0);

        assert_eq!(metrics.pixels_per_second(), 0.0);
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let metrics = Metrics::new();
        metrics.add_window_read(42);

        metrics.snapshot().save_to_file(path.to_str().unwrap()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["bytes_read"], 42);
    }
}
