//! Durable lineage: which model produced which classified raster.
//!
//! Records live in SQLite. A model row and its prediction row are inserted
//! in one transaction, so a prediction is never visible without its model.
//! When that transaction fails after the raster has already been published,
//! a `<raster>.reconcile.json` marker is left next to it and
//! [`ProvenanceRecorder::reconcile`] completes the records later.

use crate::error::{PipelineError, Result};
use crate::model::TrainedModel;
use crate::period::Period;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ml_models (
    model_id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_filename TEXT NOT NULL UNIQUE,
    model_type TEXT NOT NULL,
    trained_at TEXT NOT NULL,
    training_data_source TEXT NOT NULL,
    parameters TEXT NOT NULL,
    metrics TEXT NOT NULL,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS raster_predictions (
    prediction_id INTEGER PRIMARY KEY AUTOINCREMENT,
    prediction_filename TEXT NOT NULL UNIQUE,
    prediction_path TEXT NOT NULL,
    generated_at TEXT NOT NULL,
    model_id INTEGER NOT NULL REFERENCES ml_models(model_id),
    source_mosaic TEXT NOT NULL,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL,
    aoi_definition TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ml_models_period ON ml_models(year, month);
CREATE INDEX IF NOT EXISTS idx_raster_predictions_period ON raster_predictions(year, month);
";

const MARKER_SUFFIX: &str = ".reconcile.json";

/// Metadata row for a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_filename: String,
    pub model_type: String,
    pub trained_at: DateTime<Utc>,
    pub training_data_source: String,
    pub parameters: serde_json::Value,
    pub metrics: serde_json::Value,
    pub period: Period,
}

impl ModelRecord {
    pub fn from_model(model: &TrainedModel) -> Result<Self> {
        let to_json = |value: serde_json::Result<serde_json::Value>| {
            value.map_err(|e| PipelineError::MetadataWrite(format!("cannot encode model {}: {}", model.id, e)))
        };
        Ok(Self {
            model_filename: model.filename(),
            model_type: model.model_type.to_string(),
            trained_at: model.trained_at,
            training_data_source: model.training_data_source.clone(),
            parameters: to_json(serde_json::to_value(&model.parameters))?,
            metrics: to_json(serde_json::to_value(&model.metrics))?,
            period: model.period,
        })
    }
}

/// Metadata row for a classified raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub prediction_filename: String,
    pub prediction_path: String,
    pub generated_at: DateTime<Utc>,
    pub source_mosaic: String,
    pub period: Period,
    /// AOI polygon as WKT in raster CRS
    pub aoi_definition: String,
}

impl PredictionRecord {
    pub fn new(prediction_path: &Path, source_mosaic: &Path, period: Period, aoi_definition: String) -> Self {
        Self {
            prediction_filename: prediction_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            prediction_path: prediction_path.display().to_string(),
            generated_at: Utc::now(),
            source_mosaic: source_mosaic.display().to_string(),
            period,
            aoi_definition,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredModel {
    pub model_id: i64,
    pub record: ModelRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredPrediction {
    pub prediction_id: i64,
    pub model_id: i64,
    pub record: PredictionRecord,
}

/// Pending records left behind by a failed [`ProvenanceRecorder::record_or_mark`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileMarker {
    pub model: ModelRecord,
    pub prediction: PredictionRecord,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub markers_found: usize,
    pub reconciled: usize,
    /// Markers that are still pending, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Markers: {} found, {} reconciled, {} still pending",
            self.markers_found,
            self.reconciled,
            self.failed.len()
        )
    }
}

/// Marker path for a published prediction.
pub fn marker_path(prediction_path: &Path) -> PathBuf {
    let mut name = prediction_path.as_os_str().to_os_string();
    name.push(MARKER_SUFFIX);
    PathBuf::from(name)
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Failures of read-only queries; the blanket conversion is for writes.
fn read_failed(what: &str, err: rusqlite::Error) -> PipelineError {
    PipelineError::Data(format!("cannot read {}: {}", what, err))
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<StoredModel> {
    Ok(StoredModel {
        model_id: row.get(0)?,
        record: ModelRecord {
            model_filename: row.get(1)?,
            model_type: row.get(2)?,
            trained_at: parse_time(row, 3)?,
            training_data_source: row.get(4)?,
            parameters: parse_json(row, 5)?,
            metrics: parse_json(row, 6)?,
            period: Period {
                year: row.get(7)?,
                month: row.get(8)?,
            },
        },
    })
}

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<StoredPrediction> {
    Ok(StoredPrediction {
        prediction_id: row.get(0)?,
        model_id: row.get(4)?,
        record: PredictionRecord {
            prediction_filename: row.get(1)?,
            prediction_path: row.get(2)?,
            generated_at: parse_time(row, 3)?,
            source_mosaic: row.get(5)?,
            period: Period {
                year: row.get(6)?,
                month: row.get(7)?,
            },
            aoi_definition: row.get(8)?,
        },
    })
}

fn find_model_id(conn: &Connection, filename: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT model_id FROM ml_models WHERE model_filename = ?1",
        params![filename],
        |row| row.get(0),
    )
    .optional()
}

fn find_prediction_id(conn: &Connection, filename: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT prediction_id FROM raster_predictions WHERE prediction_filename = ?1",
        params![filename],
        |row| row.get(0),
    )
    .optional()
}

fn insert_model(conn: &Connection, model: &ModelRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO ml_models
            (model_filename, model_type, trained_at, training_data_source, parameters, metrics, year, month)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            model.model_filename,
            model.model_type,
            timestamp(&model.trained_at),
            model.training_data_source,
            model.parameters.to_string(),
            model.metrics.to_string(),
            model.period.year,
            model.period.month,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_prediction(conn: &Connection, model_id: i64, prediction: &PredictionRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO raster_predictions
            (prediction_filename, prediction_path, generated_at, model_id, source_mosaic, year, month, aoi_definition)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            prediction.prediction_filename,
            prediction.prediction_path,
            timestamp(&prediction.generated_at),
            model_id,
            prediction.source_mosaic,
            prediction.period.year,
            prediction.period.month,
            prediction.aoi_definition,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Writes and queries model/prediction provenance.
pub struct ProvenanceRecorder {
    conn: Mutex<Connection>,
}

impl ProvenanceRecorder {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::io(format!("cannot create {}", parent.display()), e))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| PipelineError::MetadataWrite(format!("cannot open {}: {}", path.display(), e)))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::MetadataWrite("provenance connection lock poisoned".into()))
    }

    /// Insert a model and its prediction atomically.
    ///
    /// Returns `(model_id, prediction_id)`. Nothing is written on failure.
    pub fn record(&self, model: &ModelRecord, prediction: &PredictionRecord) -> Result<(i64, i64)> {
        let mut conn = self.lock()?;
        let insert = |conn: &mut Connection| -> rusqlite::Result<(i64, i64)> {
            let tx = conn.transaction()?;
            let model_id = insert_model(&tx, model)?;
            let prediction_id = insert_prediction(&tx, model_id, prediction)?;
            tx.commit()?;
            Ok((model_id, prediction_id))
        };
        let ids = insert(&mut *conn).map_err(|e| {
            PipelineError::MetadataWrite(format!(
                "recording {} / {}: {}",
                model.model_filename, prediction.prediction_filename, e
            ))
        })?;

        tracing::info!(
            "Recorded model {} (id {}) and prediction {} (id {})",
            model.model_filename,
            ids.0,
            prediction.prediction_filename,
            ids.1
        );
        Ok(ids)
    }

    /// [`record`](Self::record), leaving a reconciliation marker beside the
    /// prediction if the transaction fails.
    pub fn record_or_mark(&self, model: &ModelRecord, prediction: &PredictionRecord) -> Result<(i64, i64)> {
        self.record(model, prediction).inspect_err(|err| {
            let marker = ReconcileMarker {
                model: model.clone(),
                prediction: prediction.clone(),
                error: err.to_string(),
                created_at: Utc::now(),
            };
            let path = marker_path(Path::new(&prediction.prediction_path));
            let written = serde_json::to_vec_pretty(&marker)
                .map_err(std::io::Error::other)
                .and_then(|bytes| std::fs::write(&path, bytes));
            match written {
                Ok(()) => tracing::warn!("Provenance write failed, left marker {}", path.display()),
                Err(e) => tracing::error!("Provenance write failed and marker {} could not be saved: {}", path.display(), e),
            }
        })
    }

    /// Complete the records for every marker in `dir`.
    ///
    /// Rows that already exist (matched by filename) are reused, so running
    /// the sweep twice is harmless. A marker is removed once its records are
    /// committed.
    pub fn reconcile(&self, dir: &Path) -> Result<ReconcileReport> {
        let mut markers: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| PipelineError::io(format!("cannot list {}", dir.display()), e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.to_string_lossy().ends_with(MARKER_SUFFIX))
            .collect();
        markers.sort();

        let mut report = ReconcileReport {
            markers_found: markers.len(),
            ..Default::default()
        };

        for path in markers {
            match self.reconcile_marker(&path) {
                Ok(()) => report.reconciled += 1,
                Err(e) => {
                    tracing::warn!("Could not reconcile {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        tracing::info!("{}", report);
        Ok(report)
    }

    fn reconcile_marker(&self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path).map_err(|e| PipelineError::io(format!("cannot read {}", path.display()), e))?;
        let marker: ReconcileMarker = serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::Data(format!("invalid marker {}: {}", path.display(), e)))?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let model_id = match find_model_id(&tx, &marker.model.model_filename)? {
            Some(id) => id,
            None => insert_model(&tx, &marker.model)?,
        };
        if find_prediction_id(&tx, &marker.prediction.prediction_filename)?.is_none() {
            insert_prediction(&tx, model_id, &marker.prediction)?;
        }
        tx.commit()?;
        drop(conn);

        std::fs::remove_file(path).map_err(|e| PipelineError::io(format!("cannot remove {}", path.display()), e))?;
        tracing::info!("Reconciled {}", marker.prediction.prediction_filename);
        Ok(())
    }

    /// Classified rasters in `dir` that have neither a row nor a marker.
    pub fn untracked_predictions(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let conn = self.lock()?;
        let mut untracked = Vec::new();

        let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(format!("cannot list {}", dir.display()), e))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(".tif") {
                continue;
            }
            if marker_path(&path).exists() {
                continue;
            }
            let id = find_prediction_id(&conn, &name).map_err(|e| read_failed("prediction records", e))?;
            if id.is_none() {
                untracked.push(path);
            }
        }
        untracked.sort();
        Ok(untracked)
    }

    /// Most recently trained model for a period.
    pub fn latest_model_for_period(&self, period: Period) -> Result<Option<StoredModel>> {
        let conn = self.lock()?;
        let model = conn
            .query_row(
                "SELECT model_id, model_filename, model_type, trained_at, training_data_source,
                        parameters, metrics, year, month
                 FROM ml_models WHERE year = ?1 AND month = ?2
                 ORDER BY trained_at DESC, model_id DESC LIMIT 1",
                params![period.year, period.month],
                model_from_row,
            )
            .optional()
            .map_err(|e| read_failed("model records", e))?;
        Ok(model)
    }

    /// All predictions for a period, oldest first.
    pub fn predictions_for_period(&self, period: Period) -> Result<Vec<StoredPrediction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT prediction_id, prediction_filename, prediction_path, generated_at, model_id,
                        source_mosaic, year, month, aoi_definition
                 FROM raster_predictions WHERE year = ?1 AND month = ?2
                 ORDER BY generated_at, prediction_id",
            )
            .map_err(|e| read_failed("prediction records", e))?;
        let predictions = stmt
            .query_map(params![period.year, period.month], prediction_from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| read_failed("prediction records", e))?;
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn period() -> Period {
        Period::new(2023, 4).unwrap()
    }

    fn model_record(name: &str) -> ModelRecord {
        ModelRecord {
            model_filename: name.to_string(),
            model_type: "random_forest".into(),
            trained_at: Utc::now(),
            training_data_source: "polygons.json".into(),
            parameters: serde_json::json!({"n_estimators": 100}),
            metrics: serde_json::json!({"accuracy": 0.9}),
            period: period(),
        }
    }

    fn prediction_record(dir: &Path, name: &str) -> PredictionRecord {
        PredictionRecord::new(
            &dir.join(name),
            Path::new("/data/mosaic_2023_04.tif"),
            period(),
            "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))".into(),
        )
    }

    fn block_prediction_inserts(recorder: &ProvenanceRecorder) {
        recorder
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER block_predictions BEFORE INSERT ON raster_predictions
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();
    }

    fn unblock_prediction_inserts(recorder: &ProvenanceRecorder) {
        recorder
            .lock()
            .unwrap()
            .execute_batch("DROP TRIGGER block_predictions;")
            .unwrap();
    }

    fn count(recorder: &ProvenanceRecorder, table: &str) -> i64 {
        recorder
            .lock()
            .unwrap()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("meta").join("provenance.db");
        ProvenanceRecorder::open(&db).unwrap();
        ProvenanceRecorder::open(&db).unwrap();
    }

    #[test]
    fn test_record_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ProvenanceRecorder::open_in_memory().unwrap();
        let model = model_record("model_a.json");
        let prediction = prediction_record(dir.path(), "classified_a.tif");

        let (model_id, prediction_id) = recorder.record(&model, &prediction).unwrap();

        let latest = recorder.latest_model_for_period(period()).unwrap().unwrap();
        assert_eq!(latest.model_id, model_id);
        assert_eq!(latest.record.model_filename, "model_a.json");
        assert_eq!(latest.record.metrics["accuracy"], 0.9);

        let predictions = recorder.predictions_for_period(period()).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].prediction_id, prediction_id);
        assert_eq!(predictions[0].model_id, model_id);
        assert_eq!(predictions[0].record.prediction_filename, "classified_a.tif");

        assert!(recorder
            .latest_model_for_period(Period::new(2023, 5).unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unreadable_rows_are_data_errors() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ProvenanceRecorder::open_in_memory().unwrap();
        recorder
            .record(&model_record("model_a.json"), &prediction_record(dir.path(), "a.tif"))
            .unwrap();
        recorder
            .lock()
            .unwrap()
            .execute_batch(
                "UPDATE ml_models SET trained_at = 'yesterday';
                 UPDATE raster_predictions SET generated_at = 'today';",
            )
            .unwrap();

        let err = recorder.latest_model_for_period(period()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Data);
        let err = recorder.predictions_for_period(period()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn test_multiple_models_per_period() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ProvenanceRecorder::open_in_memory().unwrap();
        recorder
            .record(&model_record("model_a.json"), &prediction_record(dir.path(), "a.tif"))
            .unwrap();
        let mut newer = model_record("model_b.json");
        newer.trained_at += chrono::Duration::seconds(10);
        recorder.record(&newer, &prediction_record(dir.path(), "b.tif")).unwrap();

        let latest = recorder.latest_model_for_period(period()).unwrap().unwrap();
        assert_eq!(latest.record.model_filename, "model_b.json");
        assert_eq!(recorder.predictions_for_period(period()).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_record_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ProvenanceRecorder::open_in_memory().unwrap();
        block_prediction_inserts(&recorder);

        let err = recorder
            .record(&model_record("model_a.json"), &prediction_record(dir.path(), "a.tif"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::MetadataWrite);
        assert_eq!(count(&recorder, "ml_models"), 0);
        assert_eq!(count(&recorder, "raster_predictions"), 0);
    }

    #[test]
    fn test_duplicate_filename_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ProvenanceRecorder::open_in_memory().unwrap();
        let prediction = prediction_record(dir.path(), "a.tif");
        recorder.record(&model_record("model_a.json"), &prediction).unwrap();

        let err = recorder
            .record(&model_record("model_b.json"), &prediction)
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::MetadataWrite);
        assert_eq!(count(&recorder, "ml_models"), 1);
    }

    #[test]
    fn test_mark_then_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let raster = dir.path().join("classified_a.tif");
        std::fs::write(&raster, b"raster").unwrap();

        let recorder = ProvenanceRecorder::open_in_memory().unwrap();
        let model = model_record("model_a.json");
        let prediction = prediction_record(dir.path(), "classified_a.tif");

        block_prediction_inserts(&recorder);
        assert!(recorder.record_or_mark(&model, &prediction).is_err());
        assert!(marker_path(&raster).exists());
        // a marked raster is not reported as untracked
        assert!(recorder.untracked_predictions(dir.path()).unwrap().is_empty());

        unblock_prediction_inserts(&recorder);
        let report = recorder.reconcile(dir.path()).unwrap();
        assert_eq!(report.markers_found, 1);
        assert_eq!(report.reconciled, 1);
        assert!(!marker_path(&raster).exists());
        assert_eq!(count(&recorder, "ml_models"), 1);
        assert_eq!(count(&recorder, "raster_predictions"), 1);

        // a second sweep has nothing to do
        let report = recorder.reconcile(dir.path()).unwrap();
        assert_eq!(report.markers_found, 0);
    }

    #[test]
    fn test_reconcile_reuses_existing_model_row() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ProvenanceRecorder::open_in_memory().unwrap();
        let model = model_record("model_a.json");
        recorder.record(&model, &prediction_record(dir.path(), "first.tif")).unwrap();

        let marker = ReconcileMarker {
            model: model.clone(),
            prediction: prediction_record(dir.path(), "second.tif"),
            error: "simulated".into(),
            created_at: Utc::now(),
        };
        std::fs::write(
            marker_path(&dir.path().join("second.tif")),
            serde_json::to_vec(&marker).unwrap(),
        )
        .unwrap();

        let report = recorder.reconcile(dir.path()).unwrap();
        assert_eq!(report.reconciled, 1);
        assert_eq!(count(&recorder, "ml_models"), 1);
        let predictions = recorder.predictions_for_period(period()).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].model_id, predictions[1].model_id);
    }

    #[test]
    fn test_corrupt_marker_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.tif.reconcile.json"), b"{not json").unwrap();
        let recorder = ProvenanceRecorder::open_in_memory().unwrap();

        let report = recorder.reconcile(dir.path()).unwrap();
        assert_eq!(report.markers_found, 1);
        assert_eq!(report.reconciled, 0);
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn test_untracked_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ProvenanceRecorder::open_in_memory().unwrap();
        for name in ["tracked.tif", "orphan.tif", ".classified-tmp.tif", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        recorder
            .record(&model_record("model_a.json"), &prediction_record(dir.path(), "tracked.tif"))
            .unwrap();

        let untracked = recorder.untracked_predictions(dir.path()).unwrap();
        assert_eq!(untracked, vec![dir.path().join("orphan.tif")]);
    }

    #[test]
    fn test_marker_path() {
        assert_eq!(
            marker_path(Path::new("/out/classified_2023_04_x.tif")),
            PathBuf::from("/out/classified_2023_04_x.tif.reconcile.json")
        );
    }
}
