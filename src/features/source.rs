//! Suppliers of labeled training polygons.

use super::polygon::{PolygonGeometry, TrainingPolygon};
use crate::crs;
use crate::error::{PipelineError, Result};
use crate::period::Period;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Anything that can hand over the labeled polygons drawn for a period.
pub trait PolygonSource: Send + Sync {
    fn polygons_for(&self, period: Period) -> Result<Vec<TrainingPolygon>>;

    /// Human-readable origin, recorded as the training data source.
    fn describe(&self) -> String;
}

impl PolygonSource for Vec<TrainingPolygon> {
    fn polygons_for(&self, period: Period) -> Result<Vec<TrainingPolygon>> {
        Ok(self.iter().filter(|p| p.period == period).cloned().collect())
    }

    fn describe(&self) -> String {
        format!("in-memory ({} polygons)", self.len())
    }
}

/// One serialized polygon record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolygonRecord {
    pub id: String,
    pub class_label: String,
    /// `POLYGON` or `MULTIPOLYGON` WKT
    pub wkt: String,
    #[serde(default = "default_crs")]
    pub crs: String,
    pub year: i32,
    pub month: u32,
}

fn default_crs() -> String {
    crs::codes::WGS84.to_string()
}

/// Polygons stored as a JSON or YAML list of [`PolygonRecord`]s.
pub struct JsonPolygonSource {
    path: PathBuf,
    classes: Option<HashSet<String>>,
    polygons: Vec<TrainingPolygon>,
}

impl JsonPolygonSource {
    /// Load and validate every record in the file.
    ///
    /// Unknown class labels, bad WKT, bad periods and duplicate ids are
    /// validation errors.
    pub fn load(path: impl AsRef<Path>, classes: Option<&[String]>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| PipelineError::io(format!("cannot read polygons from {}", path.display()), e))?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let records: Vec<PolygonRecord> = if is_json {
            serde_json::from_str(&contents)
                .map_err(|e| PipelineError::Validation(format!("{}: {}", path.display(), e)))?
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| PipelineError::Validation(format!("{}: {}", path.display(), e)))?
        };

        let classes: Option<HashSet<String>> = classes.map(|c| c.iter().cloned().collect());
        let polygons = Self::convert(records, classes.as_ref())?;
        tracing::info!("Loaded {} training polygons from {}", polygons.len(), path.display());

        Ok(Self { path, classes, polygons })
    }

    fn convert(records: Vec<PolygonRecord>, classes: Option<&HashSet<String>>) -> Result<Vec<TrainingPolygon>> {
        let mut seen = HashSet::new();
        records
            .into_iter()
            .map(|record| {
                if !seen.insert(record.id.clone()) {
                    return Err(PipelineError::Validation(format!("duplicate polygon id '{}'", record.id)));
                }
                if let Some(classes) = classes {
                    if !classes.contains(&record.class_label) {
                        return Err(PipelineError::Validation(format!(
                            "polygon '{}' has unknown class '{}'",
                            record.id, record.class_label
                        )));
                    }
                }
                let period = Period::new(record.year, record.month)
                    .map_err(|e| PipelineError::Validation(format!("polygon '{}': {}", record.id, e)))?;
                let geometry = PolygonGeometry::from_wkt(&record.wkt)
                    .map_err(|e| PipelineError::Validation(format!("polygon '{}': {}", record.id, e)))?;

                Ok(TrainingPolygon {
                    id: record.id,
                    class_label: record.class_label,
                    crs: record.crs,
                    period,
                    geometry,
                })
            })
            .collect()
    }

    /// Configured class set, if any.
    pub fn classes(&self) -> Option<&HashSet<String>> {
        self.classes.as_ref()
    }

    /// Distinct periods that have at least one polygon.
    pub fn periods(&self) -> Vec<Period> {
        let mut periods: Vec<Period> = self.polygons.iter().map(|p| p.period).collect();
        periods.sort();
        periods.dedup();
        periods
    }
}

impl PolygonSource for JsonPolygonSource {
    fn polygons_for(&self, period: Period) -> Result<Vec<TrainingPolygon>> {
        self.polygons.polygons_for(period)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDS: &str = r#"[
        {"id": "a", "class_label": "forest", "wkt": "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))", "year": 2023, "month": 1},
        {"id": "b", "class_label": "non-forest", "wkt": "POLYGON ((2 2, 3 2, 3 3, 2 2))", "crs": "EPSG:3857", "year": 2023, "month": 2}
    ]"#;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_json_and_filter_by_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "polygons.json", RECORDS);

        let source = JsonPolygonSource::load(&path, None).unwrap();
        assert_eq!(source.periods().len(), 2);

        let jan = source.polygons_for(Period::new(2023, 1).unwrap()).unwrap();
        assert_eq!(jan.len(), 1);
        assert_eq!(jan[0].id, "a");
        assert_eq!(jan[0].crs, "EPSG:4326");

        let feb = source.polygons_for(Period::new(2023, 2).unwrap()).unwrap();
        assert_eq!(feb[0].crs, "EPSG:3857");
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
- id: "p1"
  class_label: "water"
  wkt: "POLYGON ((0 0, 1 0, 1 1, 0 0))"
  year: 2024
  month: 6
"#;
        let path = write(&dir, "polygons.yaml", yaml);
        let source = JsonPolygonSource::load(&path, None).unwrap();
        assert_eq!(source.periods(), vec![Period::new(2024, 6).unwrap()]);
    }

    #[test]
    fn test_unknown_class_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "polygons.json", RECORDS);
        let classes = vec!["forest".to_string(), "water".to_string()];

        let err = JsonPolygonSource::load(&path, Some(&classes)).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"[
            {"id": "a", "class_label": "x", "wkt": "POLYGON ((0 0, 1 0, 1 1, 0 0))", "year": 2023, "month": 1},
            {"id": "a", "class_label": "y", "wkt": "POLYGON ((0 0, 1 0, 1 1, 0 0))", "year": 2023, "month": 1}
        ]"#;
        let path = write(&dir, "polygons.json", json);
        assert!(JsonPolygonSource::load(&path, None).is_err());
    }

    #[test]
    fn test_bad_wkt_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"[{"id": "a", "class_label": "x", "wkt": "LINESTRING (0 0, 1 1)", "year": 2023, "month": 1}]"#;
        let path = write(&dir, "polygons.json", json);
        let err = JsonPolygonSource::load(&path, None).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}
