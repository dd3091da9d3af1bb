//! Turn labeled polygons plus a mosaic into feature rows.
//!
//! For each polygon:
//! 1. Move the geometry into the raster CRS (explicit check, never assumed)
//! 2. Find the pixel window under the polygon's bounds, clipped to the raster
//! 3. Burn the polygon into a pixel mask over that window
//! 4. Read the window and drop masked-out and NODATA pixels
//! 5. Emit one row per pixel, or one row of band means per polygon

use super::polygon::{Point, TrainingPolygon};
use crate::crs::{self, ProjCache};
use crate::error::{PipelineError, Result};
use crate::raster::{nodata_mask, RasterAccessor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// How pixel values under a polygon become feature rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// One row per valid pixel
    #[default]
    PerPixel,
    /// One row of per-band means per polygon
    MeanPerPolygon,
}

/// One training sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    /// Band values; `values[i]` is band `i + 1`
    pub values: Vec<f64>,

    pub class_label: String,

    /// Identifier of the polygon the sample came from
    pub polygon_id: String,

    /// Centroid of the source polygon in raster CRS
    pub centroid: Point,
}

/// Counters from one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionStats {
    pub polygons_total: usize,
    pub polygons_used: usize,
    pub skipped_outside: usize,
    pub skipped_empty: usize,
    pub rows_emitted: usize,
    pub nodata_pixels_discarded: usize,
}

impl std::fmt::Display for ExtractionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Polygons: {} used of {} ({} outside raster, {} without valid pixels) | Rows: {} | NODATA discarded: {}",
            self.polygons_used,
            self.polygons_total,
            self.skipped_outside,
            self.skipped_empty,
            self.rows_emitted,
            self.nodata_pixels_discarded
        )
    }
}

/// Single-pass iterator of feature rows over a set of polygons.
pub struct PolygonFeatureExtractor<'a> {
    accessor: &'a RasterAccessor,
    polygons: std::vec::IntoIter<TrainingPolygon>,
    aggregation: Aggregation,
    proj_cache: ProjCache,
    pending: VecDeque<FeatureRow>,
    stats: ExtractionStats,
}

impl<'a> PolygonFeatureExtractor<'a> {
    pub fn new(accessor: &'a RasterAccessor, polygons: Vec<TrainingPolygon>, aggregation: Aggregation) -> Self {
        let stats = ExtractionStats {
            polygons_total: polygons.len(),
            ..Default::default()
        };
        Self {
            accessor,
            polygons: polygons.into_iter(),
            aggregation,
            proj_cache: ProjCache::new(),
            pending: VecDeque::new(),
            stats,
        }
    }

    pub fn stats(&self) -> &ExtractionStats {
        &self.stats
    }

    /// Drain the iterator.
    ///
    /// Fails with a validation error if fewer than two class labels survive,
    /// since no classifier can be trained from one class.
    pub fn extract_all(mut self) -> Result<(Vec<FeatureRow>, ExtractionStats)> {
        let mut rows = Vec::new();
        for row in self.by_ref() {
            rows.push(row?);
        }

        let classes: BTreeSet<&str> = rows.iter().map(|r| r.class_label.as_str()).collect();
        if classes.len() < 2 {
            return Err(PipelineError::Validation(format!(
                "need at least two classes with valid pixels, found {:?}",
                classes
            )));
        }

        Ok((rows, self.stats))
    }

    fn process(&mut self, polygon: TrainingPolygon) -> Result<()> {
        let meta = self.accessor.metadata();

        if polygon.geometry.is_empty() {
            tracing::warn!("Polygon {} has no usable rings, skipping", polygon.id);
            self.stats.skipped_empty += 1;
            return Ok(());
        }
        if polygon.crs.trim().is_empty() {
            return Err(PipelineError::Data(format!("polygon {} has no CRS", polygon.id)));
        }

        let geometry = if crs::same_crs(&polygon.crs, meta.crs()) {
            polygon.geometry
        } else {
            polygon
                .geometry
                .reproject(&polygon.crs, meta.crs(), &self.proj_cache)
                .map_err(|e| {
                    PipelineError::Data(format!(
                        "CRS mismatch for polygon {}: cannot move {} into raster CRS {}: {}",
                        polygon.id,
                        polygon.crs,
                        meta.crs(),
                        e
                    ))
                })?
        };

        let window = match meta
            .geo_transform
            .bounds_to_window(&geometry.bounds(), meta.width, meta.height)
        {
            Some(window) => window,
            None => {
                tracing::warn!("Polygon {} lies outside the raster, skipping", polygon.id);
                self.stats.skipped_outside += 1;
                return Ok(());
            }
        };

        let mask = geometry.rasterize(&meta.geo_transform, &window).map_err(|e| {
            PipelineError::Data(format!("cannot rasterize polygon {} over {}: {}", polygon.id, window, e))
        })?;
        if !mask.iter().any(|&m| m) {
            tracing::warn!("Polygon {} covers no pixel centres, skipping", polygon.id);
            self.stats.skipped_empty += 1;
            return Ok(());
        }

        let data = self.accessor.read(&window)?;
        let nodata = nodata_mask(&data, meta.nodata);
        let bands = meta.band_count;
        let centroid = geometry.centroid();

        let mut sums = vec![0.0; bands];
        let mut count = 0usize;
        let before = self.pending.len();

        for ((row, col), &inside) in mask.indexed_iter() {
            if !inside {
                continue;
            }
            if nodata[[row, col]] {
                self.stats.nodata_pixels_discarded += 1;
                continue;
            }
            count += 1;
            match self.aggregation {
                Aggregation::PerPixel => {
                    let values = (0..bands).map(|b| data[[b, row, col]]).collect();
                    self.pending.push_back(FeatureRow {
                        values,
                        class_label: polygon.class_label.clone(),
                        polygon_id: polygon.id.clone(),
                        centroid,
                    });
                }
                Aggregation::MeanPerPolygon => {
                    for (b, sum) in sums.iter_mut().enumerate() {
                        *sum += data[[b, row, col]];
                    }
                }
            }
        }

        if count == 0 {
            tracing::warn!("Polygon {} has only NODATA pixels, skipping", polygon.id);
            self.stats.skipped_empty += 1;
            return Ok(());
        }

        if self.aggregation == Aggregation::MeanPerPolygon {
            self.pending.push_back(FeatureRow {
                values: sums.iter().map(|s| s / count as f64).collect(),
                class_label: polygon.class_label,
                polygon_id: polygon.id,
                centroid,
            });
        }

        self.stats.polygons_used += 1;
        self.stats.rows_emitted += self.pending.len() - before;
        Ok(())
    }
}

impl Iterator for PolygonFeatureExtractor<'_> {
    type Item = Result<FeatureRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            let polygon = self.polygons.next()?;
            if let Err(e) = self.process(polygon) {
                return Some(Err(e));
            }
        }
    }
}
