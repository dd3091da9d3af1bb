//! Coordinate Reference System utilities.
//!
//! Training polygons arrive in whatever CRS the labeling tool used (usually
//! WGS84) while mosaics are in their own projected CRS. Polygon vertices are
//! moved into the raster CRS before rasterization.
//!
//! ## Coordinate order convention:
//!
//! - Points are `(x, y)`; for WGS84 that is `(lon, lat)`.
//! - Bounds arrays: `[min_x, min_y, max_x, max_y]` = `[west, south, east, north]`

/// Common CRS codes.
pub mod codes {
    /// WGS84 geographic coordinate system (lon/lat in degrees).
    pub const WGS84: &str = "EPSG:4326";
}

use anyhow::{Context, Result};
use gdal::spatial_ref::SpatialRef;
use proj::Proj;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Bounds in a specific CRS: [min_x, min_y, max_x, max_y]
pub type Bounds = [f64; 4];

/// Thread-safe cache for Proj transformations.
///
/// Creating Proj objects is expensive, so we cache them by (source, target) CRS pair.
#[derive(Default)]
pub struct ProjCache {
    cache: RwLock<HashMap<(String, String), Arc<Proj>>>,
}

impl ProjCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a Proj transformation between two CRS.
    pub fn get(&self, from_crs: &str, to_crs: &str) -> Result<Arc<Proj>> {
        let key = (from_crs.to_string(), to_crs.to_string());

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(proj) = cache.get(&key) {
                return Ok(proj.clone());
            }
        }

        let proj = Proj::new_known_crs(from_crs, to_crs, None)
            .with_context(|| format!("Failed to create projection from {} to {}", from_crs, to_crs))?;

        let proj = Arc::new(proj);

        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(key, proj.clone());
        }

        Ok(proj)
    }
}

/// Whether two CRS definitions name the same CRS without needing a transform.
pub fn same_crs(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Transform every vertex of a ring between CRS.
///
/// Fails if any vertex cannot be transformed or lands on a non-finite value.
pub fn transform_ring(
    ring: &[(f64, f64)],
    from_crs: &str,
    to_crs: &str,
    cache: &ProjCache,
) -> Result<Vec<(f64, f64)>> {
    if same_crs(from_crs, to_crs) {
        return Ok(ring.to_vec());
    }

    let proj = cache.get(from_crs, to_crs)?;
    ring.iter()
        .map(|&(x, y)| {
            let (tx, ty) = proj.convert((x, y))
                .with_context(|| format!("Failed to transform vertex ({}, {})", x, y))?;
            if !tx.is_finite() || !ty.is_finite() {
                anyhow::bail!("Vertex ({}, {}) has no finite position in {}", x, y, to_crs);
            }
            Ok((tx, ty))
        })
        .collect()
}

/// Bounding box of a set of points.
pub fn ring_bounds(points: &[(f64, f64)]) -> Bounds {
    let mut min_x = f64::MAX;
    let mut min_y = f64::MAX;
    let mut max_x = f64::MIN;
    let mut max_y = f64::MIN;

    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    [min_x, min_y, max_x, max_y]
}

/// Compute the intersection of two bounds.
///
/// Returns None if there's no intersection.
pub fn intersect_bounds(a: &Bounds, b: &Bounds) -> Option<Bounds> {
    let min_x = a[0].max(b[0]);
    let min_y = a[1].max(b[1]);
    let max_x = a[2].min(b[2]);
    let max_y = a[3].min(b[3]);

    if min_x < max_x && min_y < max_y {
        Some([min_x, min_y, max_x, max_y])
    } else {
        None
    }
}

/// WKT polygon for a bounding box, used to record the AOI of a prediction.
pub fn bounds_to_wkt(bounds: &Bounds) -> String {
    format!(
        "POLYGON (({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))",
        x0 = bounds[0],
        y0 = bounds[1],
        x1 = bounds[2],
        y1 = bounds[3]
    )
}

/// Identify an `AUTHORITY:CODE` string for a CRS definition (WKT, PROJ string or code).
///
/// Returns None when GDAL cannot match the definition to an authority code.
pub fn identify_authority(definition: &str) -> Option<String> {
    let mut srs = SpatialRef::from_definition(definition).ok()?;
    // Falls back to whatever authority node the definition already carries
    let _ = srs.auto_identify_epsg();
    let name = srs.auth_name().ok()?;
    let code = srs.auth_code().ok()?;
    Some(format!("{}:{}", name, code))
}
