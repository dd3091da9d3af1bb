//! Labeled training polygons and their rasterization onto a pixel grid.

use crate::crs::{self, Bounds, ProjCache};
use crate::period::Period;
use crate::raster::{GeoTransform, PixelWindow};
use gdal::raster::{rasterize, RasterizeOptions};
use gdal::vector::Geometry;
use gdal::DriverManager;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A point `(x, y)` in some CRS.
pub type Point = (f64, f64);

/// One polygon: an exterior ring and zero or more holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonPart {
    pub exterior: Vec<Point>,
    #[serde(default)]
    pub interiors: Vec<Vec<Point>>,
}

impl PolygonPart {
    fn rings(&self) -> impl Iterator<Item = &Vec<Point>> {
        std::iter::once(&self.exterior).chain(self.interiors.iter())
    }
}

/// Polygon or multipolygon geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonGeometry {
    pub parts: Vec<PolygonPart>,
}

impl PolygonGeometry {
    pub fn new(parts: Vec<PolygonPart>) -> Self {
        Self { parts }
    }

    /// Axis-aligned rectangle, closed ring.
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(vec![PolygonPart {
            exterior: vec![
                (min_x, min_y),
                (max_x, min_y),
                (max_x, max_y),
                (min_x, max_y),
                (min_x, min_y),
            ],
            interiors: Vec::new(),
        }])
    }

    /// Parse `POLYGON` or `MULTIPOLYGON` WKT.
    pub fn from_wkt(wkt: &str) -> anyhow::Result<Self> {
        let geometry = Geometry::from_wkt(wkt)
            .map_err(|e| anyhow::anyhow!("Invalid WKT: {}", e))?;

        let name = geometry.geometry_name().to_ascii_uppercase();
        let parts = match name.as_str() {
            "POLYGON" => vec![Self::part_from_gdal(&geometry)],
            "MULTIPOLYGON" => (0..geometry.geometry_count())
                .map(|i| Self::part_from_gdal(&geometry.get_geometry(i)))
                .collect(),
            other => anyhow::bail!("Expected POLYGON or MULTIPOLYGON, got {}", other),
        };

        Ok(Self::new(parts))
    }

    fn part_from_gdal(polygon: &Geometry) -> PolygonPart {
        let mut rings = (0..polygon.geometry_count()).map(|i| {
            polygon
                .get_geometry(i)
                .get_point_vec()
                .into_iter()
                .map(|(x, y, _)| (x, y))
                .collect::<Vec<_>>()
        });
        let exterior = rings.next().unwrap_or_default();
        PolygonPart {
            exterior,
            interiors: rings.collect(),
        }
    }

    /// True when no part has an exterior ring with at least three vertices.
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| p.exterior.len() < 3)
    }

    fn rings(&self) -> impl Iterator<Item = &Vec<Point>> {
        self.parts.iter().flat_map(|p| p.rings())
    }

    pub fn bounds(&self) -> Bounds {
        let points: Vec<Point> = self.parts.iter().flat_map(|p| p.exterior.iter().copied()).collect();
        crs::ring_bounds(&points)
    }

    /// Area-weighted centroid. Falls back to the bounds centre for degenerate rings.
    pub fn centroid(&self) -> Point {
        let mut area_sum = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;

        for part in &self.parts {
            for (i, ring) in part.rings().enumerate() {
                let (a, x, y) = ring_moments(ring);
                // Holes subtract regardless of their winding order
                let sign = if i == 0 { 1.0 } else { -1.0 };
                let a_abs = a.abs();
                if a_abs > 0.0 {
                    area_sum += sign * a_abs;
                    cx += sign * a_abs * x;
                    cy += sign * a_abs * y;
                }
            }
        }

        if area_sum.abs() < f64::EPSILON {
            let b = self.bounds();
            return ((b[0] + b[2]) / 2.0, (b[1] + b[3]) / 2.0);
        }
        (cx / area_sum, cy / area_sum)
    }

    /// Move every vertex into another CRS.
    pub fn reproject(&self, from_crs: &str, to_crs: &str, cache: &ProjCache) -> anyhow::Result<Self> {
        let parts = self
            .parts
            .iter()
            .map(|part| {
                Ok(PolygonPart {
                    exterior: crs::transform_ring(&part.exterior, from_crs, to_crs, cache)?,
                    interiors: part
                        .interiors
                        .iter()
                        .map(|ring| crs::transform_ring(ring, from_crs, to_crs, cache))
                        .collect::<anyhow::Result<_>>()?,
                })
            })
            .collect::<anyhow::Result<_>>()?;
        Ok(Self::new(parts))
    }

    /// `MULTIPOLYGON` WKT with every ring closed.
    pub fn to_wkt(&self) -> String {
        let ring_wkt = |ring: &Vec<Point>| {
            let mut coords: Vec<String> = ring.iter().map(|(x, y)| format!("{} {}", x, y)).collect();
            if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
                if first != last {
                    coords.push(format!("{} {}", first.0, first.1));
                }
            }
            format!("({})", coords.join(", "))
        };
        let parts: Vec<String> = self
            .parts
            .iter()
            .map(|part| format!("({})", part.rings().map(ring_wkt).collect::<Vec<_>>().join(", ")))
            .collect();
        format!("MULTIPOLYGON ({})", parts.join(", "))
    }

    /// Burn the polygon into a pixel mask over `window`.
    ///
    /// A pixel is inside when its centre is inside the polygon. The mask is
    /// rendered by GDAL into an in-memory dataset georeferenced to the window.
    pub fn rasterize(&self, gt: &GeoTransform, window: &PixelWindow) -> anyhow::Result<Array2<bool>> {
        let (w, h) = (window.width, window.height);
        let driver = DriverManager::get_driver_by_name("MEM")?;
        let mut dataset = driver.create_with_band_type::<u8, _>("", w, h, 1)?;

        let mut local = *gt;
        local.c = gt.c + gt.a * window.x as f64 + gt.b * window.y as f64;
        local.f = gt.f + gt.d * window.x as f64 + gt.e * window.y as f64;
        dataset.set_geo_transform(&local.to_gdal())?;

        let geometry = Geometry::from_wkt(&self.to_wkt())?;
        rasterize(&mut dataset, &[1], &[geometry], &[1.0], Some(RasterizeOptions::default()))?;

        let buffer = dataset.rasterband(1)?.read_as::<u8>((0, 0), (w, h), (w, h), None)?;
        let mask = Array2::from_shape_vec((h, w), buffer.data().iter().map(|&v| v != 0).collect())?;
        Ok(mask)
    }
}

/// Consecutive vertex pairs, closing the ring if it is left open.
fn ring_edges(ring: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    let n = ring.len();
    let closed = n > 1 && ring[0] == ring[n - 1];
    let edge_count = if n < 2 { 0 } else if closed { n - 1 } else { n };
    (0..edge_count).map(move |i| (ring[i], ring[(i + 1) % n]))
}

/// Signed area and centroid of a ring.
fn ring_moments(ring: &[Point]) -> (f64, f64, f64) {
    let mut a = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for (p1, p2) in ring_edges(ring) {
        let cross = p1.0 * p2.1 - p2.0 * p1.1;
        a += cross;
        cx += (p1.0 + p2.0) * cross;
        cy += (p1.1 + p2.1) * cross;
    }
    a /= 2.0;
    if a == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    (a, cx / (6.0 * a), cy / (6.0 * a))
}

/// A hand-labeled polygon for one basemap period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPolygon {
    /// Stable identifier, used to keep a polygon's pixels on one side of a split
    pub id: String,

    /// Land-cover class label
    pub class_label: String,

    /// CRS of `geometry`
    pub crs: String,

    /// Basemap period the label was drawn against
    pub period: Period,

    pub geometry: PolygonGeometry,
}
