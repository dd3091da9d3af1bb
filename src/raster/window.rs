//! Georeferencing and pixel windows.

use crate::crs::Bounds;
use serde::{Deserialize, Serialize};

/// Affine geotransform for converting between pixel and world coordinates.
///
/// The transform is defined by 6 coefficients from the GDAL-style affine:
/// ```text
/// x_world = a * col + b * row + c
/// y_world = d * col + e * row + f
/// ```
///
/// For most GeoTIFFs:
/// - `a` is the pixel width (x resolution)
/// - `e` is the pixel height (y resolution, negative for top-down images)
/// - `c` is the x coordinate of the upper-left corner
/// - `f` is the y coordinate of the upper-left corner
/// - `b` and `d` are typically 0 (no rotation/shear)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Pixel width (x scale)
    pub a: f64,
    /// Row rotation (typically 0)
    pub b: f64,
    /// X origin (upper-left x coordinate)
    pub c: f64,
    /// Column rotation (typically 0)
    pub d: f64,
    /// Pixel height (y scale, negative for top-down, positive for bottom-up)
    pub e: f64,
    /// Y origin (upper-left y coordinate)
    pub f: f64,
}

impl GeoTransform {
    /// Create from GDAL's coefficient order `[c, a, b, f, d, e]`.
    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self {
            a: gt[1],
            b: gt[2],
            c: gt[0],
            d: gt[4],
            e: gt[5],
            f: gt[3],
        }
    }

    /// Convert back to GDAL's coefficient order.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    /// Whether the transform has rotation or shear terms.
    pub fn is_rotated(&self) -> bool {
        self.b != 0.0 || self.d != 0.0
    }

    /// Convert world coordinates to pixel coordinates.
    ///
    /// Returns (column, row) as floating point for sub-pixel precision.
    #[inline]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        // Inverse of affine transform (assuming no rotation, b=0, d=0)
        let col = (x - self.c) / self.a;
        let row = (y - self.f) / self.e;
        (col, row)
    }

    /// Convert pixel coordinates to world coordinates.
    ///
    /// Takes (column, row) and returns (x, y) in the CRS.
    #[inline]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }

    /// World coordinates of the centre of pixel (col, row).
    #[inline]
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        self.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// World bounds of a raster of the given size.
    pub fn bounds(&self, width: usize, height: usize) -> Bounds {
        let (x0, y0) = self.pixel_to_world(0.0, 0.0);
        let (x1, y1) = self.pixel_to_world(width as f64, height as f64);
        [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
    }

    /// Pixel window covering world bounds, clipped to a raster of the given size.
    ///
    /// Returns None when the bounds fall entirely outside the raster.
    pub fn bounds_to_window(&self, bounds: &Bounds, width: usize, height: usize) -> Option<PixelWindow> {
        let (col0, row0) = self.world_to_pixel(bounds[0], bounds[1]);
        let (col1, row1) = self.world_to_pixel(bounds[2], bounds[3]);

        let col_min = col0.min(col1).floor().max(0.0);
        let col_max = col0.max(col1).ceil().min(width as f64);
        let row_min = row0.min(row1).floor().max(0.0);
        let row_max = row0.max(row1).ceil().min(height as f64);

        if !(col_min < col_max && row_min < row_max) {
            return None;
        }

        Some(PixelWindow::new(
            col_min as usize,
            row_min as usize,
            (col_max - col_min) as usize,
            (row_max - row_min) as usize,
        ))
    }
}

/// A pixel window within an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    /// X offset (column) from top-left
    pub x: usize,
    /// Y offset (row) from top-left
    pub y: usize,
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
}

impl PixelWindow {
    /// Create a new pixel window with the given offset and dimensions.
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Whether this window lies within a raster of the given size.
    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        self.width > 0 && self.height > 0 && self.x + self.width <= width && self.y + self.height <= height
    }

    /// Overlap of two windows, if any.
    pub fn intersect(&self, other: &PixelWindow) -> Option<PixelWindow> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        if x0 < x1 && y0 < y1 {
            Some(PixelWindow::new(x0, y0, x1 - x0, y1 - y0))
        } else {
            None
        }
    }
}

impl std::fmt::Display for PixelWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}@({},{})", self.width, self.height, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top_down() -> GeoTransform {
        GeoTransform {
            a: 10.0, b: 0.0, c: 500000.0,
            d: 0.0, e: -10.0, f: 4259840.0,
        }
    }

    #[test]
    fn test_gdal_order_round_trip() {
        let gdal = [500000.0, 10.0, 0.0, 4259840.0, 0.0, -10.0];
        let gt = GeoTransform::from_gdal(&gdal);
        assert_eq!(gt, top_down());
        assert_eq!(gt.to_gdal(), gdal);
        assert!(!gt.is_rotated());
    }

    #[test]
    fn test_pixel_center() {
        let gt = top_down();
        let (x, y) = gt.pixel_center(0, 0);
        assert_eq!(x, 500005.0);
        assert_eq!(y, 4259835.0);
    }

    #[test]
    fn test_world_to_pixel_top_down() {
        let gt = top_down();
        let (col, row) = gt.world_to_pixel(500100.0, 4259740.0);
        assert_eq!(col, 10.0);
        assert_eq!(row, 10.0);
    }

    #[test]
    fn test_bounds() {
        let gt = top_down();
        let bounds = gt.bounds(100, 50);
        assert_eq!(bounds, [500000.0, 4259340.0, 501000.0, 4259840.0]);
    }

    #[test]
    fn test_bounds_to_window_clips() {
        let gt = top_down();
        // Extends past the left and top edge of a 100x100 raster
        let window = gt
            .bounds_to_window(&[499900.0, 4259700.0, 500055.0, 4260000.0], 100, 100)
            .unwrap();
        assert_eq!(window, PixelWindow::new(0, 0, 6, 14));
    }

    #[test]
    fn test_bounds_to_window_outside() {
        let gt = top_down();
        assert!(gt.bounds_to_window(&[0.0, 0.0, 10.0, 10.0], 100, 100).is_none());
    }

    #[test]
    fn test_window_intersect() {
        let a = PixelWindow::new(0, 0, 10, 10);
        let b = PixelWindow::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(PixelWindow::new(5, 5, 5, 5)));
        assert_eq!(a.intersect(&PixelWindow::new(10, 0, 5, 5)), None);
    }

    #[test]
    fn test_window_fits_within() {
        assert!(PixelWindow::new(90, 90, 10, 10).fits_within(100, 100));
        assert!(!PixelWindow::new(95, 90, 10, 10).fits_within(100, 100));
        assert!(!PixelWindow::new(0, 0, 0, 10).fits_within(100, 100));
    }
}
