//! Windowed raster access through GDAL.
//!
//! A [`RasterAccessor`] owns one GDAL dataset handle. The handle is released
//! when the accessor is dropped, on success and error paths alike.

use super::{BlockGrid, GeoTransform, PixelWindow};
use crate::crs::{self, Bounds};
use crate::error::{PipelineError, Result};
use gdal::cpl::CslStringList;
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};

/// Georeferencing and layout of an opened raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    /// Width in pixels
    pub width: usize,

    /// Height in pixels
    pub height: usize,

    /// Number of bands
    pub band_count: usize,

    /// Pixel to world transform
    pub geo_transform: GeoTransform,

    /// CRS as WKT
    pub crs_wkt: String,

    /// `AUTHORITY:CODE` for the CRS when GDAL can identify one
    pub crs_code: Option<String>,

    /// NODATA value declared on band 1 (or configured override)
    pub nodata: Option<f64>,
}

impl RasterMetadata {
    /// CRS definition suitable for PROJ: the authority code if known, else WKT.
    pub fn crs(&self) -> &str {
        self.crs_code.as_deref().unwrap_or(&self.crs_wkt)
    }

    /// World bounds of the full raster.
    pub fn bounds(&self) -> Bounds {
        self.geo_transform.bounds(self.width, self.height)
    }

    /// Block layout at the given block size.
    pub fn block_grid(&self, block_size: usize) -> BlockGrid {
        BlockGrid::new(self.width, self.height, block_size, block_size)
    }
}

/// Creation profile for a classified output raster.
#[derive(Debug, Clone)]
pub struct OutputProfile {
    pub width: usize,
    pub height: usize,
    pub geo_transform: GeoTransform,
    pub crs_wkt: String,
    pub nodata: u8,
    /// Internal tile size; must be a multiple of 16
    pub block_size: usize,
    pub compression: String,
}

impl OutputProfile {
    /// Single-band profile matching the footprint of an input raster.
    pub fn matching(input: &RasterMetadata, nodata: u8, block_size: usize, compression: &str) -> Self {
        Self {
            width: input.width,
            height: input.height,
            geo_transform: input.geo_transform,
            crs_wkt: input.crs_wkt.clone(),
            nodata,
            block_size,
            compression: compression.to_ascii_uppercase(),
        }
    }

    fn creation_options(&self) -> std::result::Result<CslStringList, gdal::errors::GdalError> {
        let mut options = CslStringList::new();
        options.set_name_value("TILED", "YES")?;
        options.set_name_value("BLOCKXSIZE", &self.block_size.to_string())?;
        options.set_name_value("BLOCKYSIZE", &self.block_size.to_string())?;
        options.set_name_value("COMPRESS", &self.compression)?;
        if self.compression == "DEFLATE" {
            options.set_name_value("PREDICTOR", "2")?;
        }
        Ok(options)
    }
}

/// Open handle on a raster with windowed reads and writes.
pub struct RasterAccessor {
    path: PathBuf,
    dataset: Dataset,
    metadata: RasterMetadata,
}

impl RasterAccessor {
    /// Open a raster read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dataset = Dataset::open(&path)
            .map_err(|e| PipelineError::Data(format!("cannot open raster {}: {}", path.display(), e)))?;

        let metadata = Self::read_metadata(&path, &dataset)?;
        tracing::debug!(
            "Opened {}: {}x{} pixels, {} bands, crs={}, nodata={:?}",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.band_count,
            metadata.crs(),
            metadata.nodata
        );

        Ok(Self { path, dataset, metadata })
    }

    fn read_metadata(path: &Path, dataset: &Dataset) -> Result<RasterMetadata> {
        let band_count = dataset.raster_count() as usize;
        if band_count == 0 {
            return Err(PipelineError::Data(format!("{} has no bands", path.display())));
        }

        let (width, height) = dataset.raster_size();
        if width == 0 || height == 0 {
            return Err(PipelineError::Data(format!("{} has zero pixel dimensions", path.display())));
        }

        let geo_transform = dataset
            .geo_transform()
            .map(|gt| GeoTransform::from_gdal(&gt))
            .map_err(|e| PipelineError::Data(format!("{} is not georeferenced: {}", path.display(), e)))?;
        if geo_transform.is_rotated() {
            return Err(PipelineError::Data(format!(
                "{} has a rotated geotransform, which is not supported",
                path.display()
            )));
        }

        let crs_wkt = dataset.projection();
        if crs_wkt.trim().is_empty() {
            return Err(PipelineError::Data(format!("{} has no CRS", path.display())));
        }
        let crs_code = crs::identify_authority(&crs_wkt);

        let nodata = dataset
            .rasterband(1)
            .map_err(|e| PipelineError::Data(format!("{}: cannot access band 1: {}", path.display(), e)))?
            .no_data_value();

        Ok(RasterMetadata {
            width,
            height,
            band_count,
            geo_transform,
            crs_wkt,
            crs_code,
            nodata,
        })
    }

    /// Create a single-band `u8` GeoTIFF for writing.
    pub fn create(path: impl AsRef<Path>, profile: &OutputProfile) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let gdal_err = |what: &str, e: gdal::errors::GdalError| {
            PipelineError::io(format!("{} for {}", what, path.display()), e)
        };

        let driver = DriverManager::get_driver_by_name("GTiff").map_err(|e| gdal_err("GTiff driver unavailable", e))?;
        let options = profile.creation_options().map_err(|e| gdal_err("invalid creation options", e))?;

        let mut dataset = driver
            .create_with_band_type_with_options::<u8, _>(&path, profile.width, profile.height, 1, &options)
            .map_err(|e| gdal_err("failed to create raster", e))?;

        dataset
            .set_geo_transform(&profile.geo_transform.to_gdal())
            .map_err(|e| gdal_err("failed to set geotransform", e))?;
        dataset
            .set_projection(&profile.crs_wkt)
            .map_err(|e| gdal_err("failed to set CRS", e))?;
        {
            let mut band = dataset.rasterband(1).map_err(|e| gdal_err("failed to get band", e))?;
            band.set_no_data_value(Some(profile.nodata as f64))
                .map_err(|e| gdal_err("failed to set NODATA", e))?;
        }

        let metadata = RasterMetadata {
            width: profile.width,
            height: profile.height,
            band_count: 1,
            geo_transform: profile.geo_transform,
            crs_wkt: profile.crs_wkt.clone(),
            crs_code: crs::identify_authority(&profile.crs_wkt),
            nodata: Some(profile.nodata as f64),
        };

        Ok(Self { path, dataset, metadata })
    }

    /// Replace the NODATA value reported by the raster.
    pub fn with_nodata_override(mut self, nodata: Option<f64>) -> Self {
        if nodata.is_some() {
            self.metadata.nodata = nodata;
        }
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    /// Lazily enumerate non-overlapping windows covering the raster.
    pub fn windows(&self, block_size: usize) -> impl Iterator<Item = PixelWindow> {
        let grid = self.metadata.block_grid(block_size);
        (0..grid.num_blocks()).map(move |i| grid.window(i / grid.blocks_x(), i % grid.blocks_x()))
    }

    fn check_window(&self, window: &PixelWindow) -> Result<()> {
        if !window.fits_within(self.metadata.width, self.metadata.height) {
            return Err(PipelineError::io_msg(format!(
                "window {} is outside {} ({}x{})",
                window,
                self.path.display(),
                self.metadata.width,
                self.metadata.height
            )));
        }
        Ok(())
    }

    /// Read all bands of a window as `(bands, rows, cols)`.
    pub fn read(&self, window: &PixelWindow) -> Result<Array3<f64>> {
        self.check_window(window)?;

        let bands = self.metadata.band_count;
        let (w, h) = (window.width, window.height);
        let mut values = Vec::with_capacity(bands * w * h);

        for band_idx in 0..bands {
            let band = self.dataset.rasterband(band_idx + 1).map_err(|e| {
                PipelineError::io(format!("{}: cannot access band {}", self.path.display(), band_idx + 1), e)
            })?;

            let buffer = band
                .read_as::<f64>((window.x as isize, window.y as isize), (w, h), (w, h), None)
                .map_err(|e| {
                    PipelineError::io(
                        format!("{}: failed to read band {} window {}", self.path.display(), band_idx + 1, window),
                        e,
                    )
                })?;
            values.extend_from_slice(buffer.data());
        }

        Array3::from_shape_vec((bands, h, w), values)
            .map_err(|e| PipelineError::io(format!("{}: short read in window {}", self.path.display(), window), e))
    }

    /// Write a block of class labels into band 1 at the window position.
    pub fn write(&mut self, window: &PixelWindow, block: &Array2<u8>) -> Result<()> {
        self.check_window(window)?;
        if block.dim() != (window.height, window.width) {
            return Err(PipelineError::io_msg(format!(
                "block shape {:?} does not match window {}",
                block.dim(),
                window
            )));
        }

        let (w, h) = (window.width, window.height);
        let path = self.path.clone();
        let mut band = self
            .dataset
            .rasterband(1)
            .map_err(|e| PipelineError::io(format!("{}: cannot access band 1", path.display()), e))?;

        let mut buffer = Buffer::new((w, h), block.iter().copied().collect());
        band.write((window.x as isize, window.y as isize), (w, h), &mut buffer)
            .map_err(|e| PipelineError::io(format!("{}: failed to write window {}", path.display(), window), e))
    }

    /// Flush pending writes and release the handle.
    pub fn close(self) -> Result<()> {
        let Self { path, mut dataset, .. } = self;
        dataset
            .flush_cache()
            .map_err(|e| PipelineError::io(format!("{}: failed to flush", path.display()), e))
    }
}

/// Mask of NODATA pixels for a `(bands, rows, cols)` block.
///
/// A pixel is NODATA when any band is NaN or equals the declared NODATA value.
pub fn nodata_mask(block: &Array3<f64>, nodata: Option<f64>) -> Array2<bool> {
    let (_, rows, cols) = block.dim();
    Array2::from_shape_fn((rows, cols), |(row, col)| {
        block
            .slice(ndarray::s![.., row, col])
            .iter()
            .any(|&v| v.is_nan() || nodata.is_some_and(|nd| v == nd))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::test_support::{create_mosaic, utm_transform};

    #[test]
    fn test_open_missing_file_is_data_error() {
        let err = RasterAccessor::open("/definitely/not/here.tif").err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
    }

    #[test]
    fn test_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.tif");
        create_mosaic(&path, 64, 32, 3, Some(0.0), |b, r, c| (b * 100 + r + c) as u16 + 1);

        let accessor = RasterAccessor::open(&path).unwrap();
        let meta = accessor.metadata();
        assert_eq!(meta.width, 64);
        assert_eq!(meta.height, 32);
        assert_eq!(meta.band_count, 3);
        assert_eq!(meta.nodata, Some(0.0));
        assert_eq!(meta.geo_transform, utm_transform());
        assert_eq!(meta.crs_code.as_deref(), Some("EPSG:32610"));
    }

    #[test]
    fn test_read_window_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.tif");
        create_mosaic(&path, 20, 10, 2, None, |b, r, c| (b * 1000 + r * 20 + c) as u16);

        let accessor = RasterAccessor::open(&path).unwrap();
        let data = accessor.read(&PixelWindow::new(5, 2, 4, 3)).unwrap();
        assert_eq!(data.dim(), (2, 3, 4));
        assert_eq!(data[[0, 0, 0]], (2 * 20 + 5) as f64);
        assert_eq!(data[[1, 2, 3]], (1000 + 4 * 20 + 8) as f64);
    }

    #[test]
    fn test_read_out_of_bounds_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.tif");
        create_mosaic(&path, 16, 16, 1, None, |_, _, _| 1);

        let accessor = RasterAccessor::open(&path).unwrap();
        let err = accessor.read(&PixelWindow::new(10, 10, 10, 10)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_windows_cover_raster() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.tif");
        create_mosaic(&path, 100, 70, 1, None, |_, _, _| 1);

        let accessor = RasterAccessor::open(&path).unwrap();
        let windows: Vec<_> = accessor.windows(32).collect();
        assert_eq!(windows.len(), 4 * 3);
        let total: usize = windows.iter().map(|w| w.pixel_count()).sum();
        assert_eq!(total, 100 * 70);
    }

    #[test]
    fn test_create_write_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("mosaic.tif");
        create_mosaic(&src, 40, 40, 2, None, |_, _, _| 7);
        let input = RasterAccessor::open(&src).unwrap();

        let out = dir.path().join("classified.tif");
        let profile = OutputProfile::matching(input.metadata(), 255, 16, "deflate");
        let mut output = RasterAccessor::create(&out, &profile).unwrap();
        let block = Array2::from_shape_fn((16, 16), |(r, c)| ((r + c) % 3) as u8);
        output.write(&PixelWindow::new(16, 16, 16, 16), &block).unwrap();
        output.close().unwrap();

        let reopened = RasterAccessor::open(&out).unwrap();
        let meta = reopened.metadata();
        assert_eq!((meta.width, meta.height, meta.band_count), (40, 40, 1));
        assert_eq!(meta.nodata, Some(255.0));
        assert_eq!(meta.geo_transform, input.metadata().geo_transform);

        let data = reopened.read(&PixelWindow::new(16, 16, 16, 16)).unwrap();
        assert_eq!(data[[0, 1, 2]], 0.0);
        assert_eq!(data[[0, 0, 1]], 1.0);
    }

    #[test]
    fn test_write_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("mosaic.tif");
        create_mosaic(&src, 32, 32, 1, None, |_, _, _| 1);
        let input = RasterAccessor::open(&src).unwrap();

        let profile = OutputProfile::matching(input.metadata(), 255, 16, "NONE");
        let mut output = RasterAccessor::create(dir.path().join("out.tif"), &profile).unwrap();
        let block = Array2::<u8>::zeros((8, 8));
        assert!(output.write(&PixelWindow::new(0, 0, 16, 16), &block).is_err());
    }

    #[test]
    fn test_nodata_mask_any_band() {
        let mut block = Array3::<f64>::from_elem((2, 2, 2), 5.0);
        block[[1, 0, 1]] = 0.0;
        block[[0, 1, 0]] = f64::NAN;

        let mask = nodata_mask(&block, Some(0.0));
        assert!(!mask[[0, 0]]);
        assert!(mask[[0, 1]]);
        assert!(mask[[1, 0]]);
        assert!(!mask[[1, 1]]);

        let mask = nodata_mask(&block, None);
        assert!(!mask[[0, 1]]);
        assert!(mask[[1, 0]]);
    }
}
