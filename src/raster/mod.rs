//! Raster access: georeferencing, block windows, and GDAL-backed reads/writes.

mod accessor;
mod grid;
mod window;

pub use accessor::{nodata_mask, OutputProfile, RasterAccessor, RasterMetadata};
pub use grid::BlockGrid;
pub use window::{GeoTransform, PixelWindow};

#[cfg(test)]
pub(crate) mod test_support {
    //! Synthetic mosaics for tests.

    use super::GeoTransform;
    use gdal::raster::Buffer;
    use gdal::spatial_ref::SpatialRef;
    use gdal::DriverManager;
    use std::path::Path;

    /// 10 m pixels in UTM 10N, top-left at (500000, 4200000).
    pub fn utm_transform() -> GeoTransform {
        GeoTransform {
            a: 10.0, b: 0.0, c: 500000.0,
            d: 0.0, e: -10.0, f: 4200000.0,
        }
    }

    /// Write a `u16` GeoTIFF whose pixel values come from `value(band, row, col)`.
    pub fn create_mosaic<F>(path: &Path, width: usize, height: usize, bands: usize, nodata: Option<f64>, value: F)
    where
        F: Fn(usize, usize, usize) -> u16,
    {
        let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
        let mut dataset = driver
            .create_with_band_type::<u16, _>(path, width, height, bands)
            .unwrap();
        dataset.set_geo_transform(&utm_transform().to_gdal()).unwrap();
        let srs = SpatialRef::from_epsg(32610).unwrap();
        dataset.set_projection(&srs.to_wkt().unwrap()).unwrap();

        for band_idx in 0..bands {
            let mut band = dataset.rasterband(band_idx + 1).unwrap();
            if nodata.is_some() {
                band.set_no_data_value(nodata).unwrap();
            }
            let mut data = Vec::with_capacity(width * height);
            for row in 0..height {
                for col in 0..width {
                    data.push(value(band_idx, row, col));
                }
            }
            band.write((0, 0), (width, height), &mut Buffer::new((width, height), data))
                .unwrap();
        }
    }
}
