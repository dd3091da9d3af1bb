//! Training features: labeled polygons, their sources, and extraction into rows.

pub mod dataset;
mod extractor;
mod polygon;
mod source;

pub use extractor::{Aggregation, ExtractionStats, FeatureRow, PolygonFeatureExtractor};
pub use polygon::{Point, PolygonGeometry, PolygonPart, TrainingPolygon};
pub use source::{JsonPolygonSource, PolygonRecord, PolygonSource};
