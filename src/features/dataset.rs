//! Columnar persistence of feature rows.
//!
//! Schema (stable across runs):
//! `polygon_id: Utf8, class_label: Utf8, centroid_x: Float64, centroid_y: Float64,
//!  band_1 .. band_N: Float64`

use super::FeatureRow;
use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::path::Path;
use std::sync::Arc;

const FIXED_COLUMNS: [&str; 4] = ["polygon_id", "class_label", "centroid_x", "centroid_y"];

/// Arrow schema for a dataset with `band_count` bands.
pub fn feature_schema(band_count: usize) -> SchemaRef {
    let mut fields = vec![
        Field::new("polygon_id", DataType::Utf8, false),
        Field::new("class_label", DataType::Utf8, false),
        Field::new("centroid_x", DataType::Float64, false),
        Field::new("centroid_y", DataType::Float64, false),
    ];
    fields.extend((1..=band_count).map(|b| Field::new(format!("band_{}", b), DataType::Float64, false)));
    Arc::new(Schema::new(fields))
}

/// Write rows to a parquet file. All rows must have the same band count.
pub fn write_features(path: &Path, rows: &[FeatureRow]) -> Result<()> {
    let band_count = rows.first().map_or(0, |r| r.values.len());
    if let Some(bad) = rows.iter().find(|r| r.values.len() != band_count) {
        anyhow::bail!(
            "Row from polygon {} has {} bands, expected {}",
            bad.polygon_id,
            bad.values.len(),
            band_count
        );
    }

    let schema = feature_schema(band_count);
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.polygon_id.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.class_label.as_str()))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.centroid.0))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.centroid.1))),
    ];
    for band in 0..band_count {
        columns.push(Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.values[band]))));
    }

    let batch = RecordBatch::try_new(schema.clone(), columns).context("Failed to build feature batch")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create feature dataset: {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    tracing::info!("Wrote {} feature rows to {}", rows.len(), path.display());
    Ok(())
}

/// Read rows back from a parquet file written by [`write_features`].
pub fn read_features(path: &Path) -> Result<Vec<FeatureRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open feature dataset: {}", path.display()))?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let reader = builder.build()?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;
        extract_rows_from_batch(&batch, &mut rows)?;
    }
    Ok(rows)
}

fn extract_rows_from_batch(batch: &RecordBatch, rows: &mut Vec<FeatureRow>) -> Result<()> {
    let schema = batch.schema();
    if schema.fields().len() < FIXED_COLUMNS.len() {
        anyhow::bail!("Feature dataset has {} columns, expected at least {}", schema.fields().len(), FIXED_COLUMNS.len());
    }
    for (i, name) in FIXED_COLUMNS.iter().enumerate() {
        if schema.field(i).name().as_str() != *name {
            anyhow::bail!("Column {} should be '{}', found '{}'", i, name, schema.field(i).name());
        }
    }

    let polygon_ids = string_column(batch, 0)?;
    let labels = string_column(batch, 1)?;
    let centroid_x = f64_column(batch, 2)?;
    let centroid_y = f64_column(batch, 3)?;
    let bands: Vec<&Float64Array> = (FIXED_COLUMNS.len()..batch.num_columns())
        .map(|i| f64_column(batch, i))
        .collect::<Result<_>>()?;

    for i in 0..batch.num_rows() {
        rows.push(FeatureRow {
            values: bands.iter().map(|b| b.value(i)).collect(),
            class_label: labels.value(i).to_string(),
            polygon_id: polygon_ids.value(i).to_string(),
            centroid: (centroid_x.value(i), centroid_y.value(i)),
        });
    }
    Ok(())
}

fn string_column(batch: &RecordBatch, idx: usize) -> Result<&StringArray> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow::anyhow!("Column {} is not a string column", idx))
}

fn f64_column(batch: &RecordBatch, idx: usize) -> Result<&Float64Array> {
    let column = batch.column(idx);
    if column.null_count() > 0 {
        anyhow::bail!("Column {} contains nulls", idx);
    }
    column
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column {} is not a Float64 column", idx))
}
