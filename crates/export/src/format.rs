//! Row materialization into Arrow and the three artifact encodings.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::json::writer::JsonArray;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use audience_core::{
    AudienceError, AudienceResult, Column, Dataset, ExportFormat, Mask, PhysicalType, Scalar,
};
use parquet::arrow::ArrowWriter;

/// Matching rows in dataset order, every column kept.
pub fn select_rows(dataset: &Dataset, mask: &Mask) -> AudienceResult<RecordBatch> {
    let rows = mask.indices();
    let fields: Vec<Field> = dataset
        .columns()
        .iter()
        .map(|c| Field::new(&c.name, arrow_type(c.physical), true))
        .collect();
    let arrays: Vec<ArrayRef> = dataset
        .columns()
        .iter()
        .map(|c| column_array(c, &rows))
        .collect();

    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        arrays,
        &options,
    )?)
}

fn arrow_type(physical: PhysicalType) -> DataType {
    match physical {
        PhysicalType::Integer => DataType::Int64,
        PhysicalType::Float => DataType::Float64,
        PhysicalType::Boolean => DataType::Boolean,
        PhysicalType::String => DataType::Utf8,
    }
}

fn column_array(column: &Column, rows: &[usize]) -> ArrayRef {
    let cells = rows.iter().map(|&i| &column.values[i]);
    match column.physical {
        PhysicalType::Integer => Arc::new(
            cells
                .map(|v| match v {
                    Scalar::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        PhysicalType::Float => Arc::new(cells.map(Scalar::as_f64).collect::<Float64Array>()),
        PhysicalType::Boolean => Arc::new(
            cells
                .map(|v| match v {
                    Scalar::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        PhysicalType::String => Arc::new(
            cells
                .map(|v| match v {
                    Scalar::Null => None,
                    other => Some(other.to_string()),
                })
                .collect::<StringArray>(),
        ),
    }
}

/// Serialize a batch in the requested format.
pub fn encode(format: ExportFormat, batch: &RecordBatch) -> AudienceResult<Vec<u8>> {
    match format {
        ExportFormat::Csv => encode_csv(batch),
        ExportFormat::Json => encode_json(batch),
        ExportFormat::Parquet => encode_parquet(batch),
    }
}

fn encode_csv(batch: &RecordBatch) -> AudienceResult<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut writer = arrow::csv::WriterBuilder::new()
            .with_header(true)
            .build(&mut buf);
        writer.write(batch)?;
    }
    if buf.is_empty() {
        // Header only, for a selection with no rows.
        let header: Vec<&str> = batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        buf = format!("{}\n", header.join(",")).into_bytes();
    }
    Ok(buf)
}

/// An array of objects with explicit nulls.
fn encode_json(batch: &RecordBatch) -> AudienceResult<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut writer = arrow::json::WriterBuilder::new()
            .with_explicit_nulls(true)
            .build::<_, JsonArray>(&mut buf);
        writer.write(batch)?;
        writer.finish()?;
    }
    if buf.is_empty() {
        buf = b"[]".to_vec();
    }
    Ok(buf)
}

fn encode_parquet(batch: &RecordBatch) -> AudienceResult<Vec<u8>> {
    let encode_err = |e: parquet::errors::ParquetError| AudienceError::Encode(e.to_string());
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None).map_err(encode_err)?;
    writer.write(batch).map_err(encode_err)?;
    writer.close().map_err(encode_err)?;
    Ok(buf)
}

/// Rows as JSON objects, for connectors that post records.
pub fn rows_as_json(batch: &RecordBatch) -> AudienceResult<serde_json::Value> {
    let bytes = encode_json(batch)?;
    Ok(serde_json::from_slice(&bytes)?)
}
