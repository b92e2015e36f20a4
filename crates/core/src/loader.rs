//! Dataset snapshot loading from CSV via the Arrow CSV reader.

use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use tracing::info;

use crate::dataset::{Column, Dataset, PhysicalType, Scalar};
use crate::error::AudienceResult;

/// Load a headered CSV file into an immutable [`Dataset`]. Column types are
/// inferred from the first `infer_rows` records.
pub fn load_csv(path: &Path, infer_rows: usize) -> AudienceResult<Dataset> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(&mut file, Some(infer_rows))?;
    file.rewind()?;

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(file)?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }

    let dataset = from_record_batches(&batches)?;
    info!(
        path = %path.display(),
        rows = dataset.row_count(),
        columns = dataset.columns().len(),
        "dataset snapshot loaded"
    );
    Ok(dataset)
}

/// Convert Arrow record batches sharing one schema into a [`Dataset`].
/// Integer and float columns become numeric; everything else is categorical,
/// with non-boolean types rendered to strings.
pub fn from_record_batches(batches: &[RecordBatch]) -> AudienceResult<Dataset> {
    let Some(first) = batches.first() else {
        return Dataset::new(Vec::new());
    };
    let schema = first.schema();

    let mut columns: Vec<Column> = schema
        .fields()
        .iter()
        .map(|field| {
            Column::new(
                field.name().clone(),
                physical_type(field.data_type()),
                Vec::new(),
            )
        })
        .collect();

    for batch in batches {
        for (column, array) in columns.iter_mut().zip(batch.columns()) {
            append_array(column, array)?;
        }
    }

    Dataset::new(columns)
}

fn physical_type(data_type: &DataType) -> PhysicalType {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => PhysicalType::Integer,
        DataType::UInt64 | DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            PhysicalType::Float
        }
        DataType::Boolean => PhysicalType::Boolean,
        _ => PhysicalType::String,
    }
}

fn append_array(column: &mut Column, array: &ArrayRef) -> AudienceResult<()> {
    column.values.reserve(array.len());
    match column.physical {
        PhysicalType::Integer => {
            let cast = arrow::compute::cast(array, &DataType::Int64)?;
            let values = cast.as_primitive::<Int64Type>();
            for i in 0..values.len() {
                column.values.push(if values.is_null(i) {
                    Scalar::Null
                } else {
                    Scalar::Int(values.value(i))
                });
            }
        }
        PhysicalType::Float => {
            let cast = arrow::compute::cast(array, &DataType::Float64)?;
            let values = cast.as_primitive::<Float64Type>();
            for i in 0..values.len() {
                column.values.push(if values.is_null(i) {
                    Scalar::Null
                } else {
                    Scalar::Float(values.value(i))
                });
            }
        }
        PhysicalType::Boolean => {
            let values = array.as_boolean();
            for i in 0..values.len() {
                column.values.push(if values.is_null(i) {
                    Scalar::Null
                } else {
                    Scalar::Bool(values.value(i))
                });
            }
        }
        PhysicalType::String => {
            for i in 0..array.len() {
                column.values.push(if array.is_null(i) {
                    Scalar::Null
                } else {
                    Scalar::Str(array_value_to_string(array, i)?)
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnType;
    use std::io::Write;

    #[test]
    fn test_load_csv_infers_types() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "CustomerID,Age,Gender,Balance,AccountOpenDate").unwrap();
        writeln!(file, "C001,34,Female,1200.50,2019-03-14").unwrap();
        writeln!(file, "C002,51,Male,,2021-07-01").unwrap();
        writeln!(file, "C003,19,Non-Binary,88.10,2023-01-09").unwrap();
        file.flush().unwrap();

        let ds = load_csv(file.path(), 100).unwrap();
        assert_eq!(ds.row_count(), 3);
        assert_eq!(ds.column("Age").unwrap().physical, PhysicalType::Integer);
        assert_eq!(ds.column("Balance").unwrap().physical, PhysicalType::Float);
        assert_eq!(ds.column("Gender").unwrap().kind(), ColumnType::Categorical);
        assert_eq!(
            ds.column("AccountOpenDate").unwrap().kind(),
            ColumnType::Categorical
        );
        assert_eq!(ds.row(1).get("Balance"), Some(&Scalar::Null));
        assert_eq!(ds.row(2).get("Age"), Some(&Scalar::Int(19)));
        assert_eq!(
            ds.row(0).get("AccountOpenDate"),
            Some(&Scalar::Str("2019-03-14".into()))
        );
    }

    #[test]
    fn test_empty_batches_yield_empty_dataset() {
        let ds = from_record_batches(&[]).unwrap();
        assert_eq!(ds.row_count(), 0);
        assert!(ds.columns().is_empty());
    }
}
