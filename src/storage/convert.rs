//! Conversions between headers/records and Arrow schemas/batches

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Date32Array, Date32Builder, Float64Array,
    Float64Builder, Int64Array, Int64Builder, StringArray, StringBuilder,
    TimestampMicrosecondArray, TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType as ArrowType, Field as ArrowField, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};

use crate::error::{Error, Result};
use crate::records::{DataType, Field, Header, Record, Value};

/// Days from 0001-01-01 (CE day 1) to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const fn arrow_type(data_type: DataType) -> ArrowType {
    match data_type {
        DataType::Bool => ArrowType::Boolean,
        DataType::Int => ArrowType::Int64,
        DataType::Float => ArrowType::Float64,
        DataType::Str => ArrowType::Utf8,
        DataType::Date => ArrowType::Date32,
        DataType::DateTime => ArrowType::Timestamp(TimeUnit::Microsecond, None),
    }
}

/// Arrow schema with one field per header field
pub fn schema_for(header: &Header) -> SchemaRef {
    let fields: Vec<ArrowField> = header
        .fields()
        .iter()
        .map(|f| ArrowField::new(f.name(), arrow_type(f.data_type()), f.is_nullable()))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Header for a stored schema
///
/// # Errors
/// Returns `StorageError` for Arrow types relfeat does not store
pub fn header_for(schema: &Schema) -> Result<Header> {
    let fields = schema
        .fields()
        .iter()
        .map(|f| {
            let data_type = match f.data_type() {
                ArrowType::Boolean => DataType::Bool,
                ArrowType::Int64 => DataType::Int,
                ArrowType::Float64 => DataType::Float,
                ArrowType::Utf8 => DataType::Str,
                ArrowType::Date32 => DataType::Date,
                ArrowType::Timestamp(TimeUnit::Microsecond, None) => DataType::DateTime,
                other => {
                    return Err(Error::StorageError(format!(
                        "Unsupported column type {other} for `{}`",
                        f.name()
                    )))
                }
            };
            Ok(Field::new(f.name().clone(), data_type).with_nullable(f.is_nullable()))
        })
        .collect::<Result<Vec<_>>>()?;
    Header::new(fields)
}

fn mismatch(field: &Field, value: &Value) -> Error {
    Error::schema_mismatch(
        field.name(),
        format!("cannot store {} value in {} column", value.type_name(), field.type_label()),
    )
}

macro_rules! build_column {
    (
        $builder:expr, $records:expr, $col:expr, $field:expr,
        $variant:ident($v:ident) => $append:expr
    ) => {{
        let mut builder = $builder;
        for record in $records {
            match &record.values()[$col] {
                Value::$variant($v) => builder.append_value($append),
                Value::Null => builder.append_null(),
                other => return Err(mismatch($field, other)),
            }
        }
        Arc::new(builder.finish()) as ArrayRef
    }};
}

/// Build one batch from records conforming to `header`
///
/// # Errors
/// Returns `SchemaMismatch` for a value of the wrong type and Arrow errors
/// from batch assembly
pub fn batch_from_records(
    schema: &SchemaRef,
    header: &Header,
    records: &[Record],
) -> Result<RecordBatch> {
    let n = records.len();
    let mut columns = Vec::with_capacity(header.len());
    for (col, field) in header.fields().iter().enumerate() {
        let array = match field.data_type() {
            DataType::Bool => {
                build_column!(BooleanBuilder::with_capacity(n), records, col, field, Bool(v) => *v)
            }
            DataType::Int => {
                build_column!(Int64Builder::with_capacity(n), records, col, field, Int(v) => *v)
            }
            DataType::Float => {
                build_column!(Float64Builder::with_capacity(n), records, col, field, Float(v) => *v)
            }
            DataType::Str => build_column!(
                StringBuilder::with_capacity(n, n * 16), records, col, field, Str(v) => v.as_str()
            ),
            DataType::Date => build_column!(
                Date32Builder::with_capacity(n), records, col, field,
                Date(v) => v.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
            ),
            DataType::DateTime => build_column!(
                TimestampMicrosecondBuilder::with_capacity(n), records, col, field,
                DateTime(v) => v.and_utc().timestamp_micros()
            ),
        };
        columns.push(array);
    }
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, field: &Field) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::StorageError(format!(
            "Column `{}` is not stored as {}",
            field.name(),
            field.data_type()
        ))
    })
}

/// Read one cell
///
/// # Errors
/// Returns `StorageError` if the array type does not match the field or a
/// stored temporal value is out of range
pub fn value_at(array: &ArrayRef, row: usize, field: &Field) -> Result<Value> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match field.data_type() {
        DataType::Bool => Value::Bool(downcast::<BooleanArray>(array, field)?.value(row)),
        DataType::Int => Value::Int(downcast::<Int64Array>(array, field)?.value(row)),
        DataType::Float => Value::Float(downcast::<Float64Array>(array, field)?.value(row)),
        DataType::Str => Value::Str(downcast::<StringArray>(array, field)?.value(row).to_string()),
        DataType::Date => {
            let days = downcast::<Date32Array>(array, field)?.value(row);
            NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                .map(Value::Date)
                .ok_or_else(|| Error::StorageError(format!("Date out of range: {days} days")))?
        }
        DataType::DateTime => {
            let micros = downcast::<TimestampMicrosecondArray>(array, field)?.value(row);
            chrono::DateTime::from_timestamp_micros(micros)
                .map(|dt| Value::DateTime(dt.naive_utc()))
                .ok_or_else(|| Error::StorageError(format!("Timestamp out of range: {micros}us")))?
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn header() -> Header {
        Header::new([
            Field::new("id", DataType::Int),
            Field::nullable("flag", DataType::Bool),
            Field::nullable("x", DataType::Float),
            Field::nullable("name", DataType::Str),
            Field::nullable("day", DataType::Date),
            Field::nullable("at", DataType::DateTime),
        ])
        .unwrap()
    }

    #[test]
    fn test_schema_round_trip() {
        let h = header();
        assert_eq!(header_for(&schema_for(&h)).unwrap(), h);
    }

    #[test]
    fn test_batch_values_round_trip() {
        let h = Arc::new(header());
        let day = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        let at = NaiveDateTime::parse_from_str("2021-06-01T08:30:00", "%Y-%m-%dT%H:%M:%S").unwrap();
        let rows = vec![
            Record::new(
                h.clone(),
                vec![
                    Value::Int(1),
                    Value::Bool(true),
                    Value::Float(2.5),
                    Value::from("a"),
                    Value::Date(day),
                    Value::DateTime(at),
                ],
            )
            .unwrap(),
            Record::new(
                h.clone(),
                vec![
                    Value::Int(2),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                ],
            )
            .unwrap(),
        ];
        let schema = schema_for(&h);
        let batch = batch_from_records(&schema, &h, &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        for (r, record) in rows.iter().enumerate() {
            for (c, field) in h.fields().iter().enumerate() {
                assert_eq!(&value_at(batch.column(c), r, field).unwrap(), &record.values()[c]);
            }
        }
    }
}
