//! Record transformations
//!
//! A [`RecordTransformation`] is compiled once for one input header from an
//! ordered list of [`TransformStep`]s. Each step produces exactly one output
//! field, so the output header is known before any record is seen.
//!
//! ```
//! use std::sync::Arc;
//! use relfeat::records::{DataType, Header, MapField, Record, RecordTransformation, Value};
//!
//! let input = Arc::new(Header::strings(["age"]).unwrap());
//! let t = RecordTransformation::new(
//!     input.clone(),
//!     [MapField::cast("age", DataType::Float).rename("age_at_event").into()],
//! )
//! .unwrap();
//! let out = t.apply(&Record::new(input, vec![Value::from("42")]).unwrap()).unwrap();
//! assert_eq!(out.values(), &[Value::Float(42.0)]);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::records::header::{Field, FieldRef, Header};
use crate::records::record::Record;
use crate::records::value::{DataType, Value};

/// Unary field function
pub type FieldFn = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Whole-record function
pub type RecordFn =
    Arc<dyn Fn(&Record, &Header) -> std::result::Result<Value, String> + Send + Sync>;

/// Copy a field unchanged
#[derive(Debug, Clone)]
pub struct CopyField {
    pub field: FieldRef,
}

/// Copy a field under a new name
#[derive(Debug, Clone)]
pub struct RenameField {
    pub field: FieldRef,
    pub to: String,
}

/// Apply a unary function to one field
#[derive(Clone)]
pub struct MapField {
    field: FieldRef,
    name: Option<String>,
    data_type: DataType,
    nullable: Option<bool>,
    func: FieldFn,
}

impl MapField {
    /// Map `field` through `func`, declaring the output type
    pub fn new<F>(field: impl Into<FieldRef>, data_type: DataType, func: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            field: field.into(),
            name: None,
            data_type,
            nullable: None,
            func: Arc::new(func),
        }
    }

    /// Convert `field` to `data_type`, parsing text
    pub fn cast(field: impl Into<FieldRef>, data_type: DataType) -> Self {
        Self::new(field, data_type, move |v| v.cast(data_type))
    }

    /// Name the output field (default: the input field's name)
    #[must_use]
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare output nullability (default: the input field's)
    #[must_use]
    pub const fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }
}

impl fmt::Debug for MapField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapField")
            .field("field", &self.field)
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("nullable", &self.nullable)
            .finish_non_exhaustive()
    }
}

/// Compute a new field from the whole record
#[derive(Clone)]
pub struct MapRecord {
    name: String,
    data_type: DataType,
    nullable: bool,
    func: RecordFn,
}

impl MapRecord {
    /// Compute a nullable `name` field of `data_type`
    pub fn new<F>(name: impl Into<String>, data_type: DataType, func: F) -> Self
    where
        F: Fn(&Record, &Header) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            func: Arc::new(func),
        }
    }

    #[must_use]
    pub const fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

impl fmt::Debug for MapRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapRecord")
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("nullable", &self.nullable)
            .finish_non_exhaustive()
    }
}

/// One output field of a transformation
#[derive(Debug, Clone)]
pub enum TransformStep {
    Copy(CopyField),
    Rename(RenameField),
    MapField(MapField),
    MapRecord(MapRecord),
}

impl TransformStep {
    pub fn copy(field: impl Into<FieldRef>) -> Self {
        Self::Copy(CopyField {
            field: field.into(),
        })
    }

    pub fn rename(field: impl Into<FieldRef>, to: impl Into<String>) -> Self {
        Self::Rename(RenameField {
            field: field.into(),
            to: to.into(),
        })
    }
}

impl From<CopyField> for TransformStep {
    fn from(step: CopyField) -> Self {
        Self::Copy(step)
    }
}

impl From<RenameField> for TransformStep {
    fn from(step: RenameField) -> Self {
        Self::Rename(step)
    }
}

impl From<MapField> for TransformStep {
    fn from(step: MapField) -> Self {
        Self::MapField(step)
    }
}

impl From<MapRecord> for TransformStep {
    fn from(step: MapRecord) -> Self {
        Self::MapRecord(step)
    }
}

#[derive(Clone)]
enum Compiled {
    Copy(usize),
    Map(usize, FieldFn),
    Record(RecordFn),
}

/// A compiled mapping from one header to another
#[derive(Clone)]
pub struct RecordTransformation {
    input: Arc<Header>,
    output: Arc<Header>,
    plan: Vec<Compiled>,
}

impl RecordTransformation {
    /// Compile `steps` against `input`
    ///
    /// # Errors
    /// Returns `UnknownField`/`IndexOutOfBounds` for undeclared inputs and
    /// `DuplicateField` when output names collide
    pub fn new(
        input: Arc<Header>,
        steps: impl IntoIterator<Item = TransformStep>,
    ) -> Result<Self> {
        let mut fields = Vec::new();
        let mut plan = Vec::new();
        for step in steps {
            let (field, compiled) = match step {
                TransformStep::Copy(CopyField { field }) => {
                    let i = input.resolve(&field)?;
                    (input.fields()[i].clone(), Compiled::Copy(i))
                }
                TransformStep::Rename(RenameField { field, to }) => {
                    let i = input.resolve(&field)?;
                    (input.fields()[i].renamed(to), Compiled::Copy(i))
                }
                TransformStep::MapField(map) => {
                    let i = input.resolve(&map.field)?;
                    let source = &input.fields()[i];
                    let name = map.name.unwrap_or_else(|| source.name().to_string());
                    let nullable = map.nullable.unwrap_or_else(|| source.is_nullable());
                    (
                        Field::new(name, map.data_type).with_nullable(nullable),
                        Compiled::Map(i, map.func),
                    )
                }
                TransformStep::MapRecord(map) => (
                    Field::new(map.name, map.data_type).with_nullable(map.nullable),
                    Compiled::Record(map.func),
                ),
            };
            fields.push(field);
            plan.push(compiled);
        }
        let output = Arc::new(Header::new(fields)?);
        Ok(Self {
            input,
            output,
            plan,
        })
    }

    /// Transformation selecting `fields` in the given order
    ///
    /// # Errors
    /// Same as [`RecordTransformation::new`]
    pub fn projection(input: Arc<Header>, fields: &[FieldRef]) -> Result<Self> {
        let steps: Vec<TransformStep> = fields.iter().cloned().map(TransformStep::copy).collect();
        Self::new(input, steps)
    }

    #[must_use]
    pub const fn input_header(&self) -> &Arc<Header> {
        &self.input
    }

    #[must_use]
    pub const fn output_header(&self) -> &Arc<Header> {
        &self.output
    }

    /// Transform one record
    ///
    /// The record's source line carries over to the output.
    ///
    /// # Errors
    /// Returns `SchemaMismatch` if `record` does not conform to the input
    /// header, or `Validation` naming the output field whose function failed
    /// or whose value does not fit the output header
    pub fn apply(&self, record: &Record) -> Result<Record> {
        if !Arc::ptr_eq(record.header(), &self.input) {
            self.input.check(record.values())?;
        }
        let values = record.values();
        let mut out = Vec::with_capacity(self.plan.len());
        for (step, field) in self.plan.iter().zip(self.output.fields()) {
            let value = match step {
                Compiled::Copy(i) => values[*i].clone(),
                Compiled::Map(i, func) => {
                    func(&values[*i]).map_err(|m| Error::validation(field.name(), m))?
                }
                Compiled::Record(func) => {
                    func(record, &self.input).map_err(|m| Error::validation(field.name(), m))?
                }
            };
            if !field.admits(&value) {
                return Err(Error::validation(
                    field.name(),
                    format!(
                        "expected {}, got {} value {value:?}",
                        field.type_label(),
                        value.type_name()
                    ),
                ));
            }
            out.push(value);
        }
        Ok(Record::new_unchecked(self.output.clone(), out).with_line(record.line()))
    }
}

impl fmt::Debug for RecordTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordTransformation")
            .field("input", &self.input.to_string())
            .field("output", &self.output.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> Arc<Header> {
        Arc::new(Header::strings(["id", "age", "sex"]).unwrap())
    }

    fn row(values: [&str; 3]) -> Record {
        Record::new(raw(), values.iter().map(|v| Value::from(*v)).collect()).unwrap()
    }

    #[test]
    fn test_output_header() {
        let t = RecordTransformation::new(
            raw(),
            [
                MapField::cast("id", DataType::Int).nullable(false).into(),
                TransformStep::rename("sex", "gender"),
                MapField::cast(1, DataType::Float).into(),
            ],
        )
        .unwrap();
        assert_eq!(
            t.output_header().to_string(),
            "(id:int, gender:str?, age:float?)"
        );
    }

    #[test]
    fn test_unknown_and_duplicate_outputs() {
        let unknown = RecordTransformation::new(raw(), [TransformStep::copy("weight")]);
        assert!(matches!(unknown, Err(Error::UnknownField(_))));
        let dup = RecordTransformation::new(
            raw(),
            [TransformStep::copy("id"), TransformStep::rename("age", "id")],
        );
        assert!(matches!(dup, Err(Error::DuplicateField(_))));
    }

    #[test]
    fn test_function_failure_names_output_field() {
        let t = RecordTransformation::new(
            raw(),
            [MapField::cast("age", DataType::Int).rename("years").into()],
        )
        .unwrap();
        let err = t.apply(&row(["1", "abc", "F"])).unwrap_err();
        assert!(matches!(err, Error::Validation { field, .. } if field == "years"));
    }

    #[test]
    fn test_nullability_enforced() {
        let t = RecordTransformation::new(
            raw(),
            [MapField::cast("id", DataType::Int).nullable(false).into()],
        )
        .unwrap();
        let input = Record::new(raw(), vec![Value::Null, Value::Null, Value::Null]).unwrap();
        assert!(matches!(t.apply(&input), Err(Error::Validation { .. })));
    }

    #[test]
    fn test_mismatched_input() {
        let t = RecordTransformation::projection(raw(), &["id".into()]).unwrap();
        let other = Record::from_pairs([("id", 1_i64), ("age", 2), ("sex", 3)]).unwrap();
        let err = t.apply(&other).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { field, .. } if field == "id"));
    }

    #[test]
    fn test_map_record() {
        let t = RecordTransformation::new(
            raw(),
            [MapRecord::new("label", DataType::Str, |r, h| {
                let sex = r.get(h.index_of("sex").map_err(|e| e.to_string())?)
                    .map_err(|e| e.to_string())?;
                Ok(Value::from(format!("{}-{sex}", r.values()[0])))
            })
            .into()],
        )
        .unwrap();
        let out = t.apply(&row(["7", "30", "M"]).with_line(Some(12))).unwrap();
        assert_eq!(out.values(), &[Value::from("7-M")]);
        assert_eq!(out.line(), Some(12));
    }
}
