//! Fields and headers (record schemas)

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::records::value::{DataType, Value};

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    name: String,
    data_type: DataType,
    nullable: bool,
}

impl Field {
    /// Non-nullable field
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }

    /// Nullable field
    pub fn nullable(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Same field with the given nullability
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Same type under a different name
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether `value` conforms to this field
    #[must_use]
    pub fn admits(&self, value: &Value) -> bool {
        value
            .data_type()
            .map_or(self.nullable, |dt| dt == self.data_type)
    }

    /// Type label as written in messages, e.g. `float?` for nullable float
    #[must_use]
    pub fn type_label(&self) -> String {
        if self.nullable {
            format!("{}?", self.data_type)
        } else {
            self.data_type.to_string()
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.type_label())
    }
}

/// Reference to a field by position or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// Zero-based position
    Index(usize),
    /// Field name
    Name(String),
}

impl From<usize> for FieldRef {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

impl From<&str> for FieldRef {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for FieldRef {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<&String> for FieldRef {
    fn from(value: &String) -> Self {
        Self::Name(value.clone())
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{i}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Ordered collection of uniquely named fields
///
/// Headers are immutable once built and are shared between records through
/// `Arc<Header>`. Equality is structural.
#[derive(Debug, Clone)]
pub struct Header {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl Header {
    /// Build a header
    ///
    /// # Errors
    /// Returns `InvalidInput` for an empty field list and `DuplicateField` if
    /// two fields share a name
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Result<Self> {
        let fields: Vec<Field> = fields.into_iter().collect();
        if fields.is_empty() {
            return Err(Error::InvalidInput(
                "Header must have at least one field".to_string(),
            ));
        }
        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.name.clone(), i).is_some() {
                return Err(Error::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self { fields, index })
    }

    /// Header of nullable text fields, the shape of raw delimited input
    ///
    /// # Errors
    /// Same as [`Header::new`]
    pub fn strings<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Result<Self> {
        Self::new(
            names
                .into_iter()
                .map(|name| Field::nullable(name, DataType::Str)),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(Field::name)
    }

    pub fn types(&self) -> impl Iterator<Item = DataType> + '_ {
        self.fields.iter().map(Field::data_type)
    }

    /// # Errors
    /// Returns `IndexOutOfBounds` outside `[0, len)`
    pub fn field_at(&self, index: usize) -> Result<&Field> {
        self.fields.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            len: self.fields.len(),
        })
    }

    /// # Errors
    /// Returns `IndexOutOfBounds` outside `[0, len)`
    pub fn name_at(&self, index: usize) -> Result<&str> {
        self.field_at(index).map(Field::name)
    }

    /// # Errors
    /// Returns `IndexOutOfBounds` outside `[0, len)`
    pub fn type_at(&self, index: usize) -> Result<DataType> {
        self.field_at(index).map(Field::data_type)
    }

    /// # Errors
    /// Returns `UnknownField` if no field has this name
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// # Errors
    /// Returns `UnknownField` if no field has this name
    pub fn field_of(&self, name: &str) -> Result<&Field> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    /// # Errors
    /// Returns `UnknownField` if no field has this name
    pub fn type_of(&self, name: &str) -> Result<DataType> {
        self.field_of(name).map(Field::data_type)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Resolve a field reference to a position
    ///
    /// # Errors
    /// Returns `IndexOutOfBounds` or `UnknownField`
    pub fn resolve(&self, field: &FieldRef) -> Result<usize> {
        match field {
            FieldRef::Index(i) => self.field_at(*i).map(|_| *i),
            FieldRef::Name(name) => self.index_of(name),
        }
    }

    /// Whether `values` has this header's arity and every value conforms
    #[must_use]
    pub fn isinstance(&self, values: &[Value]) -> bool {
        values.len() == self.fields.len()
            && self
                .fields
                .iter()
                .zip(values)
                .all(|(field, value)| field.admits(value))
    }

    /// Like [`isinstance`](Self::isinstance) but names what is wrong
    ///
    /// # Errors
    /// Returns `SchemaMismatch` for the first offending field, or for the
    /// arity when the lengths differ
    pub fn check(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(Error::schema_mismatch(
                "<arity>",
                format!(
                    "expected {} values, found {}",
                    self.fields.len(),
                    values.len()
                ),
            ));
        }
        for (field, value) in self.fields.iter().zip(values) {
            if !field.admits(value) {
                return Err(Error::schema_mismatch(
                    field.name(),
                    format!(
                        "expected {}, found {} value {value:?}",
                        field.type_label(),
                        value.type_name()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Sub-header of the referenced fields, in the order given
    ///
    /// # Errors
    /// Returns lookup errors for bad references and `DuplicateField` if a
    /// field is selected twice
    pub fn project(&self, fields: &[FieldRef]) -> Result<Self> {
        let selected = fields
            .iter()
            .map(|f| self.resolve(f).map(|i| self.fields[i].clone()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(selected)
    }
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Header {}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str(")")
    }
}
