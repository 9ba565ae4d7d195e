//! Records: fixed-arity tuples conforming to a header

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::records::header::{Field, FieldRef, Header};
use crate::records::value::{DataType, Value};

/// A row of values sharing an `Arc<Header>` with its siblings
///
/// Records are read-only. The optional line number is the source line the
/// record was read from, when it came from a file.
#[derive(Debug, Clone)]
pub struct Record {
    header: Arc<Header>,
    values: Vec<Value>,
    line: Option<u64>,
}

impl Record {
    /// Build a record, validating the values against the header
    ///
    /// # Errors
    /// Returns `SchemaMismatch` naming the first non-conforming field
    pub fn new(header: Arc<Header>, values: Vec<Value>) -> Result<Self> {
        header.check(&values)?;
        Ok(Self {
            header,
            values,
            line: None,
        })
    }

    /// Build a record whose values are already known to conform
    pub(crate) fn new_unchecked(header: Arc<Header>, values: Vec<Value>) -> Self {
        debug_assert!(header.isinstance(&values));
        Self {
            header,
            values,
            line: None,
        }
    }

    /// Build a record inferring the header from the runtime values
    ///
    /// Non-null values give non-nullable fields of their own type; null
    /// gives a nullable `str` field.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the name and value counts differ, or header
    /// construction errors
    pub fn infer<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
        values: Vec<Value>,
    ) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() != values.len() {
            return Err(Error::InvalidInput(format!(
                "{} names for {} values",
                names.len(),
                values.len()
            )));
        }
        let fields = names.into_iter().zip(&values).map(|(name, value)| {
            value.data_type().map_or_else(
                || Field::nullable(name.clone(), DataType::Str),
                |dt| Field::new(name.clone(), dt),
            )
        });
        let header = Header::new(fields.collect::<Vec<_>>())?;
        Ok(Self::new_unchecked(Arc::new(header), values))
    }

    /// Build a record from `(name, value)` pairs, inferring types
    ///
    /// # Errors
    /// Same as [`Record::infer`]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let (names, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self::infer(names, values)
    }

    /// Attach a source line number
    #[must_use]
    pub const fn with_line(mut self, line: Option<u64>) -> Self {
        self.line = line;
        self
    }

    #[must_use]
    pub const fn header(&self) -> &Arc<Header> {
        &self.header
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[must_use]
    pub const fn line(&self) -> Option<u64> {
        self.line
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a position
    ///
    /// # Errors
    /// Returns `IndexOutOfBounds` outside the record's arity
    pub fn get(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            len: self.values.len(),
        })
    }

    /// Value of a named field
    ///
    /// # Errors
    /// Returns `UnknownField` if the header does not declare `name`
    pub fn get_by_name(&self, name: &str) -> Result<&Value> {
        let index = self.header.index_of(name)?;
        self.get(index)
    }

    /// Value of a referenced field
    ///
    /// # Errors
    /// Returns lookup errors for bad references
    pub fn value(&self, field: &FieldRef) -> Result<&Value> {
        let index = self.header.resolve(field)?;
        self.get(index)
    }

    /// Values as text, nulls as empty strings
    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.values.iter().map(ToString::to_string).collect()
    }
}

/// Records are equal when their headers and values are; line numbers are
/// not compared.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.header == other.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        let header = Arc::new(Header::new([Field::new("id", DataType::Int)]).unwrap());
        assert!(Record::new(header.clone(), vec![Value::Int(1)]).is_ok());
        assert!(Record::new(header.clone(), vec![Value::from("1")]).is_err());
        assert!(Record::new(header, vec![Value::Int(1), Value::Int(2)]).is_err());
    }

    #[test]
    fn test_infer() {
        let r = Record::infer(["id", "note"], vec![Value::Int(3), Value::Null]).unwrap();
        let note = r.header().field_of("note").unwrap();
        assert!(note.is_nullable());
        assert_eq!(note.data_type(), DataType::Str);
        assert_eq!(r.header().type_of("id").unwrap(), DataType::Int);
    }

    #[test]
    fn test_from_pairs_and_access() {
        let r = Record::from_pairs([("id", Value::Int(7)), ("sex", Value::from("M"))]).unwrap();
        assert_eq!(r.get_by_name("sex").unwrap(), &Value::from("M"));
        assert_eq!(r.get(0).unwrap(), &Value::Int(7));
        assert!(matches!(r.get_by_name("age"), Err(Error::UnknownField(_))));
        assert!(matches!(r.get(2), Err(Error::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_equality_ignores_line() {
        let a = Record::from_pairs([("x", 1_i64)]).unwrap();
        let b = a.clone().with_line(Some(4));
        assert_eq!(a, b);
    }
}
