//! Runtime values and the closed set of column data types

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Text format for `date` columns
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Text formats accepted for `datetime` columns, tried in order
pub const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    /// `true` / `false`
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 text
    #[default]
    Str,
    /// Calendar date
    Date,
    /// Date and time without zone
    DateTime,
}

impl DataType {
    /// Canonical lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Date => "date",
            Self::DateTime => "datetime",
        }
    }

    /// Whether values of this type can be placed on a time line
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Date | Self::DateTime)
    }

    /// Parse text into a value of this type
    ///
    /// Surrounding whitespace is ignored for everything except `str`.
    ///
    /// # Errors
    /// Returns a message naming the text and the target type if it does not parse
    pub fn parse(self, text: &str) -> std::result::Result<Value, String> {
        let trimmed = text.trim();
        let parsed = match self {
            Self::Str => return Ok(Value::Str(text.to_string())),
            Self::Bool => parse_bool(trimmed).map(Value::Bool),
            Self::Int => trimmed.parse::<i64>().ok().map(Value::Int),
            Self::Float => trimmed.parse::<f64>().ok().map(Value::Float),
            Self::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
                .ok()
                .map(Value::Date),
            Self::DateTime => DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(Value::DateTime),
        };
        parsed.ok_or_else(|| format!("cannot parse {text:?} as {self}"))
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(Self::Bool),
            "int" | "integer" => Ok(Self::Int),
            "float" | "double" | "real" => Ok(Self::Float),
            "str" | "string" | "char" | "varchar" | "text" => Ok(Self::Str),
            "date" => Ok(Self::Date),
            "datetime" | "timestamp" => Ok(Self::DateTime),
            other => Err(format!(
                "Unrecognized data type: {other:?} \
                 (expected one of bool, int, float, str, date, datetime)"
            )),
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.name().to_string()
    }
}

/// A single cell value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Missing value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Text
    Str(String),
    /// Calendar date
    Date(NaiveDate),
    /// Date and time
    DateTime(NaiveDateTime),
}

impl Value {
    /// Data type of this value, `None` for null
    #[must_use]
    pub const fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(DataType::Bool),
            Self::Int(_) => Some(DataType::Int),
            Self::Float(_) => Some(DataType::Float),
            Self::Str(_) => Some(DataType::Str),
            Self::Date(_) => Some(DataType::Date),
            Self::DateTime(_) => Some(DataType::DateTime),
        }
    }

    /// Whether this is the missing-value sentinel
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of bools, ints and floats
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Integer view
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Text view
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to another data type
    ///
    /// Null casts to null. Text is parsed; numbers convert between int and
    /// float when no information is lost; everything formats to text.
    ///
    /// # Errors
    /// Returns a message when the value has no representation in `to`
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn cast(&self, to: DataType) -> std::result::Result<Self, String> {
        if self.data_type() == Some(to) || self.is_null() {
            return Ok(self.clone());
        }
        match (self, to) {
            (Self::Str(s), _) => to.parse(s),
            (_, DataType::Str) => Ok(Self::Str(self.to_string())),
            (Self::Int(i), DataType::Float) => Ok(Self::Float(*i as f64)),
            (Self::Float(x), DataType::Int) if x.fract() == 0.0 && x.abs() < 9.0e15 => {
                Ok(Self::Int(*x as i64))
            }
            (Self::Bool(b), DataType::Int) => Ok(Self::Int(i64::from(*b))),
            (Self::Bool(b), DataType::Float) => Ok(Self::Float(if *b { 1.0 } else { 0.0 })),
            (Self::Int(i @ (0 | 1)), DataType::Bool) => Ok(Self::Bool(*i == 1)),
            (Self::Date(d), DataType::DateTime) => {
                Ok(Self::DateTime(NaiveDateTime::new(*d, NaiveTime::MIN)))
            }
            (Self::DateTime(dt), DataType::Date) => Ok(Self::Date(dt.date())),
            _ => Err(format!(
                "cannot cast {} value {self} to {to}",
                self.type_name()
            )),
        }
    }

    /// Name of this value's type, `null` for the sentinel
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.data_type().map_or("null", DataType::name)
    }

    /// SQL-style comparison
    ///
    /// Ints and floats compare numerically, dates against datetimes at
    /// midnight, and text against dates by parsing the text. Nulls and
    /// mismatched types are incomparable.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::Date(_), Self::DateTime(_)) => {
                self.cast(DataType::DateTime).ok()?.compare(other)
            }
            (Self::DateTime(_), Self::Date(_)) => {
                self.compare(&other.cast(DataType::DateTime).ok()?)
            }
            (Self::Str(s), Self::Date(_) | Self::DateTime(_)) => {
                other.data_type()?.parse(s).ok()?.compare(other)
            }
            (Self::Date(_) | Self::DateTime(_), Self::Str(s)) => {
                self.compare(&self.data_type()?.parse(s).ok()?)
            }
            _ => None,
        }
    }

    /// Total order used for sorting
    ///
    /// Agrees with [`compare`](Self::compare) where that is defined. Across
    /// types the order is bool < numbers < dates/datetimes < text < null.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        if let Some(ordering) = self.compare(other) {
            if ordering != Ordering::Equal || self.rank() == other.rank() {
                return ordering;
            }
        }
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) | Self::Float(_) => 1,
            Self::Date(_) | Self::DateTime(_) => 2,
            Self::Str(_) => 3,
            Self::Null => 4,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Self::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMATS[0])),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_aliases() {
        assert_eq!("integer".parse::<DataType>().unwrap(), DataType::Int);
        assert_eq!("REAL".parse::<DataType>().unwrap(), DataType::Float);
        assert_eq!("varchar".parse::<DataType>().unwrap(), DataType::Str);
        assert_eq!("timestamp".parse::<DataType>().unwrap(), DataType::DateTime);
        assert!("decimal".parse::<DataType>().is_err());
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(DataType::Int.parse(" 42 ").unwrap(), Value::Int(42));
        assert_eq!(DataType::Float.parse("42").unwrap(), Value::Float(42.0));
        assert_eq!(DataType::Bool.parse("Yes").unwrap(), Value::Bool(true));
        assert_eq!(
            DataType::Date.parse("2017-03-04").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2017, 3, 4).unwrap())
        );
        assert!(DataType::DateTime.parse("2017-03-04 10:11:12").is_ok());
        assert!(DataType::Int.parse("4.2").is_err());
    }

    #[test]
    fn test_cast() {
        assert_eq!(Value::from("42").cast(DataType::Float).unwrap(), Value::Float(42.0));
        assert_eq!(Value::Float(3.0).cast(DataType::Int).unwrap(), Value::Int(3));
        assert!(Value::Float(3.5).cast(DataType::Int).is_err());
        assert_eq!(Value::Null.cast(DataType::Int).unwrap(), Value::Null);
        assert_eq!(Value::Int(7).cast(DataType::Str).unwrap(), Value::from("7"));
    }

    #[test]
    fn test_compare_mixed_numeric() {
        assert_eq!(Value::Int(3).compare(&Value::Float(3.5)), Some(Ordering::Less));
        assert_eq!(Value::Float(3.0).compare(&Value::Int(3)), Some(Ordering::Equal));
        assert_eq!(Value::Int(3).compare(&Value::from("3")), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn test_compare_dates_with_text() {
        let d = Value::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(d.compare(&Value::from("2020-01-01")), Some(Ordering::Greater));
    }

    #[test]
    fn test_total_cmp_nulls_last() {
        let mut values = vec![Value::Null, Value::Int(2), Value::from("a"), Value::Float(1.5)];
        values.sort_by(Value::total_cmp);
        assert_eq!(
            values,
            vec![Value::Float(1.5), Value::Int(2), Value::from("a"), Value::Null]
        );
    }
}
