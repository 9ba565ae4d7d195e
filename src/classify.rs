//! Classification of table rows into facts, events and study-design examples
//!
//! Each source table gets a [`Treatment`]. Its columns (after the `use`
//! projection applied at load time) are read in canonical order:
//!
//! | treatment | columns                                   |
//! |-----------|-------------------------------------------|
//! | facts     | `subject_id, data...`                     |
//! | events    | `subject_id, time, event_type[, value]`   |
//! | examples  | `subject_id, label[, start[, end]]`       |

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::records::{
    FieldRef, Header, Record, RecordStream, RecordTransformation, RejectedRecord, Value,
};

/// How a table's rows are interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    /// Timeless attributes of subjects
    Facts,
    /// Timestamped occurrences
    #[default]
    Events,
    /// Study design: one labelled example per subject
    Examples,
}

impl Treatment {
    /// Minimum and maximum canonical arity
    const fn arity(self) -> (usize, usize) {
        match self {
            Self::Facts => (2, usize::MAX),
            Self::Events => (3, 4),
            Self::Examples => (2, 4),
        }
    }
}

impl fmt::Display for Treatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Facts => "facts",
            Self::Events => "events",
            Self::Examples => "examples",
        })
    }
}

/// Subject identifier; never missing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectId {
    Int(i64),
    Str(String),
}

impl SubjectId {
    /// Identifier from a cell, if the cell holds a usable id
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Str(s) if !s.trim().is_empty() => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for SubjectId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// A timeless attribute of a subject
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub table: Arc<str>,
    pub subject: SubjectId,
    pub fact_type: String,
    pub data: Value,
}

/// Whether an event only happened or also carries a value
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Existence,
    Value(Value),
}

/// A timestamped occurrence for a subject
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub table: Arc<str>,
    pub subject: SubjectId,
    pub event_type: String,
    pub time: Value,
    pub kind: EventKind,
}

impl Event {
    /// Attached value, for value events
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match &self.kind {
            EventKind::Existence => None,
            EventKind::Value(v) => Some(v),
        }
    }
}

/// A classified row: a generic fact, an existence event, or a value event
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Fact(Fact),
    Event(Event),
}

impl Observation {
    #[must_use]
    pub const fn subject(&self) -> &SubjectId {
        match self {
            Self::Fact(f) => &f.subject,
            Self::Event(e) => &e.subject,
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Fact(f) => &f.table,
            Self::Event(e) => &e.table,
        }
    }
}

/// A study-design row
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub subject: SubjectId,
    pub label: Value,
    pub start: Option<Value>,
    pub end: Option<Value>,
}

impl Example {
    #[must_use]
    pub fn new(subject: impl Into<SubjectId>, label: impl Into<Value>) -> Self {
        Self {
            subject: subject.into(),
            label: label.into(),
            start: None,
            end: None,
        }
    }

    /// Same example with an observation window; bounds are inclusive
    #[must_use]
    pub fn with_window(mut self, start: Option<Value>, end: Option<Value>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Whether `time` falls inside the window
    ///
    /// Returns `None` when `time` cannot be compared with a bound.
    #[must_use]
    pub fn contains(&self, time: &Value) -> Option<bool> {
        let after_start = match &self.start {
            Some(start) => time.compare(start)? != Ordering::Less,
            None => true,
        };
        let before_end = match &self.end {
            Some(end) => time.compare(end)? != Ordering::Greater,
            None => true,
        };
        Some(after_start && before_end)
    }
}

/// Turns rows of one table into observations or examples
#[derive(Debug, Clone)]
pub struct Classifier {
    table: Arc<str>,
    treatment: Treatment,
    canonical: RecordTransformation,
}

impl Classifier {
    /// Classifier for rows with `header`
    ///
    /// Columns beyond the treatment's maximum arity are ignored.
    ///
    /// # Errors
    /// Returns `Config` when the header has too few columns for the treatment
    pub fn new(table: &str, treatment: Treatment, header: Arc<Header>) -> Result<Self> {
        let (min, max) = treatment.arity();
        if header.len() < min {
            return Err(Error::Config(format!(
                "Table `{table}` treated as {treatment} needs at least {min} columns, has {}",
                header.len()
            )));
        }
        let keep: Vec<FieldRef> = (0..header.len().min(max)).map(FieldRef::Index).collect();
        let canonical = RecordTransformation::projection(header, &keep)?;
        Ok(Self {
            table: Arc::from(table),
            treatment,
            canonical,
        })
    }

    #[must_use]
    pub const fn treatment(&self) -> Treatment {
        self.treatment
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn subject(record: &Record) -> Result<SubjectId> {
        let value = &record.values()[0];
        SubjectId::from_value(value).ok_or_else(|| {
            Error::validation(
                record.header().fields()[0].name(),
                format!("missing or unusable subject id {value:?}"),
            )
        })
    }

    fn required<'r>(record: &'r Record, index: usize, what: &str) -> Result<&'r Value> {
        let value = &record.values()[index];
        if value.is_null() {
            return Err(Error::validation(
                record.header().fields()[index].name(),
                format!("missing {what}"),
            ));
        }
        Ok(value)
    }

    /// Classify one fact or event row
    ///
    /// A fact row yields one fact per non-null data column; an event row
    /// yields exactly one event.
    ///
    /// # Errors
    /// Returns `Validation` for a missing subject, event time or event type,
    /// and `InvalidInput` for an examples table
    pub fn classify(&self, record: &Record) -> Result<Vec<Observation>> {
        let record = self.canonical.apply(record)?;
        let subject = Self::subject(&record)?;
        match self.treatment {
            Treatment::Facts => Ok(record
                .header()
                .fields()
                .iter()
                .zip(record.values())
                .skip(1)
                .filter(|(_, value)| !value.is_null())
                .map(|(field, value)| {
                    Observation::Fact(Fact {
                        table: self.table.clone(),
                        subject: subject.clone(),
                        fact_type: field.name().to_string(),
                        data: value.clone(),
                    })
                })
                .collect()),
            Treatment::Events => {
                let time = Self::required(&record, 1, "event time")?;
                if !time.data_type().is_some_and(|dt| dt.is_temporal()) {
                    return Err(Error::validation(
                        record.header().fields()[1].name(),
                        format!(
                            "event time must be numeric, date or datetime, got {}",
                            time.type_name()
                        ),
                    ));
                }
                let event_type = Self::required(&record, 2, "event type")?.to_string();
                let kind = match record.values().get(3) {
                    Some(value) if !value.is_null() => EventKind::Value(value.clone()),
                    _ => EventKind::Existence,
                };
                Ok(vec![Observation::Event(Event {
                    table: self.table.clone(),
                    subject,
                    event_type,
                    time: time.clone(),
                    kind,
                })])
            }
            Treatment::Examples => Err(Error::InvalidInput(format!(
                "Table `{}` holds examples, not observations",
                self.table
            ))),
        }
    }

    /// Read one study-design row
    ///
    /// # Errors
    /// Returns `Validation` for a missing subject or label, or a window whose
    /// start is after its end, and `InvalidInput` for a non-examples table
    pub fn example(&self, record: &Record) -> Result<Example> {
        if self.treatment != Treatment::Examples {
            return Err(Error::InvalidInput(format!(
                "Table `{}` holds {}, not examples",
                self.table, self.treatment
            )));
        }
        let record = self.canonical.apply(record)?;
        let subject = Self::subject(&record)?;
        let label = Self::required(&record, 1, "label")?.clone();
        let bound = |i: usize| record.values().get(i).filter(|v| !v.is_null()).cloned();
        let (start, end) = (bound(2), bound(3));
        if let (Some(s), Some(e)) = (&start, &end) {
            match s.compare(e) {
                Some(Ordering::Greater) => {
                    return Err(Error::validation(
                        record.header().fields()[2].name(),
                        format!("window start {s} is after end {e}"),
                    ))
                }
                None => {
                    return Err(Error::validation(
                        record.header().fields()[2].name(),
                        format!("window bounds {s} and {e} are not comparable"),
                    ))
                }
                _ => {}
            }
        }
        Ok(Example {
            subject,
            label,
            start,
            end,
        })
    }

    fn reject(stream: &str, provenance: &str, record: &Record, error: &Error) -> Error {
        Error::Rejected(Box::new(RejectedRecord::new(
            stream,
            provenance,
            record.line(),
            record.header().names().map(String::from).collect(),
            record.to_strings(),
            error,
        )))
    }

    fn route<T>(source: &str, provenance: &str, record: &Record, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            if e.is_record_level() && !matches!(e, Error::Rejected(_)) {
                Self::reject(source, provenance, record, &e)
            } else {
                e
            }
        })
    }

    /// Classify every row of a stream
    ///
    /// Invalid rows become [`Error::Rejected`] items for the bad-records
    /// handler.
    pub fn observations<'s>(
        &'s self,
        stream: RecordStream<'s>,
    ) -> impl Iterator<Item = Result<Observation>> + 's {
        let source = stream.name().to_string();
        let provenance = stream.provenance().to_string();
        stream.flat_map(move |item| {
            let classified = item.and_then(|record| {
                Self::route(&source, &provenance, &record, self.classify(&record))
            });
            match classified {
                Ok(observations) => observations.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            }
        })
    }

    /// Read every row of a stream as an example
    pub fn examples<'s>(
        &'s self,
        stream: RecordStream<'s>,
    ) -> impl Iterator<Item = Result<Example>> + 's {
        let source = stream.name().to_string();
        let provenance = stream.provenance().to_string();
        stream.map(move |item| {
            let record = item?;
            Self::route(&source, &provenance, &record, self.example(&record))
        })
    }
}
