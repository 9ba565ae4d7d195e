//! Record streams and restartable record sources

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::records::bad_records::{BadRecordHandler, RejectedRecord, RouteBadRecords};
use crate::records::header::Header;
use crate::records::record::Record;
use crate::records::transform::RecordTransformation;

/// A named, single-pass sequence of records sharing one header
///
/// Items are `Result`s: record-level failures travel in-band as
/// [`Error::Rejected`] until a bad-records handler is attached with
/// [`with_bad_records`](Self::with_bad_records).
pub struct RecordStream<'a> {
    name: String,
    provenance: String,
    header: Arc<Header>,
    records: Box<dyn Iterator<Item = Result<Record>> + 'a>,
}

impl<'a> RecordStream<'a> {
    pub fn new<I>(
        name: impl Into<String>,
        provenance: impl Into<String>,
        header: Arc<Header>,
        records: I,
    ) -> Self
    where
        I: IntoIterator<Item = Result<Record>>,
        I::IntoIter: 'a,
    {
        Self {
            name: name.into(),
            provenance: provenance.into(),
            header,
            records: Box::new(records.into_iter()),
        }
    }

    /// Stream over records already in memory
    pub fn from_records(
        name: impl Into<String>,
        header: Arc<Header>,
        records: Vec<Record>,
    ) -> RecordStream<'static> {
        RecordStream::new(name, "memory", header, records.into_iter().map(Ok))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn provenance(&self) -> &str {
        &self.provenance
    }

    #[must_use]
    pub const fn header(&self) -> &Arc<Header> {
        &self.header
    }

    /// Apply a transformation to every record
    ///
    /// Record-level failures become [`Error::Rejected`] items carrying this
    /// stream's name and provenance, the record's line, and its raw values.
    ///
    /// # Errors
    /// Returns `SchemaMismatch` if the stream header differs from the
    /// transformation's input header
    pub fn transform(self, transformation: &'a RecordTransformation) -> Result<Self> {
        if *self.header != **transformation.input_header() {
            return Err(Error::schema_mismatch(
                self.name.clone(),
                format!(
                    "stream header {} does not match transformation input {}",
                    self.header,
                    transformation.input_header()
                ),
            ));
        }
        let Self {
            name,
            provenance,
            records,
            ..
        } = self;
        let source = name.clone();
        let origin = format!("{provenance} -> {}", transformation.output_header());
        let origin_for_errors = provenance.clone();
        let mapped = records.map(move |item| {
            let record = item?;
            transformation.apply(&record).map_err(|e| {
                if e.is_record_level() {
                    Error::Rejected(Box::new(RejectedRecord::new(
                        source.clone(),
                        origin_for_errors.clone(),
                        record.line(),
                        record.header().names().map(String::from).collect(),
                        record.to_strings(),
                        &e,
                    )))
                } else {
                    e
                }
            })
        });
        Ok(Self {
            name,
            provenance: origin,
            header: transformation.output_header().clone(),
            records: Box::new(mapped),
        })
    }

    /// Route rejected records to `handler`
    ///
    /// The resulting stream yields only good records, or the fatal error
    /// returned by the handler, after which it ends.
    #[must_use]
    pub fn with_bad_records(self, handler: &'a mut dyn BadRecordHandler) -> Self {
        let Self {
            name,
            provenance,
            header,
            records,
        } = self;
        let routed = RouteBadRecords::new(records, handler, name.clone(), provenance.clone());
        Self {
            name,
            provenance,
            header,
            records: Box::new(routed),
        }
    }

    /// Drain into a vector, stopping at the first error
    ///
    /// # Errors
    /// Returns the first error in the stream
    pub fn collect_records(self) -> Result<Vec<Record>> {
        self.collect()
    }
}

impl Iterator for RecordStream<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

impl fmt::Debug for RecordStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStream")
            .field("name", &self.name)
            .field("provenance", &self.provenance)
            .field("header", &self.header.to_string())
            .finish_non_exhaustive()
    }
}

/// Something that can produce a fresh [`RecordStream`] on every call
pub trait RecordSource {
    fn name(&self) -> &str;

    fn header(&self) -> Arc<Header>;

    /// Start a new pass over the records
    ///
    /// # Errors
    /// Returns an error if the underlying data cannot be opened
    fn stream(&self) -> Result<RecordStream<'_>>;
}

/// In-memory relation
#[derive(Debug, Clone)]
pub struct Relation {
    name: String,
    header: Arc<Header>,
    records: Vec<Record>,
}

impl Relation {
    /// # Errors
    /// Returns `SchemaMismatch` if a record does not conform to `header`
    pub fn new(name: impl Into<String>, header: Arc<Header>, records: Vec<Record>) -> Result<Self> {
        for record in &records {
            if !Arc::ptr_eq(record.header(), &header) {
                header.check(record.values())?;
            }
        }
        Ok(Self {
            name: name.into(),
            header,
            records,
        })
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

impl RecordSource for Relation {
    fn name(&self) -> &str {
        &self.name
    }

    fn header(&self) -> Arc<Header> {
        self.header.clone()
    }

    fn stream(&self) -> Result<RecordStream<'_>> {
        Ok(RecordStream::new(
            self.name.clone(),
            "memory",
            self.header.clone(),
            self.records.iter().cloned().map(Ok),
        ))
    }
}
