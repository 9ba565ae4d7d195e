//! Bad-records policies and sinks
//!
//! A record that fails validation, typing, or parsing is not dropped
//! silently: it becomes a [`RejectedRecord`] carrying where it came from and
//! why it failed, and is handed to a [`BadRecordHandler`]. The handler
//! decides whether the stream continues.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// A record-level failure with its provenance and raw values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Stream or table the record belonged to
    pub source: String,
    /// File path or derivation of the stream
    pub provenance: String,
    /// Source line, when known
    pub line: Option<u64>,
    /// Header field names, when known
    pub fields: Vec<String>,
    /// Raw values as text
    pub values: Vec<String>,
    /// The triggering error
    pub error: String,
}

impl RejectedRecord {
    /// Wrap a record-level error
    pub fn new(
        source: impl Into<String>,
        provenance: impl Into<String>,
        line: Option<u64>,
        fields: Vec<String>,
        values: Vec<String>,
        error: &Error,
    ) -> Self {
        Self {
            source: source.into(),
            provenance: provenance.into(),
            line,
            fields,
            values,
            error: error.to_string(),
        }
    }

    /// `origin:line` or just the origin when the line is unknown
    #[must_use]
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{line}", self.provenance),
            None => self.provenance.clone(),
        }
    }
}

impl fmt::Display for RejectedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rejected record from `{}` at {}: {}",
            self.source,
            self.location(),
            self.error
        )
    }
}

/// What to do with rejected records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadRecordPolicy {
    /// Keep them for later inspection and continue
    #[default]
    Collect,
    /// Log a warning and continue
    Log,
    /// Abort on the first one
    Error,
}

/// Receiver of rejected records
pub trait BadRecordHandler {
    /// Accept a rejected record
    ///
    /// # Errors
    /// Returning an error terminates the stream that produced the record
    fn handle(&mut self, rejected: RejectedRecord) -> Result<()>;
}

/// Collects rejected records in memory
#[derive(Debug, Default)]
pub struct CollectSink {
    records: Vec<RejectedRecord>,
}

impl CollectSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> &[RejectedRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<RejectedRecord> {
        self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl BadRecordHandler for CollectSink {
    fn handle(&mut self, rejected: RejectedRecord) -> Result<()> {
        self.records.push(rejected);
        Ok(())
    }
}

/// Logs each rejected record at `warn` and continues
#[derive(Debug, Default)]
pub struct LogSink {
    count: usize,
}

impl LogSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }
}

impl BadRecordHandler for LogSink {
    fn handle(&mut self, rejected: RejectedRecord) -> Result<()> {
        self.count += 1;
        warn!(
            source = %rejected.source,
            location = %rejected.location(),
            error = %rejected.error,
            "Skipping bad record"
        );
        Ok(())
    }
}

/// Turns the first rejected record into a fatal error
#[derive(Debug, Default, Clone, Copy)]
pub struct FailFast;

impl BadRecordHandler for FailFast {
    fn handle(&mut self, rejected: RejectedRecord) -> Result<()> {
        Err(Error::Rejected(Box::new(rejected)))
    }
}

/// Appends rejected records to a file, one JSON object per line
///
/// The file can be read back with [`read_rejected`].
#[derive(Debug)]
pub struct JsonLinesSink {
    writer: BufWriter<File>,
    count: usize,
}

impl JsonLinesSink {
    /// Create (truncate) the file at `path`
    ///
    /// # Errors
    /// Returns an IO error if the file cannot be created
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            count: 0,
        })
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// # Errors
    /// Returns an IO error if buffered lines cannot be written
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl BadRecordHandler for JsonLinesSink {
    fn handle(&mut self, rejected: RejectedRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &rejected)?;
        self.writer.write_all(b"\n")?;
        self.count += 1;
        Ok(())
    }
}

/// Adapts a closure into a handler
pub struct HandlerFn<F>(pub F);

impl<F> BadRecordHandler for HandlerFn<F>
where
    F: FnMut(RejectedRecord) -> Result<()>,
{
    fn handle(&mut self, rejected: RejectedRecord) -> Result<()> {
        (self.0)(rejected)
    }
}

/// Counts what passes through to another handler
pub struct Counting<'h> {
    inner: &'h mut dyn BadRecordHandler,
    count: usize,
}

impl<'h> Counting<'h> {
    pub fn new(inner: &'h mut dyn BadRecordHandler) -> Self {
        Self { inner, count: 0 }
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }
}

impl BadRecordHandler for Counting<'_> {
    fn handle(&mut self, rejected: RejectedRecord) -> Result<()> {
        self.count += 1;
        self.inner.handle(rejected)
    }
}

/// Read a JSON-lines bad-records file
///
/// # Errors
/// Returns IO or JSON errors
pub fn read_rejected(path: impl AsRef<Path>) -> Result<Vec<RejectedRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Iterator adapter routing rejected items to a handler
///
/// `Error::Rejected` items and bare record-level errors go to the handler;
/// other errors pass through. Once an error is yielded the adapter is
/// exhausted.
pub struct RouteBadRecords<'h, I> {
    inner: I,
    handler: &'h mut dyn BadRecordHandler,
    source: String,
    provenance: String,
    done: bool,
}

impl<'h, I> RouteBadRecords<'h, I> {
    pub fn new(
        inner: I,
        handler: &'h mut dyn BadRecordHandler,
        source: impl Into<String>,
        provenance: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            handler,
            source: source.into(),
            provenance: provenance.into(),
            done: false,
        }
    }
}

impl<T, I> Iterator for RouteBadRecords<'_, I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let rejected = match self.inner.next()? {
                Ok(item) => return Some(Ok(item)),
                Err(Error::Rejected(rejected)) => *rejected,
                Err(e) if e.is_record_level() => RejectedRecord::new(
                    self.source.clone(),
                    self.provenance.clone(),
                    None,
                    Vec::new(),
                    Vec::new(),
                    &e,
                ),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if let Err(e) = self.handler.handle(rejected) {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(line: u64) -> RejectedRecord {
        RejectedRecord::new(
            "patients",
            "patients.csv",
            Some(line),
            vec!["id".into(), "age".into()],
            vec!["1".into()],
            &Error::MalformedRecord("expected 2 fields, found 1".into()),
        )
    }

    #[test]
    fn test_display_names_location() {
        let text = rejected(3).to_string();
        assert!(text.contains("patients.csv:3"));
        assert!(text.contains("expected 2 fields"));
    }

    #[test]
    fn test_route_collects_and_continues() {
        let items: Vec<Result<i32>> = vec![
            Ok(1),
            Err(Error::Rejected(Box::new(rejected(2)))),
            Err(Error::validation("age", "bad")),
            Ok(4),
        ];
        let mut sink = CollectSink::new();
        let out: Vec<i32> = RouteBadRecords::new(items.into_iter(), &mut sink, "t", "mem")
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out, vec![1, 4]);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records()[0].line, Some(2));
    }

    #[test]
    fn test_route_fail_fast_stops() {
        let items: Vec<Result<i32>> = vec![
            Ok(1),
            Err(Error::Rejected(Box::new(rejected(2)))),
            Ok(3),
        ];
        let mut handler = FailFast;
        let mut it = RouteBadRecords::new(items.into_iter(), &mut handler, "t", "mem");
        assert!(matches!(it.next(), Some(Ok(1))));
        assert!(matches!(it.next(), Some(Err(Error::Rejected(_)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn test_non_record_errors_pass_through() {
        let items: Vec<Result<i32>> = vec![Err(Error::Other("disk".into()))];
        let mut sink = CollectSink::new();
        let mut it = RouteBadRecords::new(items.into_iter(), &mut sink, "t", "mem");
        assert!(matches!(it.next(), Some(Err(Error::Other(_)))));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_json_lines_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        let mut sink = JsonLinesSink::create(&path).unwrap();
        sink.handle(rejected(2)).unwrap();
        sink.handle(rejected(9)).unwrap();
        sink.flush().unwrap();
        let back = read_rejected(&path).unwrap();
        assert_eq!(back, vec![rejected(2), rejected(9)]);
    }

    #[test]
    fn test_handler_fn() {
        let mut seen = 0;
        let mut handler = HandlerFn(|_r: RejectedRecord| -> Result<()> {
            seen += 1;
            Ok(())
        });
        handler.handle(rejected(1)).unwrap();
        drop(handler);
        assert_eq!(seen, 1);
    }
}
