//! Table store (Arrow batches, Parquet persistence)
//!
//! Tables are append-only while they load: records are validated against
//! the table header, buffered, and sealed into Arrow `RecordBatch`es of
//! [`BATCH_ROWS`] rows. Reads go through the sealed batches and the pending
//! buffer, so a table is readable at any point of its load.
//!
//! A directory-backed store writes each table to `<name>.parquet` on
//! [`Table::flush`]; [`TableStore::open`] loads them back. Recreating a table
//! drops the old one first, so reruns start clean.

mod convert;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::ops::{Bound, RangeBounds};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::query::{QueryEngine, QueryExecutor};
use crate::records::{FieldRef, Header, Record, RecordSource, RecordStream, Value};

pub use convert::{header_for, schema_for};

/// Rows per sealed Arrow batch
pub const BATCH_ROWS: usize = 8192;

const TABLE_EXTENSION: &str = "parquet";

/// A named, typed, append-only table
pub struct Table {
    name: String,
    header: Arc<Header>,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    /// First row index of each batch
    offsets: Vec<usize>,
    sealed_rows: usize,
    pending: Vec<Record>,
    path: Option<PathBuf>,
}

impl Table {
    fn new(name: String, header: Arc<Header>, path: Option<PathBuf>) -> Self {
        let schema = schema_for(&header);
        Self {
            name,
            header,
            schema,
            batches: Vec::new(),
            offsets: Vec::new(),
            sealed_rows: 0,
            pending: Vec::new(),
            path,
        }
    }

    /// Load a table from a Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    fn load_parquet(name: String, path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?;
        let header = Arc::new(header_for(builder.schema())?);

        let reader = builder
            .build()
            .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

        let mut table = Self::new(name, header, Some(path.to_path_buf()));
        for batch in reader {
            let batch = batch
                .map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))?;
            table.append_batch(batch)?;
        }
        Ok(table)
    }

    /// Append a sealed batch
    ///
    /// # Errors
    /// Returns error if batch schema doesn't match the table
    fn append_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if batch.schema().fields() != self.schema.fields() {
            return Err(Error::StorageError(format!(
                "Schema mismatch: expected {:?}, got {:?}",
                self.schema,
                batch.schema()
            )));
        }
        if batch.num_rows() == 0 {
            return Ok(());
        }
        self.offsets.push(self.sealed_rows);
        self.sealed_rows += batch.num_rows();
        self.batches.push(batch);
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn header(&self) -> &Arc<Header> {
        &self.header
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.sealed_rows + self.pending.len()
    }

    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.header.len()
    }

    /// Storage location, if the table is file-backed
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one record
    ///
    /// # Errors
    /// Returns `SchemaMismatch` if the record does not conform to the table
    /// header
    pub fn add(&mut self, record: Record) -> Result<()> {
        let record = if Arc::ptr_eq(record.header(), &self.header) {
            record
        } else {
            self.header.check(record.values())?;
            let line = record.line();
            Record::new_unchecked(self.header.clone(), record.into_values()).with_line(line)
        };
        self.pending.push(record);
        if self.pending.len() >= BATCH_ROWS {
            self.seal()?;
        }
        Ok(())
    }

    /// Append records, stopping at the first that does not conform
    ///
    /// # Errors
    /// Same as [`Table::add`]
    pub fn add_all(&mut self, records: impl IntoIterator<Item = Record>) -> Result<usize> {
        let mut count = 0;
        for record in records {
            self.add(record)?;
            count += 1;
        }
        Ok(count)
    }

    /// Drain a stream into the table and flush
    ///
    /// # Errors
    /// Returns the first error the stream yields or any storage error
    pub fn load(&mut self, stream: RecordStream<'_>) -> Result<usize> {
        let source = stream.name().to_string();
        let mut count = 0;
        for record in stream {
            self.add(record?)?;
            count += 1;
        }
        self.flush()?;
        info!(table = %self.name, source = %source, rows = count, "Loaded table");
        Ok(count)
    }

    fn seal(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = convert::batch_from_records(&self.schema, &self.header, &self.pending)?;
        self.pending.clear();
        self.append_batch(batch)
    }

    /// Seal pending rows and, for file-backed tables, write the Parquet file
    ///
    /// # Errors
    /// Returns Arrow, Parquet or IO errors
    pub fn flush(&mut self) -> Result<()> {
        self.seal()?;
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, self.schema.clone(), None)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.close()?;
        debug!(table = %self.name, path = %path.display(), rows = self.sealed_rows, "Wrote table");
        Ok(())
    }

    fn read(&self, index: usize, columns: &[usize], header: &Arc<Header>) -> Result<Record> {
        if index >= self.n_rows() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.n_rows(),
            });
        }
        let values = if index >= self.sealed_rows {
            let record = &self.pending[index - self.sealed_rows];
            columns.iter().map(|&c| record.values()[c].clone()).collect()
        } else {
            let b = self.offsets.partition_point(|&start| start <= index) - 1;
            let batch = &self.batches[b];
            let row = index - self.offsets[b];
            columns
                .iter()
                .map(|&c| convert::value_at(batch.column(c), row, &self.header.fields()[c]))
                .collect::<Result<Vec<Value>>>()?
        };
        Ok(Record::new_unchecked(header.clone(), values))
    }

    fn all_columns(&self) -> Vec<usize> {
        (0..self.header.len()).collect()
    }

    /// One row by position
    ///
    /// # Errors
    /// Returns `IndexOutOfBounds` past the last row
    pub fn row(&self, index: usize) -> Result<Record> {
        self.read(index, &self.all_columns(), &self.header)
    }

    /// Rows in a range, lazily
    ///
    /// # Errors
    /// Returns `InvalidInput` if the range ends past the last row
    pub fn rows(&self, range: impl RangeBounds<usize>) -> Result<RecordStream<'_>> {
        let out_of_bounds = || {
            Error::InvalidInput(format!(
                "Row range {:?}..{:?} out of bounds (table `{}` has {} rows)",
                range.start_bound(),
                range.end_bound(),
                self.name,
                self.n_rows()
            ))
        };
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.checked_add(1).ok_or_else(out_of_bounds)?,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e.checked_add(1).ok_or_else(out_of_bounds)?,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => self.n_rows(),
        };
        if end > self.n_rows() || start > end {
            return Err(out_of_bounds());
        }
        Ok(self.take((start..end).collect()))
    }

    /// Rows at the given positions, in the given order
    ///
    /// Bad positions surface as errors in the stream.
    #[must_use]
    pub fn take(&self, indices: Vec<usize>) -> RecordStream<'_> {
        let columns = self.all_columns();
        let header = self.header.clone();
        RecordStream::new(
            self.name.clone(),
            self.name.clone(),
            self.header.clone(),
            indices
                .into_iter()
                .map(move |i| self.read(i, &columns, &header)),
        )
    }

    /// A single column
    ///
    /// # Errors
    /// Returns lookup errors for a bad reference
    pub fn col(&self, field: impl Into<FieldRef>) -> Result<RecordStream<'_>> {
        self.cols(&[field.into()])
    }

    /// A projection onto several columns
    ///
    /// # Errors
    /// Returns lookup errors for bad references
    pub fn cols(&self, fields: &[FieldRef]) -> Result<RecordStream<'_>> {
        let columns = fields
            .iter()
            .map(|f| self.header.resolve(f))
            .collect::<Result<Vec<_>>>()?;
        let header = Arc::new(self.header.project(fields)?);
        Ok(RecordStream::new(
            self.name.clone(),
            format!("{}[{}]", self.name, header),
            header.clone(),
            (0..self.n_rows()).map(move |i| self.read(i, &columns, &header)),
        ))
    }

    /// Rows ordered by one column
    ///
    /// The sort is stable and nulls come last in either direction. The table
    /// itself is not modified.
    ///
    /// # Errors
    /// Returns `UnknownField` for an undeclared column, or storage errors
    pub fn sort_by(&self, name: &str, reverse: bool) -> Result<RecordStream<'_>> {
        let column = self.header.index_of(name)?;
        let key_header = Arc::new(self.header.project(&[FieldRef::Index(column)])?);
        let mut keyed = (0..self.n_rows())
            .map(|i| {
                self.read(i, &[column], &key_header)
                    .map(|r| (r.into_values().swap_remove(0), i))
            })
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|(a, _), (b, _)| order_nulls_last(a, b, reverse));
        Ok(self.take(keyed.into_iter().map(|(_, i)| i).collect()))
    }

    /// Run a SQL query against this table
    ///
    /// # Errors
    /// Returns parse errors for unsupported SQL and evaluation errors
    pub fn query(&self, sql: &str) -> Result<RecordStream<'static>> {
        let plan = QueryEngine::new().parse(sql)?;
        QueryExecutor::new().execute(&plan, self)
    }
}

/// Compare for sorting with nulls last regardless of direction
pub(crate) fn order_nulls_last(a: &Value, b: &Value, reverse: bool) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if reverse => b.total_cmp(a),
        (false, false) => a.total_cmp(b),
    }
}

impl RecordSource for Table {
    fn name(&self) -> &str {
        &self.name
    }

    fn header(&self) -> Arc<Header> {
        self.header.clone()
    }

    fn stream(&self) -> Result<RecordStream<'_>> {
        Ok(self.take((0..self.n_rows()).collect()))
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("header", &self.header.to_string())
            .field("rows", &self.n_rows())
            .field("path", &self.path)
            .finish()
    }
}

/// A collection of named tables, in memory or under a directory
#[derive(Debug, Default)]
pub struct TableStore {
    root: Option<PathBuf>,
    tables: BTreeMap<String, Table>,
}

impl TableStore {
    /// Store that keeps everything in memory
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (creating if needed) a directory-backed store and load every
    /// table already persisted there
    ///
    /// # Errors
    /// Returns IO errors for the directory and storage errors for bad files
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let mut tables = BTreeMap::new();
        for entry in fs::read_dir(&root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TABLE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let table = Table::load_parquet(name.clone(), &path)?;
            debug!(table = %name, rows = table.n_rows(), "Reopened table");
            tables.insert(name, table);
        }
        Ok(Self {
            root: Some(root),
            tables,
        })
    }

    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Create an empty table, dropping any table of the same name
    ///
    /// # Errors
    /// Returns `InvalidInput` for a name that is not an identifier, or IO
    /// errors removing the old file
    pub fn create_table(&mut self, name: &str, header: Arc<Header>) -> Result<&mut Table> {
        validate_table_name(name)?;
        self.drop_table(name)?;
        let path = self
            .root
            .as_ref()
            .map(|root| root.join(format!("{name}.{TABLE_EXTENSION}")));
        let table = Table::new(name.to_string(), header, path);
        Ok(self.tables.entry(name.to_string()).or_insert(table))
    }

    /// Remove a table and its file; returns whether it existed
    ///
    /// # Errors
    /// Returns IO errors removing the file
    pub fn drop_table(&mut self, name: &str) -> Result<bool> {
        let Some(table) = self.tables.remove(name) else {
            return Ok(false);
        };
        if let Some(path) = table.path() {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(true)
    }

    /// # Errors
    /// Returns `InvalidInput` if no table has this name
    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::InvalidInput(format!("Table not found: {name}")))
    }

    /// # Errors
    /// Returns `InvalidInput` if no table has this name
    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::InvalidInput(format!("Table not found: {name}")))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Run a SQL query against the table named in its `FROM` clause
    ///
    /// # Errors
    /// Returns parse errors, unknown-table errors, and evaluation errors
    pub fn query(&self, sql: &str) -> Result<RecordStream<'static>> {
        let plan = QueryEngine::new().parse(sql)?;
        let table = self.table(&plan.table)?;
        QueryExecutor::new().execute(&plan, table)
    }
}

fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "Table name `{name}` must start with a letter or underscore \
             and contain only letters, digits and underscores"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DataType, Field};

    fn header() -> Arc<Header> {
        Arc::new(
            Header::new([
                Field::new("id", DataType::Int),
                Field::nullable("score", DataType::Float),
            ])
            .unwrap(),
        )
    }

    fn record(h: &Arc<Header>, id: i64, score: Option<f64>) -> Record {
        Record::new(h.clone(), vec![Value::Int(id), score.into()]).unwrap()
    }

    #[test]
    fn test_add_validates() {
        let mut store = TableStore::in_memory();
        let h = header();
        let table = store.create_table("t", h.clone()).unwrap();
        table.add(record(&h, 1, Some(0.5))).unwrap();
        let wrong = Record::from_pairs([("id", "x"), ("score", "y")]).unwrap();
        assert!(matches!(table.add(wrong), Err(Error::SchemaMismatch { .. })));
        assert_eq!(table.n_rows(), 1);
    }

    #[test]
    #[allow(clippy::cast_possible_wrap)]
    fn test_reads_span_batches_and_pending() {
        let mut store = TableStore::in_memory();
        let h = header();
        let table = store.create_table("t", h.clone()).unwrap();
        let n = BATCH_ROWS + 10;
        table
            .add_all((0..n).map(|i| record(&h, i as i64, None)))
            .unwrap();
        assert_eq!(table.batches.len(), 1);
        assert_eq!(table.pending.len(), 10);
        assert_eq!(table.row(BATCH_ROWS - 1).unwrap().values()[0], Value::Int(8191));
        assert_eq!(table.row(BATCH_ROWS + 3).unwrap().values()[0], Value::Int(8195));
        assert!(matches!(
            table.row(n),
            Err(Error::IndexOutOfBounds { index, len }) if index == n && len == n
        ));
    }

    #[test]
    fn test_rows_bounds_at_usize_max() {
        let mut store = TableStore::in_memory();
        let h = header();
        let table = store.create_table("t", h.clone()).unwrap();
        table.add_all((0..3).map(|i| record(&h, i, None))).unwrap();
        assert!(matches!(table.rows(0..=usize::MAX), Err(Error::InvalidInput(_))));
        assert!(matches!(
            table.rows((Bound::Excluded(usize::MAX), Bound::Unbounded)),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(table.rows(1..=2).unwrap().count(), 2);
        assert_eq!(table.rows((Bound::Excluded(0), Bound::Unbounded)).unwrap().count(), 2);
    }

    #[test]
    fn test_sort_by_nulls_last_both_directions() {
        let mut store = TableStore::in_memory();
        let h = header();
        let table = store.create_table("t", h.clone()).unwrap();
        table
            .add_all([
                record(&h, 1, Some(2.0)),
                record(&h, 2, None),
                record(&h, 3, Some(1.0)),
                record(&h, 4, Some(2.0)),
            ])
            .unwrap();
        let ids = |reverse| -> Vec<Value> {
            table
                .sort_by("score", reverse)
                .unwrap()
                .map(|r| r.unwrap().values()[0].clone())
                .collect()
        };
        assert_eq!(ids(false), vec![Value::Int(3), Value::Int(1), Value::Int(4), Value::Int(2)]);
        assert_eq!(ids(true), vec![Value::Int(1), Value::Int(4), Value::Int(3), Value::Int(2)]);
    }

    #[test]
    fn test_table_names_validated() {
        let mut store = TableStore::in_memory();
        assert!(store.create_table("1abc", header()).is_err());
        assert!(store.create_table("lab results", header()).is_err());
        assert!(store.create_table("lab_results", header()).is_ok());
    }
}
