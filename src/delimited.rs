//! Delimited text files as record sources
//!
//! Every line becomes a record of nullable `str` fields. Typing happens
//! later, through a [`RecordTransformation`](crate::records::RecordTransformation).

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::records::{Header, Record, RecordSource, RecordStream, RejectedRecord, Value};

/// Spellings treated as missing unless configured otherwise
pub const DEFAULT_MISSING_VALUES: [&str; 6] = ["", "?", "na", "nil", "none", "null"];

/// Layout of a delimited file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Format {
    /// Field separator
    pub delimiter: char,
    /// Quote character, `None` to disable quoting
    pub quote: Option<char>,
    /// Escape character inside quotes
    pub escape: Option<char>,
    /// Whether a doubled quote inside quotes is a literal quote
    pub double_quote: bool,
    /// Lines starting with this character are skipped
    pub comment: Option<char>,
    /// Whether the first line holds column names
    pub header: bool,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: Some('"'),
            escape: None,
            double_quote: true,
            comment: None,
            header: true,
        }
    }
}

impl Format {
    /// Comma-separated with a header line
    #[must_use]
    pub fn csv() -> Self {
        Self::default()
    }

    /// Tab-separated with a header line
    #[must_use]
    pub fn tsv() -> Self {
        Self {
            delimiter: '\t',
            ..Self::default()
        }
    }

    /// Pipe-separated, unquoted
    #[must_use]
    pub fn psv() -> Self {
        Self {
            delimiter: '|',
            quote: None,
            ..Self::default()
        }
    }

    /// Check that every special character is a single byte and that they
    /// do not collide
    ///
    /// # Errors
    /// Returns `Config` describing the problem
    pub fn validate(&self) -> Result<()> {
        let delimiter = ascii(self.delimiter, "delimiter")?;
        let specials = [
            (self.quote, "quote"),
            (self.escape, "escape"),
            (self.comment, "comment"),
        ];
        for (c, what) in specials {
            if let Some(c) = c {
                if ascii(c, what)? == delimiter {
                    return Err(Error::Config(format!(
                        "{what} character {c:?} is also the delimiter"
                    )));
                }
            }
        }
        Ok(())
    }

    fn reader_builder(&self) -> Result<csv::ReaderBuilder> {
        self.validate()?;
        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(ascii(self.delimiter, "delimiter")?)
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .double_quote(self.double_quote)
            .escape(self.escape.map(|c| ascii(c, "escape")).transpose()?)
            .comment(self.comment.map(|c| ascii(c, "comment")).transpose()?);
        match self.quote {
            Some(q) => {
                builder.quote(ascii(q, "quote")?).quoting(true);
            }
            None => {
                builder.quoting(false);
            }
        }
        Ok(builder)
    }
}

fn ascii(c: char, what: &str) -> Result<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| Error::Config(format!("{what} character {c:?} must be ASCII")))
}

/// Case-insensitive set of missing-value spellings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingValues(HashSet<String>);

impl MissingValues {
    pub fn new<S: AsRef<str>>(spellings: impl IntoIterator<Item = S>) -> Self {
        Self(
            spellings
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect(),
        )
    }

    /// Whether `text` spells a missing value
    #[must_use]
    pub fn is_missing(&self, text: &str) -> bool {
        self.0.contains(&text.trim().to_lowercase())
    }
}

impl Default for MissingValues {
    fn default() -> Self {
        Self::new(DEFAULT_MISSING_VALUES)
    }
}

/// A delimited file read as nullable text records
#[derive(Debug, Clone)]
pub struct DelimitedFile {
    path: PathBuf,
    name: String,
    format: Format,
    header: Arc<Header>,
    missing: MissingValues,
}

impl DelimitedFile {
    /// Open `path` as the source for table `name`
    ///
    /// Column names come from `columns` when given, otherwise from the
    /// file's header line.
    ///
    /// # Errors
    /// Returns `Config` when no names are available, IO/CSV errors if the
    /// header line cannot be read, and header errors for duplicate names
    pub fn open(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        format: Format,
        columns: Option<Vec<String>>,
        missing: MissingValues,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let header = match columns {
            Some(columns) => Header::strings(columns)?,
            None if format.header => {
                let mut reader = format.reader_builder()?.from_path(&path)?;
                let mut first = csv::StringRecord::new();
                if !reader.read_record(&mut first)? {
                    return Err(Error::Config(format!(
                        "{} is empty; cannot take column names from its header line",
                        path.display()
                    )));
                }
                Header::strings(first.iter().map(str::to_string))?
            }
            None => {
                return Err(Error::Config(format!(
                    "{} has no header line and no column names were given",
                    path.display()
                )))
            }
        };
        Ok(Self {
            path,
            name: name.into(),
            format,
            header: Arc::new(header),
            missing,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn format(&self) -> &Format {
        &self.format
    }
}

impl RecordSource for DelimitedFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn header(&self) -> Arc<Header> {
        self.header.clone()
    }

    fn stream(&self) -> Result<RecordStream<'_>> {
        let file = File::open(&self.path)?;
        let reader = self.format.reader_builder()?.from_reader(file);
        let provenance = self.path.display().to_string();
        let skip_header = self.format.header;
        let mut rows = reader.into_records();
        if skip_header {
            if let Some(first) = rows.next() {
                first?;
            }
        }
        let records = rows.map(move |row| self.to_record(row, &provenance));
        Ok(RecordStream::new(
            self.name.clone(),
            self.path.display().to_string(),
            self.header.clone(),
            records,
        ))
    }
}

impl DelimitedFile {
    fn to_record(
        &self,
        row: std::result::Result<csv::StringRecord, csv::Error>,
        provenance: &str,
    ) -> Result<Record> {
        let row = match row {
            Ok(row) => row,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => {
                let line = e.position().map(csv::Position::line);
                let error = Error::MalformedRecord(e.to_string());
                return Err(self.reject(provenance, line, Vec::new(), &error));
            }
            Err(e) => return Err(e.into()),
        };
        let line = row.position().map(csv::Position::line);
        if row.len() != self.header.len() {
            let message = format!(
                "expected {} fields, found {}",
                self.header.len(),
                row.len()
            );
            return Err(self.reject(
                provenance,
                line,
                row.iter().map(str::to_string).collect(),
                &Error::MalformedRecord(message),
            ));
        }
        let values = row
            .iter()
            .map(|text| {
                if self.missing.is_missing(text) {
                    Value::Null
                } else {
                    Value::Str(text.to_string())
                }
            })
            .collect();
        Ok(Record::new_unchecked(self.header.clone(), values).with_line(line))
    }

    fn reject(
        &self,
        provenance: &str,
        line: Option<u64>,
        values: Vec<String>,
        error: &Error,
    ) -> Error {
        Error::Rejected(Box::new(RejectedRecord::new(
            self.name.clone(),
            provenance,
            line,
            self.header.names().map(String::from).collect(),
            values,
            error,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_header_line_and_missing_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "p.csv", "id,age,sex\n1,30,F\n2,NA,\"M\"\n\n3,?,F\n");
        let file =
            DelimitedFile::open(&path, "p", Format::csv(), None, MissingValues::default()).unwrap();
        assert_eq!(file.header().to_string(), "(id:str?, age:str?, sex:str?)");
        let records = file.stream().unwrap().collect_records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].values()[1], Value::Null);
        assert_eq!(records[1].values()[2], Value::from("M"));
        assert_eq!(records[0].line(), Some(2));
        assert_eq!(records[2].line(), Some(5));
    }

    #[test]
    fn test_wrong_field_count_is_rejected_with_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "p.psv", "1|30\n2\n3|41\n");
        let mut format = Format::psv();
        format.header = false;
        let file = DelimitedFile::open(
            &path,
            "p",
            format,
            Some(vec!["id".into(), "age".into()]),
            MissingValues::default(),
        )
        .unwrap();
        let items: Vec<_> = file.stream().unwrap().collect();
        assert_eq!(items.len(), 3);
        match &items[1] {
            Err(Error::Rejected(r)) => {
                assert_eq!(r.line, Some(2));
                assert_eq!(r.values, vec!["2".to_string()]);
                assert!(r.error.contains("expected 2 fields"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_comments_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "q.csv", "# note\na,b\n\"x,y\",\"say \"\"hi\"\"\"\n");
        let format = Format {
            comment: Some('#'),
            ..Format::csv()
        };
        let file = DelimitedFile::open(&path, "q", format, None, MissingValues::default()).unwrap();
        let records = file.stream().unwrap().collect_records().unwrap();
        assert_eq!(records[0].values(), &[Value::from("x,y"), Value::from("say \"hi\"")]);
    }

    #[test]
    fn test_format_validation() {
        let bad = Format {
            quote: Some(','),
            ..Format::csv()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
        let wide = Format {
            delimiter: '§',
            ..Format::csv()
        };
        assert!(wide.validate().is_err());
    }
}
