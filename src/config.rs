//! Pipeline configuration
//!
//! A run is described by one JSON document:
//!
//! ```json
//! {
//!   "tables": [
//!     { "name": "design", "file": "design.csv", "treat_as": "examples",
//!       "columns": [ { "name": "id", "type": "int", "nullable": false },
//!                    { "name": "label" } ] },
//!     { "name": "rx", "file": "rx.tsv", "format": { "delimiter": "\t" },
//!       "columns": [ { "name": "id", "type": "int" }, { "name": "drug" },
//!                    { "name": "day", "type": "int" } ],
//!       "use": ["id", "day", 2], "treat_as": "events" }
//!   ],
//!   "positive_labels": ["G"],
//!   "output": { "vectors": "vectors.csv", "vector_format": "dense" }
//! }
//! ```
//!
//! File paths are resolved against the directory holding the configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classify::Treatment;
use crate::delimited::{Format, MissingValues, DEFAULT_MISSING_VALUES};
use crate::error::{Error, Result};
use crate::features::FailurePolicy;
use crate::merge::DuplicatePolicy;
use crate::output::{LabelEncoding, VectorFormat};
use crate::records::{BadRecordPolicy, DataType, FieldRef};

/// A declared column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: DataType,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

const fn default_true() -> bool {
    true
}

/// Column reference in a `use` list: 1-based position or name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Position(usize),
    Name(String),
}

impl ColumnRef {
    /// Zero-based field reference
    ///
    /// # Errors
    /// Returns `Config` for position 0
    pub fn to_field_ref(&self) -> Result<FieldRef> {
        match self {
            Self::Position(0) => Err(Error::Config(
                "Column positions in `use` start at 1".to_string(),
            )),
            Self::Position(p) => Ok(FieldRef::Index(p - 1)),
            Self::Name(name) => Ok(FieldRef::Name(name.clone())),
        }
    }
}

/// One source table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub name: String,
    pub file: PathBuf,
    #[serde(default)]
    pub format: Format,
    /// Column names and types; names come from the header line when absent
    #[serde(default)]
    pub columns: Option<Vec<ColumnConfig>>,
    /// Columns to keep, in canonical order for the treatment
    #[serde(rename = "use", default)]
    pub use_columns: Option<Vec<ColumnRef>>,
    #[serde(default)]
    pub treat_as: Treatment,
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory for persisted tables; in-memory when absent
    pub store: Option<PathBuf>,
    pub vectors: PathBuf,
    pub feature_map: PathBuf,
    /// JSON-lines file for collected bad records
    pub bad_records: PathBuf,
    pub vector_format: VectorFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            store: None,
            vectors: PathBuf::from("vectors.csv"),
            feature_map: PathBuf::from("features.psv"),
            bad_records: PathBuf::from("bad_records.jsonl"),
            vector_format: VectorFormat::default(),
        }
    }
}

/// Everything a pipeline run needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub tables: Vec<TableConfig>,
    #[serde(default = "default_missing_values")]
    pub missing_values: Vec<String>,
    #[serde(default)]
    pub bad_records: BadRecordPolicy,
    #[serde(default)]
    pub duplicate_subjects: DuplicatePolicy,
    #[serde(default)]
    pub feature_failures: FailurePolicy,
    #[serde(default)]
    pub positive_labels: Vec<String>,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_missing_values() -> Vec<String> {
    DEFAULT_MISSING_VALUES.iter().map(ToString::to_string).collect()
}

impl PipelineConfig {
    /// Parse and validate a configuration document
    ///
    /// # Errors
    /// Returns `Json` for malformed documents and `Config` for invalid ones
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file
    ///
    /// # Errors
    /// Same as [`PipelineConfig::from_json_str`], plus IO errors
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// Returns `Config` when there is not exactly one examples table, no
    /// facts or events table, a repeated table name, a bad delimited format,
    /// or a `use` entry naming an undeclared column
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for table in &self.tables {
            if !names.insert(table.name.as_str()) {
                return Err(Error::Config(format!("Table `{}` is declared twice", table.name)));
            }
            table.format.validate()?;
            table.check_use()?;
        }
        match self.examples_tables().count() {
            1 => {}
            0 => return Err(Error::Config("No table is treated as examples".to_string())),
            n => {
                return Err(Error::Config(format!(
                    "{n} tables are treated as examples; expected one"
                )))
            }
        }
        if self.tables.iter().all(|t| t.treat_as == Treatment::Examples) {
            return Err(Error::Config("No table is treated as facts or events".to_string()));
        }
        Ok(())
    }

    /// Tables treated as examples
    pub fn examples_tables(&self) -> impl Iterator<Item = &TableConfig> {
        self.tables.iter().filter(|t| t.treat_as == Treatment::Examples)
    }

    #[must_use]
    pub fn missing(&self) -> MissingValues {
        MissingValues::new(&self.missing_values)
    }

    #[must_use]
    pub fn label_encoding(&self) -> LabelEncoding {
        LabelEncoding::new(self.positive_labels.iter().cloned())
    }
}

impl TableConfig {
    /// Declared column names, if any
    #[must_use]
    pub fn column_names(&self) -> Option<Vec<String>> {
        self.columns
            .as_ref()
            .map(|cols| cols.iter().map(|c| c.name.clone()).collect())
    }

    fn check_use(&self) -> Result<()> {
        let Some(refs) = &self.use_columns else {
            return Ok(());
        };
        if refs.is_empty() {
            return Err(Error::Config(format!("Table `{}` has an empty `use` list", self.name)));
        }
        for column in refs {
            let field = column.to_field_ref()?;
            let Some(columns) = &self.columns else { continue };
            let known = match &field {
                FieldRef::Index(i) => *i < columns.len(),
                FieldRef::Name(n) => columns.iter().any(|c| &c.name == n),
            };
            if !known {
                return Err(Error::Config(format!(
                    "Table `{}` uses unknown column {column:?}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
