//! Error types for relfeat
//!
//! Record-level errors (schema mismatches, validation failures, malformed
//! lines) are recoverable under the bad-records policy; everything else
//! aborts the stage that raised it.

use thiserror::Error;

use crate::records::RejectedRecord;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// relfeat error types
#[derive(Error, Debug)]
pub enum Error {
    /// Record arity or a value's type does not match the expected header
    #[error("Schema mismatch at field `{field}`: {message}")]
    SchemaMismatch {
        /// Offending field name (or position when the name is unknown)
        field: String,
        /// What did not conform
        message: String,
    },

    /// Transformation output failed its declared output header
    #[error("Validation failed for field `{field}`: {message}")]
    Validation {
        /// Output field that failed
        field: String,
        /// Why it failed
        message: String,
    },

    /// Field looked up by a name the header does not declare
    #[error("Unknown field: `{0}`")]
    UnknownField(String),

    /// Field or row looked up by a position past the end
    #[error("Index {index} out of bounds (length {len})")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Number of fields or rows
        len: usize,
    },

    /// Two fields in one header share a name
    #[error("Duplicate field name: `{0}`")]
    DuplicateField(String),

    /// More than one study-design example for a subject
    #[error(
        "Duplicate subject in study design: {0}\nStudy designs must be unambiguous; \
         set `duplicate_subjects` to `keep_first` or `keep_last` to resolve silently"
    )]
    DuplicateSubject(String),

    /// Unparsable source line
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A record-level error together with where the record came from
    #[error("{}", .0)]
    Rejected(Box<RejectedRecord>),

    /// Feature construction failed for a subject
    #[error("Feature `{feature}` failed for subject {subject}: {message}")]
    Feature {
        /// Subject whose vector could not be built
        subject: String,
        /// Feature definition name
        feature: String,
        /// Underlying failure
        message: String,
    },

    /// Query parsing error
    #[error("SQL parse error: {0}")]
    ParseError(String),

    /// Storage error (Parquet/Arrow)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration is inconsistent or incomplete
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Delimited text error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON error (configuration, bad-records files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error concerns a single record and may be handed to the
    /// bad-records policy instead of aborting the stream.
    #[must_use]
    pub const fn is_record_level(&self) -> bool {
        matches!(
            self,
            Self::SchemaMismatch { .. }
                | Self::Validation { .. }
                | Self::MalformedRecord(_)
                | Self::Rejected(_)
        )
    }

    /// Shorthand for a validation failure on `field`
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a schema mismatch on `field`
    pub fn schema_mismatch(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            field: field.into(),
            message: message.into(),
        }
    }
}
