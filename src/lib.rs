//! # relfeat: relational files to feature vectors
//!
//! relfeat loads delimited relational files into typed, persistent tables,
//! classifies their rows as facts, events or study-design examples, joins
//! the observations against the study design, and emits one feature vector
//! per labelled subject.
//!
//! ## Data flow
//!
//! ```text
//! delimited file -> RecordStream -> RecordTransformation (typing)
//!   -> Table (Arrow batches, Parquet on disk)
//!   -> Classifier (facts / events / examples)
//!   -> merge/collect against the study design
//!   -> RunContext (feature map + vectors) -> output files
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use relfeat::classify::{Classifier, Example, Treatment};
//! use relfeat::features::{FailurePolicy, RunContext};
//! use relfeat::merge::{merge_collect, DuplicatePolicy, StudyDesign};
//! use relfeat::records::{DataType, Field, Header, Record, RecordStream, Value};
//!
//! let design = StudyDesign::new(
//!     [Example::new(1, "G").with_window(Some(Value::Int(0)), Some(Value::Int(10)))],
//!     DuplicatePolicy::Error,
//! )?;
//!
//! let header = Arc::new(Header::new([
//!     Field::new("id", DataType::Int),
//!     Field::new("day", DataType::Int),
//!     Field::new("drug", DataType::Str),
//! ])?);
//! let rows = vec![
//!     Record::new(header.clone(), vec![Value::Int(1), Value::Int(3), "drugA".into()])?,
//!     Record::new(header.clone(), vec![Value::Int(1), Value::Int(12), "drugB".into()])?,
//! ];
//! let classifier = Classifier::new("rx", Treatment::Events, header.clone())?;
//! let observations = classifier.observations(RecordStream::from_records("rx", header, rows));
//!
//! let mut context = RunContext::with_defaults(FailurePolicy::Skip);
//! let vectors = merge_collect(&design, observations, &mut context)?;
//! assert_eq!(vectors[0].values, vec![(1, 1.0)]);
//! assert_eq!(context.feature_map().description(1), Some("rx-drugA"));
//! # Ok::<(), relfeat::Error>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod classify;
pub mod config;
pub mod delimited;
pub mod error;
pub mod features;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod query;
pub mod records;
pub mod storage;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, RunOutput};

/// Install a `tracing` subscriber writing to stderr
///
/// `RUST_LOG` takes precedence over `default_filter` (e.g. `"relfeat=info"`).
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
