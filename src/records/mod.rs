//! Typed records, headers, streams and transformations
//!
//! Everything that flows through relfeat is a [`Record`]: a fixed-arity row
//! of [`Value`]s conforming to a shared [`Header`].

pub mod bad_records;
pub mod header;
pub mod record;
pub mod stream;
pub mod transform;
pub mod value;

pub use bad_records::{
    read_rejected, BadRecordHandler, BadRecordPolicy, CollectSink, Counting, FailFast, HandlerFn,
    JsonLinesSink, LogSink, RejectedRecord,
};
pub use header::{Field, FieldRef, Header};
pub use record::Record;
pub use stream::{RecordSource, RecordStream, Relation};
pub use transform::{
    CopyField, MapField, MapRecord, RecordTransformation, RenameField, TransformStep,
};
pub use value::{DataType, Value};
