//! Tests for error types

use relfeat::records::RejectedRecord;
use relfeat::Error;

#[test]
fn test_schema_mismatch_error() {
    let error = Error::schema_mismatch("age", "expected float, got str");
    let error_str = format!("{error}");
    assert!(error_str.contains("Schema mismatch"));
    assert!(error_str.contains("`age`"));
    assert!(error.is_record_level());
}

#[test]
fn test_validation_error() {
    let error = Error::validation("age_at_event", "cannot parse \"x\" as float");
    let error_str = format!("{error}");
    assert!(error_str.contains("Validation failed"));
    assert!(error_str.contains("age_at_event"));
    assert!(error.is_record_level());
}

#[test]
fn test_unknown_field_error() {
    let error = Error::UnknownField("weight".to_string());
    assert!(format!("{error}").contains("Unknown field: `weight`"));
    assert!(!error.is_record_level());
}

#[test]
fn test_index_out_of_bounds_error() {
    let error = Error::IndexOutOfBounds { index: 5, len: 3 };
    let error_str = format!("{error}");
    assert!(error_str.contains("index 5"));
    assert!(error_str.contains("3 fields"));
}

#[test]
fn test_duplicate_subject_error() {
    let error = Error::DuplicateSubject("17".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Duplicate subject"));
    assert!(error_str.contains("17"));
    assert!(error_str.contains("keep_first"));
}

#[test]
fn test_rejected_error_shows_location() {
    let rejected = RejectedRecord::new(
        "patients",
        "data/patients.csv",
        Some(12),
        vec!["id".into(), "age".into()],
        vec!["4".into()],
        &Error::MalformedRecord("expected 2 fields, found 1".into()),
    );
    let error = Error::Rejected(Box::new(rejected));
    let error_str = format!("{error}");
    assert!(error_str.contains("data/patients.csv:12"));
    assert!(error_str.contains("expected 2 fields"));
    assert!(error.is_record_level());
}

#[test]
fn test_feature_error() {
    let error = Error::Feature {
        subject: "3".to_string(),
        feature: "labs_mean".to_string(),
        message: "no values".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("labs_mean"));
    assert!(error_str.contains("subject 3"));
    assert!(!error.is_record_level());
}

#[test]
fn test_parse_error() {
    let error = Error::ParseError("invalid SQL".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("SQL parse error"));
    assert!(error_str.contains("invalid SQL"));
}

#[test]
fn test_storage_error() {
    let error = Error::StorageError("file not found".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_config_error() {
    let error = Error::Config("No table is treated as examples".to_string());
    assert!(format!("{error}").starts_with("Configuration error"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let error: Error = io_error.into();
    assert!(matches!(error, Error::Io(_)));
    assert!(format!("{error}").contains("IO error"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(matches!(error, Error::Json(_)));
}
