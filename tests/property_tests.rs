//! Property-based tests for relfeat
//!
//! - Records built from a header conform to it
//! - Tables return exactly what was added, in order
//! - Transformations are deterministic
//! - Merge/collect never admits out-of-window or unknown-subject events,
//!   and events come out sorted by time
//! - Run with ProptestConfig::with_cases(64)

use std::sync::Arc;

use proptest::prelude::*;
use relfeat::classify::{Event, EventKind, Example, Observation, SubjectId};
use relfeat::merge::{DuplicatePolicy, MergeCollect, StudyDesign};
use relfeat::records::{
    DataType, Field, Header, MapField, Record, RecordSource, RecordTransformation, TransformStep,
    Value,
};
use relfeat::storage::TableStore;

// ============================================================================
// Strategies
// ============================================================================

fn header() -> Arc<Header> {
    Arc::new(
        Header::new([
            Field::new("id", DataType::Int),
            Field::nullable("score", DataType::Float),
            Field::nullable("tag", DataType::Str),
            Field::nullable("flag", DataType::Bool),
        ])
        .unwrap(),
    )
}

fn arb_row() -> impl Strategy<Value = Vec<Value>> {
    (
        any::<i64>(),
        proptest::option::of(-1.0e6f64..1.0e6),
        proptest::option::of("[a-z ]{0,8}"),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(id, score, tag, flag)| {
            vec![Value::Int(id), Value::from(score), Value::from(tag), Value::from(flag)]
        })
}

fn arb_event() -> impl Strategy<Value = (i64, i64)> {
    (0i64..20, -50i64..150)
}

fn arb_example() -> impl Strategy<Value = (i64, Option<i64>, Option<i64>)> {
    (0i64..15, proptest::option::of(0i64..50), proptest::option::of(50i64..100))
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a record accepted by `Record::new` satisfies its header
    #[test]
    fn prop_record_conforms_to_header(values in arb_row()) {
        let header = header();
        let record = Record::new(header.clone(), values).unwrap();
        prop_assert!(header.isinstance(record.values()));
    }

    /// Property: table round-trip preserves values and order
    #[test]
    fn prop_table_round_trip(rows in proptest::collection::vec(arb_row(), 0..40)) {
        let header = header();
        let records: Vec<Record> = rows
            .into_iter()
            .map(|values| Record::new(header.clone(), values).unwrap())
            .collect();
        let mut store = TableStore::in_memory();
        let table = store.create_table("t", header).unwrap();
        table.add_all(records.clone()).unwrap();
        table.flush().unwrap();
        let read = table.stream().unwrap().collect_records().unwrap();
        prop_assert_eq!(read, records);
    }

    /// Property: applying a transformation twice gives the same record
    #[test]
    fn prop_transformation_deterministic(values in arb_row()) {
        let header = header();
        let t = RecordTransformation::new(
            header.clone(),
            [
                TransformStep::rename("id", "subject"),
                MapField::cast("score", DataType::Str).into(),
                MapField::cast("flag", DataType::Int).into(),
            ],
        )
        .unwrap();
        let record = Record::new(header, values).unwrap();
        prop_assert_eq!(t.apply(&record).unwrap(), t.apply(&record).unwrap());
    }

    /// Property: admitted events are in window, of known subjects, and sorted
    #[test]
    fn prop_merge_collect_invariants(
        examples in proptest::collection::vec(arb_example(), 1..10),
        events in proptest::collection::vec(arb_event(), 0..60),
    ) {
        let examples: Vec<Example> = examples
            .into_iter()
            .map(|(id, start, end)| {
                Example::new(id, "y").with_window(start.map(Value::Int), end.map(Value::Int))
            })
            .collect();
        let design = StudyDesign::new(examples, DuplicatePolicy::KeepFirst).unwrap();
        let mut collector = MergeCollect::new(&design);
        for (i, (subject, time)) in events.iter().enumerate() {
            collector.push(Observation::Event(Event {
                table: Arc::from("ev"),
                subject: SubjectId::Int(*subject),
                event_type: format!("e{i}"),
                time: Value::Int(*time),
                kind: EventKind::Existence,
            }));
        }
        let stats = collector.stats();
        prop_assert_eq!(
            stats.events + stats.unknown_subject + stats.outside_window + stats.incomparable_time,
            events.len()
        );
        for group in collector.finish() {
            prop_assert!(design.get(group.subject()).is_some());
            for event in &group.events {
                prop_assert_eq!(group.example.contains(&event.time), Some(true));
            }
            for pair in group.events.windows(2) {
                prop_assert!(pair[0].time.as_i64() <= pair[1].time.as_i64());
                if pair[0].time == pair[1].time {
                    // ties keep input order
                    let index = |e: &Event| e.event_type[1..].parse::<usize>().unwrap();
                    prop_assert!(index(&pair[0]) < index(&pair[1]));
                }
            }
        }
    }
}
