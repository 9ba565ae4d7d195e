//! Merge/collect against a study design, end to end from records

use std::sync::Arc;

use relfeat::classify::{Classifier, Example, Observation, Treatment};
use relfeat::features::{EventIndicators, FailurePolicy, Feature, FeatureEmitter, RunContext};
use relfeat::merge::{merge_collect, DuplicatePolicy, MergeCollect, StudyDesign, SubjectGroup};
use relfeat::records::{DataType, Field, Header, Record, RecordStream, Value};
use relfeat::{Error, Result};

fn design_rows() -> (Arc<Header>, Vec<Record>) {
    let header = Arc::new(
        Header::new([
            Field::new("id", DataType::Int),
            Field::new("label", DataType::Str),
            Field::nullable("start", DataType::Int),
            Field::nullable("end", DataType::Int),
        ])
        .unwrap(),
    );
    let rows = [(1, "G", 0, 10), (2, "B", 0, 5)]
        .into_iter()
        .map(|(id, label, start, end)| {
            Record::new(
                header.clone(),
                vec![Value::Int(id), label.into(), Value::Int(start), Value::Int(end)],
            )
            .unwrap()
        })
        .collect();
    (header, rows)
}

fn event_rows(events: &[(i64, &str, i64)]) -> (Arc<Header>, Vec<Record>) {
    let header = Arc::new(
        Header::new([
            Field::new("id", DataType::Int),
            Field::new("day", DataType::Int),
            Field::new("drug", DataType::Str),
        ])
        .unwrap(),
    );
    let rows = events
        .iter()
        .map(|&(id, drug, day)| {
            Record::new(header.clone(), vec![Value::Int(id), Value::Int(day), drug.into()]).unwrap()
        })
        .collect();
    (header, rows)
}

fn design() -> StudyDesign {
    let (header, rows) = design_rows();
    let classifier = Classifier::new("design", Treatment::Examples, header.clone()).unwrap();
    let examples = classifier
        .examples(RecordStream::from_records("design", header, rows))
        .collect::<Result<Vec<Example>>>()
        .unwrap();
    StudyDesign::new(examples, DuplicatePolicy::Error).unwrap()
}

/// Records the event types each subject received, in order
struct EventTrace;

impl Feature for EventTrace {
    fn name(&self) -> &str {
        "trace"
    }

    fn compute(&self, group: &SubjectGroup<'_>, out: &mut FeatureEmitter) -> Result<()> {
        for (position, event) in group.events.iter().enumerate() {
            let time = event.time.as_f64().unwrap_or(f64::NAN);
            out.emit(format!("{}@{position}", event.event_type), time);
        }
        Ok(())
    }
}

#[test]
fn test_window_scenario() {
    let design = design();
    let (header, rows) = event_rows(&[(1, "drugA", 3), (1, "drugB", 12), (2, "drugA", 1)]);
    let classifier = Classifier::new("rx", Treatment::Events, header.clone()).unwrap();
    let observations = classifier.observations(RecordStream::from_records("rx", header, rows));

    let mut context = RunContext::new(vec![Arc::new(EventTrace)], FailurePolicy::Fatal);
    let vectors = merge_collect(&design, observations, &mut context).unwrap();

    assert_eq!(vectors.len(), 2);
    let map = context.feature_map();
    assert_eq!(map.len(), 1);
    assert_eq!(map.description(1), Some("drugA@0"));
    assert_eq!(vectors[0].subject.to_string(), "1");
    assert_eq!(vectors[0].label, Value::from("G"));
    assert_eq!(vectors[0].values, vec![(1, 3.0)]);
    assert_eq!(vectors[1].values, vec![(1, 1.0)]);
}

#[test]
fn test_unknown_subjects_never_contribute() {
    let design = design();
    let (header, rows) = event_rows(&[(9, "drugZ", 2), (1, "drugA", 3)]);
    let classifier = Classifier::new("rx", Treatment::Events, header.clone()).unwrap();
    let mut collector = MergeCollect::new(&design);
    collector
        .extend(classifier.observations(RecordStream::from_records("rx", header, rows)))
        .unwrap();
    assert_eq!(collector.stats().unknown_subject, 1);
    let groups = collector.finish();
    assert!(groups
        .iter()
        .flat_map(|g| &g.events)
        .all(|e| e.event_type != "drugZ"));
}

#[test]
fn test_vectors_follow_example_order_and_indices_are_shared() {
    let design = design();
    let (header, rows) = event_rows(&[(2, "drugB", 1), (1, "drugA", 2), (1, "drugB", 4)]);
    let classifier = Classifier::new("rx", Treatment::Events, header.clone()).unwrap();
    let observations = classifier.observations(RecordStream::from_records("rx", header, rows));
    let mut context =
        RunContext::new(vec![Arc::new(EventIndicators::default())], FailurePolicy::Skip);
    let vectors = merge_collect(&design, observations, &mut context).unwrap();

    let map = context.feature_map();
    assert_eq!(map.description(1), Some("rx-drugA"));
    assert_eq!(map.description(2), Some("rx-drugB"));
    assert_eq!(vectors[0].values, vec![(1, 1.0), (2, 1.0)]);
    assert_eq!(vectors[1].values, vec![(2, 1.0)]);
}

#[test]
fn test_duplicate_examples_fail_before_any_vector() {
    let (header, mut rows) = design_rows();
    rows.push(rows[0].clone());
    let classifier = Classifier::new("design", Treatment::Examples, header.clone()).unwrap();
    let examples: Vec<Example> = classifier
        .examples(RecordStream::from_records("design", header, rows))
        .collect::<Result<_>>()
        .unwrap();
    assert!(matches!(
        StudyDesign::new(examples.clone(), DuplicatePolicy::Error),
        Err(Error::DuplicateSubject(s)) if s == "1"
    ));
    assert_eq!(StudyDesign::new(examples, DuplicatePolicy::KeepFirst).unwrap().len(), 2);
}

#[test]
fn test_facts_join_without_window() {
    let design = design();
    let header = Arc::new(
        Header::new([
            Field::new("id", DataType::Int),
            Field::nullable("sex", DataType::Str),
            Field::nullable("height", DataType::Float),
        ])
        .unwrap(),
    );
    let rows = vec![
        Record::new(header.clone(), vec![Value::Int(2), "F".into(), Value::Float(1.6)]).unwrap(),
        Record::new(header.clone(), vec![Value::Int(1), Value::Null, Value::Float(1.8)]).unwrap(),
    ];
    let classifier = Classifier::new("demo", Treatment::Facts, header.clone()).unwrap();
    let observations: Vec<Result<Observation>> = classifier
        .observations(RecordStream::from_records("demo", header, rows))
        .collect();
    assert_eq!(observations.len(), 3);

    let mut context = RunContext::with_defaults(FailurePolicy::Skip);
    let vectors = merge_collect(&design, observations, &mut context).unwrap();
    let map = context.feature_map();
    assert_eq!(
        map.iter().collect::<Vec<_>>(),
        vec![(1, "demo-height"), (2, "demo-sex-F")]
    );
    assert_eq!(vectors[0].values, vec![(1, 1.8)]);
    assert_eq!(vectors[1].values, vec![(1, 1.6), (2, 1.0)]);
}
