//! Integration tests for SQL query execution
//!
//! These tests validate the complete query pipeline:
//! SQL → Parser → Executor → Records

use std::sync::Arc;

use relfeat::query::{AggregateFunction, QueryEngine, SelectColumn};
use relfeat::records::{DataType, Field, Header, Record, Value};
use relfeat::storage::TableStore;
use relfeat::Error;

/// Helper function to create test data
fn create_test_data() -> TableStore {
    let header = Arc::new(
        Header::new([
            Field::new("id", DataType::Int),
            Field::new("category", DataType::Str),
            Field::nullable("value", DataType::Float),
            Field::new("quantity", DataType::Int),
        ])
        .unwrap(),
    );
    let rows = [
        (1, "A", Some(10.0), 100),
        (2, "B", Some(20.0), 200),
        (3, "A", Some(30.0), 300),
        (4, "C", None, 400),
        (5, "B", Some(50.0), 500),
    ];
    let mut store = TableStore::in_memory();
    let table = store.create_table("table1", header.clone()).unwrap();
    for (id, category, value, quantity) in rows {
        table
            .add(
                Record::new(
                    header.clone(),
                    vec![
                        Value::Int(id),
                        Value::from(category),
                        Value::from(value),
                        Value::Int(quantity),
                    ],
                )
                .unwrap(),
            )
            .unwrap();
    }
    table.flush().unwrap();
    store
}

fn rows(store: &TableStore, sql: &str) -> Vec<Vec<Value>> {
    store
        .query(sql)
        .unwrap()
        .map(|r| r.unwrap().into_values())
        .collect()
}

#[test]
fn test_simple_select_all() {
    let store = create_test_data();
    let stream = store.query("SELECT * FROM table1").unwrap();
    assert_eq!(stream.header().len(), 4);
    assert_eq!(stream.count(), 5);
}

#[test]
fn test_select_specific_columns_with_alias() {
    let store = create_test_data();
    let stream = store.query("SELECT id, value AS price FROM table1").unwrap();
    assert_eq!(stream.header().names().collect::<Vec<_>>(), vec!["id", "price"]);
    assert_eq!(stream.header().type_of("price").unwrap(), DataType::Float);
}

#[test]
fn test_where_filter_and_logic() {
    let store = create_test_data();
    let result = rows(&store, "SELECT id FROM table1 WHERE category = 'A' OR quantity >= 500");
    assert_eq!(result, vec![vec![Value::Int(1)], vec![Value::Int(3)], vec![Value::Int(5)]]);

    let result = rows(&store, "SELECT id FROM table1 WHERE value < 40 AND NOT category = 'B'");
    assert_eq!(result, vec![vec![Value::Int(1)], vec![Value::Int(3)]]);
}

#[test]
fn test_null_never_matches_comparison() {
    let store = create_test_data();
    assert_eq!(rows(&store, "SELECT id FROM table1 WHERE value <> 10").len(), 3);
    assert_eq!(
        rows(&store, "SELECT id FROM table1 WHERE value IS NULL"),
        vec![vec![Value::Int(4)]]
    );
    assert_eq!(rows(&store, "SELECT id FROM table1 WHERE value IS NOT NULL").len(), 4);
}

#[test]
fn test_aggregations() {
    let store = create_test_data();
    let result = rows(
        &store,
        "SELECT COUNT(*), COUNT(value), SUM(value), AVG(value), MIN(quantity), MAX(quantity) \
         FROM table1",
    );
    assert_eq!(
        result,
        vec![vec![
            Value::Int(5),
            Value::Int(4),
            Value::Float(110.0),
            Value::Float(27.5),
            Value::Int(100),
            Value::Int(500),
        ]]
    );
}

#[test]
fn test_group_by_with_order() {
    let store = create_test_data();
    let result = rows(
        &store,
        "SELECT category, SUM(quantity) AS total FROM table1 GROUP BY category ORDER BY total DESC",
    );
    assert_eq!(
        result,
        vec![
            vec![Value::from("B"), Value::Int(700)],
            vec![Value::from("A"), Value::Int(400)],
            vec![Value::from("C"), Value::Int(400)],
        ]
    );
}

#[test]
fn test_order_by_and_limit() {
    let store = create_test_data();
    let result = rows(&store, "SELECT id FROM table1 ORDER BY value DESC LIMIT 2");
    assert_eq!(result, vec![vec![Value::Int(5)], vec![Value::Int(3)]]);

    // nulls sort last in both directions
    let result = rows(&store, "SELECT id FROM table1 ORDER BY value ASC");
    assert_eq!(result.last(), Some(&vec![Value::Int(4)]));
}

#[test]
fn test_parse_plan_shape() {
    let plan = QueryEngine::new()
        .parse("SELECT category, AVG(value) FROM table1 GROUP BY category LIMIT 3")
        .unwrap();
    assert_eq!(plan.table, "table1");
    assert_eq!(plan.group_by, vec!["category".to_string()]);
    assert_eq!(plan.limit, Some(3));
    assert_eq!(
        plan.columns[1],
        SelectColumn::Aggregate {
            func: AggregateFunction::Avg,
            column: Some("value".to_string()),
            alias: None,
        }
    );
    assert!(plan.is_aggregate());
}

#[test]
fn test_unsupported_sql_is_rejected() {
    let engine = QueryEngine::new();
    for sql in [
        "SELECT * FROM a JOIN b ON a.id = b.id",
        "SELECT * FROM a; SELECT * FROM b",
        "SELECT * FROM (SELECT * FROM a)",
        "SELECT * FROM a WHERE id IN (SELECT id FROM b)",
        "DELETE FROM a",
    ] {
        assert!(
            matches!(engine.parse(sql), Err(Error::ParseError(_))),
            "accepted: {sql}"
        );
    }
}

#[test]
fn test_unknown_table_and_column() {
    let store = create_test_data();
    assert!(matches!(store.query("SELECT * FROM nope"), Err(Error::InvalidInput(_))));
    assert!(store.query("SELECT height FROM table1").is_err());
}
