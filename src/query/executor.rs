//! Query execution engine
//!
//! Evaluates a [`QueryPlan`] row by row against a [`Table`]: filter,
//! then group and aggregate (or project), then order, then limit.
//! SQL three-valued logic applies: a predicate keeps a row only when it
//! evaluates to `true`, so comparisons with null drop the row.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator};

use super::{AggregateFunction, OrderDirection, QueryPlan, SelectColumn};
use crate::error::{Error, Result};
use crate::records::{DataType, Field, Header, Record, RecordSource, RecordStream, Value};
use crate::storage::{order_nulls_last, Table};

/// Query executor for parsed SQL queries
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryExecutor;

impl QueryExecutor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Execute a query plan against a table
    ///
    /// # Errors
    /// Returns error if:
    /// - The plan names a different table
    /// - A column is not declared by the table
    /// - A predicate or aggregate is applied to values of the wrong type
    ///
    /// # Example
    /// ```rust
    /// use std::sync::Arc;
    /// use relfeat::query::{QueryEngine, QueryExecutor};
    /// use relfeat::records::{DataType, Field, Header, Record, Value};
    /// use relfeat::storage::TableStore;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let header = Arc::new(Header::new([
    ///     Field::new("kind", DataType::Str),
    ///     Field::new("value", DataType::Int),
    /// ])?);
    /// let mut store = TableStore::in_memory();
    /// let table = store.create_table("events", header.clone())?;
    /// table.add(Record::new(header.clone(), vec![Value::from("a"), Value::Int(2)])?)?;
    /// table.add(Record::new(header, vec![Value::from("a"), Value::Int(3)])?)?;
    ///
    /// let plan = QueryEngine::new().parse("SELECT kind, SUM(value) FROM events GROUP BY kind")?;
    /// let rows = QueryExecutor::new().execute(&plan, store.table("events")?)?.collect_records()?;
    /// assert_eq!(rows[0].values(), &[Value::from("a"), Value::Int(5)]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn execute(&self, plan: &QueryPlan, table: &Table) -> Result<RecordStream<'static>> {
        if !plan.table.is_empty() && plan.table != table.name() {
            return Err(Error::InvalidInput(format!(
                "Query is for table `{}`, not `{}`",
                plan.table,
                table.name()
            )));
        }

        let mut rows = Vec::new();
        for record in table.stream()? {
            let record = record?;
            let keep = match &plan.filter {
                Some(filter) => matches!(eval(filter, &record)?, Value::Bool(true)),
                None => true,
            };
            if keep {
                rows.push(record);
            }
        }

        let (header, mut rows) = if plan.is_aggregate() {
            let (header, mut rows) = Self::aggregate(plan, table.header(), &rows)?;
            let keys = plan
                .order_by
                .iter()
                .map(|(name, dir)| {
                    header
                        .index_of(name)
                        .map(|i| (i, *dir == OrderDirection::Desc))
                })
                .collect::<Result<Vec<_>>>()?;
            rows.sort_by(|a, b| compare_keys(&keys, a, b));
            (header, rows)
        } else {
            Self::project(plan, table.header(), rows)?
        };

        if let Some(limit) = plan.limit {
            rows.truncate(limit);
        }

        let records = rows
            .into_iter()
            .map(|values| Record::new(header.clone(), values))
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordStream::from_records(
            format!("query:{}", table.name()),
            header,
            records,
        ))
    }

    fn project(
        plan: &QueryPlan,
        input: &Arc<Header>,
        mut rows: Vec<Record>,
    ) -> Result<(Arc<Header>, Vec<Vec<Value>>)> {
        let mut columns = Vec::new();
        let mut fields = Vec::new();
        for item in &plan.columns {
            match item {
                SelectColumn::Wildcard => {
                    for (i, field) in input.fields().iter().enumerate() {
                        columns.push(i);
                        fields.push(field.clone());
                    }
                }
                SelectColumn::Column { name, .. } => {
                    let i = input.index_of(name)?;
                    columns.push(i);
                    fields.push(input.fields()[i].renamed(item.output_name()));
                }
                SelectColumn::Aggregate { .. } => {
                    return Err(Error::InvalidInput(
                        "Aggregate in a non-aggregating query".to_string(),
                    ))
                }
            }
        }
        let header = Arc::new(Header::new(fields)?);

        // Sort before projecting so ORDER BY may name unselected columns;
        // output aliases resolve to their source column.
        let keys = plan
            .order_by
            .iter()
            .map(|(name, dir)| -> Result<(usize, bool)> {
                let i = match header.index_of(name) {
                    Ok(j) => columns[j],
                    Err(_) => input.index_of(name)?,
                };
                Ok((i, *dir == OrderDirection::Desc))
            })
            .collect::<Result<Vec<_>>>()?;
        rows.sort_by(|a, b| compare_keys(&keys, a.values(), b.values()));

        let projected = rows
            .iter()
            .map(|r| columns.iter().map(|&i| r.values()[i].clone()).collect())
            .collect();
        Ok((header, projected))
    }

    fn aggregate(
        plan: &QueryPlan,
        input: &Arc<Header>,
        rows: &[Record],
    ) -> Result<(Arc<Header>, Vec<Vec<Value>>)> {
        let group_columns = plan
            .group_by
            .iter()
            .map(|name| input.index_of(name))
            .collect::<Result<Vec<_>>>()?;

        let mut fields = Vec::new();
        for item in &plan.columns {
            let field = match item {
                SelectColumn::Wildcard => {
                    return Err(Error::InvalidInput(
                        "SELECT * cannot be combined with aggregation".to_string(),
                    ))
                }
                SelectColumn::Column { name, .. } => {
                    if !plan.group_by.contains(name) {
                        return Err(Error::InvalidInput(format!(
                            "Column `{name}` must appear in GROUP BY or an aggregate"
                        )));
                    }
                    input.field_of(name)?.renamed(item.output_name())
                }
                SelectColumn::Aggregate { func, column, .. } => {
                    let source = column
                        .as_deref()
                        .map(|c| input.field_of(c))
                        .transpose()?;
                    aggregate_field(*func, source, item.output_name())?
                }
            };
            fields.push(field);
        }
        let header = Arc::new(Header::new(fields)?);

        // Groups in first-seen order
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<&Record>> = Vec::new();
        for record in rows {
            let key: Vec<&Value> = group_columns.iter().map(|&i| &record.values()[i]).collect();
            let key = format!("{key:?}");
            let g = *index.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[g].push(record);
        }
        if groups.is_empty() && plan.group_by.is_empty() {
            groups.push(Vec::new());
        }

        let mut out = Vec::with_capacity(groups.len());
        for group in &groups {
            let mut values = Vec::with_capacity(plan.columns.len());
            for item in &plan.columns {
                let value = match item {
                    SelectColumn::Column { name, .. } => {
                        let i = input.index_of(name)?;
                        group.first().map_or(Value::Null, |r| r.values()[i].clone())
                    }
                    SelectColumn::Aggregate { func, column, .. } => {
                        let i = column.as_deref().map(|c| input.index_of(c)).transpose()?;
                        compute_aggregate(*func, i, group)?
                    }
                    SelectColumn::Wildcard => Value::Null,
                };
                values.push(value);
            }
            out.push(values);
        }
        Ok((header, out))
    }
}

fn compare_keys(keys: &[(usize, bool)], a: &[Value], b: &[Value]) -> Ordering {
    keys.iter()
        .map(|&(i, reverse)| order_nulls_last(&a[i], &b[i], reverse))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn aggregate_field(func: AggregateFunction, source: Option<&Field>, name: String) -> Result<Field> {
    let data_type = match (func, source.map(Field::data_type)) {
        (AggregateFunction::Count, _) => return Ok(Field::new(name, DataType::Int)),
        (AggregateFunction::Avg, Some(DataType::Int | DataType::Float | DataType::Bool)) => {
            DataType::Float
        }
        (AggregateFunction::Sum, Some(dt @ (DataType::Int | DataType::Float))) => dt,
        (AggregateFunction::Min | AggregateFunction::Max, Some(dt)) => dt,
        (_, dt) => {
            return Err(Error::InvalidInput(format!(
                "{} is not defined for {} columns",
                func.name(),
                dt.map_or("*", DataType::name)
            )))
        }
    };
    Ok(Field::nullable(name, data_type))
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
fn compute_aggregate(
    func: AggregateFunction,
    column: Option<usize>,
    rows: &[&Record],
) -> Result<Value> {
    let Some(column) = column else {
        return Ok(Value::Int(rows.len() as i64));
    };
    let present: Vec<&Value> = rows
        .iter()
        .map(|r| &r.values()[column])
        .filter(|v| !v.is_null())
        .collect();
    let value = match func {
        AggregateFunction::Count => Value::Int(present.len() as i64),
        _ if present.is_empty() => Value::Null,
        AggregateFunction::Sum => {
            if present.iter().all(|v| matches!(v, Value::Int(_))) {
                let mut sum: i64 = 0;
                for v in &present {
                    sum = sum
                        .checked_add(v.as_i64().unwrap_or_default())
                        .ok_or_else(|| Error::InvalidInput("SUM overflowed i64".to_string()))?;
                }
                Value::Int(sum)
            } else {
                Value::Float(present.iter().filter_map(|v| v.as_f64()).sum())
            }
        }
        AggregateFunction::Avg => {
            let sum: f64 = present.iter().filter_map(|v| v.as_f64()).sum();
            Value::Float(sum / present.len() as f64)
        }
        AggregateFunction::Min => present
            .iter()
            .min_by(|a, b| a.total_cmp(b))
            .map_or(Value::Null, |v| (*v).clone()),
        AggregateFunction::Max => present
            .iter()
            .max_by(|a, b| a.total_cmp(b))
            .map_or(Value::Null, |v| (*v).clone()),
    };
    Ok(value)
}

fn literal(value: &sqlparser::ast::Value) -> Result<Value> {
    use sqlparser::ast::Value as Sql;
    match value {
        Sql::Number(n, _) => n
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| n.parse::<f64>().map(Value::Float))
            .map_err(|_| Error::ParseError(format!("Invalid number: {n}"))),
        Sql::SingleQuotedString(s) | Sql::DoubleQuotedString(s) => Ok(Value::Str(s.clone())),
        Sql::Boolean(b) => Ok(Value::Bool(*b)),
        Sql::Null => Ok(Value::Null),
        other => Err(Error::ParseError(format!("Unsupported literal: {other}"))),
    }
}

fn truth(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(Error::InvalidInput(format!(
            "Expected a boolean condition, got {} value {other}",
            other.type_name()
        ))),
    }
}

fn compare(op: &BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let ordering = left.compare(right).ok_or_else(|| {
        Error::InvalidInput(format!(
            "Cannot compare {} value {left} with {} value {right}",
            left.type_name(),
            right.type_name()
        ))
    })?;
    let result = match op {
        BinaryOperator::Eq => ordering == Ordering::Equal,
        BinaryOperator::NotEq => ordering != Ordering::Equal,
        BinaryOperator::Lt => ordering == Ordering::Less,
        BinaryOperator::LtEq => ordering != Ordering::Greater,
        BinaryOperator::Gt => ordering == Ordering::Greater,
        BinaryOperator::GtEq => ordering != Ordering::Less,
        other => return Err(Error::ParseError(format!("Unsupported operator: {other}"))),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: &BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let result = match op {
            BinaryOperator::Plus => a.checked_add(*b),
            BinaryOperator::Minus => a.checked_sub(*b),
            BinaryOperator::Multiply => a.checked_mul(*b),
            _ => None,
        };
        if let Some(result) = result {
            return Ok(Value::Int(result));
        }
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(Error::InvalidInput(format!(
            "Arithmetic needs numbers, got {} and {}",
            left.type_name(),
            right.type_name()
        )));
    };
    let result = match op {
        BinaryOperator::Plus => a + b,
        BinaryOperator::Minus => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide => a / b,
        other => return Err(Error::ParseError(format!("Unsupported operator: {other}"))),
    };
    Ok(Value::Float(result))
}

fn logical(op: &BinaryOperator, left: Option<bool>, right: Option<bool>) -> Value {
    let result = match op {
        BinaryOperator::And => match (left, right) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        _ => match (left, right) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    };
    result.map_or(Value::Null, Value::Bool)
}

/// Evaluate an expression against one row
fn eval(expr: &Expr, record: &Record) -> Result<Value> {
    match expr {
        Expr::Identifier(ident) => record.get_by_name(&ident.value).cloned(),
        Expr::CompoundIdentifier(parts) => {
            let name = parts.last().map_or("", |i| i.value.as_str());
            record.get_by_name(name).cloned()
        }
        Expr::Value(value) => literal(value),
        Expr::Nested(inner) => eval(inner, record),
        Expr::IsNull(inner) => Ok(Value::Bool(eval(inner, record)?.is_null())),
        Expr::IsNotNull(inner) => Ok(Value::Bool(!eval(inner, record)?.is_null())),
        Expr::UnaryOp { op, expr } => {
            let value = eval(expr, record)?;
            match op {
                UnaryOperator::Not => Ok(truth(&value)?.map_or(Value::Null, |b| Value::Bool(!b))),
                UnaryOperator::Minus => match value {
                    // overflow widens to float, as in `arithmetic`
                    #[allow(clippy::cast_precision_loss)]
                    Value::Int(i) => Ok(i
                        .checked_neg()
                        .map_or(Value::Float(-(i as f64)), Value::Int)),
                    Value::Float(x) => Ok(Value::Float(-x)),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::InvalidInput(format!("Cannot negate {other}"))),
                },
                UnaryOperator::Plus => Ok(value),
                other => Err(Error::ParseError(format!("Unsupported operator: {other}"))),
            }
        }
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And | BinaryOperator::Or => {
                let l = truth(&eval(left, record)?)?;
                let r = truth(&eval(right, record)?)?;
                Ok(logical(op, l, r))
            }
            BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq => compare(op, &eval(left, record)?, &eval(right, record)?),
            BinaryOperator::Plus
            | BinaryOperator::Minus
            | BinaryOperator::Multiply
            | BinaryOperator::Divide => {
                arithmetic(op, &eval(left, record)?, &eval(right, record)?)
            }
            other => Err(Error::ParseError(format!("Unsupported operator: {other}"))),
        },
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let value = eval(expr, record)?;
            let above = truth(&compare(&BinaryOperator::GtEq, &value, &eval(low, record)?)?)?;
            let below = truth(&compare(&BinaryOperator::LtEq, &value, &eval(high, record)?)?)?;
            let within = logical(&BinaryOperator::And, above, below);
            if *negated {
                Ok(truth(&within)?.map_or(Value::Null, |b| Value::Bool(!b)))
            } else {
                Ok(within)
            }
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let value = eval(expr, record)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for item in list {
                let candidate = eval(item, record)?;
                if candidate.is_null() {
                    saw_null = true;
                } else if value.compare(&candidate) == Some(Ordering::Equal) {
                    return Ok(Value::Bool(!*negated));
                }
            }
            Ok(if saw_null {
                Value::Null
            } else {
                Value::Bool(*negated)
            })
        }
        other => Err(Error::ParseError(format!(
            "Unsupported expression in WHERE: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryEngine;
    use crate::storage::TableStore;

    fn store() -> TableStore {
        let header = Arc::new(
            Header::new([
                Field::new("id", DataType::Int),
                Field::new("kind", DataType::Str),
                Field::nullable("value", DataType::Float),
            ])
            .unwrap(),
        );
        let mut store = TableStore::in_memory();
        let table = store.create_table("events", header.clone()).unwrap();
        let rows = [
            (1, "a", Some(1.0)),
            (2, "b", None),
            (3, "a", Some(4.0)),
            (4, "c", Some(2.5)),
        ];
        for (id, kind, value) in rows {
            table
                .add(
                    Record::new(header.clone(), vec![Value::Int(id), kind.into(), value.into()])
                        .unwrap(),
                )
                .unwrap();
        }
        store
    }

    fn run(sql: &str) -> Vec<Vec<Value>> {
        let store = store();
        let plan = QueryEngine::new().parse(sql).unwrap();
        QueryExecutor::new()
            .execute(&plan, store.table("events").unwrap())
            .unwrap()
            .map(|r| r.unwrap().into_values())
            .collect()
    }

    #[test]
    fn test_null_comparison_drops_row() {
        let rows = run("SELECT id FROM events WHERE value > 0");
        assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(3)], vec![Value::Int(4)]]);
        let rows = run("SELECT id FROM events WHERE NOT value > 0");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_in_between_is_null() {
        assert_eq!(run("SELECT id FROM events WHERE kind IN ('b', 'c')").len(), 2);
        assert_eq!(run("SELECT id FROM events WHERE id BETWEEN 2 AND 3").len(), 2);
        assert_eq!(run("SELECT id FROM events WHERE value IS NULL"), vec![vec![Value::Int(2)]]);
    }

    #[test]
    fn test_group_by_first_seen_order() {
        let rows = run("SELECT kind, COUNT(*), SUM(value) FROM events GROUP BY kind");
        assert_eq!(
            rows,
            vec![
                vec![Value::from("a"), Value::Int(2), Value::Float(5.0)],
                vec![Value::from("b"), Value::Int(1), Value::Null],
                vec![Value::from("c"), Value::Int(1), Value::Float(2.5)],
            ]
        );
    }

    #[test]
    fn test_order_by_hidden_column() {
        let rows = run("SELECT kind FROM events ORDER BY value DESC");
        assert_eq!(
            rows,
            vec![
                vec![Value::from("a")],
                vec![Value::from("c")],
                vec![Value::from("a")],
                vec![Value::from("b")],
            ]
        );
    }

    #[test]
    fn test_aggregate_over_empty_input() {
        let rows = run("SELECT COUNT(*), AVG(value) FROM events WHERE id > 100");
        assert_eq!(rows, vec![vec![Value::Int(0), Value::Null]]);
    }

    #[test]
    fn test_negating_int_min_widens_to_float() {
        let header = Arc::new(Header::new([Field::new("id", DataType::Int)]).unwrap());
        let mut store = TableStore::in_memory();
        let table = store.create_table("t", header.clone()).unwrap();
        for id in [i64::MIN, -3, 5] {
            table.add(Record::new(header.clone(), vec![Value::Int(id)]).unwrap()).unwrap();
        }
        let plan = QueryEngine::new().parse("SELECT id FROM t WHERE -id > 0").unwrap();
        let rows: Vec<Value> = QueryExecutor::new()
            .execute(&plan, store.table("t").unwrap())
            .unwrap()
            .map(|r| r.unwrap().values()[0].clone())
            .collect();
        assert_eq!(rows, vec![Value::Int(i64::MIN), Value::Int(-3)]);
    }

    #[test]
    fn test_ungrouped_column_rejected() {
        let store = store();
        let plan = QueryEngine::new()
            .parse("SELECT id, COUNT(*) FROM events GROUP BY kind")
            .unwrap();
        assert!(QueryExecutor::new()
            .execute(&plan, store.table("events").unwrap())
            .is_err());
    }
}
