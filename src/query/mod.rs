//! Query parsing and execution
//!
//! ## SQL Subset
//!
//! Supports ad-hoc inspection of loaded tables:
//! - SELECT with `*`, column list (with aliases) and aggregates
//! - FROM single table (no JOINs, no subqueries)
//! - WHERE with comparisons, AND/OR/NOT, IS [NOT] NULL, BETWEEN, IN
//! - GROUP BY with aggregations (SUM, AVG, COUNT, MIN, MAX)
//! - ORDER BY one or more columns (ASC/DESC)
//! - LIMIT
//!
//! References:
//! - sqlparser-rs: <https://docs.rs/sqlparser>

mod executor;

pub use executor::QueryExecutor;

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Query, Select, SelectItem,
    SetExpr, Statement, TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::{Error, Result};

/// One item of the SELECT list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectColumn {
    /// `*`
    Wildcard,
    /// Plain column, optionally aliased
    Column {
        name: String,
        alias: Option<String>,
    },
    /// Aggregate over a column, or over rows for `COUNT(*)`
    Aggregate {
        func: AggregateFunction,
        column: Option<String>,
        alias: Option<String>,
    },
}

impl SelectColumn {
    /// Name of the output column
    #[must_use]
    pub fn output_name(&self) -> String {
        match self {
            Self::Wildcard => "*".to_string(),
            Self::Column { name, alias } => alias.clone().unwrap_or_else(|| name.clone()),
            Self::Aggregate {
                func,
                column,
                alias,
            } => alias.clone().unwrap_or_else(|| {
                format!("{}({})", func.name(), column.as_deref().unwrap_or("*"))
            }),
        }
    }
}

/// Parsed SQL query with extracted components
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Selected items in order
    pub columns: Vec<SelectColumn>,
    /// Table name
    pub table: String,
    /// WHERE clause expression (optional)
    pub filter: Option<Expr>,
    /// GROUP BY columns (optional)
    pub group_by: Vec<String>,
    /// ORDER BY clauses
    pub order_by: Vec<(String, OrderDirection)>,
    /// LIMIT count (optional)
    pub limit: Option<usize>,
}

impl QueryPlan {
    /// Whether the query aggregates rows
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty()
            || self
                .columns
                .iter()
                .any(|c| matches!(c, SelectColumn::Aggregate { .. }))
    }
}

/// Supported aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// Sum of values
    Sum,
    /// Average of values
    Avg,
    /// Count of rows
    Count,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
}

impl AggregateFunction {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// Sort order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (smallest first)
    Asc,
    /// Descending order (largest first)
    Desc,
}

/// SQL parser producing [`QueryPlan`]s
pub struct QueryEngine {
    dialect: GenericDialect,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    /// Create a new query engine
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// Parse SQL query into query plan
    ///
    /// # Errors
    /// Returns error if:
    /// - SQL syntax is invalid
    /// - Query uses unsupported features (JOINs, subqueries, etc.)
    /// - Multiple statements provided
    ///
    /// # Example
    /// ```
    /// use relfeat::query::QueryEngine;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let engine = QueryEngine::new();
    /// let plan = engine.parse("SELECT id, age FROM patients WHERE age > 18")?;
    /// assert_eq!(plan.table, "patients");
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&self, sql: &str) -> Result<QueryPlan> {
        let statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| Error::ParseError(format!("SQL parse error: {e}")))?;

        if statements.len() != 1 {
            return Err(Error::ParseError(
                "Only single statements supported".to_string(),
            ));
        }

        let Statement::Query(query) = &statements[0] else {
            return Err(Error::ParseError(
                "Only SELECT queries supported".to_string(),
            ));
        };

        Self::parse_select_query(query)
    }

    fn parse_select_query(query: &Query) -> Result<QueryPlan> {
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(Error::ParseError(
                "Only SELECT queries supported".to_string(),
            ));
        };

        let table = Self::extract_table_name(select)?;
        let columns = Self::extract_columns(&select.projection)?;
        if let Some(selection) = &select.selection {
            Self::reject_subqueries(selection)?;
        }
        let filter = select.selection.clone();
        let group_by = Self::extract_group_by(&select.group_by)?;
        let order_by = Self::extract_order_by(query.order_by.as_ref())?;
        let limit = Self::extract_limit(query.limit.as_ref())?;

        Ok(QueryPlan {
            columns,
            table,
            filter,
            group_by,
            order_by,
            limit,
        })
    }

    fn extract_table_name(select: &Select) -> Result<String> {
        match select.from.len() {
            0 => return Err(Error::ParseError("Missing FROM clause".to_string())),
            1 => {}
            _ => {
                return Err(Error::ParseError(
                    "Multiple tables not supported".to_string(),
                ))
            }
        }

        let table_with_joins = &select.from[0];
        if !table_with_joins.joins.is_empty() {
            return Err(Error::ParseError("JOINs not supported".to_string()));
        }

        match &table_with_joins.relation {
            TableFactor::Table { name, .. } => name
                .0
                .last()
                .map(|ident| ident.value.clone())
                .ok_or_else(|| Error::ParseError("Empty table name".to_string())),
            other => Err(Error::ParseError(format!(
                "Unsupported FROM clause: {other}"
            ))),
        }
    }

    fn extract_columns(projection: &[SelectItem]) -> Result<Vec<SelectColumn>> {
        projection
            .iter()
            .map(|item| match item {
                SelectItem::Wildcard(_) => Ok(SelectColumn::Wildcard),
                SelectItem::UnnamedExpr(expr) => Self::select_column(expr, None),
                SelectItem::ExprWithAlias { expr, alias } => {
                    Self::select_column(expr, Some(alias.value.clone()))
                }
                SelectItem::QualifiedWildcard(..) => Err(Error::ParseError(
                    "Qualified wildcards not supported".to_string(),
                )),
            })
            .collect()
    }

    fn select_column(expr: &Expr, alias: Option<String>) -> Result<SelectColumn> {
        if let Some((func, column)) = Self::extract_aggregate(expr)? {
            return Ok(SelectColumn::Aggregate {
                func,
                column,
                alias,
            });
        }
        Ok(SelectColumn::Column {
            name: column_name(expr)?,
            alias,
        })
    }

    fn extract_aggregate(expr: &Expr) -> Result<Option<(AggregateFunction, Option<String>)>> {
        let Expr::Function(func) = expr else {
            return Ok(None);
        };
        let func_name = func.name.to_string().to_uppercase();
        let agg_func = match func_name.as_str() {
            "SUM" => AggregateFunction::Sum,
            "AVG" => AggregateFunction::Avg,
            "COUNT" => AggregateFunction::Count,
            "MIN" => AggregateFunction::Min,
            "MAX" => AggregateFunction::Max,
            other => {
                return Err(Error::ParseError(format!(
                    "Unsupported function: {other}"
                )))
            }
        };

        let FunctionArguments::List(list) = &func.args else {
            return Err(Error::ParseError(format!(
                "{func_name} requires one argument"
            )));
        };
        if list.args.len() != 1 {
            return Err(Error::ParseError(format!(
                "{func_name} requires one argument"
            )));
        }
        let column = match &list.args[0] {
            FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => None,
            FunctionArg::Unnamed(FunctionArgExpr::Expr(arg)) => Some(column_name(arg)?),
            other => {
                return Err(Error::ParseError(format!(
                    "Unsupported argument to {func_name}: {other}"
                )))
            }
        };
        if column.is_none() && agg_func != AggregateFunction::Count {
            return Err(Error::ParseError(format!(
                "{func_name}(*) is not supported"
            )));
        }
        Ok(Some((agg_func, column)))
    }

    fn reject_subqueries(expr: &Expr) -> Result<()> {
        match expr {
            Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => Err(
                Error::ParseError("Subqueries not supported".to_string()),
            ),
            Expr::BinaryOp { left, right, .. } => {
                Self::reject_subqueries(left)?;
                Self::reject_subqueries(right)
            }
            Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => Self::reject_subqueries(expr),
            _ => Ok(()),
        }
    }

    fn extract_group_by(group_by: &GroupByExpr) -> Result<Vec<String>> {
        match group_by {
            GroupByExpr::All(_) => Err(Error::ParseError(
                "GROUP BY ALL not supported".to_string(),
            )),
            GroupByExpr::Expressions(exprs, _) => exprs.iter().map(column_name).collect(),
        }
    }

    fn extract_order_by(
        order_by: Option<&sqlparser::ast::OrderBy>,
    ) -> Result<Vec<(String, OrderDirection)>> {
        let Some(order_by) = order_by else {
            return Ok(Vec::new());
        };
        order_by
            .exprs
            .iter()
            .map(|o| {
                let dir = if o.asc.unwrap_or(true) {
                    OrderDirection::Asc
                } else {
                    OrderDirection::Desc
                };
                Ok((order_key(&o.expr)?, dir))
            })
            .collect()
    }

    fn extract_limit(limit: Option<&Expr>) -> Result<Option<usize>> {
        limit
            .map(|expr| {
                if let Expr::Value(sqlparser::ast::Value::Number(n, _)) = expr {
                    n.parse()
                        .map_err(|_| Error::ParseError(format!("Invalid LIMIT: {n}")))
                } else {
                    Err(Error::ParseError(format!("Invalid LIMIT: {expr}")))
                }
            })
            .transpose()
    }
}

/// Column name of a plain (possibly qualified) identifier
fn column_name(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| Error::ParseError("Empty identifier".to_string())),
        other => Err(Error::ParseError(format!(
            "Only plain columns are supported here, got: {other}"
        ))),
    }
}

/// ORDER BY key: a column, or the output name of an aggregate
fn order_key(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Function(_) => {
            let Some((func, column)) = QueryEngine::extract_aggregate(expr)? else {
                return Err(Error::ParseError(format!("Unsupported ORDER BY: {expr}")));
            };
            Ok(SelectColumn::Aggregate {
                func,
                column,
                alias: None,
            }
            .output_name())
        }
        other => column_name(other),
    }
}
