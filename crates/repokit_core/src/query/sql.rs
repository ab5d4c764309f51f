//! SQL rendering for derived plans.
//!
//! # Responsibility
//! - Render select, count, update, delete and insert statements from
//!   descriptors and predicate chains.
//! - Collect bound values in marker order.
//!
//! # Invariants
//! - Clauses render in chain order: `WHERE f1 = ? AND f2 > ? AND f3 IN (...)`.
//! - Identifiers are always double-quoted; values are always bound, never
//!   interpolated.
//! - Select statements alias every column with its field name so rows map
//!   back by name.

use crate::metadata::EntityDescriptor;
use crate::model::page::Order;
use crate::model::value::{Arg, Value};
use crate::query::fetch::{filter_join_clauses, join_clauses, join_columns, FetchJoin};
use crate::query::plan::{Comparison, PredicateChain};
use crate::query::raw::in_list_markers;
use crate::repo::bulk::{Assignment, Mutation};

/// Alias of the plan's own table in select and count statements.
pub(crate) const ROOT_ALIAS: &str = "t0";

/// Rendered statement ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// `LIMIT`/`OFFSET` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub limit: u64,
    pub offset: u64,
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `SELECT <columns> FROM <table> t0 <joins>`.
pub(crate) fn select_head(descriptor: &EntityDescriptor, joins: &[FetchJoin]) -> String {
    let mut columns = vec![column_alias(&descriptor.id().column, &descriptor.id().name)];
    for field in descriptor.fields() {
        columns.push(column_alias(&field.column, &field.name));
    }
    for association in descriptor.associations() {
        columns.push(column_alias(&association.foreign_key, &association.name));
    }

    format!(
        "SELECT {}{} FROM {} {}{}",
        columns.join(", "),
        join_columns(joins),
        quote(descriptor.table()),
        ROOT_ALIAS,
        join_clauses(joins)
    )
}

pub(crate) fn select(
    descriptor: &EntityDescriptor,
    joins: &[FetchJoin],
    predicate: Option<&PredicateChain>,
    args: &[Arg],
    orders: &[Order],
    window: Option<Window>,
) -> Result<Statement, String> {
    let mut params = Vec::new();
    let mut sql = select_head(descriptor, joins);
    sql.push_str(&where_clause(
        descriptor,
        predicate,
        args,
        Some(ROOT_ALIAS),
        &mut params,
    ));
    sql.push_str(&order_clause(descriptor, orders)?);
    push_window(&mut sql, &mut params, window);
    Ok(Statement { sql, params })
}

/// `SELECT COUNT(*)` sharing the filter of [`select`].
///
/// Fetched columns are never selected; inner joins stay as row filters so
/// the count matches what the select can return.
pub(crate) fn count(
    descriptor: &EntityDescriptor,
    joins: &[FetchJoin],
    predicate: Option<&PredicateChain>,
    args: &[Arg],
) -> Statement {
    let mut params = Vec::new();
    let mut sql = format!(
        "SELECT COUNT(*) FROM {} {}{}",
        quote(descriptor.table()),
        ROOT_ALIAS,
        filter_join_clauses(joins)
    );
    sql.push_str(&where_clause(
        descriptor,
        predicate,
        args,
        Some(ROOT_ALIAS),
        &mut params,
    ));
    Statement { sql, params }
}

/// Single-statement mass update. Assignment values bind before the filter.
pub(crate) fn update(
    descriptor: &EntityDescriptor,
    predicate: Option<&PredicateChain>,
    mutation: &Mutation,
    args: &[Arg],
) -> Statement {
    let mut params = Vec::new();
    let mut assignments = Vec::with_capacity(mutation.assignments().len());
    for assignment in mutation.assignments() {
        let column = descriptor
            .resolve(assignment.field())
            .map(|field| field.column().to_string())
            .unwrap_or_else(|| assignment.field().to_string());
        let column = quote(&column);
        match assignment {
            Assignment::Set { value, .. } => {
                assignments.push(format!("{column} = ?"));
                params.push(value.clone());
            }
            Assignment::Increment { delta, .. } => {
                assignments.push(format!("{column} = {column} + ?"));
                params.push(delta.clone());
            }
        }
    }

    let mut sql = format!(
        "UPDATE {} SET {}",
        quote(descriptor.table()),
        assignments.join(", ")
    );
    sql.push_str(&where_clause(descriptor, predicate, args, None, &mut params));
    Statement { sql, params }
}

pub(crate) fn delete(
    descriptor: &EntityDescriptor,
    predicate: Option<&PredicateChain>,
    args: &[Arg],
) -> Statement {
    let mut params = Vec::new();
    let mut sql = format!("DELETE FROM {}", quote(descriptor.table()));
    sql.push_str(&where_clause(descriptor, predicate, args, None, &mut params));
    Statement { sql, params }
}

/// Insert returning the stored identifier.
///
/// `columns` pairs column names with values; the identifier column is
/// included only when the caller supplies an explicit id.
pub(crate) fn insert(descriptor: &EntityDescriptor, columns: Vec<(String, Value)>) -> Statement {
    let returning = quote(&descriptor.id().column);
    if columns.is_empty() {
        return Statement {
            sql: format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {returning}",
                quote(descriptor.table())
            ),
            params: Vec::new(),
        };
    }

    let names: Vec<String> = columns.iter().map(|(column, _)| quote(column)).collect();
    let markers = vec!["?"; columns.len()].join(", ");
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({markers}) RETURNING {returning}",
            quote(descriptor.table()),
            names.join(", ")
        ),
        params: columns.into_iter().map(|(_, value)| value).collect(),
    }
}

pub(crate) fn update_by_id(
    descriptor: &EntityDescriptor,
    columns: Vec<(String, Value)>,
    id: Value,
) -> Statement {
    let assignments: Vec<String> = columns
        .iter()
        .map(|(column, _)| format!("{} = ?", quote(column)))
        .collect();
    let mut params: Vec<Value> = columns.into_iter().map(|(_, value)| value).collect();
    params.push(id);
    Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote(descriptor.table()),
            assignments.join(", "),
            quote(&descriptor.id().column)
        ),
        params,
    }
}

/// Counts rows of an arbitrary raw query.
pub(crate) fn wrap_count(raw_sql: &str) -> String {
    format!("SELECT COUNT(*) FROM ({raw_sql}) AS counted")
}

/// Orders and windows a raw query by its result aliases.
///
/// Without orders the raw query keeps its own `ORDER BY` and is windowed
/// in place.
pub(crate) fn wrap_page(
    raw_sql: &str,
    orders: &[Order],
    params: &mut Vec<Value>,
    window: Window,
) -> String {
    if orders.is_empty() {
        let mut sql = raw_sql.trim_end().trim_end_matches(';').to_string();
        push_window(&mut sql, params, Some(window));
        return sql;
    }

    let mut sql = format!("SELECT * FROM ({raw_sql}) AS paged");
    let terms: Vec<String> = orders
        .iter()
        .map(|order| format!("{} {}", quote(&order.field), order.direction.as_sql()))
        .collect();
    sql.push_str(" ORDER BY ");
    sql.push_str(&terms.join(", "));
    push_window(&mut sql, params, Some(window));
    sql
}

fn where_clause(
    descriptor: &EntityDescriptor,
    predicate: Option<&PredicateChain>,
    args: &[Arg],
    alias: Option<&str>,
    params: &mut Vec<Value>,
) -> String {
    let Some(predicate) = predicate.filter(|chain| !chain.is_empty()) else {
        return String::new();
    };

    let mut terms = Vec::with_capacity(predicate.len());
    for clause in predicate.clauses() {
        let column = descriptor
            .resolve(&clause.field)
            .map(|field| field.column().to_string())
            .unwrap_or_else(|| clause.field.clone());
        let column = qualified(alias, &column);

        match (clause.comparison, args.get(clause.position)) {
            (Comparison::InSet, Some(Arg::List(values))) => {
                terms.push(format!("{column} IN {}", in_list_markers(values.len())));
                params.extend(values.iter().cloned());
            }
            (Comparison::InSet, Some(Arg::Scalar(value))) => {
                terms.push(format!("{column} IN (?)"));
                params.push(value.clone());
            }
            (comparison, arg) => {
                terms.push(format!("{column} {} ?", comparison.as_sql()));
                params.push(match arg {
                    Some(Arg::Scalar(value)) => value.clone(),
                    _ => Value::Null,
                });
            }
        }
    }

    format!(" WHERE {}", terms.join(" AND "))
}

fn order_clause(descriptor: &EntityDescriptor, orders: &[Order]) -> Result<String, String> {
    if orders.is_empty() {
        return Ok(String::new());
    }

    let mut terms = Vec::with_capacity(orders.len());
    for order in orders {
        let field = descriptor
            .resolve(&order.field)
            .ok_or_else(|| order.field.clone())?;
        terms.push(format!(
            "{} {}",
            qualified(Some(ROOT_ALIAS), field.column()),
            order.direction.as_sql()
        ));
    }
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}

fn push_window(sql: &mut String, params: &mut Vec<Value>, window: Option<Window>) {
    if let Some(window) = window {
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(Value::Integer(to_i64(window.limit)));
        params.push(Value::Integer(to_i64(window.offset)));
    }
}

fn qualified(alias: Option<&str>, column: &str) -> String {
    match alias {
        Some(alias) => format!("{alias}.{}", quote(column)),
        None => quote(column),
    }
}

fn column_alias(column: &str, field: &str) -> String {
    format!("{}.{} AS {}", ROOT_ALIAS, quote(column), quote(field))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
