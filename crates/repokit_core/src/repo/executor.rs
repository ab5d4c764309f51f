//! Query executor.
//!
//! # Responsibility
//! - Render plans into statements and run them against a [`Store`].
//! - Map rows into [`Record`]s, scalar columns or counts.
//!
//! # Invariants
//! - Arguments are checked against the declaration before any statement runs.
//! - Single-row shapes fail with `NonUniqueResult` on more than one row.
//! - Zero rows map to `None` or an empty list, never an error.

use crate::model::page::{Order, Page};
use crate::model::record::{MappingError, Record};
use crate::model::value::{Arg, Value};
use crate::query::plan::{QueryPlan, QuerySource, ResultShape};
use crate::query::sql::{self, Statement, Window};
use crate::repo::bulk::BulkResult;
use crate::repo::{RepoError, RepoResult};
use crate::store::{Row, Store};
use log::debug;

/// Untyped operation result, as produced by hand-written operations and
/// [`execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Row results. Single-row shapes carry at most one record.
    Records(Vec<Record>),
    Page(Page<Record>),
    Count(u64),
    Values(Vec<Value>),
    Affected(BulkResult),
}

impl Output {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Records(_) => "records",
            Self::Page(_) => "page",
            Self::Count(_) => "count",
            Self::Values(_) => "values",
            Self::Affected(_) => "affected",
        }
    }
}

/// Runs any non-page, non-mutation plan.
///
/// Page plans need a request (see `repo::paging`) and mutation plans need an
/// invalidation hook (see `repo::bulk`); both fail here with `ShapeMismatch`.
pub fn execute(store: &dyn Store, plan: &QueryPlan, args: &[Arg]) -> RepoResult<Output> {
    match plan.shape {
        ResultShape::Single => Ok(Output::Records(
            find_single(store, plan, args)?.into_iter().collect(),
        )),
        ResultShape::List | ResultShape::Projection => {
            Ok(Output::Records(find_records(store, plan, args)?))
        }
        ResultShape::Count => Ok(Output::Count(count(store, plan, args)?)),
        ResultShape::ScalarList => Ok(Output::Values(find_scalars(store, plan, args)?)),
        ResultShape::Page | ResultShape::Mutation(_) => Err(RepoError::ShapeMismatch {
            operation: plan.operation.clone(),
            expected: "records, count or values",
            found: plan.shape.as_str(),
        }),
    }
}

/// Runs a row-returning plan and maps every row.
pub fn find_records(store: &dyn Store, plan: &QueryPlan, args: &[Arg]) -> RepoResult<Vec<Record>> {
    check_args(plan, args)?;
    let rows = select_rows(store, plan, args, &plan.order, None)?;
    Ok(rows.iter().map(Record::from_row).collect())
}

pub fn find_single(store: &dyn Store, plan: &QueryPlan, args: &[Arg]) -> RepoResult<Option<Record>> {
    let mut records = find_records(store, plan, args)?;
    if records.len() > 1 {
        return Err(RepoError::NonUniqueResult {
            operation: plan.operation.clone(),
            rows: records.len(),
        });
    }
    Ok(records.pop())
}

/// First column of each row.
pub fn find_scalars(store: &dyn Store, plan: &QueryPlan, args: &[Arg]) -> RepoResult<Vec<Value>> {
    check_args(plan, args)?;
    let rows = select_rows(store, plan, args, &plan.order, None)?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_values().into_iter().next().unwrap_or(Value::Null))
        .collect())
}

/// Runs a count plan.
pub fn count(store: &dyn Store, plan: &QueryPlan, args: &[Arg]) -> RepoResult<u64> {
    check_args(plan, args)?;
    let statement = match &plan.source {
        QuerySource::Derived(predicate) => {
            sql::count(&plan.descriptor, &[], predicate.as_ref(), args)
        }
        QuerySource::Raw { query, .. } => {
            let (sql, params) = query.render(args);
            Statement { sql, params }
        }
    };
    run_count(store, plan, &statement)
}

/// Counts the rows a page plan would produce without windowing.
pub(crate) fn count_matching(store: &dyn Store, plan: &QueryPlan, args: &[Arg]) -> RepoResult<u64> {
    let statement = match &plan.source {
        QuerySource::Derived(predicate) => {
            sql::count(&plan.descriptor, &plan.fetch, predicate.as_ref(), args)
        }
        QuerySource::Raw {
            count_query: Some(count_query),
            ..
        } => {
            let (sql, params) = count_query.render(args);
            Statement { sql, params }
        }
        QuerySource::Raw { query, .. } => {
            let (sql, params) = query.render(args);
            Statement {
                sql: sql::wrap_count(&sql),
                params,
            }
        }
    };
    run_count(store, plan, &statement)
}

/// Runs the plan's select with explicit ordering and an optional window.
pub(crate) fn select_rows(
    store: &dyn Store,
    plan: &QueryPlan,
    args: &[Arg],
    orders: &[Order],
    window: Option<Window>,
) -> RepoResult<Vec<Row>> {
    let statement = match &plan.source {
        QuerySource::Derived(predicate) => sql::select(
            &plan.descriptor,
            &plan.fetch,
            predicate.as_ref(),
            args,
            orders,
            window,
        )
        .map_err(|field| {
            RepoError::InvalidRequest(format!(
                "cannot order `{}` by unknown field `{field}`",
                plan.entity()
            ))
        })?,
        QuerySource::Raw { query, .. } => {
            let (raw_sql, mut params) = query.render(args);
            let sql = match window {
                Some(window) => sql::wrap_page(&raw_sql, orders, &mut params, window),
                None => raw_sql,
            };
            Statement { sql, params }
        }
    };

    let rows = store.execute(&statement.sql, &statement.params)?;
    debug!(
        "event=query_execute module=repo status=ok operation={} shape={} joins={} rows={}",
        plan.operation,
        plan.shape.as_str(),
        plan.fetch.len(),
        rows.len()
    );
    Ok(rows)
}

pub(crate) fn check_args(plan: &QueryPlan, args: &[Arg]) -> RepoResult<()> {
    plan.check_args(args)
        .map_err(|message| RepoError::ArgumentMismatch {
            operation: plan.operation.clone(),
            message,
        })
}

fn run_count(store: &dyn Store, plan: &QueryPlan, statement: &Statement) -> RepoResult<u64> {
    let value = store
        .execute_scalar(&statement.sql, &statement.params)?
        .unwrap_or(Value::Integer(0));
    let total = match value {
        Value::Integer(total) => u64::try_from(total).map_err(|_| MappingError::InvalidValue {
            column: "count".to_string(),
            message: format!("negative count {total}"),
        })?,
        other => {
            return Err(MappingError::TypeMismatch {
                column: "count".to_string(),
                expected: "integer",
                found: other.type_name(),
            }
            .into())
        }
    };

    debug!(
        "event=query_execute module=repo status=ok operation={} shape=count total={}",
        plan.operation, total
    );
    Ok(total)
}
