//! Pagination engine.
//!
//! # Responsibility
//! - Run page plans with `LIMIT`/`OFFSET` windows.
//! - Compute page metadata by counting (counted) or over-fetching (windowed).
//!
//! # Invariants
//! - Content never exceeds the page size.
//! - Paging always runs with an explicit ordering, either from the request,
//!   the operation name or raw SQL declared as ordered.
//! - Count statements share the page filter, including inner joins, and never
//!   select fetched columns.

use crate::model::page::{Order, Page, PageRequest};
use crate::model::record::Record;
use crate::model::value::Arg;
use crate::query::plan::{PagingStrategy, QueryPlan, ResultShape};
use crate::query::sql::Window;
use crate::repo::executor::{check_args, count_matching, select_rows};
use crate::repo::{RepoError, RepoResult};
use crate::store::Store;
use log::debug;

/// Runs a page plan for `request`.
///
/// # Errors
/// - `InvalidRequest` for a zero page size or a sort field the entity lacks.
/// - `UnorderedPagination` when neither the operation name, the request nor
///   an [`ordered`](crate::Declaration::ordered) raw query orders the rows.
pub fn find_page(
    store: &dyn Store,
    plan: &QueryPlan,
    args: &[Arg],
    request: &PageRequest,
) -> RepoResult<Page<Record>> {
    if plan.shape != ResultShape::Page {
        return Err(RepoError::ShapeMismatch {
            operation: plan.operation.clone(),
            expected: ResultShape::Page.as_str(),
            found: plan.shape.as_str(),
        });
    }
    check_args(plan, args)?;
    if request.size == 0 {
        return Err(RepoError::InvalidRequest(format!(
            "page size for `{}` must be positive",
            plan.operation
        )));
    }

    let orders = page_orders(plan, request)?;
    let size = u64::from(request.size);
    let offset = request.offset();

    let page = match plan.paging {
        PagingStrategy::Counted => {
            let window = Window {
                limit: size,
                offset,
            };
            let rows = select_rows(store, plan, args, &orders, Some(window))?;
            let content: Vec<Record> = rows.iter().map(Record::from_row).collect();
            let total = match known_total(content.len() as u64, size, offset) {
                Some(total) => total,
                None => count_matching(store, plan, args)?,
            };
            Page::counted(content, request, total)
        }
        PagingStrategy::Windowed => {
            let window = Window {
                limit: size + 1,
                offset,
            };
            let rows = select_rows(store, plan, args, &orders, Some(window))?;
            let content = rows.iter().map(Record::from_row).collect();
            Page::windowed(content, request)
        }
    };

    debug!(
        "event=page_execute module=repo status=ok operation={} strategy={} page={} size={} rows={} has_next={}",
        plan.operation,
        plan.paging.as_str(),
        request.page,
        request.size,
        page.number_of_elements(),
        page.has_next()
    );
    Ok(page)
}

/// Name ordering first, then request ordering.
fn page_orders(plan: &QueryPlan, request: &PageRequest) -> RepoResult<Vec<Order>> {
    let mut orders = plan.order.clone();
    for order in request.sort.orders() {
        if !plan.is_raw() && plan.descriptor.resolve(&order.field).is_none() {
            return Err(RepoError::InvalidRequest(format!(
                "cannot sort `{}` by unknown field `{}`",
                plan.entity(),
                order.field
            )));
        }
        orders.push(order.clone());
    }

    if orders.is_empty() && !plan.is_presorted() {
        return Err(RepoError::UnorderedPagination(plan.operation.clone()));
    }
    Ok(orders)
}

/// Total implied by the content alone, when it is.
///
/// A short page that is the first page, or a short non-empty page anywhere,
/// ends the result set.
fn known_total(fetched: u64, size: u64, offset: u64) -> Option<u64> {
    if fetched < size && (offset == 0 || fetched > 0) {
        Some(offset + fetched)
    } else {
        None
    }
}
