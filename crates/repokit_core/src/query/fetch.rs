//! Fetch strategy resolver.
//!
//! # Responsibility
//! - Resolve a [`FetchDirective`] into joins against target descriptors.
//! - Rewrite select statements so fetched associations arrive in the same row.
//!
//! # Invariants
//! - Only to-one associations are joined, so joins never multiply owner rows
//!   and no identifier deduplication is needed.
//! - Joined columns are aliased `assoc.field`; the owner keeps its own
//!   foreign-key column aliased `assoc`.
//! - Count statements never select joined columns; they keep inner joins
//!   only, as row filters.

use crate::metadata::registry::EntityRegistry;
use crate::metadata::{AssociationDescriptor, EntityDescriptor};
use crate::query::parser::ParseError;
use crate::query::plan::{FetchDirective, JoinKind};
use crate::query::sql::{quote, ROOT_ALIAS};
use crate::query::PlanError;
use std::sync::Arc;

/// One resolved association join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJoin {
    pub association: AssociationDescriptor,
    pub target: Arc<EntityDescriptor>,
    pub kind: JoinKind,
    /// Table alias, unique per statement (`t1`, `t2`, ...).
    pub alias: String,
}

/// Resolves every named association of `directive` on `descriptor`.
pub fn resolve_fetch(
    operation: &str,
    descriptor: &EntityDescriptor,
    directive: &FetchDirective,
    registry: &EntityRegistry,
) -> Result<Vec<FetchJoin>, PlanError> {
    let mut joins = Vec::with_capacity(directive.joins().len());

    for (index, (name, kind)) in directive.joins().iter().enumerate() {
        let association =
            descriptor
                .association(name)
                .ok_or_else(|| ParseError::UnknownAssociation {
                    operation: operation.to_string(),
                    entity: descriptor.name().to_string(),
                    association: name.clone(),
                })?;
        let target = registry.describe_shared(&association.target)?;

        joins.push(FetchJoin {
            association: association.clone(),
            target,
            kind: *kind,
            alias: format!("t{}", index + 1),
        });
    }

    Ok(joins)
}

/// Select-list fragment for joined association columns, with leading comma.
pub(crate) fn join_columns(joins: &[FetchJoin]) -> String {
    let mut sql = String::new();
    for join in joins {
        let target = join.target.as_ref();
        let prefix = join.association.name.as_str();
        sql.push_str(&format!(
            ", {}.{} AS {}",
            join.alias,
            quote(&target.id().column),
            quote(&format!("{prefix}.{}", target.id().name))
        ));
        for field in target.fields() {
            sql.push_str(&format!(
                ", {}.{} AS {}",
                join.alias,
                quote(&field.column),
                quote(&format!("{prefix}.{}", field.name))
            ));
        }
        for nested in target.associations() {
            sql.push_str(&format!(
                ", {}.{} AS {}",
                join.alias,
                quote(&nested.foreign_key),
                quote(&format!("{prefix}.{}", nested.name))
            ));
        }
    }
    sql
}

/// Join clauses, each with a leading space.
pub(crate) fn join_clauses(joins: &[FetchJoin]) -> String {
    render_joins(joins.iter())
}

/// Inner join clauses only. They drop owner rows without a match, so count
/// statements keep them as filters; left joins never change the row count.
pub(crate) fn filter_join_clauses(joins: &[FetchJoin]) -> String {
    render_joins(joins.iter().filter(|join| join.kind == JoinKind::Inner))
}

fn render_joins<'a>(joins: impl Iterator<Item = &'a FetchJoin>) -> String {
    let mut sql = String::new();
    for join in joins {
        sql.push_str(&format!(
            " {} {} {} ON {}.{} = {}.{}",
            join.kind.as_sql(),
            quote(join.target.table()),
            join.alias,
            join.alias,
            quote(&join.target.id().column),
            ROOT_ALIAS,
            quote(&join.association.foreign_key)
        ));
    }
    sql
}
