//! Bulk mutation executor.
//!
//! # Responsibility
//! - Run single-statement mass `UPDATE`/`DELETE` scoped by a plan.
//! - Invoke the invalidation hook before returning.
//!
//! # Invariants
//! - Bulk statements bypass every in-memory cache, so the hook runs after
//!   each statement that changed rows unless the plan opted out with
//!   [`CachePolicy::Retain`].
//! - The hook runs synchronously, after the statement succeeded and before
//!   the call returns. A failed statement never invokes it.

use crate::metadata::EntityDescriptor;
use crate::model::value::{Arg, FieldType, ToValue, Value};
use crate::query::plan::{CachePolicy, MutationKind, QueryPlan, QuerySource, ResultShape};
use crate::query::sql::{self, Statement};
use crate::repo::executor::check_args;
use crate::repo::{RepoError, RepoResult};
use crate::store::Store;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Receives a notification after a bulk statement changed rows of `entity`.
pub trait InvalidationHook: Send + Sync {
    fn on_bulk_invalidate(&self, entity: &str);
}

impl<F> InvalidationHook for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_bulk_invalidate(&self, entity: &str) {
        self(entity)
    }
}

/// Outcome of one bulk statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub affected: u64,
    /// Whether the invalidation hook ran.
    pub invalidated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set { field: String, value: Value },
    Increment { field: String, delta: Value },
}

impl Assignment {
    pub fn field(&self) -> &str {
        match self {
            Self::Set { field, .. } | Self::Increment { field, .. } => field,
        }
    }
}

/// Assignments applied by a derived bulk update.
///
/// ```
/// use repokit_core::Mutation;
///
/// let mutation = Mutation::new().increment("age", 1).set("username", "renamed");
/// assert_eq!(mutation.assignments().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    assignments: Vec<Assignment>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl ToValue) -> Self {
        self.assignments.push(Assignment::Set {
            field: field.into(),
            value: value.to_value(),
        });
        self
    }

    /// `field = field + delta`.
    pub fn increment(mut self, field: impl Into<String>, delta: impl ToValue) -> Self {
        self.assignments.push(Assignment::Increment {
            field: field.into(),
            delta: delta.to_value(),
        });
        self
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Checks every assignment targets a scalar field with a compatible value.
    pub fn validate(&self, descriptor: &EntityDescriptor) -> Result<(), String> {
        for assignment in &self.assignments {
            let field = descriptor
                .fields()
                .iter()
                .find(|field| field.name == assignment.field())
                .ok_or_else(|| {
                    format!(
                        "`{}` is not an assignable field of `{}`",
                        assignment.field(),
                        descriptor.name()
                    )
                })?;

            match assignment {
                Assignment::Set { value, .. } => {
                    check_value(field.field_type, &field.name, value)?;
                }
                Assignment::Increment { delta, .. } => {
                    if !field.field_type.is_numeric() {
                        return Err(format!("cannot increment non-numeric field `{}`", field.name));
                    }
                    if delta.is_null() {
                        return Err(format!("increment of `{}` needs a value", field.name));
                    }
                    check_value(field.field_type, &field.name, delta)?;
                }
            }
        }
        Ok(())
    }
}

fn check_value(field_type: FieldType, field: &str, value: &Value) -> Result<(), String> {
    if field_type.accepts(value) {
        Ok(())
    } else {
        Err(format!(
            "field `{field}` expects {} but got {}",
            field_type.as_str(),
            value.type_name()
        ))
    }
}

/// Runs bulk plans and owns the mandatory invalidation hook.
#[derive(Clone)]
pub struct BulkExecutor {
    hook: Arc<dyn InvalidationHook>,
}

impl BulkExecutor {
    pub fn new(hook: Arc<dyn InvalidationHook>) -> Self {
        Self { hook }
    }

    /// Runs a bulk update plan.
    ///
    /// Derived plans take their assignments from `mutation`; raw plans carry
    /// them in their SQL and require an empty mutation.
    pub fn bulk_update(
        &self,
        store: &dyn Store,
        plan: &QueryPlan,
        args: &[Arg],
        mutation: &Mutation,
    ) -> RepoResult<BulkResult> {
        expect_mutation(plan, MutationKind::Update)?;
        check_args(plan, args)?;

        let statement = match &plan.source {
            QuerySource::Derived(predicate) => {
                if mutation.is_empty() {
                    return Err(RepoError::InvalidRequest(format!(
                        "bulk update `{}` has no assignments",
                        plan.operation
                    )));
                }
                mutation
                    .validate(&plan.descriptor)
                    .map_err(RepoError::InvalidRequest)?;
                sql::update(&plan.descriptor, predicate.as_ref(), mutation, args)
            }
            QuerySource::Raw { query, .. } => {
                if !mutation.is_empty() {
                    return Err(RepoError::InvalidRequest(format!(
                        "raw bulk update `{}` cannot take extra assignments",
                        plan.operation
                    )));
                }
                let (sql, params) = query.render(args);
                Statement { sql, params }
            }
        };

        self.run(store, plan, &statement)
    }

    pub fn bulk_delete(
        &self,
        store: &dyn Store,
        plan: &QueryPlan,
        args: &[Arg],
    ) -> RepoResult<BulkResult> {
        expect_mutation(plan, MutationKind::Delete)?;
        check_args(plan, args)?;

        let statement = match &plan.source {
            QuerySource::Derived(predicate) => {
                sql::delete(&plan.descriptor, predicate.as_ref(), args)
            }
            QuerySource::Raw { query, .. } => {
                let (sql, params) = query.render(args);
                Statement { sql, params }
            }
        };

        self.run(store, plan, &statement)
    }

    /// Notifies the hook for `entity` directly.
    pub fn invalidate(&self, entity: &str) {
        self.hook.on_bulk_invalidate(entity);
    }

    fn run(
        &self,
        store: &dyn Store,
        plan: &QueryPlan,
        statement: &Statement,
    ) -> RepoResult<BulkResult> {
        let affected = store.execute_mutation(&statement.sql, &statement.params)?;
        let invalidated = affected > 0 && plan.cache == CachePolicy::Invalidate;
        if invalidated {
            self.hook.on_bulk_invalidate(plan.entity());
        }

        info!(
            "event=bulk_execute module=repo status=ok operation={} kind={} affected={} invalidated={}",
            plan.operation,
            plan.shape.as_str(),
            affected,
            invalidated
        );
        Ok(BulkResult {
            affected,
            invalidated,
        })
    }
}

impl std::fmt::Debug for BulkExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkExecutor").finish_non_exhaustive()
    }
}

fn expect_mutation(plan: &QueryPlan, kind: MutationKind) -> RepoResult<()> {
    let expected = ResultShape::Mutation(kind);
    if plan.shape == expected {
        Ok(())
    } else {
        Err(RepoError::ShapeMismatch {
            operation: plan.operation.clone(),
            expected: expected.as_str(),
            found: plan.shape.as_str(),
        })
    }
}
