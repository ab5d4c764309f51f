//! Repository composition.
//!
//! # Responsibility
//! - Merge derived, raw and hand-written operations into one repository.
//! - Expose typed entry points plus the built-in CRUD operations.
//!
//! # Invariants
//! - Every declaration is compiled at build time; calls never parse.
//! - A hand-written operation shadows a declared one only when registered
//!   with [`RepositoryBuilder::custom_override`]; any other name collision
//!   fails the build with `AmbiguousOperation`.
//! - A hand-written operation that reports changed rows always reaches the
//!   invalidation hook, whether or not it called it itself.
//! - A built repository is immutable and `Send + Sync`.

use crate::metadata::registry::EntityRegistry;
use crate::metadata::{Entity, EntityDescriptor, FieldRef};
use crate::model::page::{Page, PageRequest};
use crate::model::record::{FromRecord, MappingError, Record};
use crate::model::value::{Arg, FromValue, ToValue, Value};
use crate::query::plan::{MutationKind, QueryPlan, ResultShape, ReturnKind};
use crate::query::sql;
use crate::query::Declaration;
use crate::repo::bulk::{BulkExecutor, BulkResult, InvalidationHook, Mutation};
use crate::repo::executor::{self, Output};
use crate::repo::paging;
use crate::repo::{RepoError, RepoResult};
use crate::store::Store;
use log::{debug, info};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

const FIND_ALL: &str = "findAll";
const FIND_BY_ID: &str = "findById";
const COUNT_ALL: &str = "count";
const COUNT_BY_ID: &str = "countById";
const DELETE_BY_ID: &str = "deleteById";

/// Hand-written operation body.
pub type CustomHandler =
    dyn Fn(&CustomContext<'_>, &[Arg]) -> RepoResult<Output> + Send + Sync + 'static;

/// Call-scoped view handed to hand-written operations.
pub struct CustomContext<'a> {
    operation: &'a str,
    store: &'a dyn Store,
    registry: &'a EntityRegistry,
    descriptor: &'a EntityDescriptor,
    page: Option<&'a PageRequest>,
    mutation: Option<&'a Mutation>,
    bulk: &'a BulkExecutor,
}

impl<'a> CustomContext<'a> {
    pub fn operation(&self) -> &'a str {
        self.operation
    }

    /// The caller's store scope for this call.
    pub fn store(&self) -> &'a dyn Store {
        self.store
    }

    pub fn registry(&self) -> &'a EntityRegistry {
        self.registry
    }

    pub fn descriptor(&self) -> &'a EntityDescriptor {
        self.descriptor
    }

    /// Page request when called through [`Repository::find_page`].
    pub fn page(&self) -> Option<&'a PageRequest> {
        self.page
    }

    /// Assignments when called through [`Repository::bulk_update`].
    pub fn mutation(&self) -> Option<&'a Mutation> {
        self.mutation
    }

    /// Runs the repository's invalidation hook for its entity.
    ///
    /// A handler returning `Output::Affected` with changed rows and
    /// `invalidated: false` is invalidated by the repository on return, so
    /// calling this is only needed for other outputs.
    pub fn invalidate(&self) {
        self.bulk.invalidate(self.descriptor.name());
    }
}

struct CustomEntry {
    name: String,
    handler: Arc<CustomHandler>,
    overrides: bool,
}

/// Collects declarations and hand-written operations for one entity.
pub struct RepositoryBuilder<E> {
    registry: Arc<EntityRegistry>,
    hook: Arc<dyn InvalidationHook>,
    declarations: Vec<Declaration>,
    customs: Vec<CustomEntry>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> RepositoryBuilder<E> {
    pub fn declare(mut self, declaration: Declaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    /// Registers a hand-written operation under a fresh name.
    pub fn custom<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CustomContext<'_>, &[Arg]) -> RepoResult<Output> + Send + Sync + 'static,
    {
        self.push_custom(name.into(), Arc::new(handler), false)
    }

    /// Registers a hand-written operation that replaces a declared one.
    pub fn custom_override<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CustomContext<'_>, &[Arg]) -> RepoResult<Output> + Send + Sync + 'static,
    {
        self.push_custom(name.into(), Arc::new(handler), true)
    }

    fn push_custom(mut self, name: String, handler: Arc<CustomHandler>, overrides: bool) -> Self {
        self.customs.push(CustomEntry {
            name,
            handler,
            overrides,
        });
        self
    }

    /// Compiles every declaration and checks name uniqueness.
    ///
    /// # Errors
    /// - `Registry` when `E` (or a fetched association target) is unmapped.
    /// - `Parse` for any declaration that does not compile.
    /// - `AmbiguousOperation` for duplicate names without an override marker.
    pub fn build(self) -> RepoResult<Repository<E>> {
        let descriptor = self.registry.describe_shared(E::NAME)?;

        let mut plans = BTreeMap::new();
        for declaration in &self.declarations {
            if plans.contains_key(declaration.name()) {
                return Err(ambiguous::<E>(declaration.name()));
            }
            let plan = declaration.plan(Arc::clone(&descriptor), &self.registry)?;
            plans.insert(declaration.name().to_string(), plan);
        }

        let mut customs: BTreeMap<String, Arc<CustomHandler>> = BTreeMap::new();
        for custom in self.customs {
            if customs.contains_key(&custom.name) {
                return Err(ambiguous::<E>(&custom.name));
            }
            if plans.contains_key(&custom.name) && !custom.overrides {
                return Err(ambiguous::<E>(&custom.name));
            }
            customs.insert(custom.name, custom.handler);
        }

        for declaration in builtin_declarations() {
            if plans.contains_key(declaration.name()) || customs.contains_key(declaration.name()) {
                continue;
            }
            let plan = declaration.plan(Arc::clone(&descriptor), &self.registry)?;
            plans.insert(declaration.name().to_string(), plan);
        }

        info!(
            "event=repo_build module=repo status=ok entity={} declared={} custom={} operations={}",
            E::NAME,
            self.declarations.len(),
            customs.len(),
            plans.len() + customs.len()
        );

        Ok(Repository {
            registry: self.registry,
            descriptor,
            plans,
            customs,
            bulk: BulkExecutor::new(self.hook),
            _entity: PhantomData,
        })
    }
}

fn ambiguous<E: Entity>(operation: &str) -> RepoError {
    RepoError::AmbiguousOperation(format!("{}::{operation}", E::NAME))
}

fn builtin_declarations() -> [Declaration; 5] {
    [
        Declaration::derived(FIND_ALL),
        Declaration::derived(FIND_BY_ID)
            .param()
            .returns(ReturnKind::Single),
        Declaration::derived(COUNT_ALL).returns(ReturnKind::Count),
        Declaration::derived(COUNT_BY_ID)
            .param()
            .returns(ReturnKind::Count),
        Declaration::derived(DELETE_BY_ID)
            .param()
            .returns(ReturnKind::Affected),
    ]
}

/// Composed repository for entity `E`.
///
/// Every call takes the store scope (`&Connection`, `&Transaction`, or any
/// other [`Store`]) it runs in.
pub struct Repository<E> {
    registry: Arc<EntityRegistry>,
    descriptor: Arc<EntityDescriptor>,
    plans: BTreeMap<String, QueryPlan>,
    customs: BTreeMap<String, Arc<CustomHandler>>,
    bulk: BulkExecutor,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    /// Starts a repository for `E`; the invalidation hook is mandatory.
    pub fn builder(
        registry: Arc<EntityRegistry>,
        hook: Arc<dyn InvalidationHook>,
    ) -> RepositoryBuilder<E> {
        RepositoryBuilder {
            registry,
            hook,
            declarations: Vec::new(),
            customs: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Compiled plan behind `operation`, if it is not hand-written.
    pub fn plan(&self, operation: &str) -> Option<&QueryPlan> {
        if self.customs.contains_key(operation) {
            return None;
        }
        self.plans.get(operation)
    }

    /// Every addressable operation name, sorted.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .plans
            .keys()
            .chain(self.customs.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Untyped call for non-page, non-update operations.
    pub fn invoke(&self, store: &dyn Store, operation: &str, args: &[Arg]) -> RepoResult<Output> {
        self.dispatch(store, operation, args, None, None)
    }

    pub fn find_one(
        &self,
        store: &dyn Store,
        operation: &str,
        args: &[Arg],
    ) -> RepoResult<Option<E>> {
        self.expect_plan_shape(operation, &[ResultShape::Single], "single")?;
        let mut records = self.records(store, operation, args, "single")?;
        if records.len() > 1 {
            return Err(RepoError::NonUniqueResult {
                operation: operation.to_string(),
                rows: records.len(),
            });
        }
        records.pop().map(|record| map_record(&record)).transpose()
    }

    pub fn find_list(&self, store: &dyn Store, operation: &str, args: &[Arg]) -> RepoResult<Vec<E>> {
        self.expect_plan_shape(operation, &[ResultShape::List], "list")?;
        self.records(store, operation, args, "list")?
            .iter()
            .map(map_record)
            .collect()
    }

    /// Maps rows into a projection type instead of the entity.
    pub fn find_projection<P: FromRecord>(
        &self,
        store: &dyn Store,
        operation: &str,
        args: &[Arg],
    ) -> RepoResult<Vec<P>> {
        self.expect_plan_shape(
            operation,
            &[ResultShape::Projection, ResultShape::List],
            "projection",
        )?;
        self.records(store, operation, args, "projection")?
            .iter()
            .map(map_record)
            .collect()
    }

    pub fn find_page(
        &self,
        store: &dyn Store,
        operation: &str,
        args: &[Arg],
        request: &PageRequest,
    ) -> RepoResult<Page<E>> {
        self.expect_plan_shape(operation, &[ResultShape::Page], "page")?;
        match self.dispatch(store, operation, args, Some(request), None)? {
            Output::Page(page) => page.try_map(|record| map_record(&record)),
            other => Err(output_mismatch(operation, "page", &other)),
        }
    }

    pub fn count(&self, store: &dyn Store, operation: &str, args: &[Arg]) -> RepoResult<u64> {
        self.expect_plan_shape(operation, &[ResultShape::Count], "count")?;
        match self.dispatch(store, operation, args, None, None)? {
            Output::Count(total) => Ok(total),
            other => Err(output_mismatch(operation, "count", &other)),
        }
    }

    /// First column of each row, converted to `T`.
    pub fn find_scalars<T: FromValue>(
        &self,
        store: &dyn Store,
        operation: &str,
        args: &[Arg],
    ) -> RepoResult<Vec<T>> {
        self.expect_plan_shape(operation, &[ResultShape::ScalarList], "scalar_list")?;
        let values = match self.dispatch(store, operation, args, None, None)? {
            Output::Values(values) => values,
            other => return Err(output_mismatch(operation, "values", &other)),
        };
        values
            .iter()
            .map(|value| {
                T::from_value(value).ok_or_else(|| {
                    RepoError::Mapping(MappingError::TypeMismatch {
                        column: operation.to_string(),
                        expected: T::EXPECTED,
                        found: value.type_name(),
                    })
                })
            })
            .collect()
    }

    pub fn bulk_update(
        &self,
        store: &dyn Store,
        operation: &str,
        args: &[Arg],
        mutation: &Mutation,
    ) -> RepoResult<BulkResult> {
        self.expect_plan_shape(
            operation,
            &[ResultShape::Mutation(MutationKind::Update)],
            "bulk_update",
        )?;
        match self.dispatch(store, operation, args, None, Some(mutation))? {
            Output::Affected(result) => Ok(result),
            other => Err(output_mismatch(operation, "affected", &other)),
        }
    }

    pub fn bulk_delete(
        &self,
        store: &dyn Store,
        operation: &str,
        args: &[Arg],
    ) -> RepoResult<BulkResult> {
        self.expect_plan_shape(
            operation,
            &[ResultShape::Mutation(MutationKind::Delete)],
            "bulk_delete",
        )?;
        match self.dispatch(store, operation, args, None, None)? {
            Output::Affected(result) => Ok(result),
            other => Err(output_mismatch(operation, "affected", &other)),
        }
    }

    /// Inserts `entity` when it has no identifier, otherwise updates it by
    /// identifier (inserting when no row matched). Returns the identifier.
    ///
    /// Saving goes through the store directly and does not invoke the
    /// invalidation hook.
    pub fn save(&self, store: &dyn Store, entity: &E) -> RepoResult<Value> {
        let columns = self.persisted_columns(entity)?;

        let id = match entity.id().filter(|id| !id.is_null()) {
            Some(id) => {
                let affected = if columns.is_empty() {
                    0
                } else {
                    let statement =
                        sql::update_by_id(&self.descriptor, columns.clone(), id.clone());
                    store.execute_mutation(&statement.sql, &statement.params)?
                };
                if affected == 0 {
                    let mut with_id = vec![(self.descriptor.id().column.clone(), id.clone())];
                    with_id.extend(columns);
                    self.insert(store, with_id)?;
                }
                id
            }
            None => self.insert(store, columns)?,
        };

        debug!(
            "event=entity_save module=repo status=ok entity={} id={}",
            E::NAME,
            id
        );
        Ok(id)
    }

    pub fn find_by_id(&self, store: &dyn Store, id: impl ToValue) -> RepoResult<Option<E>> {
        self.find_one(store, FIND_BY_ID, &[Arg::Scalar(id.to_value())])
    }

    pub fn find_all(&self, store: &dyn Store) -> RepoResult<Vec<E>> {
        self.find_list(store, FIND_ALL, &[])
    }

    pub fn count_all(&self, store: &dyn Store) -> RepoResult<u64> {
        self.count(store, COUNT_ALL, &[])
    }

    pub fn exists_by_id(&self, store: &dyn Store, id: impl ToValue) -> RepoResult<bool> {
        Ok(self.count(store, COUNT_BY_ID, &[Arg::Scalar(id.to_value())])? > 0)
    }

    /// Deletes one row by identifier; returns whether a row was removed.
    pub fn delete_by_id(&self, store: &dyn Store, id: impl ToValue) -> RepoResult<bool> {
        let result = self.bulk_delete(store, DELETE_BY_ID, &[Arg::Scalar(id.to_value())])?;
        Ok(result.affected > 0)
    }

    fn dispatch(
        &self,
        store: &dyn Store,
        operation: &str,
        args: &[Arg],
        page: Option<&PageRequest>,
        mutation: Option<&Mutation>,
    ) -> RepoResult<Output> {
        if let Some(handler) = self.customs.get(operation) {
            let context = CustomContext {
                operation,
                store,
                registry: &self.registry,
                descriptor: &self.descriptor,
                page,
                mutation,
                bulk: &self.bulk,
            };
            debug!(
                "event=query_execute module=repo status=start operation={} source=custom",
                operation
            );
            return match handler(&context, args)? {
                Output::Affected(result) if result.affected > 0 && !result.invalidated => {
                    self.bulk.invalidate(E::NAME);
                    debug!(
                        "event=cache_invalidate module=repo status=ok operation={} source=custom affected={}",
                        operation, result.affected
                    );
                    Ok(Output::Affected(BulkResult {
                        invalidated: true,
                        ..result
                    }))
                }
                output => Ok(output),
            };
        }

        let plan = self
            .plans
            .get(operation)
            .ok_or_else(|| RepoError::UnknownOperation(operation.to_string()))?;

        match plan.shape {
            ResultShape::Page => {
                let request = page.ok_or_else(|| {
                    RepoError::InvalidRequest(format!(
                        "page operation `{operation}` needs a page request"
                    ))
                })?;
                Ok(Output::Page(paging::find_page(store, plan, args, request)?))
            }
            ResultShape::Mutation(MutationKind::Update) => {
                let empty = Mutation::new();
                let mutation = mutation.unwrap_or(&empty);
                Ok(Output::Affected(
                    self.bulk.bulk_update(store, plan, args, mutation)?,
                ))
            }
            ResultShape::Mutation(MutationKind::Delete) => {
                Ok(Output::Affected(self.bulk.bulk_delete(store, plan, args)?))
            }
            _ => executor::execute(store, plan, args),
        }
    }

    fn records(
        &self,
        store: &dyn Store,
        operation: &str,
        args: &[Arg],
        expected: &'static str,
    ) -> RepoResult<Vec<Record>> {
        match self.dispatch(store, operation, args, None, None)? {
            Output::Records(records) => Ok(records),
            other => Err(output_mismatch(operation, expected, &other)),
        }
    }

    /// Checks the declared shape of a plan-backed operation before running it.
    fn expect_plan_shape(
        &self,
        operation: &str,
        accepted: &[ResultShape],
        expected: &'static str,
    ) -> RepoResult<()> {
        match self.plan(operation) {
            Some(plan) if !accepted.contains(&plan.shape) => Err(RepoError::ShapeMismatch {
                operation: operation.to_string(),
                expected,
                found: plan.shape.as_str(),
            }),
            _ => Ok(()),
        }
    }

    fn persisted_columns(&self, entity: &E) -> RepoResult<Vec<(String, Value)>> {
        let mut columns = Vec::new();
        for (name, value) in entity.values() {
            match self.descriptor.resolve(name) {
                Some(FieldRef::Scalar(field)) => {
                    if !field.field_type.accepts(&value) {
                        return Err(RepoError::InvalidRequest(format!(
                            "field `{}.{name}` expects {} but got {}",
                            E::NAME,
                            field.field_type.as_str(),
                            value.type_name()
                        )));
                    }
                    columns.push((field.column.clone(), value));
                }
                Some(FieldRef::Association(association)) => {
                    columns.push((association.foreign_key.clone(), value));
                }
                Some(FieldRef::Id(_)) | None => {
                    return Err(RepoError::InvalidRequest(format!(
                        "`{name}` is not a persisted field of `{}`",
                        E::NAME
                    )));
                }
            }
        }
        Ok(columns)
    }

    fn insert(&self, store: &dyn Store, columns: Vec<(String, Value)>) -> RepoResult<Value> {
        let statement = sql::insert(&self.descriptor, columns);
        let rows = store.execute(&statement.sql, &statement.params)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next())
            .unwrap_or(Value::Null))
    }
}

fn map_record<T: FromRecord>(record: &Record) -> RepoResult<T> {
    Ok(T::from_record(record)?)
}

fn output_mismatch(operation: &str, expected: &'static str, found: &Output) -> RepoError {
    RepoError::ShapeMismatch {
        operation: operation.to_string(),
        expected,
        found: found.kind(),
    }
}
