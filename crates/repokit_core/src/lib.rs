//! Declarative repository layer over a relational store.
//!
//! Operations are declared by name (`findByUsernameAndAgeGreaterThan`) or
//! with raw SQL, compiled once into query plans, and executed inside the
//! caller's store scope. Bulk statements always pass through a mandatory
//! cache-invalidation hook.

pub mod db;
pub mod logging;
pub mod metadata;
pub mod model;
pub mod query;
pub mod repo;
pub mod store;

pub use db::{open_db, open_db_in_memory, DbError, DbResult, Migration};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings};
pub use metadata::registry::{EntityRegistry, RegistryError};
pub use metadata::{AssociationDescriptor, Entity, EntityDescriptor, FieldDescriptor};
pub use model::page::{Direction, Order, Page, PageRequest, Sort};
pub use model::record::{FromRecord, MappingError, Record, Related};
pub use model::value::{Arg, FieldType, FromValue, ToValue, Value};
pub use query::parser::ParseError;
pub use query::plan::{
    CachePolicy, FetchDirective, JoinKind, PagingStrategy, QueryPlan, ResultShape, ReturnKind,
};
pub use query::{Declaration, PlanError};
pub use repo::bulk::{BulkExecutor, BulkResult, InvalidationHook, Mutation};
pub use repo::cache::EntityCache;
pub use repo::composition::{CustomContext, Repository, RepositoryBuilder};
pub use repo::executor::Output;
pub use repo::{RepoError, RepoResult};
pub use store::{Row, Store, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
