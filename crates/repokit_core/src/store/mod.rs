//! Store collaborator contract.
//!
//! # Responsibility
//! - Define the three synchronous statement primitives the core relies on.
//! - Carry result rows in an engine-neutral shape.
//!
//! # Invariants
//! - Implementations execute within whatever connection/transaction scope
//!   they represent; the core never begins, commits or rolls back.
//! - Failures surface as [`StoreError`] and are never retried by the core.

use crate::model::value::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

mod sqlite;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by the store collaborator.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// Failure from a non-SQLite store implementation.
    Driver(Box<dyn Error + Send + Sync>),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Driver(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Driver(err) => Some(err.as_ref()),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// One result row: shared column names plus positional values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.values.get(index)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Parameterized statement execution within a caller-owned scope.
///
/// Parameters bind strictly by position to `?` markers.
pub trait Store {
    /// Runs a row-returning statement.
    fn execute(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>>;

    /// Runs a statement and returns the first column of the first row.
    ///
    /// Returns `None` when the statement yields no rows.
    fn execute_scalar(&self, sql: &str, params: &[Value]) -> StoreResult<Option<Value>>;

    /// Runs a data-modifying statement and returns the affected row count.
    fn execute_mutation(&self, sql: &str, params: &[Value]) -> StoreResult<u64>;
}
