//! Repository layer: execution, paging, bulk mutation and composition.
//!
//! # Responsibility
//! - Execute compiled plans inside a caller-supplied store scope.
//! - Compose derived, raw and hand-written operations into one repository.
//!
//! # Invariants
//! - The layer never opens, commits or rolls back transactions.
//! - Store failures surface unchanged as [`RepoError::Store`]; nothing retries.
//! - An absent single result is `Ok(None)`, never an error.

pub mod bulk;
pub mod cache;
pub mod composition;
pub mod executor;
pub mod paging;

use crate::metadata::registry::RegistryError;
use crate::model::record::MappingError;
use crate::query::parser::ParseError;
use crate::query::PlanError;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Error for repository construction and calls.
#[derive(Debug)]
pub enum RepoError {
    Registry(RegistryError),
    Parse(ParseError),
    Mapping(MappingError),
    Store(StoreError),
    /// Two implementations registered under one operation name.
    AmbiguousOperation(String),
    UnknownOperation(String),
    ArgumentMismatch {
        operation: String,
        message: String,
    },
    /// Operation called through an entry point of a different result shape.
    ShapeMismatch {
        operation: String,
        expected: &'static str,
        found: &'static str,
    },
    NonUniqueResult {
        operation: String,
        rows: usize,
    },
    UnorderedPagination(String),
    InvalidRequest(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(err) => write!(f, "{err}"),
            Self::Parse(err) => write!(f, "{err}"),
            Self::Mapping(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::AmbiguousOperation(operation) => {
                write!(f, "operation `{operation}` is registered more than once")
            }
            Self::UnknownOperation(operation) => write!(f, "unknown operation `{operation}`"),
            Self::ArgumentMismatch { operation, message } => {
                write!(f, "invalid arguments for `{operation}`: {message}")
            }
            Self::ShapeMismatch {
                operation,
                expected,
                found,
            } => write!(
                f,
                "operation `{operation}` produces {found}, caller expected {expected}"
            ),
            Self::NonUniqueResult { operation, rows } => write!(
                f,
                "operation `{operation}` expected at most one row, got {rows}"
            ),
            Self::UnorderedPagination(operation) => write!(
                f,
                "operation `{operation}` pages without an explicit ordering"
            ),
            Self::InvalidRequest(message) => write!(f, "invalid request: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Mapping(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RegistryError> for RepoError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<ParseError> for RepoError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

impl From<PlanError> for RepoError {
    fn from(value: PlanError) -> Self {
        match value {
            PlanError::Parse(err) => Self::Parse(err),
            PlanError::Registry(err) => Self::Registry(err),
        }
    }
}

impl From<MappingError> for RepoError {
    fn from(value: MappingError) -> Self {
        Self::Mapping(value)
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(value))
    }
}
