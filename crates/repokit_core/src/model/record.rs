//! Mapped result rows and association state.
//!
//! # Responsibility
//! - Turn store rows into field-keyed records, including nested records for
//!   fetch-joined associations.
//! - Report column/type mismatches as [`MappingError`].
//!
//! # Invariants
//! - Column aliases of the form `assoc.field` always land in the nested
//!   record for `assoc`; a nested record whose columns are all null is absent.
//! - An association that was not fetched is [`Related::Unresolved`], never a
//!   silently empty value.

use crate::model::value::{FromValue, ToValue, Value};
use crate::store::Row;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

const NESTED_SEPARATOR: char = '.';

/// Row-to-object conversion failure. Surfaced per call, never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    MissingColumn(String),
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },
    InvalidValue {
        column: String,
        message: String,
    },
}

impl Display for MappingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingColumn(column) => write!(f, "result column `{column}` is missing"),
            Self::TypeMismatch {
                column,
                expected,
                found,
            } => write!(
                f,
                "result column `{column}` expected {expected} but found {found}"
            ),
            Self::InvalidValue { column, message } => {
                write!(f, "result column `{column}` is invalid: {message}")
            }
        }
    }
}

impl Error for MappingError {}

/// One mapped result row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, Value>,
    nested: BTreeMap<String, Option<Record>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from a store row, splitting `assoc.field` aliases into
    /// nested records.
    pub fn from_row(row: &Row) -> Self {
        let mut record = Self::new();
        let mut nested: BTreeMap<String, Record> = BTreeMap::new();

        for (column, value) in row.columns().iter().zip(row.values()) {
            match column.split_once(NESTED_SEPARATOR) {
                Some((association, field)) => {
                    nested
                        .entry(association.to_string())
                        .or_default()
                        .values
                        .insert(field.to_string(), value.clone());
                }
                None => {
                    record.values.insert(column.clone(), value.clone());
                }
            }
        }

        for (association, child) in nested {
            // Left joins without a match yield an all-null column group.
            let present = child.values.values().any(|value| !value.is_null());
            record
                .nested
                .insert(association, present.then_some(child));
        }

        record
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl ToValue) {
        self.values.insert(field.into(), value.to_value());
    }

    /// Builder-style variant of [`Record::insert`].
    pub fn with(mut self, field: impl Into<String>, value: impl ToValue) -> Self {
        self.insert(field, value);
        self
    }

    /// Attaches a nested record as if it had been fetch-joined.
    pub fn with_nested(mut self, association: impl Into<String>, child: Option<Record>) -> Self {
        self.nested.insert(association.into(), child);
        self
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(field, value)| (field.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.nested.is_empty()
    }

    /// Reads and converts one field.
    pub fn get<T: FromValue>(&self, field: &str) -> Result<T, MappingError> {
        let value = self
            .values
            .get(field)
            .ok_or_else(|| MappingError::MissingColumn(field.to_string()))?;
        T::from_value(value).ok_or_else(|| MappingError::TypeMismatch {
            column: field.to_string(),
            expected: T::EXPECTED,
            found: value.type_name(),
        })
    }

    /// Returns the nested record for a fetched association.
    ///
    /// Outer `None`: the association was not fetched. Inner `None`: it was
    /// fetched and no related row exists.
    pub fn nested(&self, association: &str) -> Option<Option<&Record>> {
        self.nested.get(association).map(Option::as_ref)
    }

    /// Resolves association state.
    ///
    /// The foreign key is read from the column aliased with the association
    /// name; a fetched nested record is mapped into `T`.
    pub fn related<T: FromRecord>(&self, association: &str) -> Result<Related<T>, MappingError> {
        match self.nested.get(association) {
            Some(Some(child)) => Ok(Related::Loaded(Some(T::from_record(child)?))),
            Some(None) => Ok(Related::Loaded(None)),
            None => {
                let key = self
                    .values
                    .get(association)
                    .cloned()
                    .ok_or_else(|| MappingError::MissingColumn(association.to_string()))?;
                Ok(Related::Unresolved(key))
            }
        }
    }
}

/// Maps one [`Record`] into an entity or projection type.
pub trait FromRecord: Sized {
    fn from_record(record: &Record) -> Result<Self, MappingError>;
}

impl FromRecord for Record {
    fn from_record(record: &Record) -> Result<Self, MappingError> {
        Ok(record.clone())
    }
}

/// State of a to-one association on a mapped entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Related<T> {
    /// Not fetched by the query; only the foreign key is known.
    ///
    /// Loading it is up to the caller (typically a follow-up `find_by_id`).
    Unresolved(Value),
    /// Fetched in the same query. `None` when the foreign key is null.
    Loaded(Option<T>),
}

impl<T> Related<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Returns the loaded entity, if fetched and present.
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Loaded(value) => value.as_ref(),
            Self::Unresolved(_) => None,
        }
    }

    /// Returns the raw foreign key of an unresolved association.
    pub fn foreign_key(&self) -> Option<&Value> {
        match self {
            Self::Unresolved(key) => Some(key),
            Self::Loaded(_) => None,
        }
    }
}

impl<T> Default for Related<T> {
    fn default() -> Self {
        Self::Unresolved(Value::Null)
    }
}
