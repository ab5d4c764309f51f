//! SQLite implementation of [`Store`] over `rusqlite`.
//!
//! Both a bare [`Connection`] (autocommit scope) and an open [`Transaction`]
//! act as a store scope; statements are prepared through the connection's
//! statement cache so repeated plans reuse compiled statements.

use super::{Row, Store, StoreResult};
use crate::model::value::Value;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql, Transaction};
use std::sync::Arc;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Self::Null => ValueRef::Null,
            Self::Integer(value) => ValueRef::Integer(*value),
            Self::Real(value) => ValueRef::Real(*value),
            Self::Text(value) => ValueRef::Text(value.as_bytes()),
            Self::Blob(bytes) => ValueRef::Blob(bytes),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

impl Store for Connection {
    fn execute(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
        query_rows(self, sql, params)
    }

    fn execute_scalar(&self, sql: &str, params: &[Value]) -> StoreResult<Option<Value>> {
        query_scalar(self, sql, params)
    }

    fn execute_mutation(&self, sql: &str, params: &[Value]) -> StoreResult<u64> {
        execute_changes(self, sql, params)
    }
}

impl Store for Transaction<'_> {
    fn execute(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
        query_rows(self, sql, params)
    }

    fn execute_scalar(&self, sql: &str, params: &[Value]) -> StoreResult<Option<Value>> {
        query_scalar(self, sql, params)
    }

    fn execute_mutation(&self, sql: &str, params: &[Value]) -> StoreResult<u64> {
        execute_changes(self, sql, params)
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into();

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            values.push(value_from_ref(row.get_ref(index)?));
        }
        result.push(Row::new(Arc::clone(&columns), values));
    }

    Ok(result)
}

fn query_scalar(conn: &Connection, sql: &str, params: &[Value]) -> StoreResult<Option<Value>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    match rows.next()? {
        Some(row) => Ok(Some(value_from_ref(row.get_ref(0)?))),
        None => Ok(None),
    }
}

fn execute_changes(conn: &Connection, sql: &str, params: &[Value]) -> StoreResult<u64> {
    let mut stmt = conn.prepare_cached(sql)?;
    let changed = stmt.execute(params_from_iter(params.iter()))?;
    Ok(changed as u64)
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Real(value),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}
