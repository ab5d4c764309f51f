//! Engine-neutral values, semantic field types and call arguments.
//!
//! # Responsibility
//! - Represent every value bound to or read from the store.
//! - Convert between Rust types and stored values without panicking.
//!
//! # Invariants
//! - `Value` mirrors SQL storage classes; booleans and UUIDs are encoded as
//!   integers and text respectively.
//! - Conversion failures are reported, never coerced silently.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// One value bound to a statement or read from a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Stable storage-class name used in mapping diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::Blob(bytes) => write!(f, "<blob {} bytes>", bytes.len()),
        }
    }
}

/// Semantic type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Real,
    Text,
    /// Stored as integer `0`/`1`.
    Boolean,
    /// Stored as hyphenated lowercase text.
    Uuid,
    Blob,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Uuid => "uuid",
            Self::Blob => "blob",
        }
    }

    /// Returns whether `value` can be stored in a field of this type.
    ///
    /// `Null` is accepted everywhere; nullability is a schema concern.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Real, Value::Real(_) | Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Integer(0 | 1)) => true,
            (Self::Uuid, Value::Text(text)) => Uuid::parse_str(text).is_ok(),
            (Self::Blob, Value::Blob(_)) => true,
            _ => false,
        }
    }

    /// Returns whether arithmetic assignments (`field = field + ?`) apply.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }
}

/// Conversion of Rust values into bindable [`Value`]s.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Conversion of stored [`Value`]s into Rust values.
///
/// Returns `None` when the stored value has an incompatible storage class or
/// is out of range; callers turn that into a mapping error with context.
pub trait FromValue: Sized {
    /// Human-readable expected type for diagnostics.
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(value) => value.to_value(),
            None => Value::Null,
        }
    }
}

impl ToValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl ToValue for i32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl ToValue for u32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Real(*self)
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl ToValue for Uuid {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl ToValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }
}

impl FromValue for Value {
    const EXPECTED: &'static str = "any";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    const EXPECTED: &'static str = "integer (i32)";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(value) => i32::try_from(*value).ok(),
            _ => None,
        }
    }
}

impl FromValue for u32 {
    const EXPECTED: &'static str = "integer (u32)";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(value) => u32::try_from(*value).ok(),
            _ => None,
        }
    }
}

impl FromValue for u64 {
    const EXPECTED: &'static str = "integer (u64)";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "real";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(value) => Some(*value),
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "boolean (0|1)";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(0) => Some(false),
            Value::Integer(1) => Some(true),
            _ => None,
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "text";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl FromValue for Uuid {
    const EXPECTED: &'static str = "uuid text";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(value) => Uuid::parse_str(value).ok(),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    const EXPECTED: &'static str = "blob";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }
}

/// One operation argument.
///
/// Positional binding: the n-th argument binds the n-th declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Scalar(Value),
    /// Bound to an `IN (...)` position; expands to one marker per element.
    List(Vec<Value>),
}

impl Arg {
    /// Builds a collection argument from any iterable of bindable values.
    pub fn list<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToValue,
    {
        Self::List(values.into_iter().map(|value| value.to_value()).collect())
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

impl<T: ToValue> From<T> for Arg {
    fn from(value: T) -> Self {
        Self::Scalar(value.to_value())
    }
}

/// Builds an argument slice for repository calls.
///
/// ```ignore
/// repo.find_list(&conn, "findByUsernameAndAgeGreaterThan", args!["AAA", 15])?;
/// repo.find_list(&conn, "findByUsernameIn", args![Arg::list(["AAA", "BBB"])])?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        &[] as &[$crate::Arg]
    };
    ($($arg:expr),+ $(,)?) => {
        &[$($crate::Arg::from($arg)),+] as &[$crate::Arg]
    };
}

#[cfg(test)]
mod tests {
    use super::{Arg, FieldType, FromValue, ToValue, Value};
    use uuid::Uuid;

    #[test]
    fn option_maps_null_to_none() {
        assert_eq!(Option::<i64>::from_value(&Value::Null), Some(None));
        assert_eq!(Option::<i64>::from_value(&Value::Integer(4)), Some(Some(4)));
        assert_eq!(i64::from_value(&Value::Null), None);
    }

    #[test]
    fn narrow_integers_reject_out_of_range_values() {
        assert_eq!(i32::from_value(&Value::Integer(i64::MAX)), None);
        assert_eq!(u32::from_value(&Value::Integer(-1)), None);
        assert_eq!(u32::from_value(&Value::Integer(7)), Some(7));
    }

    #[test]
    fn booleans_and_uuids_use_storage_encodings() {
        assert_eq!(true.to_value(), Value::Integer(1));
        assert_eq!(bool::from_value(&Value::Integer(2)), None);

        let id = Uuid::new_v4();
        assert_eq!(Uuid::from_value(&id.to_value()), Some(id));
        assert!(FieldType::Uuid.accepts(&id.to_value()));
        assert!(!FieldType::Uuid.accepts(&Value::Text("nope".to_string())));
    }

    #[test]
    fn args_macro_accepts_scalars_and_lists() {
        let args = args!["AAA", 15, Arg::list(["a", "b"])];
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], Arg::Scalar(Value::Text("AAA".to_string())));
        assert_eq!(args[1], Arg::Scalar(Value::Integer(15)));
        assert!(args[2].is_list());
    }
}
