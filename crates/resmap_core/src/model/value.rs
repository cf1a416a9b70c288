//! Storage-neutral attribute values.
//!
//! # Responsibility
//! - Define the value shape carried by resources and backing records.
//! - Convert between Rust scalars, SQLite values and attribute values.
//!
//! # Invariants
//! - `Null` is the read-back value for every attribute that was never set.
//! - Conversions to SQLite are lossless for every variant.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Attribute name to value mapping, ordered by name.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// SQLite `IS` equality: numeric across `Integer`/`Real`, bytewise for
    /// text and blobs, and `Null` equal to `Null`.
    pub fn same_as(&self, other: &AttrValue) -> bool {
        ValueKey::from(self) == ValueKey::from(other)
    }

    /// Integer values `0`/`1` read back as booleans.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Integer(0) => Some(false),
            Self::Integer(1) => Some(true),
            _ => None,
        }
    }
}

/// Hashable comparison form of an [`AttrValue`].
///
/// Whole reals collapse onto the integer they equal so `1` and `1.0` share
/// one key, as they do under a SQLite `UNIQUE` index on untyped columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&AttrValue> for ValueKey {
    fn from(value: &AttrValue) -> Self {
        match value {
            AttrValue::Null => Self::Null,
            AttrValue::Integer(value) => Self::Integer(*value),
            AttrValue::Real(value) => match whole_real(*value) {
                Some(integer) => Self::Integer(integer),
                None => Self::Real(value.to_bits()),
            },
            AttrValue::Text(value) => Self::Text(value.clone()),
            AttrValue::Blob(value) => Self::Blob(value.clone()),
        }
    }
}

fn whole_real(value: f64) -> Option<i64> {
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
    if value.is_finite() && value.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&value) {
        Some(value as i64)
    } else {
        None
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
            Self::Blob(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Integer(if value { 1 } else { 0 })
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Integer(value) => Self::Integer(value),
            Value::Real(value) => Self::Real(value),
            Value::Text(value) => Self::Text(value),
            Value::Blob(value) => Self::Blob(value),
        }
    }
}

impl ToSql for AttrValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Self::Null => ValueRef::Null,
            Self::Integer(value) => ValueRef::Integer(*value),
            Self::Real(value) => ValueRef::Real(*value),
            Self::Text(value) => ValueRef::Text(value.as_bytes()),
            Self::Blob(value) => ValueRef::Blob(value.as_slice()),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

impl FromSql for AttrValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(Value::from(value).into())
    }
}

/// Builds an [`AttrMap`] from `name => value` pairs.
#[macro_export]
macro_rules! attrs {
    () => {
        $crate::model::value::AttrMap::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::model::value::AttrMap::new();
        $(
            map.insert(
                ::std::string::String::from($name),
                $crate::model::value::AttrValue::from($value),
            );
        )+
        map
    }};
}
