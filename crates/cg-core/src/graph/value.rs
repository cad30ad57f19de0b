//! Property values stored on graph nodes

use std::collections::BTreeMap;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// Property bag of a node, ordered by key
pub type Properties = BTreeMap<String, PropertyValue>;

/// A single property value
///
/// Mirrors SQLite's storage classes so that whatever is written comes back
/// with the same type: byte payloads stay blobs, strings stay text.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Blob(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// SQLite storage class name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "null",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Real(_) => "real",
            PropertyValue::Text(_) => "text",
            PropertyValue::Blob(_) => "blob",
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Real(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        PropertyValue::Blob(value)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PropertyValue::Null, Into::into)
    }
}

impl ToSql for PropertyValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            PropertyValue::Null => ValueRef::Null,
            PropertyValue::Integer(i) => ValueRef::Integer(*i),
            PropertyValue::Real(f) => ValueRef::Real(*f),
            PropertyValue::Text(s) => ValueRef::Text(s.as_bytes()),
            PropertyValue::Blob(b) => ValueRef::Blob(b.as_slice()),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

impl FromSql for PropertyValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => PropertyValue::Null,
            ValueRef::Integer(i) => PropertyValue::Integer(i),
            ValueRef::Real(f) => PropertyValue::Real(f),
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                PropertyValue::Text(text.to_string())
            }
            ValueRef::Blob(bytes) => PropertyValue::Blob(bytes.to_vec()),
        })
    }
}
