//! Scalar values, dynamic rows, and execution results.
//!
//! Rows at the in-memory tier have no enforced schema: the columns are
//! whatever the statement supplied. [`Row`] is therefore an insertion-ordered
//! mapping from column name to [`SqlValue`], never a fixed struct.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A single scalar cell value.
///
/// Booleans are stored as integers (0/1), matching how the relational
/// backends represent them.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Build a value from a JSON scalar as returned by the remote endpoint.
    ///
    /// Arrays and objects are carried as their JSON text; the application
    /// schema stores nested data as serialized JSON columns.
    pub(crate) fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .unwrap_or_else(|| Self::Real(n.as_f64().unwrap_or(0.0))),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    /// Textual form used for equality filters (string-coerced comparison).
    pub(crate) fn filter_text(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Integer(v) => v.to_string(),
            Self::Real(v) => v.to_string(),
            Self::Text(v) => v.clone(),
        }
    }

    /// Numeric form used for literal comparisons. Non-numeric text yields
    /// `None` and the comparison fails.
    pub(crate) fn filter_number(&self) -> Option<f64> {
        match self {
            Self::Null => Some(0.0),
            Self::Integer(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Text(v) => v.trim().parse().ok(),
        }
    }

    /// Whether the value counts as an absent row identifier.
    pub(crate) fn is_empty_id(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Integer(v) => *v == 0,
            Self::Real(v) => *v == 0.0,
            Self::Text(v) => v.is_empty(),
        }
    }

    /// The value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// The value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Integer(v) => serializer.serialize_i64(*v),
            Self::Real(v) => serializer.serialize_f64(*v),
            Self::Text(v) => serializer.serialize_str(v),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Build a positional parameter list for [`crate::Statement`] execution.
///
/// ```
/// use pitstop_db::params;
///
/// let args = params!["u1", "a@x.com", 42];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::SqlValue>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::SqlValue::from($value)),+]
    };
}

// =============================================================================
// Rows
// =============================================================================

/// A result row: column names mapped to scalar values, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing an existing value in place or appending.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.columns.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.columns.push((name, value));
        }
    }

    /// Get a column value by name.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Iterate over `(name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Build a row from a JSON object as returned by the remote endpoint.
    /// Non-object values produce an empty row.
    pub(crate) fn from_json(value: &serde_json::Value) -> Self {
        let mut row = Self::new();
        if let Some(object) = value.as_object() {
            for (name, v) in object {
                row.set(name.clone(), SqlValue::from_json(v));
            }
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut row = Self::new();
        for (name, value) in iter {
            row.set(name, value);
        }
        row
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    /// Number of rows affected.
    pub changes: u64,
    /// Generated or provided identifier, for inserts.
    pub last_insert_id: Option<SqlValue>,
}
