// Values and Rows
//
// The value model shared by parameter binding, drivers and result delivery.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::common::types::SqlType;

/// A single SQL value, either bound to a placeholder or read from a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Date(String),
    Time(String),
    Timestamp(String),
    Blob(Vec<u8>),
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            DataValue::Null => {}
            DataValue::Integer(i) => i.hash(state),
            // floats hash by bit pattern
            DataValue::Float(f) => f.to_bits().hash(state),
            DataValue::Boolean(b) => b.hash(state),
            DataValue::Text(s) | DataValue::Date(s) | DataValue::Time(s) | DataValue::Timestamp(s) => s.hash(state),
            DataValue::Blob(b) => b.hash(state),
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Text(s) => write!(f, "\"{}\"", s),
            DataValue::Boolean(b) => write!(f, "{}", b),
            DataValue::Date(s) => write!(f, "DATE '{}'", s),
            DataValue::Time(s) => write!(f, "TIME '{}'", s),
            DataValue::Timestamp(s) => write!(f, "TIMESTAMP '{}'", s),
            DataValue::Blob(b) => write!(f, "BLOB ({} bytes)", b.len()),
        }
    }
}

impl DataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// The SQL type a value binds as when no type was declared for it
    pub fn natural_type(&self) -> Option<SqlType> {
        match self {
            DataValue::Null => None,
            DataValue::Integer(_) => Some(SqlType::BigInt),
            DataValue::Float(_) => Some(SqlType::Double),
            DataValue::Text(_) => Some(SqlType::Varchar),
            DataValue::Boolean(_) => Some(SqlType::Boolean),
            DataValue::Date(_) => Some(SqlType::Date),
            DataValue::Time(_) => Some(SqlType::Time),
            DataValue::Timestamp(_) => Some(SqlType::Timestamp),
            DataValue::Blob(_) => Some(SqlType::Blob),
        }
    }

    /// Short type label used in parameter log lines
    pub fn type_label(&self) -> &'static str {
        match self {
            DataValue::Null => "Null",
            DataValue::Integer(_) => "Integer",
            DataValue::Float(_) => "Float",
            DataValue::Text(_) => "Text",
            DataValue::Boolean(_) => "Boolean",
            DataValue::Date(_) => "Date",
            DataValue::Time(_) => "Time",
            DataValue::Timestamp(_) => "Timestamp",
            DataValue::Blob(_) => "Blob",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) | DataValue::Date(s) | DataValue::Time(s) | DataValue::Timestamp(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Integer(value)
    }
}

impl From<i32> for DataValue {
    fn from(value: i32) -> Self {
        DataValue::Integer(value as i64)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Float(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Boolean(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::Text(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::Text(value)
    }
}

impl From<Vec<u8>> for DataValue {
    fn from(value: Vec<u8>) -> Self {
        DataValue::Blob(value)
    }
}

impl<T: Into<DataValue>> From<Option<T>> for DataValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(DataValue::Null)
    }
}

/// One row as delivered by a driver.
///
/// Columns keep the order the driver reported them in. Duplicate names are
/// allowed, lookups by name return the first match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<DataValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a row from column names and values of equal length
    pub fn from_values(columns: Vec<String>, values: Vec<DataValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Row { columns, values }
    }

    /// Get a value by column name (case-insensitive)
    pub fn get(&self, column: &str) -> Option<&DataValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    /// Get a value by 0-based column index
    pub fn get_index(&self, index: usize) -> Option<&DataValue> {
        self.values.get(index)
    }

    /// Append a column to the row
    pub fn push(&mut self, column: impl Into<String>, value: DataValue) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[DataValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
