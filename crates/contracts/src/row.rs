//! Row data as produced by the native core
//!
//! Column values are already decoded; the wire encoding is owned by the core.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A single decoded column value
///
/// Serialized untagged so config files can write filters as plain lists
/// (`[1, "AAPL"]`). Timestamps read back from text come out as `Int`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Nanoseconds since Unix epoch
    Timestamp(i64),
    /// Opaque binary column (zero-copy)
    Blob(Bytes),
}

impl Value {
    /// Borrow the value as a string, if it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Timestamp(ns) => write!(f, "{ns}ns"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// One stream row: ordered column values
pub type Row = Vec<Value>;

/// Server-side filter: rows whose key column equals one of these values
pub type SubscriptionFilter = Vec<Value>;

/// Micro-batch returned by one receive call
#[derive(Debug, Clone)]
pub struct RawRowBatch {
    /// Stream offset of `rows[0]`
    pub offset: i64,

    /// Column names of the physical stream table
    pub columns: Arc<[String]>,

    /// Rows in publication order
    pub rows: Vec<Row>,
}

impl RawRowBatch {
    /// Offset that the next batch is expected to start at
    pub fn next_offset(&self) -> i64 {
        self.offset + self.rows.len() as i64
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Column layout of a named table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Namespace (database path); empty for shared in-memory tables
    pub namespace: String,

    /// Table name
    pub table: String,

    /// Column names in order
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn new(namespace: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            namespace: namespace.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// Tabular payload handed to handlers when `msg_as_table` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Extract one column by name
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|r| r.get(idx)).collect())
    }
}
