//! Target schema references for stream demultiplexing

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::StreamError;

/// Where rows of one tag are reinterpreted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSchemaRef {
    /// `(namespace, table)`
    Simple { namespace: String, table: String },

    /// `(namespace, table, start_offset)`: rows below `start_offset` are skipped
    WithOffset {
        namespace: String,
        table: String,
        start_offset: i64,
    },
}

impl TargetSchemaRef {
    pub fn simple(namespace: impl Into<String>, table: impl Into<String>) -> Self {
        Self::Simple {
            namespace: namespace.into(),
            table: table.into(),
        }
    }

    pub fn with_offset(
        namespace: impl Into<String>,
        table: impl Into<String>,
        start_offset: i64,
    ) -> Self {
        Self::WithOffset {
            namespace: namespace.into(),
            table: table.into(),
            start_offset,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Simple { namespace, .. } | Self::WithOffset { namespace, .. } => namespace,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Simple { table, .. } | Self::WithOffset { table, .. } => table,
        }
    }

    pub fn start_offset(&self) -> Option<i64> {
        match self {
            Self::Simple { .. } => None,
            Self::WithOffset { start_offset, .. } => Some(*start_offset),
        }
    }

    /// Parse a dynamically shaped mapping value
    ///
    /// Accepted shapes:
    /// - `"table"` (empty namespace)
    /// - `["namespace", "table"]`
    /// - `["namespace", "table", start_offset]`
    ///
    /// # Errors
    /// Returns `StreamError::Configuration` naming `tag` and the malformed value.
    pub fn from_value(tag: &str, value: &serde_json::Value) -> Result<Self, StreamError> {
        use serde_json::Value as Json;

        let context = format!("tag '{tag}' -> {value}");
        match value {
            Json::String(table) => Ok(Self::simple("", table.clone())),
            Json::Array(items) => {
                if items.len() != 2 && items.len() != 3 {
                    return Err(StreamError::configuration(
                        context,
                        format!("tuple size must be 2 or 3, got {}", items.len()),
                    ));
                }
                let text = |idx: usize, what: &str| {
                    items[idx].as_str().map(str::to_string).ok_or_else(|| {
                        StreamError::configuration(&context, format!("{what} must be a string"))
                    })
                };
                let namespace = text(0, "namespace")?;
                let table = text(1, "table name")?;
                if table.is_empty() {
                    return Err(StreamError::configuration(
                        &context,
                        "table name cannot be empty",
                    ));
                }
                match items.get(2) {
                    None => Ok(Self::simple(namespace, table)),
                    Some(offset) => {
                        let start_offset = offset.as_i64().filter(|o| *o >= 0).ok_or_else(|| {
                            StreamError::configuration(
                                &context,
                                "start offset must be a non-negative integer",
                            )
                        })?;
                        Ok(Self::with_offset(namespace, table, start_offset))
                    }
                }
            }
            _ => Err(StreamError::configuration(
                context,
                "unsupported type in dict, support string, list and tuple",
            )),
        }
    }
}

impl fmt::Display for TargetSchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple { namespace, table } => write!(f, "({namespace:?}, {table:?})"),
            Self::WithOffset {
                namespace,
                table,
                start_offset,
            } => write!(f, "({namespace:?}, {table:?}, {start_offset})"),
        }
    }
}
