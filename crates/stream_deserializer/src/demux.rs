//! Per-row demultiplexing
//!
//! Each physical row carries its discriminator in the trailing column. The
//! tag is stripped and the payload checked against the tag's target schema.

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{Row, StreamError, TableSchema, TargetSchemaRef, Value};

/// One tag after schema resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTag {
    pub target: TargetSchemaRef,
    /// `None` when the schema could not be fetched
    pub schema: Option<TableSchema>,
}

impl ResolvedTag {
    /// Column names to present payload rows under
    ///
    /// Falls back to the physical columns without the discriminator.
    pub fn columns(&self, physical: &[String]) -> Vec<String> {
        match &self.schema {
            Some(schema) => schema.columns.clone(),
            None => physical
                .split_last()
                .map(|(_, rest)| rest.to_vec())
                .unwrap_or_default(),
        }
    }
}

/// Where a single row goes
#[derive(Debug, Clone, PartialEq)]
pub enum RowRoute {
    /// Payload for `tag`, discriminator removed
    Routed { tag: Arc<str>, row: Row },

    /// Row precedes the tag's `start_offset`
    Skipped { tag: Arc<str> },
}

/// Deserializer bound to one subscription's resolved schemas
///
/// Owned by the delivery thread of that subscription.
#[derive(Debug, Clone)]
pub struct ResolvedDeserializer {
    tags: HashMap<Arc<str>, ResolvedTag>,
}

impl ResolvedDeserializer {
    pub(crate) fn new(tags: Vec<(String, ResolvedTag)>) -> Self {
        Self {
            tags: tags
                .into_iter()
                .map(|(tag, resolved)| (Arc::from(tag), resolved))
                .collect(),
        }
    }

    pub fn tag(&self, tag: &str) -> Option<&ResolvedTag> {
        self.tags.get(tag)
    }

    /// Route one row published at stream offset `offset`
    ///
    /// # Errors
    /// - `UnknownTag`: missing or unmapped discriminator
    /// - `SchemaMismatch`: payload width differs from the resolved schema
    pub fn route(&self, offset: i64, mut row: Row) -> Result<RowRoute, StreamError> {
        let tag_value = row.pop().ok_or_else(|| StreamError::UnknownTag {
            tag: String::new(),
        })?;
        let tag_text = match &tag_value {
            Value::String(s) => s.as_str(),
            other => {
                return Err(StreamError::UnknownTag {
                    tag: other.to_string(),
                })
            }
        };
        let (tag, resolved) =
            self.tags
                .get_key_value(tag_text)
                .ok_or_else(|| StreamError::UnknownTag {
                    tag: tag_text.to_string(),
                })?;

        if let Some(start) = resolved.target.start_offset() {
            if offset < start {
                return Ok(RowRoute::Skipped { tag: tag.clone() });
            }
        }
        if let Some(schema) = &resolved.schema {
            if schema.width() != row.len() {
                return Err(StreamError::SchemaMismatch {
                    tag: tag.to_string(),
                    expected: schema.width(),
                    actual: row.len(),
                });
            }
        }
        Ok(RowRoute::Routed {
            tag: tag.clone(),
            row,
        })
    }
}
