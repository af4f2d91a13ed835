//! Stream deserializer configuration
//!
//! An immutable `tag -> TargetSchemaRef` table, validated once at
//! construction and shared read-only by every subscription that uses it.

use std::collections::BTreeMap;
use std::sync::Arc;

use contracts::{StreamError, TableSchema, TagMappingConfig, TargetSchemaRef};
use tracing::{debug, warn};

use crate::demux::{ResolvedDeserializer, ResolvedTag};

/// Demultiplexing table of one physical stream
///
/// Cheap to clone; clones share the same mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDeserializer {
    mapping: Arc<BTreeMap<String, TargetSchemaRef>>,
}

impl StreamDeserializer {
    /// Build from already typed entries
    ///
    /// # Errors
    /// `StreamError::Configuration` when the mapping is empty, a tag is empty
    /// or repeated, or a target table name is empty.
    pub fn new<I, S>(entries: I) -> Result<Self, StreamError>
    where
        I: IntoIterator<Item = (S, TargetSchemaRef)>,
        S: Into<String>,
    {
        let mut mapping = BTreeMap::new();
        for (tag, target) in entries {
            let tag = tag.into();
            if tag.is_empty() {
                return Err(StreamError::configuration(
                    format!("tag '' -> {target}"),
                    "tag cannot be empty",
                ));
            }
            if target.table().is_empty() {
                return Err(StreamError::configuration(
                    format!("tag '{tag}' -> {target}"),
                    "table name cannot be empty",
                ));
            }
            if mapping.contains_key(&tag) {
                return Err(StreamError::configuration(
                    format!("tag '{tag}'"),
                    "duplicate tag in mapping",
                ));
            }
            mapping.insert(tag, target);
        }
        if mapping.is_empty() {
            return Err(StreamError::configuration(
                "stream deserializer",
                "tag mapping cannot be empty",
            ));
        }
        Ok(Self {
            mapping: Arc::new(mapping),
        })
    }

    /// Build from a dynamically shaped mapping (config files)
    ///
    /// Each value may be `"table"`, `[namespace, table]` or
    /// `[namespace, table, start_offset]`.
    pub fn from_values(mapping: &TagMappingConfig) -> Result<Self, StreamError> {
        let entries = mapping
            .iter()
            .map(|(tag, value)| Ok((tag.clone(), TargetSchemaRef::from_value(tag, value)?)))
            .collect::<Result<Vec<_>, StreamError>>()?;
        Self::new(entries)
    }

    /// Target of `tag`, if mapped
    pub fn target(&self, tag: &str) -> Option<&TargetSchemaRef> {
        self.mapping.get(tag)
    }

    /// Mapped tags in sorted order
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.mapping.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Resolve every target to a concrete column layout
    ///
    /// A target whose schema cannot be fetched stays unresolved: its rows are
    /// still routed but their width is not checked.
    pub fn resolve<F, E>(&self, mut fetch: F) -> ResolvedDeserializer
    where
        F: FnMut(&TargetSchemaRef) -> Result<TableSchema, E>,
        E: std::fmt::Display,
    {
        let tags = self
            .mapping
            .iter()
            .map(|(tag, target)| {
                let schema = match fetch(target) {
                    Ok(schema) => {
                        debug!(tag = %tag, target = %target, width = schema.width(), "schema resolved");
                        Some(schema)
                    }
                    Err(e) => {
                        warn!(tag = %tag, target = %target, error = %e, "schema unresolved, width check disabled");
                        None
                    }
                };
                (
                    tag.clone(),
                    ResolvedTag {
                        target: target.clone(),
                        schema,
                    },
                )
            })
            .collect();
        ResolvedDeserializer::new(tags)
    }
}
