//! # Stream Deserializer
//!
//! Splits one physical stream into logical sub-streams by a trailing tag column.
//!
//! Responsibilities:
//! - Validate the `tag -> (namespace, table[, start_offset])` mapping eagerly
//! - Resolve target schemas once per subscription
//! - Route each row to its tag, dropping unknown tags and malformed rows
//!
//! ## Usage Example
//!
//! ```ignore
//! use stream_deserializer::{RowRoute, StreamDeserializer};
//! use contracts::TargetSchemaRef;
//!
//! let de = StreamDeserializer::new([
//!     ("msg1", TargetSchemaRef::simple("", "t1")),
//!     ("msg2", TargetSchemaRef::simple("", "t2")),
//! ])?;
//!
//! let resolved = de.resolve(|target| core.fetch_schema(&conn, target.namespace(), target.table()));
//! match resolved.route(offset, row)? {
//!     RowRoute::Routed { tag, row } => { /* feed the tag's batcher */ }
//!     RowRoute::Skipped { .. } => {}
//! }
//! ```

mod demux;
mod deserializer;

pub use demux::{ResolvedDeserializer, ResolvedTag, RowRoute};
pub use deserializer::StreamDeserializer;
