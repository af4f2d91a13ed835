//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Offset Model
//! - Every stream row has a zero-based offset assigned by the publisher
//! - `-1` as a requested offset means "the next row published after subscribing"

mod config;
mod error;
mod message;
mod row;
mod schema_ref;
mod state;
mod topic;

pub use config::*;
pub use error::*;
pub use message::*;
pub use row::*;
pub use schema_ref::TargetSchemaRef;
pub use state::*;
pub use topic::*;
