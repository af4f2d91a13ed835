//! Native core error types

use contracts::{SiteAddr, StreamError};
use thiserror::Error;

/// Native core specific error
#[derive(Debug, Error)]
pub enum CoreError {
    /// Site unreachable or refused the connection
    #[error("connection to {site} refused: {message}")]
    ConnectionRefused { site: SiteAddr, message: String },

    /// Login rejected
    #[error("authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Handle does not refer to a live connection
    #[error("connection {id} is not open")]
    NotConnected { id: u64 },

    /// Server rejected the subscribe request
    #[error("subscribe to '{table}' rejected: {message}")]
    SubscribeRejected { table: String, message: String },

    /// Schema lookup failed
    #[error("schema not found for table '{table}' in namespace '{namespace}'")]
    SchemaNotFound { namespace: String, table: String },
}

impl CoreError {
    /// Create connection refused error
    pub fn refused(site: &SiteAddr, message: impl Into<String>) -> Self {
        Self::ConnectionRefused {
            site: site.clone(),
            message: message.into(),
        }
    }

    /// Create subscribe rejected error
    pub fn subscribe_rejected(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubscribeRejected {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Convert into the caller-facing connection error for `site`
    pub fn into_stream_error(self, site: &SiteAddr) -> StreamError {
        StreamError::connection(site.to_string(), self.to_string())
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, CoreError>;
