//! Layered error definitions
//!
//! Categorized by source: config / identity / connection / demux / handler

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum StreamError {
    // ===== Configuration Errors =====
    /// Configuration file parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration file validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// Malformed subscription or deserializer configuration
    #[error("configuration error for '{context}': {message}")]
    Configuration { context: String, message: String },

    // ===== Identity Errors =====
    /// Topic already subscribed and resubscription was not requested
    #[error("topic already subscribed: {topic}")]
    DuplicateSubscription { topic: String },

    // ===== Connection Errors =====
    /// Initial connection or subscribe request failed
    #[error("connection to {site} failed: {message}")]
    Connection { site: String, message: String },

    /// Every site was tried and none remain
    #[error("all sites exhausted for topic {topic}")]
    SiteExhaustion { topic: String },

    // ===== Demux Errors =====
    /// Row discriminator has no entry in the deserializer mapping
    #[error("unknown tag '{tag}' in stream row")]
    UnknownTag { tag: String },

    /// Row width does not fit the target schema of its tag
    #[error("row for tag '{tag}' has {actual} columns, schema expects {expected}")]
    SchemaMismatch {
        tag: String,
        expected: usize,
        actual: usize,
    },

    // ===== Handler Errors =====
    /// User handler returned an error or panicked
    #[error("handler for topic {topic} failed: {message}")]
    Handler { topic: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create subscription/deserializer configuration error
    pub fn configuration(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create connection error
    pub fn connection(site: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            site: site.into(),
            message: message.into(),
        }
    }

    /// Create handler error
    pub fn handler(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            topic: topic.into(),
            message: message.into(),
        }
    }
}
