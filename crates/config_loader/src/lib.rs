//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `StreamingConfig`
//! - Build the named `StreamDeserializer`s a config refers to
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("subscriptions.toml")).unwrap();
//! println!("Subscriptions: {}", config.subscriptions.len());
//! ```

mod parser;
mod validator;

pub use contracts::StreamingConfig;
pub use parser::ConfigFormat;

use std::collections::BTreeMap;
use std::path::Path;

use contracts::StreamError;
use stream_deserializer::StreamDeserializer;
use tracing::debug;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<StreamingConfig, StreamError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        debug!(path = %path.display(), ?format, "loading config");
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<StreamingConfig, StreamError> {
        Self::parse_and_validate(content, format)
    }

    /// Serialize StreamingConfig to TOML string
    pub fn to_toml(config: &StreamingConfig) -> Result<String, StreamError> {
        toml::to_string_pretty(config)
            .map_err(|e| StreamError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize StreamingConfig to JSON string
    pub fn to_json(config: &StreamingConfig) -> Result<String, StreamError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| StreamError::config_parse(format!("JSON serialize error: {e}")))
    }

    /// Build every named deserializer of a validated config
    pub fn build_deserializers(
        config: &StreamingConfig,
    ) -> Result<BTreeMap<String, StreamDeserializer>, StreamError> {
        config
            .deserializers
            .iter()
            .map(|(name, mapping)| Ok((name.clone(), StreamDeserializer::from_values(mapping)?)))
            .collect()
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, StreamError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            StreamError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            StreamError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, StreamError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<StreamingConfig, StreamError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }
}
