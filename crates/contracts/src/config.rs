//! StreamingConfig - Config Loader 输出
//!
//! 描述完整的订阅配置：客户端运行时、订阅列表、流反序列化映射。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Credentials;

/// Raw tag mapping of one deserializer: `tag -> shape`
///
/// Kept dynamic so that malformed shapes are reported with the deserializer's
/// own error messages instead of a generic serde error.
pub type TagMappingConfig = BTreeMap<String, serde_json::Value>;

/// Complete streaming configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Client runtime settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Subscriptions to establish
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Named stream deserializers
    #[serde(default)]
    pub deserializers: BTreeMap<String, TagMappingConfig>,
}

/// Client runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Receiver threads; 1 selects the single-threaded runtime
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    /// Upper bound for one receive wait, milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Login credentials for every connection
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

fn default_thread_count() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            poll_interval_ms: default_poll_interval_ms(),
            credentials: None,
        }
    }
}

/// One subscription as written in a config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Primary server host
    pub host: String,

    /// Primary server port
    pub port: u16,

    /// Stream table name
    pub table: String,

    /// Action name (part of the topic identity)
    #[serde(default)]
    pub action: String,

    /// Starting offset; -1 means rows published after subscribing
    #[serde(default = "default_offset")]
    pub offset: i64,

    /// Replace an existing subscription and retry failed initial connects
    #[serde(default)]
    pub resub: bool,

    /// Filter values forwarded to the server
    #[serde(default)]
    pub filter: Option<crate::SubscriptionFilter>,

    /// Deliver tabular payloads instead of column lists
    #[serde(default)]
    pub msg_as_table: bool,

    /// Rows per handler call; <= 0 disables buffering
    #[serde(default)]
    pub batch_size: i64,

    /// Seconds a partial batch may wait before being flushed
    #[serde(default = "default_throttle")]
    pub throttle: f64,

    /// Alternate sites formatted `host:port`
    #[serde(default)]
    pub backup_sites: Vec<String>,

    /// Wait between reconnect attempts, milliseconds
    #[serde(default = "default_resubscribe_interval_ms")]
    pub resubscribe_interval_ms: u64,

    /// Never return to a site once failed over away from it
    #[serde(default)]
    pub sub_once: bool,

    /// Name of an entry in `StreamingConfig::deserializers`
    #[serde(default)]
    pub deserializer: Option<String>,
}

fn default_offset() -> i64 {
    -1
}

fn default_throttle() -> f64 {
    1.0
}

fn default_resubscribe_interval_ms() -> u64 {
    100
}

impl SubscriptionConfig {
    /// Minimal subscription with every optional field at its default
    pub fn new(host: impl Into<String>, port: u16, table: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            table: table.into(),
            action: String::new(),
            offset: default_offset(),
            resub: false,
            filter: None,
            msg_as_table: false,
            batch_size: 0,
            throttle: default_throttle(),
            backup_sites: Vec::new(),
            resubscribe_interval_ms: default_resubscribe_interval_ms(),
            sub_once: false,
            deserializer: None,
        }
    }

    /// Canonical topic string
    pub fn topic_string(&self) -> String {
        format!("{}/{}/{}/{}", self.host, self.port, self.table, self.action)
    }
}
