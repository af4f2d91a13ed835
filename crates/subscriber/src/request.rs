//! Subscribe request
//!
//! Everything `StreamingClient::subscribe` needs for one topic. Defaults match
//! the config-file defaults: newest rows, no buffering, 1s throttle, 100ms
//! resubscribe interval.

use std::fmt;
use std::time::Duration;

use contracts::{
    MessageHandler, SiteAddr, StreamError, SubscriptionConfig, SubscriptionFilter, Topic,
};
use stream_deserializer::StreamDeserializer;

/// Parameters of one subscription
#[derive(Clone)]
pub struct SubscribeRequest {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) table: String,
    pub(crate) action: String,
    pub(crate) offset: i64,
    pub(crate) resub: bool,
    pub(crate) filter: Option<SubscriptionFilter>,
    pub(crate) msg_as_table: bool,
    pub(crate) batch_size: i64,
    pub(crate) throttle: f64,
    pub(crate) backup_sites: Vec<SiteAddr>,
    pub(crate) resubscribe_interval: Duration,
    pub(crate) sub_once: bool,
    pub(crate) deserializer: Option<StreamDeserializer>,
    pub(crate) handler: MessageHandler,
}

impl SubscribeRequest {
    /// New request for `host:port/table` with default options
    pub fn new(
        host: impl Into<String>,
        port: u16,
        table: impl Into<String>,
        handler: MessageHandler,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            table: table.into(),
            action: String::new(),
            offset: -1,
            resub: false,
            filter: None,
            msg_as_table: false,
            batch_size: 0,
            throttle: 1.0,
            backup_sites: Vec::new(),
            resubscribe_interval: Duration::from_millis(100),
            sub_once: false,
            deserializer: None,
            handler,
        }
    }

    /// Build from a config-file entry
    ///
    /// # Errors
    /// A backup site that is not `host:port`.
    pub fn from_config(
        config: &SubscriptionConfig,
        deserializer: Option<StreamDeserializer>,
        handler: MessageHandler,
    ) -> Result<Self, StreamError> {
        let backup_sites = config
            .backup_sites
            .iter()
            .map(|s| s.parse::<SiteAddr>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            table: config.table.clone(),
            action: config.action.clone(),
            offset: config.offset,
            resub: config.resub,
            filter: config.filter.clone(),
            msg_as_table: config.msg_as_table,
            batch_size: config.batch_size,
            throttle: config.throttle,
            backup_sites,
            resubscribe_interval: Duration::from_millis(config.resubscribe_interval_ms),
            sub_once: config.sub_once,
            deserializer,
            handler,
        })
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// First offset to deliver; -1 means rows published after subscribing
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Replace an existing subscription of the same topic and keep
    /// retrying when the initial connection fails
    pub fn resub(mut self, resub: bool) -> Self {
        self.resub = resub;
        self
    }

    pub fn filter(mut self, filter: SubscriptionFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn msg_as_table(mut self, msg_as_table: bool) -> Self {
        self.msg_as_table = msg_as_table;
        self
    }

    /// Rows per handler call; `<= 0` delivers every arrival immediately
    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Seconds a partial batch may wait
    pub fn throttle(mut self, seconds: f64) -> Self {
        self.throttle = seconds;
        self
    }

    pub fn backup_sites(mut self, sites: impl IntoIterator<Item = SiteAddr>) -> Self {
        self.backup_sites = sites.into_iter().collect();
        self
    }

    pub fn resubscribe_interval_ms(mut self, millis: u64) -> Self {
        self.resubscribe_interval = Duration::from_millis(millis);
        self
    }

    /// Never return to a site once failed over away from it
    pub fn sub_once(mut self, sub_once: bool) -> Self {
        self.sub_once = sub_once;
        self
    }

    pub fn deserializer(mut self, deserializer: StreamDeserializer) -> Self {
        self.deserializer = Some(deserializer);
        self
    }

    pub fn topic(&self) -> Topic {
        Topic::new(&self.host, self.port, &self.table, &self.action)
    }

    pub fn primary_site(&self) -> SiteAddr {
        SiteAddr::new(&self.host, self.port)
    }

    /// Check caller-supplied values before anything is registered
    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        let context = || self.topic().to_string();
        if self.host.is_empty() {
            return Err(StreamError::configuration(context(), "host cannot be empty"));
        }
        if self.port == 0 {
            return Err(StreamError::configuration(context(), "port must be > 0"));
        }
        if self.table.is_empty() {
            return Err(StreamError::configuration(context(), "table name cannot be empty"));
        }
        if self.offset < -1 {
            return Err(StreamError::configuration(
                context(),
                format!("offset must be >= -1, got {}", self.offset),
            ));
        }
        if !self.throttle.is_finite() || self.throttle < 0.0 {
            return Err(StreamError::configuration(
                context(),
                format!("throttle must be a non-negative number, got {}", self.throttle),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("topic", &self.topic().to_string())
            .field("offset", &self.offset)
            .field("resub", &self.resub)
            .field("batch_size", &self.batch_size)
            .field("throttle", &self.throttle)
            .field("backup_sites", &self.backup_sites)
            .field("sub_once", &self.sub_once)
            .field("demux", &self.deserializer.is_some())
            .finish_non_exhaustive()
    }
}
