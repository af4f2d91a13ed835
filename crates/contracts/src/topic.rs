//! Topic and site identity
//!
//! A topic is keyed by `(host, port, table, action)` and rendered canonically
//! as `host/port/table/action`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::StreamError;

/// Server address as `host:port`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteAddr {
    pub host: String,
    pub port: u16,
}

impl SiteAddr {
    /// Create a new site address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for SiteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for SiteAddr {
    type Err = StreamError;

    /// Parse `host:port`; the port is taken after the last colon.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| StreamError::configuration(s, "site must be formatted host:port"))?;
        if host.is_empty() {
            return Err(StreamError::configuration(s, "site host cannot be empty"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| StreamError::configuration(s, format!("invalid port '{port}'")))?;
        if port == 0 {
            return Err(StreamError::configuration(s, "site port must be > 0"));
        }
        Ok(Self::new(host, port))
    }
}

/// Login credentials forwarded to every connection
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Identity of one subscription
///
/// Immutable once created. Two subscriptions with equal topics cannot be
/// active at the same time unless resubscription is requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    host: String,
    port: u16,
    table: String,
    action: String,
}

impl Topic {
    /// Create a topic from its four identity fields
    pub fn new(
        host: impl Into<String>,
        port: u16,
        table: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            table: table.into(),
            action: action.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// The primary site of this topic
    pub fn site(&self) -> SiteAddr {
        SiteAddr::new(self.host.clone(), self.port)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.host, self.port, self.table, self.action
        )
    }
}

impl FromStr for Topic {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Action names may be empty, so split into exactly four parts.
        let parts: Vec<&str> = s.splitn(4, '/').collect();
        let [host, port, table, action] = parts.as_slice() else {
            return Err(StreamError::configuration(
                s,
                "topic must be formatted host/port/table/action",
            ));
        };
        let port: u16 = port
            .parse()
            .map_err(|_| StreamError::configuration(s, format!("invalid port '{port}'")))?;
        Ok(Self::new(*host, port, *table, *action))
    }
}
