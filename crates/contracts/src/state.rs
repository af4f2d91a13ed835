//! Connection lifecycle states
//!
//! `Init → Connecting → Subscribed → Reconnecting → ... → Unsubscribed | Failed`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SiteAddr;

/// Per-topic connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Init,
    Connecting,
    Subscribed,
    Reconnecting,
    /// Terminal: explicit unsubscribe or client shutdown
    Unsubscribed,
    /// Terminal: every site exhausted under `sub_once`
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Unsubscribed | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Init => "init",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Unsubscribed => "unsubscribed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Observable status of one subscription (for diagnostics)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStatus {
    /// Current state
    pub state: ConnectionState,

    /// Site currently targeted
    pub site: SiteAddr,

    /// Index into `[primary] + backup_sites`
    pub site_index: usize,

    /// Reconnect attempts since the last successful subscribe
    pub reconnect_attempts: u64,
}
