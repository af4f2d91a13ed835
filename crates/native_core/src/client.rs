//! Native execution core abstraction
//!
//! Defines the narrow interface the subscription runtime drives. Socket I/O,
//! authentication and binary row decoding all live behind it, so a real
//! core and the in-process mock share one API.

use std::fmt;
use std::time::Duration;

use contracts::{Credentials, RawRowBatch, SiteAddr, TableSchema, Value};

use crate::error::Result;

/// Open connection to one site
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    id: u64,
    site: SiteAddr,
}

impl ConnectionHandle {
    pub fn new(id: u64, site: SiteAddr) -> Self {
        Self { id, site }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn site(&self) -> &SiteAddr {
        &self.site
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}@{}", self.id, self.site)
    }
}

/// Parameters of one subscribe request
#[derive(Debug, Clone, Copy)]
pub struct SubscribeParams<'a> {
    pub table: &'a str,
    pub action: &'a str,
    /// Requested first offset; -1 means the next row published
    pub offset: i64,
    pub filter: Option<&'a [Value]>,
}

/// Result of one bounded receive
#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    /// Rows arrived
    Batch(RawRowBatch),
    /// Nothing arrived before the timeout
    Idle,
    /// Connection lost
    Disconnected,
}

/// Native core trait
///
/// All calls are blocking. Implementations must be shareable across the
/// control-plane thread and every delivery thread.
pub trait NativeCore: Send + Sync {
    /// Open an authenticated connection to `site`
    fn connect(&self, site: &SiteAddr, credentials: Option<&Credentials>)
        -> Result<ConnectionHandle>;

    /// Subscribe the connection to a stream table
    ///
    /// # Returns
    /// Offset of the first row the server will send (resolves `-1`)
    fn send_subscribe_request(
        &self,
        conn: &ConnectionHandle,
        params: &SubscribeParams<'_>,
    ) -> Result<i64>;

    /// Wait up to `timeout` for the next batch of rows
    fn receive_next_batch(&self, conn: &ConnectionHandle, timeout: Duration) -> ReceiveOutcome;

    /// Cancel a subscription on the server side
    fn send_unsubscribe_request(&self, site: &SiteAddr, table: &str, action: &str) -> Result<()>;

    /// Close a connection
    ///
    /// Idempotent operation: closing an unknown handle is a no-op
    fn close(&self, conn: &ConnectionHandle);

    /// Resolve the column layout of a table through an open connection
    fn fetch_schema(
        &self,
        conn: &ConnectionHandle,
        namespace: &str,
        table: &str,
    ) -> Result<TableSchema>;
}
