//! Per-topic delivery metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters for a single subscription
///
/// Written by the owning delivery thread, read by anyone.
#[derive(Debug, Default)]
pub struct TopicMetrics {
    /// Rows received from the core
    rows_received: AtomicU64,
    /// Rows handed to the handler
    rows_delivered: AtomicU64,
    /// Handler invocations
    handler_calls: AtomicU64,
    /// Handler errors and panics
    handler_failures: AtomicU64,
    /// Rows dropped by demultiplexing
    rows_dropped: AtomicU64,
    /// Rows skipped before a tag's start offset
    rows_skipped: AtomicU64,
    /// Reconnect attempts
    reconnect_attempts: AtomicU64,
    /// Site changes during failover
    site_switches: AtomicU64,
    /// Rows waiting in batchers
    buffered_rows: AtomicUsize,
}

impl TopicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_received(&self, rows: usize) {
        self.rows_received.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn add_delivered(&self, rows: usize) {
        self.handler_calls.fetch_add(1, Ordering::Relaxed);
        self.rows_delivered.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn inc_handler_failures(&self) {
        self.handler_calls.fetch_add(1, Ordering::Relaxed);
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.rows_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.rows_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_site_switches(&self) {
        self.site_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_buffered_rows(&self, rows: usize) {
        self.buffered_rows.store(rows, Ordering::Relaxed);
    }

    pub fn handler_calls(&self) -> u64 {
        self.handler_calls.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> TopicMetricsSnapshot {
        TopicMetricsSnapshot {
            rows_received: self.rows_received.load(Ordering::Relaxed),
            rows_delivered: self.rows_delivered.load(Ordering::Relaxed),
            handler_calls: self.handler_calls.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            site_switches: self.site_switches.load(Ordering::Relaxed),
            buffered_rows: self.buffered_rows.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of topic metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicMetricsSnapshot {
    pub rows_received: u64,
    pub rows_delivered: u64,
    pub handler_calls: u64,
    pub handler_failures: u64,
    pub rows_dropped: u64,
    pub rows_skipped: u64,
    pub reconnect_attempts: u64,
    pub site_switches: u64,
    pub buffered_rows: usize,
}
