//! Count/time dual-trigger batching
//!
//! One `Batcher` per (topic, tag). Rows accumulate until either the buffer
//! reaches `batch_size` (checked eagerly on every push) or `throttle` has
//! elapsed since the first buffered row. Either trigger empties the buffer
//! and resets the timer.

use std::time::{Duration, Instant};

use contracts::Row;

/// Why a flush happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Buffer reached `batch_size`
    Count,
    /// `throttle` elapsed since the first buffered row
    Throttle,
    /// Buffering disabled
    Passthrough,
}

impl FlushTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Count => "count",
            FlushTrigger::Throttle => "throttle",
            FlushTrigger::Passthrough => "passthrough",
        }
    }
}

/// Rows handed out by one flush
#[derive(Debug, Clone, PartialEq)]
pub struct Flush {
    pub rows: Vec<Row>,
    pub trigger: FlushTrigger,
}

/// Buffering state of one (topic, tag)
#[derive(Debug)]
pub struct Batcher {
    /// 0 disables buffering
    batch_size: usize,
    throttle: Duration,
    buffer: Vec<Row>,
    /// Arrival time of the first buffered row
    started: Option<Instant>,
}

impl Batcher {
    /// Create a batcher
    ///
    /// `batch_size <= 0` disables buffering. A non-finite or negative
    /// `throttle_secs` is treated as zero; one too large for `Duration`
    /// saturates, leaving only the count trigger in practice.
    pub fn new(batch_size: i64, throttle_secs: f64) -> Self {
        let throttle = if throttle_secs.is_finite() && throttle_secs > 0.0 {
            Duration::try_from_secs_f64(throttle_secs).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        let batch_size = usize::try_from(batch_size).unwrap_or(0);
        Self {
            batch_size,
            throttle,
            buffer: Vec::with_capacity(batch_size),
            started: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.batch_size == 0
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Instant at which the throttle trigger fires, if anything is buffered
    ///
    /// None when the throttle reaches past what `Instant` can represent.
    pub fn deadline(&self) -> Option<Instant> {
        self.started.and_then(|t| t.checked_add(self.throttle))
    }

    /// Add one row
    ///
    /// Returns the flushed batch when this row reaches `batch_size`, or the
    /// row itself when buffering is disabled.
    pub fn push(&mut self, row: Row, now: Instant) -> Option<Flush> {
        if self.is_passthrough() {
            return Some(Flush {
                rows: vec![row],
                trigger: FlushTrigger::Passthrough,
            });
        }

        if self.buffer.is_empty() {
            self.started = Some(now);
        }
        self.buffer.push(row);

        if self.buffer.len() >= self.batch_size {
            Some(self.take(FlushTrigger::Count))
        } else {
            None
        }
    }

    /// Add a group of rows that arrived together
    ///
    /// With buffering disabled the group is forwarded as a single flush.
    pub fn push_all(&mut self, rows: Vec<Row>, now: Instant) -> Vec<Flush> {
        if rows.is_empty() {
            return Vec::new();
        }
        if self.is_passthrough() {
            return vec![Flush {
                rows,
                trigger: FlushTrigger::Passthrough,
            }];
        }
        rows.into_iter()
            .filter_map(|row| self.push(row, now))
            .collect()
    }

    /// Flush when the throttle has elapsed
    pub fn poll_expired(&mut self, now: Instant) -> Option<Flush> {
        match self.deadline() {
            Some(deadline) if now >= deadline && !self.buffer.is_empty() => {
                Some(self.take(FlushTrigger::Throttle))
            }
            _ => None,
        }
    }

    fn take(&mut self, trigger: FlushTrigger) -> Flush {
        self.started = None;
        let rows = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        Flush { rows, trigger }
    }
}
