//! Per-topic delivery pipeline: demux -> batch -> dispatch
//!
//! Shared by both runtime variants. Owned by exactly one delivery thread,
//! so nothing in here is locked.

use std::sync::Arc;
use std::time::Instant;

use contracts::{Message, RawRowBatch, Row, StreamError, Table, TableSchema, TargetSchemaRef};
use delivery::{Batcher, Flush, FlushTrigger, TopicDispatcher, TopicMetrics};
use stream_deserializer::{ResolvedDeserializer, RowRoute, StreamDeserializer};
use tracing::{debug, warn};

/// One logical sub-stream of the topic
struct Lane {
    /// `None` for a topic without demultiplexing
    tag: Option<Arc<str>>,
    batcher: Batcher,
}

pub(crate) struct TopicPipeline {
    dispatcher: TopicDispatcher,
    metrics: Arc<TopicMetrics>,
    msg_as_table: bool,
    batch_size: i64,
    throttle: f64,
    deserializer: Option<StreamDeserializer>,
    resolved: Option<ResolvedDeserializer>,
    /// Lanes in first-seen order
    lanes: Vec<Lane>,
    /// Physical column names of the latest batch
    columns: Arc<[String]>,
}

impl TopicPipeline {
    pub(crate) fn new(
        dispatcher: TopicDispatcher,
        metrics: Arc<TopicMetrics>,
        msg_as_table: bool,
        batch_size: i64,
        throttle: f64,
        deserializer: Option<StreamDeserializer>,
    ) -> Self {
        Self {
            dispatcher,
            metrics,
            msg_as_table,
            batch_size,
            throttle,
            deserializer,
            resolved: None,
            lanes: Vec::new(),
            columns: Arc::from(Vec::new()),
        }
    }

    pub(crate) fn topic(&self) -> &Arc<str> {
        self.dispatcher.topic()
    }

    pub(crate) fn needs_schemas(&self) -> bool {
        self.deserializer.is_some() && self.resolved.is_none()
    }

    /// Resolve tag schemas once, on the first successful subscribe
    pub(crate) fn resolve_schemas<F, E>(&mut self, fetch: F)
    where
        F: FnMut(&TargetSchemaRef) -> Result<TableSchema, E>,
        E: std::fmt::Display,
    {
        if let Some(de) = &self.deserializer {
            if self.resolved.is_none() {
                self.resolved = Some(de.resolve(fetch));
            }
        }
    }

    /// Rows buffered across every lane
    pub(crate) fn buffered(&self) -> usize {
        self.lanes.iter().map(|l| l.batcher.len()).sum()
    }

    /// Earliest throttle deadline across lanes
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.lanes.iter().filter_map(|l| l.batcher.deadline()).min()
    }

    /// Feed one received micro-batch
    pub(crate) fn ingest(&mut self, batch: RawRowBatch, now: Instant) {
        let topic = self.topic().clone();
        self.metrics.add_received(batch.len());
        observability::record_rows_received(&topic, batch.len());

        // A throttle that ran out while waiting on the core fires first
        self.flush_expired(now);
        self.columns = batch.columns.clone();

        if self.deserializer.is_none() {
            self.feed(None, batch.rows, now);
        } else {
            let groups = self.demux(&topic, batch);
            for (tag, rows) in groups {
                self.feed(Some(tag), rows, now);
            }
        }
        self.metrics.set_buffered_rows(self.buffered());
    }

    /// Flush lanes whose throttle elapsed
    pub(crate) fn flush_expired(&mut self, now: Instant) {
        let expired: Vec<(Option<Arc<str>>, Flush)> = self
            .lanes
            .iter_mut()
            .filter_map(|lane| {
                lane.batcher
                    .poll_expired(now)
                    .map(|flush| (lane.tag.clone(), flush))
            })
            .collect();
        if expired.is_empty() {
            return;
        }
        for (tag, flush) in expired {
            self.emit(tag.as_deref(), flush);
        }
        self.metrics.set_buffered_rows(self.buffered());
    }

    /// Route rows by tag, grouping them per tag in arrival order
    fn demux(&mut self, topic: &str, batch: RawRowBatch) -> Vec<(Arc<str>, Vec<Row>)> {
        if self.resolved.is_none() {
            // Schemas could not be fetched through a connection
            self.resolve_schemas(|_| Err::<TableSchema, _>("no connection"));
        }
        let Some(resolved) = &self.resolved else {
            return Vec::new();
        };

        let mut groups: Vec<(Arc<str>, Vec<Row>)> = Vec::new();
        for (i, row) in batch.rows.into_iter().enumerate() {
            let offset = batch.offset + i as i64;
            match resolved.route(offset, row) {
                Ok(RowRoute::Routed { tag, row }) => {
                    match groups.iter_mut().find(|(t, _)| *t == tag) {
                        Some((_, rows)) => rows.push(row),
                        None => groups.push((tag, vec![row])),
                    }
                }
                Ok(RowRoute::Skipped { tag }) => {
                    self.metrics.inc_skipped();
                    observability::record_rows_dropped(topic, "before_start_offset", 1);
                    debug!(topic = %topic, tag = %tag, offset, "row before start offset skipped");
                }
                Err(e) => {
                    let reason = match e {
                        StreamError::SchemaMismatch { .. } => "schema_mismatch",
                        _ => "unknown_tag",
                    };
                    self.metrics.inc_dropped();
                    observability::record_rows_dropped(topic, reason, 1);
                    warn!(topic = %topic, offset, error = %e, "row dropped");
                }
            }
        }
        groups
    }

    fn lane_mut(&mut self, tag: Option<&Arc<str>>) -> &mut Batcher {
        let idx = match self.lanes.iter().position(|l| l.tag.as_ref() == tag) {
            Some(idx) => idx,
            None => {
                self.lanes.push(Lane {
                    tag: tag.cloned(),
                    batcher: Batcher::new(self.batch_size, self.throttle),
                });
                self.lanes.len() - 1
            }
        };
        &mut self.lanes[idx].batcher
    }

    fn feed(&mut self, tag: Option<Arc<str>>, rows: Vec<Row>, now: Instant) {
        let per_row = !self.msg_as_table;
        let batcher = self.lane_mut(tag.as_ref());
        let flushes: Vec<Flush> = if batcher.is_passthrough() && per_row {
            rows.into_iter()
                .filter_map(|row| batcher.push(row, now))
                .collect()
        } else {
            batcher.push_all(rows, now)
        };
        for flush in flushes {
            self.emit(tag.as_deref(), flush);
        }
    }

    fn emit(&self, tag: Option<&str>, flush: Flush) {
        let target = tag
            .and_then(|t| self.resolved.as_ref()?.tag(t))
            .map(|resolved| &resolved.target);

        let message = if self.msg_as_table {
            let columns = match tag.and_then(|t| self.resolved.as_ref()?.tag(t)) {
                Some(resolved) => resolved.columns(&self.columns),
                None => self.columns.to_vec(),
            };
            Message::Table(Table::new(columns, flush.rows))
        } else if flush.trigger == FlushTrigger::Passthrough && flush.rows.len() == 1 {
            let mut rows = flush.rows;
            match rows.pop() {
                Some(row) => Message::Row(row),
                None => return,
            }
        } else {
            Message::Rows(flush.rows)
        };

        self.dispatcher.deliver(tag, target, message, flush.trigger);
    }
}
