//! Simulated session against an in-process mock cluster.
//!
//! Seeds one mock table per subscribed table, publishes synthetic rows from a
//! background thread and runs the configured subscriptions with an
//! aggregating handler. Delivery itself happens on the client's own threads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::{Row, SiteAddr, StreamingConfig, TableSchema, Value};
use native_core::{MockConfig, MockNativeCore};
use observability::DeliveryAggregator;
use stream_deserializer::StreamDeserializer;
use subscriber::{handler_fn, Delivery, StreamingClient, SubscribeRequest, Topic};
use tracing::{debug, info, warn};

use super::SessionStats;

/// Columns of every simulated plain table
const PLAIN_COLUMNS: &[&str] = &["id", "price", "ts"];
/// Columns of a simulated tagged table; the tag column is last
const TAGGED_COLUMNS: &[&str] = &["id", "price", "tag"];
/// Columns of every deserializer target
const TARGET_COLUMNS: &[&str] = &["id", "price"];

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Loaded and validated configuration
    pub config: StreamingConfig,

    /// Rows per second into each simulated table
    pub publish_rate: u32,

    /// Interval between injected connection drops (None = never)
    pub drop_every: Option<Duration>,
}

/// What the simulator publishes into one table
#[derive(Debug, Clone, PartialEq)]
enum SimTable {
    Plain,
    /// Rows cycle over these tags
    Tagged(Vec<String>),
}

/// Session builder
pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Seed the mock cluster, subscribe and start publishing
    pub fn start(self) -> Result<RunningSession> {
        let SessionConfig {
            config,
            publish_rate,
            drop_every,
        } = self.config;

        let deserializers = ConfigLoader::build_deserializers(&config)
            .context("Failed to build stream deserializers")?;
        let plan = plan_tables(&config, &deserializers);

        let core = Arc::new(MockNativeCore::with_config(MockConfig {
            required_credentials: config.client.credentials.clone(),
            ..Default::default()
        }));
        seed_tables(&core, &plan, &deserializers);
        info!(tables = plan.len(), "Mock cluster seeded");

        let client = StreamingClient::new(core.clone(), config.client.clone())
            .context("Failed to start streaming client")?;
        info!(runtime = ?client.runtime_kind(), "Streaming client started");

        let aggregator = Arc::new(Mutex::new(DeliveryAggregator::new()));
        let sink = aggregator.clone();
        let handler = handler_fn(move |delivery: Delivery| {
            debug!(
                topic = %delivery.topic,
                tag = ?delivery.tag,
                rows = delivery.message.len(),
                "Delivery"
            );
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update(&delivery);
        });

        for sub in &config.subscriptions {
            let deserializer = sub
                .deserializer
                .as_ref()
                .and_then(|name| deserializers.get(name))
                .cloned();
            let request = SubscribeRequest::from_config(sub, deserializer, handler.clone())?;
            client
                .subscribe(request)
                .with_context(|| format!("Failed to subscribe to {}", sub.topic_string()))?;
        }
        info!(topics = ?client.subscription_topics(), "Subscriptions established");

        let primaries: BTreeSet<SiteAddr> = config
            .subscriptions
            .iter()
            .map(|s| SiteAddr::new(&s.host, s.port))
            .collect();
        let stop = Arc::new(AtomicBool::new(false));
        let publisher = Publisher {
            core: core.clone(),
            plan,
            interval: Duration::from_secs_f64(1.0 / f64::from(publish_rate.max(1))),
            drop_every,
            primaries: primaries.into_iter().collect(),
            stop: stop.clone(),
        };
        let publisher = thread::Builder::new()
            .name("stream-sub-publisher".to_string())
            .spawn(move || publisher.run())
            .context("Failed to spawn publisher thread")?;

        Ok(RunningSession {
            client,
            aggregator,
            publisher: Some(publisher),
            stop,
            started: Instant::now(),
        })
    }
}

/// A session that is publishing and delivering
pub struct RunningSession {
    client: StreamingClient,
    aggregator: Arc<Mutex<DeliveryAggregator>>,
    publisher: Option<JoinHandle<PublisherStats>>,
    stop: Arc<AtomicBool>,
    started: Instant,
}

impl RunningSession {
    /// Rows delivered so far
    pub fn rows_delivered(&self) -> u64 {
        self.aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total_rows
    }

    /// Stop publishing, capture metrics and shut the client down
    pub fn stop(mut self) -> SessionStats {
        self.stop.store(true, Ordering::Release);
        let published = match self.publisher.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                warn!("Publisher thread panicked");
                PublisherStats::default()
            }
            None => PublisherStats::default(),
        };

        // Registry entries are cleared by shutdown, so read them first
        let topics = self
            .client
            .subscription_topics()
            .into_iter()
            .filter_map(|name| {
                let topic: Topic = name.parse().ok()?;
                self.client.topic_metrics(&topic).map(|m| (name, m))
            })
            .collect();
        self.client.shutdown();

        let delivery = self
            .aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary();

        SessionStats {
            duration: self.started.elapsed(),
            rows_published: published.rows,
            drops_injected: published.drops,
            delivery,
            topics,
        }
    }
}

#[derive(Debug, Default)]
struct PublisherStats {
    rows: u64,
    drops: u64,
}

struct Publisher {
    core: Arc<MockNativeCore>,
    plan: BTreeMap<String, SimTable>,
    interval: Duration,
    drop_every: Option<Duration>,
    primaries: Vec<SiteAddr>,
    stop: Arc<AtomicBool>,
}

impl Publisher {
    fn run(self) -> PublisherStats {
        let mut stats = PublisherStats::default();
        let mut seq: i64 = 0;
        let mut next = Instant::now();
        let mut last_drop = Instant::now();

        while !self.stop.load(Ordering::Acquire) {
            for (table, kind) in &self.plan {
                let tag = match kind {
                    SimTable::Plain => None,
                    SimTable::Tagged(tags) => tags.get(seq as usize % tags.len().max(1)),
                };
                self.core.publish(table, synthetic_row(seq, tag.map(String::as_str)));
                stats.rows += 1;
            }
            seq += 1;

            if let Some(every) = self.drop_every {
                if last_drop.elapsed() >= every {
                    for site in &self.primaries {
                        info!(site = %site, "Injecting connection drop");
                        self.core.drop_connections(site);
                    }
                    stats.drops += 1;
                    last_drop = Instant::now();
                }
            }

            next += self.interval;
            thread::sleep(next.saturating_duration_since(Instant::now()));
        }

        debug!(rows = stats.rows, drops = stats.drops, "Publisher stopped");
        stats
    }
}

/// Decide the layout of every subscribed table
///
/// A table read through a deserializer carries a trailing tag column. When
/// several subscriptions share a table the first one decides.
fn plan_tables(
    config: &StreamingConfig,
    deserializers: &BTreeMap<String, StreamDeserializer>,
) -> BTreeMap<String, SimTable> {
    let mut plan = BTreeMap::new();
    for sub in &config.subscriptions {
        let kind = match sub.deserializer.as_ref().and_then(|n| deserializers.get(n)) {
            Some(de) => SimTable::Tagged(de.tags().map(str::to_string).collect()),
            None => SimTable::Plain,
        };
        plan.entry(sub.table.clone()).or_insert(kind);
    }
    plan
}

fn seed_tables(
    core: &MockNativeCore,
    plan: &BTreeMap<String, SimTable>,
    deserializers: &BTreeMap<String, StreamDeserializer>,
) {
    for (table, kind) in plan {
        match kind {
            SimTable::Plain => core.create_table(table, PLAIN_COLUMNS),
            SimTable::Tagged(_) => core.create_table(table, TAGGED_COLUMNS),
        }
    }
    for de in deserializers.values() {
        for tag in de.tags() {
            if let Some(target) = de.target(tag) {
                core.register_schema(TableSchema::new(
                    target.namespace(),
                    target.table(),
                    TARGET_COLUMNS,
                ));
            }
        }
    }
}

fn synthetic_row(seq: i64, tag: Option<&str>) -> Row {
    let price = 100.0 + (seq % 50) as f64 * 0.25;
    match tag {
        Some(tag) => vec![Value::Int(seq), Value::Double(price), Value::from(tag)],
        None => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as i64);
            vec![Value::Int(seq), Value::Double(price), Value::Timestamp(now)]
        }
    }
}
