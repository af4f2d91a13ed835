//! Session statistics.

use std::time::Duration;

use observability::DeliverySummary;
use subscriber::TopicMetricsSnapshot;

/// Statistics from a simulated session
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Wall time between start and stop
    pub duration: Duration,

    /// Rows written into the simulated tables
    pub rows_published: u64,

    /// Connection drops injected by the simulator
    pub drops_injected: u64,

    /// Handler-side aggregation over every delivery
    pub delivery: DeliverySummary,

    /// Per-topic counters captured before shutdown
    pub topics: Vec<(String, TopicMetricsSnapshot)>,
}

impl SessionStats {
    /// Delivered rows per second over the whole session
    pub fn rows_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.delivery.total_rows as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Session Statistics ===\n");
        println!("Overview");
        println!("   Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   Rows published: {}", self.rows_published);
        println!("   Rows/s delivered: {:.2}", self.rows_per_sec());
        if self.drops_injected > 0 {
            println!("   Connection drops injected: {}", self.drops_injected);
        }

        println!("\n{}", self.delivery);

        if !self.topics.is_empty() {
            println!("Per-topic metrics");
            for (topic, m) in &self.topics {
                println!("   {topic}");
                println!(
                    "      received={} delivered={} calls={} failures={}",
                    m.rows_received, m.rows_delivered, m.handler_calls, m.handler_failures
                );
                println!(
                    "      dropped={} skipped={} reconnects={} switches={} buffered={}",
                    m.rows_dropped,
                    m.rows_skipped,
                    m.reconnect_attempts,
                    m.site_switches,
                    m.buffered_rows
                );
            }
        }

        println!();
    }
}
