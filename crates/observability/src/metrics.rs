//! 订阅运行时指标收集模块
//!
//! 基于 `metrics` 宏记录接收、投递、丢弃和故障切换等事件。

use std::collections::BTreeMap;

use contracts::Delivery;
use metrics::{counter, gauge, histogram};

/// 记录从原生核心收到的行
pub fn record_rows_received(topic: &str, rows: usize) {
    counter!("stream_sub_rows_received_total", "topic" => topic.to_string())
        .increment(rows as u64);
}

/// 记录一次 handler 调用
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_handler_call;
///
/// let ok = dispatch(&handler, delivery);
/// record_handler_call(&topic, rows, ok);
/// ```
pub fn record_handler_call(topic: &str, rows: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "stream_sub_handler_calls_total",
        "topic" => topic.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        counter!("stream_sub_rows_delivered_total", "topic" => topic.to_string())
            .increment(rows as u64);
    }
    histogram!("stream_sub_batch_rows", "topic" => topic.to_string()).record(rows as f64);
}

/// 记录 handler 耗时
pub fn record_handler_latency_ms(topic: &str, latency_ms: f64) {
    histogram!("stream_sub_handler_latency_ms", "topic" => topic.to_string()).record(latency_ms);
}

/// 记录批次刷新原因 (`count` / `throttle` / `passthrough`)
pub fn record_flush(topic: &str, trigger: &'static str) {
    counter!(
        "stream_sub_flushes_total",
        "topic" => topic.to_string(),
        "trigger" => trigger
    )
    .increment(1);
}

/// 记录被丢弃的行 (`unknown_tag` / `schema_mismatch` / `before_start_offset`)
pub fn record_rows_dropped(topic: &str, reason: &'static str, rows: usize) {
    counter!(
        "stream_sub_rows_dropped_total",
        "topic" => topic.to_string(),
        "reason" => reason
    )
    .increment(rows as u64);
}

/// 记录重连尝试
pub fn record_reconnect_attempt(topic: &str, site: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "stream_sub_reconnect_attempts_total",
        "topic" => topic.to_string(),
        "site" => site.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录站点切换
pub fn record_site_switch(topic: &str, from: &str, to: &str) {
    counter!(
        "stream_sub_site_switches_total",
        "topic" => topic.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// 记录站点耗尽（终止订阅）
pub fn record_subscription_exhausted(topic: &str) {
    counter!("stream_sub_exhausted_total", "topic" => topic.to_string()).increment(1);
}

/// 当前活跃订阅数
pub fn set_active_subscriptions(count: usize) {
    gauge!("stream_sub_active_subscriptions").set(count as f64);
}

/// 投递指标聚合器
///
/// 在内存中聚合投递事件，便于运行结束时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct DeliveryAggregator {
    /// 总 handler 调用次数
    pub total_calls: u64,

    /// 总投递行数
    pub total_rows: u64,

    /// 每次调用的行数统计
    pub batch_stats: RunningStats,

    /// 各主题（及 tag）的投递行数
    pub rows_per_stream: BTreeMap<String, u64>,
}

impl DeliveryAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, delivery: &Delivery) {
        let rows = delivery.message.len() as u64;
        self.total_calls += 1;
        self.total_rows += rows;
        self.batch_stats.push(rows as f64);

        let key = match &delivery.tag {
            Some(tag) => format!("{}#{}", delivery.topic, tag),
            None => delivery.topic.to_string(),
        };
        *self.rows_per_stream.entry(key).or_insert(0) += rows;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> DeliverySummary {
        DeliverySummary {
            total_calls: self.total_calls,
            total_rows: self.total_rows,
            rows_per_call: StatsSummary::from(&self.batch_stats),
            rows_per_stream: self.rows_per_stream.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 投递摘要
#[derive(Debug, Clone, Default)]
pub struct DeliverySummary {
    pub total_calls: u64,
    pub total_rows: u64,
    pub rows_per_call: StatsSummary,
    pub rows_per_stream: BTreeMap<String, u64>,
}

impl std::fmt::Display for DeliverySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Delivery Summary ===")?;
        writeln!(f, "Handler calls: {}", self.total_calls)?;
        writeln!(f, "Rows delivered: {}", self.total_rows)?;
        writeln!(f, "Rows per call: {}", self.rows_per_call)?;

        if !self.rows_per_stream.is_empty() {
            writeln!(f, "Rows per stream:")?;
            for (stream, rows) in &self.rows_per_stream {
                writeln!(f, "  {}: {}", stream, rows)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.2}, std={:.2} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
