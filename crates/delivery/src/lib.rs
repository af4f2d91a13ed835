//! # Delivery
//!
//! 订阅投递层：批处理策略 + handler 调用边界。
//!
//! 负责：
//! - 计数/时间双触发批处理 (`Batcher`)
//! - handler 调用、错误与 panic 隔离 (`TopicDispatcher`)
//! - 取消订阅与 handler 调用之间的准入门 (`DeliveryGate`)
//! - 每主题原子计数器 (`TopicMetrics`)
//!
//! ## 使用示例
//!
//! ```ignore
//! use delivery::{Batcher, TopicDispatcher};
//!
//! let mut batcher = Batcher::new(3, 1.0);
//! if let Some(flush) = batcher.push(row, Instant::now()) {
//!     dispatcher.deliver(None, None, Message::Rows(flush.rows), flush.trigger);
//! }
//! if let Some(flush) = batcher.poll_expired(Instant::now()) {
//!     // throttle elapsed
//! }
//! ```

mod batcher;
mod dispatch;
mod gate;
mod metrics;

pub use batcher::{Batcher, Flush, FlushTrigger};
pub use dispatch::{invoke, panic_message, TopicDispatcher};
pub use gate::{DeliveryGate, GatePass};
pub use metrics::{TopicMetrics, TopicMetricsSnapshot};
