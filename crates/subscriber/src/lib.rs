//! # Subscriber
//!
//! 流表订阅客户端。
//!
//! 负责：
//! - 订阅注册表，保证同一主题只有一个活跃订阅
//! - 投递运行时（单线程 / 线程池），按主题顺序调用 handler
//! - 断线重连与备用站点切换
//!
//! ## 使用示例
//!
//! ```ignore
//! use std::sync::Arc;
//! use subscriber::{handler_fn, ClientConfig, StreamingClient, SubscribeRequest};
//!
//! let client = StreamingClient::new(core, ClientConfig::default())?;
//! let handler = handler_fn(|delivery| println!("{:?}", delivery.message));
//! client.subscribe(
//!     SubscribeRequest::new("localhost", 8848, "trades", handler)
//!         .action("demo")
//!         .batch_size(100)
//!         .throttle(0.5),
//! )?;
//! ```

mod client;
mod failover;
mod pipeline;
mod registry;
mod request;
mod runtime;
mod worker;

pub use client::StreamingClient;
pub use failover::{FailoverState, Transition};
pub use registry::{SubscriptionEntry, SubscriptionRegistry};
pub use request::SubscribeRequest;
pub use runtime::{DeliveryRuntime, PooledRuntime, RuntimeKind, SingleThreadRuntime};
pub use worker::TopicTask;

pub use contracts::{
    handler_fn, ClientConfig, ConnectionState, Credentials, Delivery, HandlerError, Message,
    MessageHandler, SiteAddr, StreamError, SubscriptionStatus, Topic,
};
pub use delivery::TopicMetricsSnapshot;
pub use stream_deserializer::StreamDeserializer;
