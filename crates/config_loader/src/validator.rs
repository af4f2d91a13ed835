//! 配置校验模块
//!
//! 校验规则：
//! - thread_count >= 1, poll_interval_ms > 0
//! - 订阅 host / table 非空，port > 0
//! - offset >= -1，throttle 为非负有限数
//! - backup_sites 均为 `host:port`
//! - 主题 (host/port/table/action) 唯一
//! - deserializer 引用存在且映射形状合法

use std::collections::HashSet;

use contracts::{SiteAddr, StreamError, StreamingConfig, SubscriptionConfig};
use stream_deserializer::StreamDeserializer;

/// 校验 StreamingConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &StreamingConfig) -> Result<(), StreamError> {
    validate_client(config)?;
    validate_deserializers(config)?;
    for (idx, sub) in config.subscriptions.iter().enumerate() {
        validate_subscription(idx, sub)?;
    }
    validate_unique_topics(config)?;
    validate_deserializer_refs(config)?;
    Ok(())
}

/// 校验客户端运行时参数
fn validate_client(config: &StreamingConfig) -> Result<(), StreamError> {
    if config.client.thread_count == 0 {
        return Err(StreamError::config_validation(
            "client.thread_count",
            "thread_count must be >= 1",
        ));
    }
    if config.client.poll_interval_ms == 0 {
        return Err(StreamError::config_validation(
            "client.poll_interval_ms",
            "poll_interval_ms must be > 0",
        ));
    }
    Ok(())
}

/// 校验每个反序列化器的映射形状
fn validate_deserializers(config: &StreamingConfig) -> Result<(), StreamError> {
    for (name, mapping) in &config.deserializers {
        StreamDeserializer::from_values(mapping).map_err(|e| {
            StreamError::config_validation(format!("deserializers.{name}"), e.to_string())
        })?;
    }
    Ok(())
}

fn validate_subscription(idx: usize, sub: &SubscriptionConfig) -> Result<(), StreamError> {
    let field = |name: &str| format!("subscriptions[{idx}].{name}");

    if sub.host.is_empty() {
        return Err(StreamError::config_validation(field("host"), "host cannot be empty"));
    }
    if sub.port == 0 {
        return Err(StreamError::config_validation(field("port"), "port must be > 0"));
    }
    if sub.table.is_empty() {
        return Err(StreamError::config_validation(
            field("table"),
            "table name cannot be empty",
        ));
    }
    if sub.offset < -1 {
        return Err(StreamError::config_validation(
            field("offset"),
            format!("offset must be >= -1, got {}", sub.offset),
        ));
    }
    if !sub.throttle.is_finite() || sub.throttle < 0.0 {
        return Err(StreamError::config_validation(
            field("throttle"),
            format!("throttle must be a non-negative number, got {}", sub.throttle),
        ));
    }
    for (i, site) in sub.backup_sites.iter().enumerate() {
        site.parse::<SiteAddr>().map_err(|e| {
            StreamError::config_validation(field(&format!("backup_sites[{i}]")), e.to_string())
        })?;
    }
    Ok(())
}

/// 校验主题唯一性
fn validate_unique_topics(config: &StreamingConfig) -> Result<(), StreamError> {
    let mut seen = HashSet::new();
    for (idx, sub) in config.subscriptions.iter().enumerate() {
        let topic = sub.topic_string();
        if !seen.insert(topic.clone()) {
            return Err(StreamError::config_validation(
                format!("subscriptions[{idx}]"),
                format!("duplicate topic '{topic}'"),
            ));
        }
    }
    Ok(())
}

/// 校验 deserializer 引用存在
fn validate_deserializer_refs(config: &StreamingConfig) -> Result<(), StreamError> {
    for (idx, sub) in config.subscriptions.iter().enumerate() {
        if let Some(name) = &sub.deserializer {
            if !config.deserializers.contains_key(name) {
                return Err(StreamError::config_validation(
                    format!("subscriptions[{idx}].deserializer"),
                    format!("deserializer '{name}' not defined"),
                ));
            }
        }
    }
    Ok(())
}
