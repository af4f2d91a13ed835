//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 订阅生命周期（唯一性、重订阅、取消订阅）
//! - 批处理与流反序列化的端到端行为
//! - 断线重连与站点切换
//! - 配置文件驱动的订阅
//!
//! 所有场景都运行在 `MockNativeCore` 上，无需真实服务端。


#[cfg(test)]
mod batching_tests;
#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod failover_tests;
#[cfg(test)]
mod subscription_tests;
