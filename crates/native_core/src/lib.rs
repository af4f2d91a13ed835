//! # Native Core
//!
//! Boundary to the native execution core.
//!
//! Responsibilities:
//! - Define the blocking `NativeCore` interface (connect, subscribe, receive, unsubscribe)
//! - Provide `MockNativeCore`, an in-process cluster with failure injection
//!
//! The real core owns sockets, authentication and binary decoding; nothing in
//! this workspace depends on how it does so.

pub mod client;
pub mod error;
pub mod mock_core;

pub use client::{ConnectionHandle, NativeCore, ReceiveOutcome, SubscribeParams};
pub use error::{CoreError, Result};
pub use mock_core::{MockConfig, MockNativeCore, SubscribeRecord};
