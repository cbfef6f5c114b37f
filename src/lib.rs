//! pscan - passive security scanning for intercepted traffic
//!
//! HTTP exchanges and WebSocket frames captured by an intercepting proxy are
//! handed to a [`PassiveScanEngine`](scanner::PassiveScanEngine), which queues
//! them and runs every enabled rule over each one on background threads.
//! Alerts flow out through an [`AlertSink`](scanner::AlertSink); the engine is
//! administered through a [`ManagementApi`](api::ManagementApi).

pub mod api;
pub mod config;
pub mod error;
pub mod scanner;
pub mod scope;
pub mod traffic;

pub use config::Config;
pub use error::{ApiError, PscanError};
pub use scanner::{Alert, AlertSink, PassiveRule, PassiveScanEngine};
