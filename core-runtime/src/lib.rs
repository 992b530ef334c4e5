//! # Core Runtime Module
//!
//! Shared runtime pieces of the sync engine:
//! - Engine configuration ([`config::EngineConfig`])
//! - The build document model ([`document::Document`])
//! - Host events on a lossless [`events::HostSender`] channel and sync
//!   outcomes on a broadcast [`events::EventBus`]
//! - Logging and tracing bootstrap

pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{EngineConfig, HashAlgorithm, RoutingRule, ServiceEndpoint, SyncMode};
pub use document::Document;
pub use error::{Error, Result};
