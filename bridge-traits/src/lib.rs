//! # Host Bridge Traits
//!
//! Capability traits the sync engine needs from its host platform.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - POST requests with JSON or multipart bodies
//! - [`FileLocker`](lock::FileLocker) - Advisory shared locks released through [`ScopedFileLock`]
//! - [`MachineIdentity`](identity::MachineIdentity) - Machine id, hostname and OS user
//! - [`Clock`](time::Clock) - Time source for cache-busting and deterministic tests
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to the host
//!
//! Native implementations live in `bridge-desktop`.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and keep the failing path in the message.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct RecordingClient;
//!
//! #[async_trait]
//! impl HttpClient for RecordingClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         println!("{:?} {}", request.method, request.url);
//!         Ok(HttpResponse::new(200, r#"{"success":true}"#))
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod identity;
pub mod lock;
pub mod logging;
pub mod time;

pub use error::BridgeError;

pub use http::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartPart, PartSource, RetryPolicy,
};
pub use identity::MachineIdentity;
pub use lock::{FileLocker, LockRelease, ScopedFileLock};
pub use logging::{LogEntry, LogLevel, LoggerSink};
pub use time::{Clock, FixedClock, SystemClock};
