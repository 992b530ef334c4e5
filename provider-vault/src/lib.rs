//! # Vault Provider
//!
//! Client side of the two remote services the sync engine talks to:
//!
//! - **feed**: the content catalog (`keep/one`, `remove`, `expire`, `clear`,
//!   `clear/cache`)
//! - **storage**: the object store (`hash`, `upload`, `unlink`, `link`, `clear`)
//!
//! Both take bearer-authenticated JSON POSTs and answer with
//! `{success, message?, ...}`.

pub mod client;
pub mod error;
pub mod types;

pub use client::{log_failure, RemoteApiClient};
pub use error::{ApiError, Result};
pub use types::{ApiEnvelope, Service, StorageOp, UploadManifest, VaultEntry};
