//! Error types for the remote catalog and storage services

use crate::types::Service;
use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Remote API errors
#[derive(Error, Debug)]
pub enum ApiError {
    /// The service answered but reported a logical failure
    #[error("{service} service error on {path}: {message}")]
    Service {
        service: Service,
        path: String,
        message: String,
    },

    /// The service answered with a non-2xx status
    #[error("{service} service returned HTTP {status} on {path}")]
    Status {
        service: Service,
        path: String,
        status: u16,
    },

    /// No response was received (connect, TLS, timeout)
    #[error("Transport error: {0}")]
    Transport(#[from] BridgeError),

    /// The response body was not the expected JSON
    #[error("Invalid response from {service} service on {path}: {message}")]
    Decode {
        service: Service,
        path: String,
        message: String,
    },

    /// The request payload could not be serialized
    #[error("Failed to encode request: {0}")]
    Encode(String),
}

impl ApiError {
    /// Whether the remote side was never reached or answered unusably.
    pub fn is_transport(&self) -> bool {
        !matches!(self, ApiError::Service { .. })
    }
}

/// Result type for remote API operations
pub type Result<T> = std::result::Result<T, ApiError>;
