//! Wire types of the feed (catalog) and storage services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Catalog mutation endpoints on the feed service.
pub mod routes {
    pub const KEEP_ONE: &str = "/api/catalog/keep/one";
    pub const REMOVE: &str = "/api/catalog/remove";
    pub const CLEAR: &str = "/api/catalog/clear";
    pub const CLEAR_CACHE: &str = "/api/catalog/clear/cache";
    pub const EXPIRE: &str = "/api/catalog/expire";

    /// Multipart upload endpoint on the storage service.
    pub const UPLOAD: &str = "/upload";
}

/// Token-scoped operations on the storage service (`/{token}/{op}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Hash,
    Unlink,
    Link,
    Clear,
}

impl StorageOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOp::Hash => "hash",
            StorageOp::Unlink => "unlink",
            StorageOp::Link => "link",
            StorageOp::Clear => "clear",
        }
    }
}

/// The two remote services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Feed,
    Storage,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Feed => write!(f, "feed"),
            Service::Storage => write!(f, "storage"),
        }
    }
}

/// Catalog projection of one document, submitted to `keep/one`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultEntry {
    pub passport_id: Uuid,
    pub vault_id: Uuid,
    pub ref_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share: Option<String>,
    #[serde(rename = "type")]
    pub catalog_type: String,
    pub data: Value,
    pub stamp: Option<i64>,
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveRequest {
    pub vault_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpireRequest {
    #[serde(rename = "type")]
    pub catalog_type: String,
    pub stamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Body of the bulk operations (`clear`, `clear/cache`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Body of the per-file storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRequest {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Common response shape: `{success, message?, ...}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ApiEnvelope {
    /// Stored content hash from a `hash` response.
    pub fn hash(&self) -> Option<&str> {
        self.body.get("hash").and_then(Value::as_str)
    }

    /// Public URL from a `link` response.
    pub fn link(&self) -> Option<&str> {
        self.body.get("link").and_then(Value::as_str)
    }
}

/// Upload result: stored relative path to public link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadManifest {
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}
