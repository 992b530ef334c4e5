//! Build documents as seen by the sync engine.
//!
//! The host build system owns documents; the engine reads them and may clear
//! [`Document::render`] to take over rendering of routed documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn default_render() -> bool {
    true
}

/// A generated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Stable local identifier (usually the source path).
    pub id: String,

    /// Public path, e.g. `/blog/post-1/index.html`.
    pub url: String,

    /// Front matter and other structured metadata.
    #[serde(default)]
    pub meta: Value,

    /// Build generation marker.
    #[serde(default)]
    pub stamp: Option<i64>,

    #[serde(default)]
    pub mtime: Option<DateTime<Utc>>,

    #[serde(default)]
    pub import_date: Option<DateTime<Utc>>,

    #[serde(default = "default_render")]
    pub render: bool,
}

impl Document {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            meta: Value::Object(Default::default()),
            stamp: None,
            mtime: None,
            import_date: None,
            render: true,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_stamp(mut self, stamp: i64) -> Self {
        self.stamp = Some(stamp);
        self
    }

    pub fn with_mtime(mut self, mtime: DateTime<Utc>) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn with_import_date(mut self, date: DateTime<Utc>) -> Self {
        self.import_date = Some(date);
        self
    }

    /// The subset of fields submitted to the catalog as an entry's `data`.
    pub fn catalog_data(&self) -> Value {
        json!({
            "meta": self.meta,
            "stamp": self.stamp,
            "importDate": self.import_date,
        })
    }
}
