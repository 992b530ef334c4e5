//! # Engine Configuration
//!
//! Immutable settings for one sync engine instance.
//!
//! ## Overview
//!
//! An [`EngineConfig`] is assembled once with [`EngineConfigBuilder`], usually
//! from merged CLI flags and the build host's config file, and validated by
//! [`build()`](EngineConfigBuilder::build). Components receive it behind an
//! `Arc` and never modify it afterwards.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{EngineConfig, RoutingRule};
//!
//! let config = EngineConfig::builder()
//!     .feed("https://feed.example.com", "feed-token")
//!     .storage("https://storage.example.com", "storage-token")
//!     .output_folder("/site/out")
//!     .files_folder("/site/files")
//!     .shared_prefixes(["blog", "docs"])
//!     .routing(RoutingRule::layout())
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! A missing service token is a configuration error. The engine refuses to
//! activate, so no event subscription takes place:
//!
//! ```should_panic
//! use core_runtime::config::EngineConfig;
//!
//! let config = EngineConfig::builder()
//!     .feed("https://feed.example.com", "")
//!     .build()
//!     .expect("Should fail - feed token is empty");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of catalog mutations in flight at once.
pub const DEFAULT_QUEUE_CONCURRENCY: usize = 3;

/// Default cache-invalidation coalescing window.
pub const DEFAULT_CACHE_CLEAR_WINDOW: Duration = Duration::from_millis(1000);

/// Default name of the storage subtree inside the output and files folders.
pub const DEFAULT_STORAGE_DIR: &str = "storage";

/// Base URL and bearer token of one remote service.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub url: String,
    pub token: String,
}

impl ServiceEndpoint {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn validate(&self, service: &str) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Config(format!("{} service URL cannot be empty", service)));
        }
        if self.token.trim().is_empty() {
            return Err(Error::CapabilityMissing {
                capability: format!("{} token", service),
                message: format!(
                    "The {} service token is missing. Set it in the build configuration \
                     before enabling remote sync.",
                    service
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Startup and scoping flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncMode {
    /// Wipe the catalog and the store at startup; individual mutations are
    /// skipped for the rest of the run.
    pub clear: bool,

    /// Wipe the catalog at startup and resubmit everything, keeping the store.
    pub refresh: bool,

    /// Disable per-machine context scoping and TTL hints.
    pub global: bool,
}

/// Which metadata key names a document's catalog type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKey {
    /// `meta.layout`
    Layout,
    /// `meta.type`
    Type,
}

impl TypeKey {
    pub fn field(&self) -> &'static str {
        match self {
            TypeKey::Layout => "layout",
            TypeKey::Type => "type",
        }
    }

    fn other(&self) -> TypeKey {
        match self {
            TypeKey::Layout => TypeKey::Type,
            TypeKey::Type => TypeKey::Layout,
        }
    }
}

/// Decides which documents this engine mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub type_key: TypeKey,

    /// Required value of `meta.target`, if any.
    pub target: Option<String>,
}

impl RoutingRule {
    /// Route every document that has a `meta.layout`.
    pub fn layout() -> Self {
        Self {
            type_key: TypeKey::Layout,
            target: None,
        }
    }

    /// Route every document that has a `meta.type`.
    pub fn by_type() -> Self {
        Self {
            type_key: TypeKey::Type,
            target: None,
        }
    }

    /// Route only documents whose `meta.target` equals `target`.
    pub fn target(target: impl Into<String>) -> Self {
        Self {
            type_key: TypeKey::Layout,
            target: Some(target.into()),
        }
    }

    /// Catalog type for a document's metadata, or `None` when the document is
    /// not routed to this engine.
    pub fn resolve(&self, meta: &serde_json::Value) -> Option<String> {
        let text = |key: &str| {
            meta.get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match &self.target {
            None => text(self.type_key.field()),
            Some(target) => {
                if text("target").as_deref() != Some(target.as_str()) {
                    return None;
                }
                text(self.type_key.field())
                    .or_else(|| text(self.type_key.other().field()))
                    .or_else(|| Some(target.clone()))
            }
        }
    }
}

impl Default for RoutingRule {
    fn default() -> Self {
        Self::layout()
    }
}

/// Digest used to compare local files with the stored copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

/// Immutable engine configuration. Construct with [`EngineConfig::builder`].
#[derive(Clone)]
pub struct EngineConfig {
    pub feed: ServiceEndpoint,
    pub storage: ServiceEndpoint,
    pub mode: SyncMode,

    /// TTL hint attached to entries and uploads outside global mode.
    pub expire: Option<String>,

    /// Leading path segments that are moved into the entry's `share` field.
    pub shared_prefixes: Vec<String>,

    /// Root of the generated site.
    pub output_folder: PathBuf,

    /// Root of the watched source files.
    pub files_folder: PathBuf,

    pub storage_dir: String,
    pub routing: RoutingRule,

    /// Prefix for catalog types, e.g. `site` gives `site/post`.
    pub catalog_namespace: Option<String>,

    pub queue_concurrency: usize,
    pub cache_clear_window: Duration,

    /// Clear `render` on routed documents so the host skips its own renderer.
    pub suppress_render: bool,

    pub hash_algorithm: HashAlgorithm,
    pub request_timeout: Duration,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Checks the invariants the builder cannot express in types.
    pub fn validate(&self) -> Result<()> {
        self.feed.validate("feed")?;
        self.storage.validate("storage")?;

        if self.queue_concurrency == 0 {
            return Err(Error::Config(
                "Queue concurrency must be greater than 0".to_string(),
            ));
        }

        if self.cache_clear_window.is_zero() {
            return Err(Error::Config(
                "Cache clear window must be greater than 0ms".to_string(),
            ));
        }

        if self.storage_dir.trim_matches('/').is_empty() {
            return Err(Error::Config("Storage directory name cannot be empty".to_string()));
        }

        Ok(())
    }

    /// TTL hint to send, or `None` in global mode.
    pub fn effective_expire(&self) -> Option<&str> {
        if self.mode.global {
            None
        } else {
            self.expire.as_deref()
        }
    }

    /// Catalog type with the configured namespace applied.
    pub fn catalog_type(&self, raw: &str) -> String {
        match &self.catalog_namespace {
            Some(namespace) => format!("{}/{}", namespace, raw),
            None => raw.to_string(),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("feed", &self.feed)
            .field("storage", &self.storage)
            .field("mode", &self.mode)
            .field("expire", &self.expire)
            .field("shared_prefixes", &self.shared_prefixes)
            .field("output_folder", &self.output_folder)
            .field("files_folder", &self.files_folder)
            .field("storage_dir", &self.storage_dir)
            .field("routing", &self.routing)
            .field("catalog_namespace", &self.catalog_namespace)
            .field("queue_concurrency", &self.queue_concurrency)
            .field("cache_clear_window", &self.cache_clear_window)
            .field("suppress_render", &self.suppress_render)
            .field("hash_algorithm", &self.hash_algorithm)
            .finish()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    feed: Option<ServiceEndpoint>,
    storage: Option<ServiceEndpoint>,
    mode: SyncMode,
    expire: Option<String>,
    shared_prefixes: Vec<String>,
    output_folder: Option<PathBuf>,
    files_folder: Option<PathBuf>,
    storage_dir: Option<String>,
    routing: RoutingRule,
    catalog_namespace: Option<String>,
    queue_concurrency: Option<usize>,
    cache_clear_window: Option<Duration>,
    suppress_render: Option<bool>,
    hash_algorithm: HashAlgorithm,
    request_timeout: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Catalog service endpoint (required).
    pub fn feed(mut self, url: impl Into<String>, token: impl Into<String>) -> Self {
        self.feed = Some(ServiceEndpoint::new(url, token));
        self
    }

    /// Object store endpoint (required).
    pub fn storage(mut self, url: impl Into<String>, token: impl Into<String>) -> Self {
        self.storage = Some(ServiceEndpoint::new(url, token));
        self
    }

    pub fn mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn clear(mut self, clear: bool) -> Self {
        self.mode.clear = clear;
        self
    }

    pub fn refresh(mut self, refresh: bool) -> Self {
        self.mode.refresh = refresh;
        self
    }

    pub fn global(mut self, global: bool) -> Self {
        self.mode.global = global;
        self
    }

    pub fn expire(mut self, ttl: impl Into<String>) -> Self {
        self.expire = Some(ttl.into());
        self
    }

    /// Sharing prefixes, checked in the given order. Surrounding slashes are
    /// ignored.
    pub fn shared_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared_prefixes = prefixes
            .into_iter()
            .map(|p| p.into().trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    pub fn output_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_folder = Some(path.into());
        self
    }

    pub fn files_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.files_folder = Some(path.into());
        self
    }

    pub fn storage_dir(mut self, name: impl Into<String>) -> Self {
        self.storage_dir = Some(name.into());
        self
    }

    pub fn routing(mut self, rule: RoutingRule) -> Self {
        self.routing = rule;
        self
    }

    pub fn catalog_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.catalog_namespace = Some(namespace.into());
        self
    }

    pub fn queue_concurrency(mut self, concurrency: usize) -> Self {
        self.queue_concurrency = Some(concurrency);
        self
    }

    pub fn cache_clear_window(mut self, window: Duration) -> Self {
        self.cache_clear_window = Some(window);
        self
    }

    pub fn suppress_render(mut self, suppress: bool) -> Self {
        self.suppress_render = Some(suppress);
        self
    }

    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a service endpoint or token is absent
    /// - [`Error::Config`] for out-of-range values
    pub fn build(self) -> Result<EngineConfig> {
        let feed = self.feed.ok_or_else(|| missing_endpoint("feed"))?;
        let storage = self.storage.ok_or_else(|| missing_endpoint("storage"))?;

        let config = EngineConfig {
            feed,
            storage,
            mode: self.mode,
            expire: self.expire.filter(|e| !e.trim().is_empty()),
            shared_prefixes: self.shared_prefixes,
            output_folder: self.output_folder.unwrap_or_else(|| PathBuf::from("out")),
            files_folder: self.files_folder.unwrap_or_else(|| PathBuf::from("files")),
            storage_dir: self
                .storage_dir
                .map(|d| d.trim_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_STORAGE_DIR.to_string()),
            routing: self.routing,
            catalog_namespace: self.catalog_namespace.filter(|n| !n.is_empty()),
            queue_concurrency: self.queue_concurrency.unwrap_or(DEFAULT_QUEUE_CONCURRENCY),
            cache_clear_window: self
                .cache_clear_window
                .unwrap_or(DEFAULT_CACHE_CLEAR_WINDOW),
            suppress_render: self.suppress_render.unwrap_or(true),
            hash_algorithm: self.hash_algorithm,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
        };

        config.validate()?;
        Ok(config)
    }
}

fn missing_endpoint(service: &str) -> Error {
    Error::CapabilityMissing {
        capability: format!("{} service", service),
        message: format!(
            "No {} endpoint configured. Provide its URL and bearer token.",
            service
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder() -> EngineConfigBuilder {
        EngineConfig::builder()
            .feed("https://feed.example.com/", "feed-token")
            .storage("https://storage.example.com", "storage-token")
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.feed.url, "https://feed.example.com");
        assert_eq!(config.queue_concurrency, DEFAULT_QUEUE_CONCURRENCY);
        assert_eq!(config.cache_clear_window, Duration::from_millis(1000));
        assert_eq!(config.storage_dir, "storage");
        assert_eq!(config.hash_algorithm, HashAlgorithm::Md5);
        assert_eq!(config.routing, RoutingRule::layout());
        assert!(config.suppress_render);
        assert_eq!(config.mode, SyncMode::default());
    }

    #[test]
    fn test_missing_feed_endpoint() {
        let result = EngineConfig::builder()
            .storage("https://storage.example.com", "t")
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "feed service")
            }
            other => panic!("Expected CapabilityMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let result = EngineConfig::builder()
            .feed("https://feed.example.com", "  ")
            .storage("https://storage.example.com", "t")
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "feed token"
        ));
    }

    #[test]
    fn test_empty_url_is_rejected() {
        let result = EngineConfig::builder()
            .feed("https://feed.example.com", "t")
            .storage("", "t")
            .build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let result = builder().queue_concurrency(0).build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("concurrency")));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let result = builder().cache_clear_window(Duration::ZERO).build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("window")));
    }

    #[test]
    fn test_shared_prefixes_are_normalized() {
        let config = builder()
            .shared_prefixes(["/blog/", "docs", "", "/"])
            .build()
            .unwrap();

        assert_eq!(config.shared_prefixes, vec!["blog", "docs"]);
    }

    #[test]
    fn test_expire_dropped_in_global_mode() {
        let config = builder().expire("7d").build().unwrap();
        assert_eq!(config.effective_expire(), Some("7d"));

        let config = builder().expire("7d").global(true).build().unwrap();
        assert_eq!(config.effective_expire(), None);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let config = builder().build().unwrap();
        let rendered = format!("{:?}", config);

        assert!(!rendered.contains("feed-token"));
        assert!(!rendered.contains("storage-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_catalog_namespace() {
        let config = builder().catalog_namespace("site").build().unwrap();
        assert_eq!(config.catalog_type("post"), "site/post");

        let config = builder().build().unwrap();
        assert_eq!(config.catalog_type("post"), "post");
    }

    #[test]
    fn test_routing_by_layout() {
        let rule = RoutingRule::layout();

        assert_eq!(rule.resolve(&json!({ "layout": "post" })), Some("post".into()));
        assert_eq!(rule.resolve(&json!({ "type": "post" })), None);
        assert_eq!(rule.resolve(&json!({ "layout": "" })), None);
        assert_eq!(rule.resolve(&json!(null)), None);
    }

    #[test]
    fn test_routing_by_type() {
        let rule = RoutingRule::by_type();

        assert_eq!(rule.resolve(&json!({ "type": "page" })), Some("page".into()));
        assert_eq!(rule.resolve(&json!({ "layout": "page" })), None);
    }

    #[test]
    fn test_routing_by_target() {
        let rule = RoutingRule::target("vault");

        assert_eq!(
            rule.resolve(&json!({ "target": "vault", "layout": "post" })),
            Some("post".into())
        );
        assert_eq!(
            rule.resolve(&json!({ "target": "vault", "type": "page" })),
            Some("page".into())
        );
        assert_eq!(rule.resolve(&json!({ "target": "vault" })), Some("vault".into()));
        assert_eq!(rule.resolve(&json!({ "target": "other", "layout": "post" })), None);
        assert_eq!(rule.resolve(&json!({ "layout": "post" })), None);
    }
}
