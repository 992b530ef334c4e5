//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, file locks,
//! machine identity) into a running sync engine and attaches a host event
//! channel to it. Hosts drive the engine through [`CoreService::host`] and
//! observe outcomes on the [`EventBus`] they passed in. Desktop and CI hosts enable the `desktop-shims` feature (which
//! depends on `bridge-desktop`) and call [`bootstrap`]; other hosts build a
//! [`CoreDependencies`] from their own bridges and call [`CoreService::start`].

pub mod error;

pub use core_sync::{Subscriber, Subscription};
pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{
    http::HttpClient, identity::MachineIdentity, lock::FileLocker, time::Clock,
};
use core_runtime::{config::EngineConfig, events::EventBus};
use core_sync::{EngineDeps, SyncEngine};
use tracing::info;

/// Aggregated handle to all bridge dependencies the engine requires.
#[derive(Clone)]
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub file_locker: Arc<dyn FileLocker>,
    pub machine_identity: Arc<dyn MachineIdentity>,
    pub clock: Option<Arc<dyn Clock>>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        file_locker: Arc<dyn FileLocker>,
        machine_identity: Arc<dyn MachineIdentity>,
    ) -> Self {
        Self {
            http_client,
            file_locker,
            machine_identity,
            clock: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn into_engine_deps(self, events: EventBus) -> EngineDeps {
        EngineDeps {
            http_client: self.http_client,
            file_locker: self.file_locker,
            machine_identity: self.machine_identity,
            events,
            clock: self.clock,
        }
    }
}

/// Primary façade exposed to host applications.
pub struct CoreService {
    engine: Arc<SyncEngine>,
    events: EventBus,
    subscription: Subscription,
}

impl CoreService {
    /// Activate the engine, publishing outcomes on `events`, and attach a
    /// host channel.
    ///
    /// Fails without attaching when the configuration is incomplete.
    pub async fn start(
        config: EngineConfig,
        deps: CoreDependencies,
        events: EventBus,
    ) -> Result<Self> {
        let engine = SyncEngine::activate(config, deps.into_engine_deps(events.clone())).await?;
        let subscription = engine.attach();

        Ok(Self {
            engine: Arc::new(engine),
            events,
            subscription,
        })
    }

    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }

    /// Bus carrying sync outcomes.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The host's end of the engine; implements [`Subscriber`].
    pub fn host(&self) -> &Subscription {
        &self.subscription
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_active()
    }

    /// Deliver queued host events, stop listening, then finish outstanding
    /// work.
    pub async fn shutdown(self) {
        self.subscription.detach().await;
        self.engine.flush().await;
        info!("Core service stopped");
    }
}

/// Desktop bridge bundle: reqwest transport, fs4 locks, machine-id identity.
#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub fn desktop_dependencies(config: &EngineConfig) -> Result<CoreDependencies> {
    use bridge_desktop::{DesktopMachineIdentity, Fs4FileLocker, ReqwestHttpClient};

    let http_client = ReqwestHttpClient::with_timeout(config.request_timeout)?;
    Ok(CoreDependencies::new(
        Arc::new(http_client),
        Arc::new(Fs4FileLocker::new()),
        Arc::new(DesktopMachineIdentity::new()),
    ))
}

/// Convenience bootstrapper for desktop and CI hosts.
///
/// ```ignore
/// use core_runtime::{config::EngineConfig, events::EventBus};
///
/// let config = EngineConfig::builder()
///     .feed("https://feed.example.com", feed_token)
///     .storage("https://storage.example.com", storage_token)
///     .build()?;
/// let bus = EventBus::default();
/// let service = core_service::bootstrap(config, bus.clone()).await?;
/// ```
#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub async fn bootstrap(config: EngineConfig, events: EventBus) -> Result<CoreService> {
    config.validate()?;
    let deps = desktop_dependencies(&config)?;
    CoreService::start(config, deps, events).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::lock::ScopedFileLock;
    use core_runtime::document::Document;
    use core_runtime::events::{EventStream, HostEvent, SyncEvent};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHttp {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpClient for RecordingHttp {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.urls.lock().unwrap().push(request.url);
            Ok(HttpResponse::new(200, r#"{"success":true}"#))
        }
    }

    struct NoLocks;

    #[async_trait]
    impl FileLocker for NoLocks {
        async fn lock_shared(&self, path: &Path) -> BridgeResult<ScopedFileLock> {
            Err(bridge_traits::error::BridgeError::NotAvailable(
                path.display().to_string(),
            ))
        }
    }

    struct Host;

    impl MachineIdentity for Host {
        fn machine_id(&self) -> BridgeResult<String> {
            Ok("m-1".to_string())
        }

        fn hostname(&self) -> BridgeResult<String> {
            Ok("builder".to_string())
        }

        fn username(&self) -> BridgeResult<String> {
            Ok("ci".to_string())
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::builder()
            .feed("https://feed.test", "feed-token")
            .storage("https://storage.test", "storage-token")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_service_routes_host_events_to_engine() {
        let http = Arc::new(RecordingHttp::default());
        let deps = CoreDependencies::new(http.clone(), Arc::new(NoLocks), Arc::new(Host));
        let bus = EventBus::default();
        let mut kept = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, SyncEvent::Kept { .. }));

        let service = CoreService::start(config(), deps, bus.clone()).await.unwrap();
        assert!(service.is_attached());

        let mut document = Document::new("a.md", "/a/index.html")
            .with_meta(serde_json::json!({ "layout": "post" }));
        service.host().document_imported(&mut document);
        assert!(!document.render);

        let event = tokio::time::timeout(Duration::from_secs(5), kept.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SyncEvent::Kept { ref ref_id, .. } if ref_id == "/a"));

        service.shutdown().await;
        assert!(http
            .urls
            .lock()
            .unwrap()
            .iter()
            .any(|url| url.starts_with("https://feed.test/api/catalog/keep/one?v=")));
    }

    #[tokio::test]
    async fn test_shutdown_delivers_queued_events() {
        let http = Arc::new(RecordingHttp::default());
        let deps = CoreDependencies::new(http.clone(), Arc::new(NoLocks), Arc::new(Host));
        let service = CoreService::start(config(), deps, EventBus::default())
            .await
            .unwrap();

        let sender = service.host().sender();
        for i in 0..400 {
            let document = Document::new(format!("{}.md", i), format!("/{}/", i))
                .with_meta(serde_json::json!({ "layout": "post" }));
            sender
                .send(HostEvent::DocumentImported { document })
                .unwrap();
        }
        service.shutdown().await;

        let keeps = http
            .urls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.contains("/api/catalog/keep/one"))
            .count();
        assert_eq!(keeps, 400);
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn test_incomplete_config_is_rejected() {
        let mut config = config();
        config.feed.token.clear();

        let deps = CoreDependencies::new(
            Arc::new(RecordingHttp::default()),
            Arc::new(NoLocks),
            Arc::new(Host),
        );
        let result = CoreService::start(config, deps, EventBus::default()).await;

        assert!(matches!(
            result,
            Err(CoreError::Sync(core_sync::SyncError::Config(_)))
        ));
    }
}
