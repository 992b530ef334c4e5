//! # Sync Engine
//!
//! Activation and event wiring of the synchronization engine.
//!
//! ## Activation
//!
//! [`SyncEngine::activate`] validates the configuration, resolves the machine
//! context, builds the components and, in clear or refresh mode, wipes the
//! remote side before returning. A configuration error aborts activation
//! before anything subscribes to host events.
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::{EngineDeps, SyncEngine};
//!
//! let engine = SyncEngine::activate(config, deps).await?;
//! let host = engine.attach();
//!
//! // The host calls the Subscriber methods, or forwards raw events.
//! host.document_imported(&mut document);
//! host.send(HostEvent::SyncRequested)?;
//!
//! // On shutdown
//! host.detach().await;
//! engine.flush().await;
//! ```
//!
//! ## Host events
//!
//! Host events travel over an unbounded channel and are handed to the
//! bridge in order by a single dispatcher task, so no burst of imports is
//! lost. Outcomes go the other way on the [`EventBus`] given in
//! [`EngineDeps`].

use bridge_traits::http::HttpClient;
use bridge_traits::identity::MachineIdentity;
use bridge_traits::lock::FileLocker;
use bridge_traits::time::Clock;
use core_runtime::config::EngineConfig;
use core_runtime::document::Document;
use core_runtime::events::{host_channel, EventBus, FileAction, HostEvent, HostSender, SyncEvent};
use futures::future::BoxFuture;
use provider_vault::types::{routes, ScopeRequest};
use provider_vault::{RemoteApiClient, Service};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::bridge::{LifecycleBridge, Subscriber};
use crate::error::Result;
use crate::identity::MachineContext;
use crate::mutation::MutationRunner;
use crate::publish;
use crate::queue::MutationQueue;
use crate::throttle::{CacheInvalidationThrottle, ThrottleAction};
use crate::upload::UploadPipeline;

/// Host capabilities the engine runs on.
#[derive(Clone)]
pub struct EngineDeps {
    pub http_client: Arc<dyn HttpClient>,
    pub file_locker: Arc<dyn FileLocker>,
    pub machine_identity: Arc<dyn MachineIdentity>,

    /// Bus that receives the engine's [`SyncEvent`]s.
    pub events: EventBus,

    /// Clock for cache-busting parameters; system time when `None`.
    pub clock: Option<Arc<dyn Clock>>,
}

/// A running synchronization engine.
pub struct SyncEngine {
    config: Arc<EngineConfig>,
    context: Option<String>,
    client: Arc<RemoteApiClient>,
    throttle: Arc<CacheInvalidationThrottle>,
    bridge: LifecycleBridge,
    events: EventBus,
}

impl SyncEngine {
    /// Build the engine and perform the startup wipe, if configured.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`](crate::SyncError::Config) when a service
    /// URL or token is missing or a limit is zero.
    #[instrument(skip_all, fields(clear = config.mode.clear, refresh = config.mode.refresh, global = config.mode.global))]
    pub async fn activate(config: EngineConfig, deps: EngineDeps) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let context = if config.mode.global {
            None
        } else {
            Some(MachineContext::for_process(deps.machine_identity.as_ref()).to_string())
        };

        let mut client = RemoteApiClient::from_config(Arc::clone(&deps.http_client), &config);
        if let Some(clock) = deps.clock.clone() {
            client = client.with_clock(clock);
        }
        let client = Arc::new(client);

        let throttle = Arc::new(CacheInvalidationThrottle::new(
            config.cache_clear_window,
            clear_cache_action(Arc::clone(&client), context.clone(), deps.events.clone()),
        ));

        let runner = MutationRunner::new(
            Arc::clone(&client),
            Arc::clone(&throttle),
            deps.events.clone(),
        );
        let uploads = Arc::new(UploadPipeline::new(
            Arc::clone(&client),
            Arc::clone(&deps.file_locker),
            Arc::clone(&config),
            context.clone(),
            deps.events.clone(),
        ));
        let bridge = LifecycleBridge::new(
            Arc::clone(&config),
            context.clone(),
            MutationQueue::new(config.queue_concurrency),
            runner,
            uploads,
        );

        let engine = Self {
            config,
            context,
            client,
            throttle,
            bridge,
            events: deps.events,
        };

        if engine.config.mode.clear || engine.config.mode.refresh {
            engine.wipe().await;
        }

        info!(context = ?engine.context, "Sync engine activated");
        Ok(engine)
    }

    async fn wipe(&self) {
        info!("Clearing remote data");
        let request = ScopeRequest {
            context: self.context.clone(),
        };

        if self
            .client
            .call_or_skip(Service::Feed, routes::CLEAR, &request)
            .await
            .is_none()
        {
            warn!("Catalog clear failed, storage left untouched");
            return;
        }

        let storage = self.config.mode.clear && self.bridge.uploads().clear_storage().await;
        publish(&self.events, SyncEvent::Cleared { storage });
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Machine context, `None` in global mode.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn bridge(&self) -> &LifecycleBridge {
        &self.bridge
    }

    /// Public URL of a stored file.
    pub async fn link(&self, path: &str) -> Option<String> {
        self.bridge.uploads().link(path).await
    }

    /// Whether a cache invalidation is armed but not yet sent.
    pub fn cache_clear_pending(&self) -> bool {
        self.throttle.is_pending()
    }

    /// Start a dispatcher that feeds host events to the bridge.
    ///
    /// The returned [`Subscription`] is the host's end: it implements
    /// [`Subscriber`] and hands out [`HostSender`]s.
    pub fn attach(&self) -> Subscription {
        let token = CancellationToken::new();
        let (sender, mut receiver) = host_channel();
        let bridge = self.bridge.clone();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = receiver.recv() => match received {
                        Some(event) => dispatch(&bridge, event),
                        None => break,
                    },
                    _ = cancelled.cancelled() => {
                        receiver.close();
                        while let Some(event) = receiver.recv().await {
                            dispatch(&bridge, event);
                        }
                        break;
                    }
                }
            }
            debug!("Host event dispatcher ended");
        });

        Subscription {
            sender,
            bridge: self.bridge.clone(),
            token,
            handle: Some(handle),
        }
    }

    /// Wait until spawned file work and queued mutations are done.
    pub async fn flush(&self) {
        self.bridge.flush().await;
    }
}

fn clear_cache_action(
    client: Arc<RemoteApiClient>,
    context: Option<String>,
    events: EventBus,
) -> ThrottleAction {
    Arc::new(move || -> BoxFuture<'static, ()> {
        let client = Arc::clone(&client);
        let events = events.clone();
        let request = ScopeRequest {
            context: context.clone(),
        };
        Box::pin(async move {
            if client
                .call_or_skip(Service::Feed, routes::CLEAR_CACHE, &request)
                .await
                .is_some()
            {
                info!("Cache cleared");
                publish(&events, SyncEvent::CacheCleared);
            }
        })
    })
}

fn dispatch(subscriber: &dyn Subscriber, event: HostEvent) {
    match event {
        HostEvent::DocumentImported { mut document } => subscriber.document_imported(&mut document),
        HostEvent::DocumentDeleted { document } => subscriber.document_deleted(&document),
        HostEvent::SyncRequested => subscriber.sync_requested(),
        HostEvent::SourceFileChanged { action, path } => {
            subscriber.source_file_changed(action, &path)
        }
        HostEvent::OutputFileChanged { action, path } => {
            subscriber.output_file_changed(action, &path)
        }
        HostEvent::RebuildCompleted { stamp } => subscriber.rebuild_completed(stamp),
    }
}

/// The host's end of an attached engine.
///
/// Events are delivered in the order they were sent. Events sent before
/// [`detach`](Subscription::detach) are still dispatched; later ones are
/// rejected. Dropping the handle also detaches.
pub struct Subscription {
    sender: HostSender,
    bridge: LifecycleBridge,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// A sender for hosts that forward raw events from elsewhere.
    ///
    /// Imports sent this way do not report render suppression back; use
    /// [`Subscriber::document_imported`] for that.
    pub fn sender(&self) -> HostSender {
        self.sender.clone()
    }

    /// Queue a raw host event.
    pub fn send(&self, event: HostEvent) -> core_runtime::Result<()> {
        self.sender.send(event)
    }

    fn forward(&self, event: HostEvent) {
        if let Err(e) = self.sender.send(event) {
            warn!(error = %e, "Host event dropped");
        }
    }

    /// Stop accepting events, dispatch the queued ones and wait for the
    /// dispatcher to exit.
    pub async fn detach(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Event dispatcher ended abnormally");
            }
        }
    }
}

impl Subscriber for Subscription {
    /// Applies render suppression to the host's document before queueing it.
    fn document_imported(&self, document: &mut Document) {
        self.bridge.annotate(document);
        self.forward(HostEvent::DocumentImported {
            document: document.clone(),
        });
    }

    fn document_deleted(&self, document: &Document) {
        self.forward(HostEvent::DocumentDeleted {
            document: document.clone(),
        });
    }

    fn sync_requested(&self) {
        self.forward(HostEvent::SyncRequested);
    }

    fn source_file_changed(&self, action: FileAction, path: &Path) {
        self.forward(HostEvent::SourceFileChanged {
            action,
            path: path.to_path_buf(),
        });
    }

    fn output_file_changed(&self, action: FileAction, path: &Path) {
        self.forward(HostEvent::OutputFileChanged {
            action,
            path: path.to_path_buf(),
        });
    }

    fn rebuild_completed(&self, stamp: i64) {
        self.forward(HostEvent::RebuildCompleted { stamp });
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
