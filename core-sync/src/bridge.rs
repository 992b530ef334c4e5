//! # Lifecycle Bridge
//!
//! Translates build-host notifications into catalog mutations and uploads.
//!
//! ## Overview
//!
//! The bridge implements [`Subscriber`], one method per host event. Every
//! method returns immediately: catalog mutations go onto the
//! [`MutationQueue`] and file work is spawned, so the publisher is never
//! blocked. The awaitable inherent methods ([`LifecycleBridge::sync`],
//! [`LifecycleBridge::file_action`], ...) do the same work for callers that
//! want to wait for it.
//!
//! ## Routing
//!
//! A document is handled only when the configured [`RoutingRule`] resolves a
//! catalog type from its metadata. Unrouted documents are ignored entirely,
//! `render` included.
//!
//! [`RoutingRule`]: core_runtime::config::RoutingRule

use core_runtime::config::EngineConfig;
use core_runtime::document::Document;
use core_runtime::events::FileAction;
use provider_vault::types::{ExpireRequest, RemoveRequest};
use provider_vault::VaultEntry;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::identity::{derive_ref_id, PassportId, VaultId};
use crate::mutation::{Mutation, MutationRunner};
use crate::queue::MutationQueue;
use crate::upload::{is_storage_path, relative_path, UploadPipeline};

/// Receiver of build-host lifecycle events.
///
/// Implementations must return without waiting on remote work.
pub trait Subscriber: Send + Sync {
    /// A document was created or updated. May clear `document.render`.
    fn document_imported(&self, document: &mut Document);

    fn document_deleted(&self, document: &Document);

    /// A full sync pass was requested.
    fn sync_requested(&self);

    /// The watcher saw a change below the source files folder.
    fn source_file_changed(&self, action: FileAction, path: &Path);

    /// A file below the output folder was written or removed.
    fn output_file_changed(&self, action: FileAction, path: &Path);

    /// A full rebuild finished with build stamp `stamp`.
    fn rebuild_completed(&self, stamp: i64);
}

/// Which configured folder a watched path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchRoot {
    Source,
    Output,
}

/// Document id to catalog type, plus every type seen since startup.
#[derive(Default)]
pub struct LayoutRegistry {
    layouts: RwLock<HashMap<String, String>>,
    seen: RwLock<BTreeSet<String>>,
}

impl LayoutRegistry {
    fn record(&self, document_id: &str, catalog_type: &str) {
        self.layouts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.to_string(), catalog_type.to_string());
        self.seen
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(catalog_type.to_string());
    }

    fn forget(&self, document_id: &str) {
        self.layouts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id);
    }

    pub fn layout_for(&self, document_id: &str) -> Option<String> {
        self.layouts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    /// Distinct catalog types in sorted order.
    pub fn types_seen(&self) -> Vec<String> {
        self.seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

struct BridgeState {
    config: Arc<EngineConfig>,
    context: Option<String>,
    queue: MutationQueue,
    runner: MutationRunner,
    uploads: Arc<UploadPipeline>,
    registry: LayoutRegistry,
    synced: AtomicBool,
    tasks: TaskTracker,
}

/// Event-to-operation translator. Cloning shares the same state.
#[derive(Clone)]
pub struct LifecycleBridge {
    state: Arc<BridgeState>,
}

impl LifecycleBridge {
    pub fn new(
        config: Arc<EngineConfig>,
        context: Option<String>,
        queue: MutationQueue,
        runner: MutationRunner,
        uploads: Arc<UploadPipeline>,
    ) -> Self {
        Self {
            state: Arc::new(BridgeState {
                config,
                context,
                queue,
                runner,
                uploads,
                registry: LayoutRegistry::default(),
                synced: AtomicBool::new(false),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn registry(&self) -> &LayoutRegistry {
        &self.state.registry
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.state.queue
    }

    pub fn uploads(&self) -> &UploadPipeline {
        &self.state.uploads
    }

    /// Shortcut for [`LayoutRegistry::layout_for`].
    pub fn layout_for(&self, document_id: &str) -> Option<String> {
        self.state.registry.layout_for(document_id)
    }

    fn catalog_type(&self, document: &Document) -> Option<String> {
        let raw = self.state.config.routing.resolve(&document.meta)?;
        Some(self.state.config.catalog_type(&raw))
    }

    fn enqueue(&self, mutation: Mutation) {
        if self.state.config.mode.clear {
            debug!(operation = mutation.operation(), "Clear mode, mutation skipped");
            return;
        }
        self.state.queue.push(self.state.runner.job(mutation));
    }

    /// Build the catalog entry of a routed document. `None` when unrouted.
    pub fn entry_for(&self, document: &Document) -> Option<VaultEntry> {
        let catalog_type = self.catalog_type(document)?;
        let address = derive_ref_id(&document.url, &self.state.config.shared_prefixes);

        Some(VaultEntry {
            passport_id: PassportId::new().as_uuid(),
            vault_id: VaultId::derive(&document.id).as_uuid(),
            ref_id: address.ref_id,
            share: address.share,
            catalog_type,
            data: document.catalog_data(),
            stamp: document.stamp,
            date: document.mtime,
            expire: self.state.config.effective_expire().map(str::to_string),
            context: self.state.context.clone(),
        })
    }

    /// Clear `render` on a routed document when suppression is enabled.
    ///
    /// Returns whether the document is routed. Nothing is enqueued.
    pub fn annotate(&self, document: &mut Document) -> bool {
        if self.catalog_type(document).is_none() {
            return false;
        }
        if self.state.config.suppress_render {
            document.render = false;
        }
        true
    }

    /// Route, annotate and enqueue a keep for `document`.
    pub fn import(&self, document: &mut Document) {
        let Some(entry) = self.entry_for(document) else {
            debug!(id = %document.id, "Document not routed");
            return;
        };

        self.state.registry.record(&document.id, &entry.catalog_type);
        if self.state.config.suppress_render {
            document.render = false;
        }

        self.enqueue(Mutation::Keep(entry));
    }

    /// Route and enqueue a remove for `document`.
    pub fn delete(&self, document: &Document) {
        if self.catalog_type(document).is_none() {
            debug!(id = %document.id, "Document not routed");
            return;
        }

        info!(id = %document.id, "Removing vault entry");
        self.state.registry.forget(&document.id);
        self.enqueue(Mutation::Remove(RemoveRequest {
            vault_id: VaultId::derive(&document.id).as_uuid(),
            context: self.state.context.clone(),
        }));
    }

    /// Enqueue an expire per catalog type seen since startup.
    pub fn expire_sweep(&self, stamp: i64) {
        for catalog_type in self.state.registry.types_seen() {
            self.enqueue(Mutation::Expire(ExpireRequest {
                catalog_type,
                stamp,
                context: self.state.context.clone(),
            }));
        }
    }

    /// Upload every regular file of the output storage subtree.
    ///
    /// Runs once per bridge; later calls return immediately. Skipped in clear
    /// mode.
    #[instrument(skip(self))]
    pub async fn sync(&self) {
        if self.state.synced.swap(true, Ordering::SeqCst) {
            debug!("Startup sync already done");
            return;
        }
        if self.state.config.mode.clear {
            info!("Clear mode, startup sync skipped");
            return;
        }

        let output = self.state.config.output_folder.clone();
        let storage = output.join(&self.state.config.storage_dir);
        let files = match tokio::task::spawn_blocking(move || storage_files(&storage)).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Storage walk failed");
                return;
            }
        };

        info!(files = files.len(), "Startup sync");
        for file in files {
            match relative_path(&output, &file) {
                Ok(relative) => self.state.uploads.upload(&file, &relative).await,
                Err(e) => warn!(error = %e, "Skipping file"),
            }
        }
    }

    /// React to a watcher event for `path` below `root`.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn file_action(&self, root: WatchRoot, action: FileAction, path: &Path) {
        let base = match root {
            WatchRoot::Source => &self.state.config.files_folder,
            WatchRoot::Output => &self.state.config.output_folder,
        };

        let relative = match relative_path(base, path) {
            Ok(relative) => relative,
            Err(e) => {
                debug!(error = %e, "Ignoring file event");
                return;
            }
        };

        if !is_storage_path(&relative, &self.state.config.storage_dir) {
            return;
        }

        match action {
            FileAction::Unlink => self.state.uploads.unlink(&relative).await,
            FileAction::UnlinkDir | FileAction::AddDir => {}
            FileAction::Add | FileAction::Change => {
                let is_file = tokio::fs::symlink_metadata(path)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false);
                if is_file {
                    self.state.uploads.upload(path, &relative).await;
                }
            }
        }
    }

    /// Wait for spawned file work and queued mutations to finish.
    pub async fn flush(&self) {
        self.state.tasks.close();
        self.state.tasks.wait().await;
        self.state.tasks.reopen();
        self.state.queue.wait_idle().await;
    }

    fn spawn_file_action(&self, root: WatchRoot, action: FileAction, path: &Path) {
        let bridge = self.clone();
        let path = path.to_path_buf();
        self.state
            .tasks
            .spawn(async move { bridge.file_action(root, action, &path).await });
    }
}

/// Regular files below `root`, symlinks excluded.
fn storage_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

impl Subscriber for LifecycleBridge {
    fn document_imported(&self, document: &mut Document) {
        self.import(document);
    }

    fn document_deleted(&self, document: &Document) {
        self.delete(document);
    }

    fn sync_requested(&self) {
        let bridge = self.clone();
        self.state.tasks.spawn(async move { bridge.sync().await });
    }

    fn source_file_changed(&self, action: FileAction, path: &Path) {
        self.spawn_file_action(WatchRoot::Source, action, path);
    }

    fn output_file_changed(&self, action: FileAction, path: &Path) {
        self.spawn_file_action(WatchRoot::Output, action, path);
    }

    fn rebuild_completed(&self, stamp: i64) {
        self.expire_sweep(stamp);
    }
}
