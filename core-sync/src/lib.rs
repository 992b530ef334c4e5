//! # Sync Engine Module
//!
//! Mirrors build documents into the remote catalog and build assets into the
//! remote store.
//!
//! ## Components
//!
//! - **Identity & Addressing** (`identity`): vault ids, passport ids, reference
//!   paths and the machine context
//! - **Upload Pipeline** (`upload`): hash-compared, lock-guarded, single-flight
//!   uploads
//! - **Mutation Queue** (`queue`): FIFO remote mutations, bounded concurrency
//! - **Cache Invalidation Throttle** (`throttle`): coalesced cache clears
//! - **Lifecycle Bridge** (`bridge`): host events to mutations and uploads
//! - **Sync Engine** (`engine`): activation, startup wipe, host event channel
//!
//! Remote and file-system failures are logged and swallowed; only an invalid
//! configuration stops the engine from activating.

pub mod bridge;
pub mod engine;
pub mod error;
pub mod identity;
pub mod mutation;
pub mod queue;
pub mod throttle;
pub mod upload;

use core_runtime::events::{EventBus, SyncEvent};

pub use bridge::{LayoutRegistry, LifecycleBridge, Subscriber, WatchRoot};
pub use engine::{EngineDeps, Subscription, SyncEngine};
pub use error::{Result, SyncError};
pub use identity::{derive_ref_id, MachineContext, PassportId, RefAddress, VaultId};
pub use mutation::{Mutation, MutationRunner};
pub use queue::{MutationQueue, QueueStats};
pub use throttle::{CacheInvalidationThrottle, ThrottleAction};
pub use upload::UploadPipeline;

/// Report an outcome on the bus. Nobody listening is not an error.
pub(crate) fn publish(events: &EventBus, event: SyncEvent) {
    events.emit(event).ok();
}
