//! # Event System
//!
//! Typed channels connecting the build host and the sync engine.
//!
//! ## Overview
//!
//! - **Host events** ([`HostEvent`]) are sent by the build system through a
//!   [`HostSender`]: document imports and deletions, sync requests,
//!   file-watcher notifications and rebuild completion. The channel is
//!   unbounded and delivers every event in order; a burst of imports never
//!   overruns it.
//! - **Sync events** ([`SyncEvent`]) are published by the engine on the
//!   broadcast [`EventBus`] after each remote effect, so hosts and tests can
//!   observe outcomes without parsing logs.
//!
//! ```text
//! ┌────────────┐ HostSender::send ┌─────────────┐  emit   ┌───────────┐
//! │ Build host ├─────────────────>│ Sync engine ├────────>│ EventBus  │
//! └────────────┘    (mpsc)        └─────────────┘         │(broadcast)│
//!       ^                                                 └─────┬─────┘
//!       └───────────────────── subscribe ───────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{host_channel, EventBus, EventStream, HostEvent, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (host, mut engine_side) = host_channel();
//! host.send(HostEvent::SyncRequested).unwrap();
//! assert_eq!(engine_side.recv().await, Some(HostEvent::SyncRequested));
//!
//! let bus = EventBus::new(100);
//! let mut outcomes = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, SyncEvent::CacheCleared));
//! bus.emit(SyncEvent::CacheCleared).ok();
//! assert!(outcomes.try_recv().is_some());
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: an outcome subscriber missed `n` events and
//!   may keep receiving. Host events are never dropped this way.
//! - **`RecvError::Closed`**: every sender is gone; subscribers should exit.
//! - [`Error::Detached`]: a host event was sent after the engine stopped
//!   listening.

use crate::document::Document;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::{broadcast, mpsc};

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Severity
// ============================================================================

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Host Events
// ============================================================================

/// File-watcher action names as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileAction {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
}

impl FileAction {
    pub fn is_removal(&self) -> bool {
        matches!(self, FileAction::Unlink | FileAction::UnlinkDir)
    }
}

impl FromStr for FileAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "add" => Ok(FileAction::Add),
            "change" => Ok(FileAction::Change),
            "unlink" => Ok(FileAction::Unlink),
            "addDir" => Ok(FileAction::AddDir),
            "unlinkDir" => Ok(FileAction::UnlinkDir),
            other => Err(format!("Unknown file action: {}", other)),
        }
    }
}

/// Lifecycle notifications from the build host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum HostEvent {
    /// A document was created or updated.
    DocumentImported { document: Document },
    /// A document was removed from the build.
    DocumentDeleted { document: Document },
    /// A full sync pass was requested (startup).
    SyncRequested,
    /// A watched source file changed.
    SourceFileChanged { action: FileAction, path: PathBuf },
    /// A file in the build output changed.
    OutputFileChanged { action: FileAction, path: PathBuf },
    /// A full rebuild finished with the given build stamp.
    RebuildCompleted { stamp: i64 },
}

impl HostEvent {
    pub fn description(&self) -> &str {
        match self {
            HostEvent::DocumentImported { .. } => "Document imported",
            HostEvent::DocumentDeleted { .. } => "Document deleted",
            HostEvent::SyncRequested => "Sync requested",
            HostEvent::SourceFileChanged { .. } => "Source file changed",
            HostEvent::OutputFileChanged { .. } => "Output file changed",
            HostEvent::RebuildCompleted { .. } => "Rebuild completed",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Outcomes reported by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A catalog entry was upserted.
    Kept {
        vault_id: String,
        ref_id: String,
        catalog_type: String,
    },
    /// A catalog entry was removed.
    Removed { vault_id: String },
    /// Stale entries of a type were expired.
    Expired { catalog_type: String, stamp: i64 },
    /// A file was transferred to the store.
    Uploaded { file: String, link: Option<String> },
    /// A stored file was deleted.
    Unlinked { file: String },
    /// The remote cached views were invalidated.
    CacheCleared,
    /// The catalog, and optionally the store, were wiped.
    Cleared { storage: bool },
    /// A remote effect failed and was skipped.
    Failed {
        operation: String,
        target: String,
        message: String,
    },
}

impl SyncEvent {
    pub fn severity(&self) -> EventSeverity {
        match self {
            SyncEvent::Failed { .. } => EventSeverity::Error,
            SyncEvent::Cleared { .. } => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            SyncEvent::Kept { .. } => "Catalog entry kept",
            SyncEvent::Removed { .. } => "Catalog entry removed",
            SyncEvent::Expired { .. } => "Catalog entries expired",
            SyncEvent::Uploaded { .. } => "File uploaded",
            SyncEvent::Unlinked { .. } => "File unlinked",
            SyncEvent::CacheCleared => "Cache cleared",
            SyncEvent::Cleared { .. } => "Remote data cleared",
            SyncEvent::Failed { .. } => "Remote operation failed",
        }
    }
}

// ============================================================================
// Host Channel
// ============================================================================

/// Sending half of the host-to-engine channel.
///
/// Cloning is cheap; all clones feed the same engine. Sending never blocks.
#[derive(Clone)]
pub struct HostSender {
    sender: mpsc::UnboundedSender<HostEvent>,
}

impl HostSender {
    /// Queues `event` for the engine.
    ///
    /// # Errors
    ///
    /// [`Error::Detached`] once the receiving side has been closed or dropped.
    pub fn send(&self, event: HostEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|rejected| Error::Detached(rejected.0.description().to_string()))
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl fmt::Debug for HostSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half of the host-to-engine channel.
pub struct HostReceiver {
    receiver: mpsc::UnboundedReceiver<HostEvent>,
}

impl HostReceiver {
    /// Next host event, `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<HostEvent> {
        self.receiver.recv().await
    }

    /// Rejects further sends. Events already queued can still be received.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Number of events waiting to be received.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Creates an unbounded, order-preserving host event channel.
pub fn host_channel() -> (HostSender, HostReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (HostSender { sender }, HostReceiver { receiver })
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel carrying engine outcomes to any number of observers.
///
/// Cloning is cheap; all clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers, or an error when nobody listens.
    pub fn emit(&self, event: SyncEvent) -> std::result::Result<usize, SendError<SyncEvent>> {
        self.sender.send(event)
    }

    /// Creates a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(16);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&SyncEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
pub struct EventStream {
    receiver: Receiver<SyncEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<SyncEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned from `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&SyncEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &SyncEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if `n` events were missed, `RecvError::Closed`
    /// once all senders are dropped.
    pub async fn recv(&mut self) -> std::result::Result<SyncEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. Returns `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<std::result::Result<SyncEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
