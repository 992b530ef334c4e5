//! # Cache Invalidation Throttle
//!
//! Coalesces bursts of "cached views are stale" signals into a single remote
//! call.
//!
//! Each [`trigger`](CacheInvalidationThrottle::trigger) cancels the pending
//! timer, if any, and arms a new one. When a timer survives the full window
//! its token is cleared and the action runs. N triggers inside one window
//! therefore cause exactly one call, fired one window after the last trigger.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// The deferred remote call.
pub type ThrottleAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct TimerToken {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TimerSlot {
    generation: u64,
    pending: Option<TimerToken>,
}

pub struct CacheInvalidationThrottle {
    window: Duration,
    action: ThrottleAction,
    slot: Arc<Mutex<TimerSlot>>,
}

fn lock(slot: &Mutex<TimerSlot>) -> MutexGuard<'_, TimerSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CacheInvalidationThrottle {
    pub fn new(window: Duration, action: ThrottleAction) -> Self {
        Self {
            window,
            action,
            slot: Arc::new(Mutex::new(TimerSlot::default())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Re-arm the timer. Never blocks.
    pub fn trigger(&self) {
        let mut slot = lock(&self.slot);

        if let Some(previous) = slot.pending.take() {
            previous.handle.abort();
        }

        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;

        let window = self.window;
        let action = Arc::clone(&self.action);
        let shared = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;

            {
                let mut slot = lock(&shared);
                match &slot.pending {
                    Some(token) if token.generation == generation => slot.pending = None,
                    _ => return,
                }
            }

            trace!("Cache invalidation window elapsed");
            action().await;
        });

        slot.pending = Some(TimerToken { generation, handle });
    }

    /// Whether a call is armed and has not fired yet.
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).pending.is_some()
    }
}

impl Drop for CacheInvalidationThrottle {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.slot).pending.take() {
            token.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_throttle(window_ms: u64) -> (CacheInvalidationThrottle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let action: ThrottleAction = Arc::new(move || -> BoxFuture<'static, ()> {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        (
            CacheInvalidationThrottle::new(Duration::from_millis(window_ms), action),
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_call() {
        let (throttle, calls) = counting_throttle(1000);

        for _ in 0..20 {
            throttle.trigger();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(throttle.is_pending());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!throttle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_triggers_each_fire() {
        let (throttle, calls) = counting_throttle(1000);

        for _ in 0..4 {
            throttle.trigger();
            tokio::time::sleep(Duration::from_millis(1500)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_call() {
        let (throttle, calls) = counting_throttle(1000);

        throttle.trigger();
        drop(throttle);
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
