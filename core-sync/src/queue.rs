//! # Mutation Queue
//!
//! FIFO queue of remote catalog mutations with a fixed concurrency bound.
//!
//! ## Overview
//!
//! Jobs are deferred futures. A dispatcher task starts them in enqueue order,
//! waiting for one of `concurrency` permits before each start, so at most
//! `concurrency` jobs run at any instant. Completion order is not guaranteed.
//! The queue starts as soon as it is created; there is no separate start call.
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::queue::MutationQueue;
//!
//! let queue = MutationQueue::new(3);
//! queue.push(async move {
//!     client.call_or_skip(Service::Feed, routes::REMOVE, &request).await;
//! });
//! queue.wait_idle().await;
//! ```

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, warn};

type Job = BoxFuture<'static, ()>;

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Enqueued but not started.
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    /// Highest number of jobs observed running at once.
    pub peak: usize,
}

#[derive(Default)]
struct QueueState {
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicUsize,
    peak: AtomicUsize,
    idle: Notify,
}

impl QueueState {
    fn outstanding(&self) -> usize {
        self.queued.load(Ordering::SeqCst) + self.running.load(Ordering::SeqCst)
    }
}

/// Bounded-concurrency FIFO job queue.
pub struct MutationQueue {
    sender: mpsc::UnboundedSender<Job>,
    state: Arc<QueueState>,
    concurrency: usize,
}

impl MutationQueue {
    /// Create the queue and spawn its dispatcher on the current runtime.
    ///
    /// A `concurrency` of 0 is treated as 1.
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());

        tokio::spawn(dispatch(receiver, Arc::clone(&state), concurrency));

        Self {
            sender,
            state,
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Enqueue a job. It starts once every earlier job has started and a
    /// slot is free.
    pub fn push<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.queued.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Box::pin(job)).is_err() {
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            warn!("Mutation queue dispatcher is gone, job dropped");
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.state.queued.load(Ordering::SeqCst),
            running: self.state.running.load(Ordering::SeqCst),
            completed: self.state.completed.load(Ordering::SeqCst),
            peak: self.state.peak.load(Ordering::SeqCst),
        }
    }

    /// Resolves once every job enqueued so far has completed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<Job>,
    state: Arc<QueueState>,
    concurrency: usize,
) {
    let slots = Arc::new(Semaphore::new(concurrency));

    while let Some(job) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };

        // Moved from queued to running without passing through zero outstanding.
        let running = state.running.fetch_add(1, Ordering::SeqCst) + 1;
        state.queued.fetch_sub(1, Ordering::SeqCst);
        state.peak.fetch_max(running, Ordering::SeqCst);
        debug!(running, "Mutation job started");

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            job.await;
            drop(permit);

            state.completed.fetch_add(1, Ordering::SeqCst);
            state.running.fetch_sub(1, Ordering::SeqCst);
            if state.outstanding() == 0 {
                state.idle.notify_waiters();
            }
        });
    }

    debug!("Mutation queue closed");
}
