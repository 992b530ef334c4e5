//! Catalog mutations and the queue jobs that submit them.

use core_runtime::events::{EventBus, SyncEvent};
use provider_vault::types::{routes, ExpireRequest, RemoveRequest};
use provider_vault::{ApiEnvelope, RemoteApiClient, Service, VaultEntry};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::publish;
use crate::throttle::CacheInvalidationThrottle;

/// One remote catalog mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Upsert of one document's entry.
    Keep(VaultEntry),
    Remove(RemoveRequest),
    /// Expire entries of a type not refreshed in the given stamp.
    Expire(ExpireRequest),
}

impl Mutation {
    pub fn path(&self) -> &'static str {
        match self {
            Mutation::Keep(_) => routes::KEEP_ONE,
            Mutation::Remove(_) => routes::REMOVE,
            Mutation::Expire(_) => routes::EXPIRE,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Mutation::Keep(_) => "keep",
            Mutation::Remove(_) => "remove",
            Mutation::Expire(_) => "expire",
        }
    }

    /// What the mutation is about, for logs and failure events.
    pub fn target(&self) -> String {
        match self {
            Mutation::Keep(entry) => entry.ref_id.clone(),
            Mutation::Remove(request) => request.vault_id.to_string(),
            Mutation::Expire(request) => request.catalog_type.clone(),
        }
    }

    fn outcome(&self) -> SyncEvent {
        match self {
            Mutation::Keep(entry) => SyncEvent::Kept {
                vault_id: entry.vault_id.to_string(),
                ref_id: entry.ref_id.clone(),
                catalog_type: entry.catalog_type.clone(),
            },
            Mutation::Remove(request) => SyncEvent::Removed {
                vault_id: request.vault_id.to_string(),
            },
            Mutation::Expire(request) => SyncEvent::Expired {
                catalog_type: request.catalog_type.clone(),
                stamp: request.stamp,
            },
        }
    }

    async fn submit(&self, client: &RemoteApiClient) -> Option<ApiEnvelope> {
        let path = self.path();
        match self {
            Mutation::Keep(entry) => client.call_or_skip(Service::Feed, path, entry).await,
            Mutation::Remove(request) => client.call_or_skip(Service::Feed, path, request).await,
            Mutation::Expire(request) => client.call_or_skip(Service::Feed, path, request).await,
        }
    }
}

/// Turns mutations into queue jobs.
#[derive(Clone)]
pub struct MutationRunner {
    client: Arc<RemoteApiClient>,
    throttle: Arc<CacheInvalidationThrottle>,
    events: EventBus,
}

impl MutationRunner {
    pub fn new(
        client: Arc<RemoteApiClient>,
        throttle: Arc<CacheInvalidationThrottle>,
        events: EventBus,
    ) -> Self {
        Self {
            client,
            throttle,
            events,
        }
    }

    /// Deferred job: invalidate caches, log, submit, report.
    pub fn job(&self, mutation: Mutation) -> impl Future<Output = ()> + Send + 'static {
        let runner = self.clone();
        async move { runner.run(mutation).await }
    }

    pub async fn run(&self, mutation: Mutation) {
        self.throttle.trigger();

        let target = mutation.target();
        match &mutation {
            Mutation::Keep(_) => info!(ref_id = %target, "Keep"),
            Mutation::Remove(_) => info!(vault_id = %target, "Remove"),
            Mutation::Expire(request) => {
                info!(catalog_type = %target, stamp = request.stamp, "Expire")
            }
        }

        let event = match mutation.submit(&self.client).await {
            Some(_) => mutation.outcome(),
            None => SyncEvent::Failed {
                operation: mutation.operation().to_string(),
                target,
                message: "remote call skipped".to_string(),
            },
        };
        publish(&self.events, event);
    }
}
