//! In-memory cache of enabled policies, keyed by owner.
//!
//! Policy evaluation reads the enabled set on every ingestion; the set
//! itself changes rarely. Entries live until explicitly invalidated, so
//! policy writers must invalidate after any mutation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use docflow_core::{Policy, PolicyRepository, Result};

/// Cache over [`PolicyRepository::list_enabled`].
///
/// Cloning is cheap; clones share the same entries.
#[derive(Clone)]
pub struct PolicyCache {
    inner: Arc<PolicyCacheInner>,
}

struct PolicyCacheInner {
    policies: Arc<dyn PolicyRepository>,
    entries: RwLock<HashMap<Uuid, Arc<Vec<Policy>>>>,
}

impl PolicyCache {
    pub fn new(policies: Arc<dyn PolicyRepository>) -> Self {
        Self {
            inner: Arc::new(PolicyCacheInner {
                policies,
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Enabled policies for an owner, ascending priority.
    pub async fn enabled_for_owner(&self, owner_id: Uuid) -> Result<Arc<Vec<Policy>>> {
        if let Some(cached) = self.inner.entries.read().await.get(&owner_id) {
            debug!(
                subsystem = "policy",
                component = "cache",
                %owner_id,
                "Policy cache hit"
            );
            return Ok(Arc::clone(cached));
        }

        let fresh = Arc::new(self.inner.policies.list_enabled(owner_id).await?);
        debug!(
            subsystem = "policy",
            component = "cache",
            %owner_id,
            count = fresh.len(),
            "Policy cache filled"
        );
        self.inner
            .entries
            .write()
            .await
            .insert(owner_id, Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Drop the cached entry for one owner.
    pub async fn invalidate_owner(&self, owner_id: Uuid) {
        self.inner.entries.write().await.remove(&owner_id);
    }

    /// Drop every cached entry.
    pub async fn invalidate_all(&self) {
        self.inner.entries.write().await.clear();
    }
}
