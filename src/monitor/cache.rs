use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::monitor::job::JobReference;

/// Shared store of map/report linkage, readable by other processes.
#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Update `job` in place with the latest cached report id and status.
    /// Leaves `job` untouched when the cache knows nothing newer.
    async fn refresh(&self, job: &mut JobReference) -> Result<()>;

    /// Write `job`'s current linkage back.
    async fn store(&self, job: &JobReference) -> Result<()>;
}

/// Opens connections to a [`StatusCache`]. The monitor opens one per job.
#[async_trait]
pub trait StatusCacheFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StatusCache>>;
}

/// Process-local [`StatusCache`] keyed by [`JobReference::key`].
///
/// Clones share the same store, so a clone handed to another task behaves
/// like a second connection to the same cache.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStatusCache {
    entries: Arc<RwLock<HashMap<String, JobReference>>>,
}

impl InMemoryStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<JobReference> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StatusCache for InMemoryStatusCache {
    async fn refresh(&self, job: &mut JobReference) -> Result<()> {
        let entries = self.entries.read().await;
        if let Some(cached) = entries.get(job.key()) {
            if cached.report_id.is_some() {
                job.report_id = cached.report_id;
                job.status = cached.status;
                job.last_checked = cached.last_checked;
            }
        }
        Ok(())
    }

    async fn store(&self, job: &JobReference) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(job.key().to_string(), job.clone());
        Ok(())
    }
}

#[async_trait]
impl StatusCacheFactory for InMemoryStatusCache {
    async fn connect(&self) -> Result<Box<dyn StatusCache>> {
        Ok(Box::new(self.clone()))
    }
}
