use super::refresh::Refresher;
use super::service_pool::ServicePool;
use crate::transport::{Capability, Transport};
use crate::utils::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Service name -> pool. Pools are created lazily and never removed.
pub struct Registry<C: Capability> {
    pools: DashMap<String, Arc<ServicePool<C>>>,
}

impl<C: Capability> Registry<C> {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    pub fn get(&self, service: &str) -> Option<Arc<ServicePool<C>>> {
        self.pools.get(service).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the pool for `service`, creating an empty one bound to
    /// `capability` if none exists. The shard lock held by the entry API makes
    /// creation single-writer; the flag tells whether this call created it.
    pub fn get_or_insert(
        &self,
        service: &str,
        namespace: &str,
        capability: Arc<C>,
    ) -> (Arc<ServicePool<C>>, bool) {
        if let Some(existing) = self.get(service) {
            return (existing, false);
        }

        match self.pools.entry(service.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let pool = Arc::new(ServicePool::new(service, namespace, capability));
                entry.insert(Arc::clone(&pool));
                info!(service = %service, namespace = %namespace, "Pool created");
                (pool, true)
            }
        }
    }

    /// `get_or_insert` followed by the first populate. Concurrent first callers
    /// share one populate; after a failed populate the next caller retries it.
    pub async fn get_or_create<T>(
        &self,
        service: &str,
        namespace: &str,
        capability: Arc<C>,
        refresher: &Refresher<T>,
    ) -> Result<Arc<ServicePool<C>>>
    where
        T: Transport<Raw = C::Raw>,
    {
        let (pool, _) = self.get_or_insert(service, namespace, capability);
        if !pool.is_populated() {
            pool.ensure_populated(|| refresher.refresh(&pool)).await?;
        }
        Ok(pool)
    }

    /// Point-in-time list of pools, safe to iterate while new pools are added.
    pub fn snapshot(&self) -> Vec<Arc<ServicePool<C>>> {
        self.pools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        services.sort();
        services
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl<C: Capability> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}
