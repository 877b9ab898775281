use super::connection::{Connection, DeadConnection};
use crate::metrics::PoolMetrics;
use crate::transport::Capability;
use crate::utils::error::{PoolError, Result};
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OnceCell, RwLock};
use tracing::{debug, info, trace};

pub type PooledConnection<C> = Arc<Connection<<C as Capability>::Handle>>;

/// Point-in-time view of one pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub service: String,
    pub namespace: String,
    pub connections: usize,
    pub addresses: Vec<String>,
    pub oldest_connection: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub consecutive_refresh_failures: u32,
}

/// The set of live connections for one service.
///
/// Lock discipline:
/// - `connections` guards membership. Selection, size reads and snapshots
///   take the read lock; insertion and removal take the write lock and never
///   await while holding it.
/// - `refresh_lock` serializes discovery runs for this service so two
///   refreshes never dial the same new address at once.
pub struct ServicePool<C: Capability> {
    service: String,
    namespace: String,
    capability: Arc<C>,
    connections: RwLock<Vec<PooledConnection<C>>>,
    refresh_lock: Mutex<()>,
    populated: OnceCell<()>,
    last_refresh_ms: AtomicI64,
    refresh_failures: AtomicU32,
}

impl<C: Capability> ServicePool<C> {
    pub fn new(service: impl Into<String>, namespace: impl Into<String>, capability: Arc<C>) -> Self {
        Self {
            service: service.into(),
            namespace: namespace.into(),
            capability,
            connections: RwLock::new(Vec::new()),
            refresh_lock: Mutex::new(()),
            populated: OnceCell::new(),
            last_refresh_ms: AtomicI64::new(0),
            refresh_failures: AtomicU32::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn capability(&self) -> &Arc<C> {
        &self.capability
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn addresses(&self) -> HashSet<String> {
        self.connections
            .read()
            .await
            .iter()
            .map(|conn| conn.address().to_string())
            .collect()
    }

    /// Clone the current members so they can be used without holding the lock.
    pub async fn snapshot(&self) -> Vec<PooledConnection<C>> {
        self.connections.read().await.clone()
    }

    /// Pick one member uniformly at random.
    ///
    /// Length and index are read under the same guard, so a concurrent
    /// eviction can never make the index stale.
    pub async fn select_connection(&self) -> Option<PooledConnection<C>> {
        let connections = self.connections.read().await;
        if connections.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..connections.len());
        let selected = Arc::clone(&connections[index]);
        trace!(
            service = %self.service,
            address = %selected.address(),
            pool_size = connections.len(),
            "Selected pooled connection"
        );
        Some(selected)
    }

    pub async fn select(&self) -> Option<C::Handle> {
        self.select_connection()
            .await
            .map(|conn| conn.handle().clone())
    }

    /// Add connections, skipping any whose address is already present.
    ///
    /// Duplicates can appear when another populate won the race; they are
    /// returned to the caller for teardown instead of being inserted.
    pub async fn insert(
        &self,
        candidates: Vec<Connection<C::Handle>>,
    ) -> Vec<Connection<C::Handle>> {
        let mut rejected = Vec::new();
        let size = {
            let mut connections = self.connections.write().await;
            let mut present: HashSet<String> = connections
                .iter()
                .map(|conn| conn.address().to_string())
                .collect();

            for candidate in candidates {
                if present.insert(candidate.address().to_string()) {
                    connections.push(Arc::new(candidate));
                } else {
                    rejected.push(candidate);
                }
            }
            connections.len()
        };

        PoolMetrics::set_connections(&self.service, size);
        if !rejected.is_empty() {
            debug!(
                service = %self.service,
                duplicates = rejected.len(),
                "Discarded duplicate connections from concurrent populate"
            );
        }
        rejected
    }

    /// Remove the reported dead connections.
    ///
    /// Matches on address and connection id, so a fresh connection to the same
    /// address made after the probe is left alone.
    pub async fn evict(&self, dead: &[DeadConnection]) -> Vec<PooledConnection<C>> {
        let removed = self
            .remove_where(|conn| {
                dead.iter()
                    .any(|d| d.id == conn.id() && d.address == conn.address())
            })
            .await;

        if !removed.is_empty() {
            PoolMetrics::evictions(&self.service, removed.len());
            info!(
                service = %self.service,
                evicted = removed.len(),
                "Evicted dead connections"
            );
        }
        removed
    }

    /// Remove every connection whose address is in `addresses`.
    pub async fn remove_addresses(&self, addresses: &HashSet<String>) -> Vec<PooledConnection<C>> {
        if addresses.is_empty() {
            return Vec::new();
        }
        self.remove_where(|conn| addresses.contains(conn.address()))
            .await
    }

    /// Take every member out of the pool.
    pub async fn drain(&self) -> Vec<PooledConnection<C>> {
        let drained = std::mem::take(&mut *self.connections.write().await);
        PoolMetrics::set_connections(&self.service, 0);
        drained
    }

    // Two phases: decide membership for every entry first, then swap in the
    // filtered collection in one step under the write lock.
    async fn remove_where<F>(&self, mut doomed: F) -> Vec<PooledConnection<C>>
    where
        F: FnMut(&Connection<C::Handle>) -> bool,
    {
        let (removed, size) = {
            let mut connections = self.connections.write().await;
            let (removed, kept): (Vec<_>, Vec<_>) = connections
                .drain(..)
                .partition(|conn| doomed(conn.as_ref()));
            *connections = kept;
            (removed, connections.len())
        };
        PoolMetrics::set_connections(&self.service, size);
        removed
    }

    /// Hand removed connections to the capability's teardown.
    pub async fn teardown<I>(&self, removed: I)
    where
        I: IntoIterator<Item = PooledConnection<C>>,
    {
        for conn in removed {
            trace!(
                service = %self.service,
                address = %conn.address(),
                id = conn.id(),
                "Closing connection"
            );
            self.capability.close(conn.handle().clone()).await;
        }
    }

    pub async fn teardown_owned(&self, rejected: Vec<Connection<C::Handle>>) {
        for conn in rejected {
            self.capability.close(conn.into_handle()).await;
        }
    }

    pub(crate) async fn refresh_guard(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock().await
    }

    /// Run the first populate exactly once. Concurrent first callers wait for
    /// the one in flight; a failed populate leaves the pool unpopulated so the
    /// next caller retries.
    pub(crate) async fn ensure_populated<F, Fut, R>(&self, populate: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.populated
            .get_or_try_init(move || async move {
                populate().await?;
                Ok::<(), PoolError>(())
            })
            .await
            .map(|_| ())
    }

    pub fn is_populated(&self) -> bool {
        self.populated.initialized()
    }

    /// Any successful refresh counts as the first populate, so callers stop
    /// depending on the directory once background work has filled the pool.
    pub(crate) fn mark_populated(&self) {
        // Fails only when already set or while `ensure_populated` is running,
        // which sets it on success anyway.
        let _ = self.populated.set(());
    }

    pub(crate) fn record_refresh(&self, success: bool) {
        self.last_refresh_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        if success {
            self.refresh_failures.store(0, Ordering::Relaxed);
        } else {
            self.refresh_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn consecutive_refresh_failures(&self) -> u32 {
        self.refresh_failures.load(Ordering::Relaxed)
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        match self.last_refresh_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let connections = self.connections.read().await;
        let mut addresses: Vec<String> = connections
            .iter()
            .map(|conn| conn.address().to_string())
            .collect();
        addresses.sort();

        PoolStats {
            service: self.service.clone(),
            namespace: self.namespace.clone(),
            connections: connections.len(),
            addresses,
            oldest_connection: connections.iter().map(|conn| conn.connected_at()).min(),
            last_refresh: self.last_refresh(),
            consecutive_refresh_failures: self.consecutive_refresh_failures(),
        }
    }
}

impl<C: Capability> std::fmt::Debug for ServicePool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePool")
            .field("service", &self.service)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
