use super::connection::Connection;
use super::service_pool::ServicePool;
use crate::config::PoolSettings;
use crate::discovery::ServiceDirectory;
use crate::metrics::PoolMetrics;
use crate::transport::{Capability, Transport};
use crate::utils::error::{PoolError, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outcome of one refresh run against one pool.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Addresses returned by the directory.
    pub resolved: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Endpoints that could not be dialed or wrapped; skipped for this run.
    pub failures: Vec<PoolError>,
    pub pool_size: usize,
}

impl RefreshReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failures.is_empty()
    }
}

/// Turns "desired endpoints" from the directory into live pool members.
///
/// Shared by the first populate of a pool, eviction backfill and the periodic
/// full scan.
pub struct Refresher<T: Transport> {
    directory: Arc<dyn ServiceDirectory>,
    transport: Arc<T>,
    dial_timeout: Duration,
    prune_stale: bool,
    max_concurrent_dials: usize,
    cancel: CancellationToken,
}

impl<T: Transport> Refresher<T> {
    pub fn new(directory: Arc<dyn ServiceDirectory>, transport: Arc<T>, settings: &PoolSettings) -> Self {
        Self {
            directory,
            transport,
            dial_timeout: settings.dial_timeout,
            prune_stale: settings.prune_stale,
            max_concurrent_dials: settings.max_concurrent_dials.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Once `cancel` fires, refreshes stop touching pools and close whatever
    /// they dialed instead of inserting it.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reconcile `pool` against the directory.
    ///
    /// A directory failure is returned as `DirectoryUnavailable` and leaves
    /// the pool untouched. Per-endpoint failures are collected in the report
    /// and never abort the run. After cancellation the pool is left alone and
    /// `ShuttingDown` is returned.
    #[instrument(level = "debug", skip_all, fields(service = %pool.service(), namespace = %pool.namespace()))]
    pub async fn refresh<C>(&self, pool: &ServicePool<C>) -> Result<RefreshReport>
    where
        C: Capability<Raw = T::Raw>,
    {
        let _guard = pool.refresh_guard().await;
        if self.cancel.is_cancelled() {
            return Err(PoolError::ShuttingDown);
        }

        let desired = match self.directory.resolve(pool.service(), pool.namespace()).await {
            Ok(desired) => desired,
            Err(e) => {
                pool.record_refresh(false);
                PoolMetrics::refresh(pool.service(), "directory_error");
                warn!(error = %e, "Service directory lookup failed");
                return Err(PoolError::DirectoryUnavailable {
                    service: pool.service().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let current = pool.addresses().await;
        let to_add: Vec<String> = desired.difference(&current).cloned().collect();
        let to_remove: HashSet<String> = if self.prune_stale {
            current.difference(&desired).cloned().collect()
        } else {
            HashSet::new()
        };

        let mut report = RefreshReport {
            resolved: desired.len(),
            ..Default::default()
        };

        let attempts: Vec<Result<Connection<C::Handle>>> = stream::iter(to_add)
            .map(|address| self.establish(pool, address))
            .buffer_unordered(self.max_concurrent_dials)
            .collect()
            .await;

        let mut established = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            match attempt {
                Ok(conn) => established.push(conn),
                Err(e) => {
                    PoolMetrics::dial_failure(pool.service());
                    warn!(error = %e, "Skipping unusable endpoint");
                    report.failures.push(e);
                }
            }
        }

        // Shutdown drains pools under this same guard; anything dialed after it
        // started must not land in a drained pool.
        if self.cancel.is_cancelled() {
            debug!(dialed = established.len(), "Refresh cancelled, closing new connections");
            pool.teardown_owned(established).await;
            return Err(PoolError::ShuttingDown);
        }

        let inserted: Vec<String> = established
            .iter()
            .map(|conn| conn.address().to_string())
            .collect();
        let rejected = pool.insert(established).await;
        let rejected_addresses: HashSet<&str> = rejected.iter().map(|c| c.address()).collect();
        report.added = inserted
            .into_iter()
            .filter(|address| !rejected_addresses.contains(address.as_str()))
            .collect();
        pool.teardown_owned(rejected).await;

        let pruned = pool.remove_addresses(&to_remove).await;
        report.removed = pruned.iter().map(|c| c.address().to_string()).collect();
        pool.teardown(pruned).await;

        report.pool_size = pool.len().await;
        pool.record_refresh(true);
        pool.mark_populated();
        PoolMetrics::refresh(pool.service(), "ok");

        if report.is_noop() {
            debug!(pool_size = report.pool_size, "Pool already matches directory");
        } else {
            info!(
                resolved = report.resolved,
                added = report.added.len(),
                removed = report.removed.len(),
                failed = report.failures.len(),
                pool_size = report.pool_size,
                "Pool refreshed"
            );
        }

        Ok(report)
    }

    /// Dial one address and wrap it into a client, each step bounded by the
    /// dial timeout.
    async fn establish<C>(&self, pool: &ServicePool<C>, address: String) -> Result<Connection<C::Handle>>
    where
        C: Capability<Raw = T::Raw>,
    {
        let raw = match timeout(self.dial_timeout, self.transport.dial(&address)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(source)) => return Err(PoolError::Dial { address, source }),
            Err(_) => {
                return Err(PoolError::DialTimeout {
                    address,
                    timeout: self.dial_timeout,
                })
            }
        };

        let handle = match timeout(self.dial_timeout, pool.capability().new_client(raw)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(PoolError::ClientConstruction {
                    address,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(PoolError::ClientConstruction {
                    address,
                    reason: format!("client construction timed out after {:?}", self.dial_timeout),
                })
            }
        };

        debug!(address = %address, "Endpoint connected");
        Ok(Connection::new(handle, address, pool.service(), pool.namespace()))
    }
}
