use crate::config::PoolSettings;
use crate::discovery::ServiceDirectory;
use crate::health::HealthChecker;
use crate::pool::{PoolStats, RefreshReport, Refresher, Registry};
use crate::reconcile::Reconciler;
use crate::transport::{Capability, TcpTransport, Transport};
use crate::utils::error::{PoolError, Result};
use crate::utils::require_non_empty;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Entry point for callers: hands out pooled connections and owns the
/// background health, eviction and full-scan tasks.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use replica_pool::{PoolManager, PoolSettings, StaticDirectory, TcpCapability, TcpTransport};
/// # async fn demo() -> replica_pool::Result<()> {
/// let directory = Arc::new(StaticDirectory::new());
/// directory.set_endpoints("search", "prod", ["10.0.0.7:9200"]).await;
///
/// let manager = PoolManager::new(directory, TcpTransport::new(None), PoolSettings::default());
/// manager.start();
/// let handle = manager.connect("search", "prod", Arc::new(TcpCapability)).await?;
/// # let _ = handle;
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct PoolManager<C, T = TcpTransport>
where
    C: Capability,
    T: Transport<Raw = C::Raw>,
{
    registry: Arc<Registry<C>>,
    refresher: Arc<Refresher<T>>,
    reconciler: Arc<Reconciler<C, T>>,
    health: Arc<HealthChecker<C>>,
    settings: PoolSettings,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C, T> PoolManager<C, T>
where
    C: Capability,
    T: Transport<Raw = C::Raw>,
{
    pub fn new(directory: Arc<dyn ServiceDirectory>, transport: T, settings: PoolSettings) -> Self {
        let cancel = CancellationToken::new();
        let registry = Arc::new(Registry::new());
        let refresher = Arc::new(
            Refresher::new(directory, Arc::new(transport), &settings).with_cancellation(cancel.clone()),
        );
        let reconciler = Arc::new(Reconciler::new(registry.clone(), refresher.clone()));
        let health = Arc::new(HealthChecker::new(
            registry.clone(),
            settings.health_check_interval,
            settings.probe_timeout,
        ));

        Self {
            registry,
            refresher,
            reconciler,
            health,
            settings,
            cancel,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the background loops. Calling it again is a no-op.
    pub fn start(&self) {
        if self.cancel.is_cancelled() || self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = mpsc::channel(self.settings.eviction_queue_capacity.max(1));
        let handles = vec![
            self.health.clone().start(tx, self.cancel.child_token()),
            self.reconciler
                .clone()
                .start_evictions(rx, self.cancel.child_token()),
            self.reconciler
                .clone()
                .start_full_scan(self.settings.full_scan_interval, self.cancel.child_token()),
        ];
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(handles);

        info!(
            health_check_interval_ms = self.settings.health_check_interval.as_millis() as u64,
            full_scan_interval_secs = self.settings.full_scan_interval.as_secs(),
            "Pool manager started"
        );
    }

    /// Hand out a connection to `service`.
    ///
    /// The first call for a service creates its pool and populates it before
    /// returning; `capability` is bound to the pool at that point and ignored
    /// on later calls. Every call selects uniformly at random among the
    /// current members.
    pub async fn connect(&self, service: &str, namespace: &str, capability: Arc<C>) -> Result<C::Handle> {
        require_non_empty("service", service)?;
        require_non_empty("namespace", namespace)?;
        if self.cancel.is_cancelled() {
            return Err(PoolError::ShuttingDown);
        }

        let pool = self
            .registry
            .get_or_create(service, namespace, capability, &self.refresher)
            .await?;
        if self.cancel.is_cancelled() {
            return Err(PoolError::ShuttingDown);
        }

        match pool.select().await {
            Some(handle) => Ok(handle),
            None => {
                debug!(service = %service, "Connect found an empty pool");
                Err(PoolError::NoAvailableEndpoints {
                    service: service.to_string(),
                })
            }
        }
    }

    /// Re-run discovery for one registered service now.
    pub async fn refresh(&self, service: &str) -> Result<RefreshReport> {
        require_non_empty("service", service)?;
        if self.cancel.is_cancelled() {
            return Err(PoolError::ShuttingDown);
        }
        let pool = self
            .registry
            .get(service)
            .ok_or_else(|| PoolError::InvalidArgument(format!("no pool registered for service '{}'", service)))?;
        self.refresher.refresh(&pool).await
    }

    /// Run a full scan immediately. Returns the number of pools whose refresh failed.
    pub async fn refresh_all(&self) -> Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::ShuttingDown);
        }
        Ok(self.reconciler.full_scan().await)
    }

    pub async fn stats(&self) -> Vec<PoolStats> {
        let mut stats = Vec::with_capacity(self.registry.len());
        for pool in self.registry.snapshot() {
            stats.push(pool.stats().await);
        }
        stats.sort_by(|a, b| a.service.cmp(&b.service));
        stats
    }

    pub fn registry(&self) -> &Arc<Registry<C>> {
        &self.registry
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the background loops, wait for them, then close every pooled
    /// connection. Later `connect` calls fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        // Holding the refresh guard waits out any in-flight populate; refreshes
        // that start later see the cancellation and leave the pool alone.
        let mut closed = 0;
        for pool in self.registry.snapshot() {
            let _guard = pool.refresh_guard().await;
            let drained = pool.drain().await;
            closed += drained.len();
            pool.teardown(drained).await;
        }

        info!(pools = self.registry.len(), closed, "Pool manager shut down");
    }
}

impl<C, T> Drop for PoolManager<C, T>
where
    C: Capability,
    T: Transport<Raw = C::Raw>,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
