//! Eviction worker and periodic full scan.

use crate::health::EvictionBatch;
use crate::pool::{RefreshReport, Refresher, Registry, ServicePool};
use crate::transport::{Capability, Transport};
use crate::utils::error::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Reconciler<C: Capability, T: Transport<Raw = C::Raw>> {
    registry: Arc<Registry<C>>,
    refresher: Arc<Refresher<T>>,
}

impl<C, T> Reconciler<C, T>
where
    C: Capability,
    T: Transport<Raw = C::Raw>,
{
    pub fn new(registry: Arc<Registry<C>>, refresher: Arc<Refresher<T>>) -> Self {
        Self {
            registry,
            refresher,
        }
    }

    /// Remove the reported dead connections, close them, then backfill the
    /// pool from the directory.
    pub async fn evict(&self, batch: EvictionBatch) -> Result<Option<RefreshReport>> {
        match self.remove_dead(&batch).await {
            Some(pool) => self.refresher.refresh(&pool).await.map(Some),
            None => Ok(None),
        }
    }

    /// Removal half of an eviction. Never touches the network, so it can run
    /// for every batch as soon as it arrives.
    async fn remove_dead(&self, batch: &EvictionBatch) -> Option<Arc<ServicePool<C>>> {
        let Some(pool) = self.registry.get(&batch.service) else {
            warn!(service = %batch.service, "Eviction for unknown service ignored");
            return None;
        };

        let removed = pool.evict(&batch.dead).await;
        pool.teardown(removed).await;
        Some(pool)
    }

    /// Refresh every pool, whether or not anything failed.
    pub async fn full_scan(&self) -> usize {
        let pools = self.registry.snapshot();
        let results = join_all(pools.iter().map(|pool| self.refresher.refresh(pool))).await;

        let mut failed = 0;
        for (pool, result) in pools.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                warn!(service = %pool.service(), error = %e, "Full scan refresh failed");
            }
        }
        debug!(pools = pools.len(), failed, "Full scan completed");
        failed
    }

    pub async fn run_evictions(
        &self,
        mut batches: mpsc::Receiver<EvictionBatch>,
        cancel: CancellationToken,
    ) {
        info!("Eviction worker started");
        // Backfills dial and may take up to the dial timeout; they run as
        // separate tasks so one slow service never holds up removals elsewhere.
        // Same-service backfills still queue on the pool's refresh lock.
        let mut backfills = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = backfills.join_next(), if !backfills.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Backfill task ended abnormally");
                    }
                }
                batch = batches.recv() => match batch {
                    Some(batch) => {
                        if let Some(pool) = self.remove_dead(&batch).await {
                            let refresher = Arc::clone(&self.refresher);
                            backfills.spawn(async move {
                                if let Err(e) = refresher.refresh(&pool).await {
                                    // The full scan or the next eviction retries it.
                                    warn!(service = %pool.service(), error = %e, "Backfill after eviction failed");
                                }
                            });
                        }
                    }
                    None => break,
                },
            }
        }

        // After cancellation a backfill closes what it dialed instead of
        // inserting it, so let the in-flight ones finish.
        while let Some(joined) = backfills.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Backfill task ended abnormally");
            }
        }
        info!("Eviction worker stopped");
    }

    pub async fn run_full_scan(&self, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs(), "Full scan loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                // Runs to completion; refreshes started after cancellation are no-ops.
                _ = ticker.tick() => {
                    self.full_scan().await;
                }
            }
        }
        info!("Full scan loop stopped");
    }

    pub fn start_evictions(
        self: Arc<Self>,
        batches: mpsc::Receiver<EvictionBatch>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_evictions(batches, cancel).await })
    }

    pub fn start_full_scan(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_full_scan(period, cancel).await })
    }
}
