//! Periodic liveness probing.
//!
//! A cycle only reads pools. Dead connections are collected per service and
//! handed to the reconciler through a bounded queue; nothing is removed here.

use crate::metrics::PoolMetrics;
use crate::pool::{DeadConnection, PooledConnection, Registry, ServicePool};
use crate::transport::Capability;
use crate::utils::error::PoolError;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Dead connections of one service found in one health cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionBatch {
    pub service: String,
    pub dead: Vec<DeadConnection>,
}

pub struct HealthChecker<C: Capability> {
    registry: Arc<Registry<C>>,
    interval: Duration,
    probe_timeout: Duration,
}

impl<C: Capability> HealthChecker<C> {
    pub fn new(registry: Arc<Registry<C>>, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            probe_timeout,
        }
    }

    /// Probe every connection of every pool once.
    ///
    /// All probes run concurrently and each is bounded by the probe timeout,
    /// so one hanging endpoint cannot stall the cycle.
    pub async fn check_all(&self) -> Vec<EvictionBatch> {
        let pools = self.registry.snapshot();
        let results = join_all(pools.iter().map(|pool| self.check_pool(pool))).await;
        results.into_iter().flatten().collect()
    }

    async fn check_pool(&self, pool: &ServicePool<C>) -> Option<EvictionBatch> {
        let connections = pool.snapshot().await;
        if connections.is_empty() {
            return None;
        }

        let outcomes = join_all(
            connections
                .iter()
                .map(|conn| self.probe_one(pool, conn)),
        )
        .await;

        let mut dead = Vec::new();
        for (conn, outcome) in connections.iter().zip(outcomes) {
            if let Err(e) = outcome {
                PoolMetrics::probe_failure(pool.service());
                warn!(
                    service = %pool.service(),
                    address = %conn.address(),
                    id = conn.id(),
                    error = %e,
                    "Connection failed liveness probe"
                );
                dead.push(DeadConnection::from(conn.as_ref()));
            }
        }

        if dead.is_empty() {
            trace!(service = %pool.service(), probed = connections.len(), "All connections healthy");
            None
        } else {
            Some(EvictionBatch {
                service: pool.service().to_string(),
                dead,
            })
        }
    }

    async fn probe_one(&self, pool: &ServicePool<C>, conn: &PooledConnection<C>) -> Result<(), PoolError> {
        match timeout(self.probe_timeout, pool.capability().probe(conn.handle())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PoolError::Probe {
                address: conn.address().to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(PoolError::ProbeTimeout {
                address: conn.address().to_string(),
                timeout: self.probe_timeout,
            }),
        }
    }

    /// Run health cycles until cancelled, queueing eviction work after each.
    pub async fn run(&self, evictions: mpsc::Sender<EvictionBatch>, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            probe_timeout_ms = self.probe_timeout.as_millis() as u64,
            "Health checker started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            let batches = tokio::select! {
                _ = cancel.cancelled() => break,
                batches = self.check_all() => batches,
            };
            PoolMetrics::health_cycle(started.elapsed());
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                unhealthy_services = batches.len(),
                "Health cycle completed"
            );

            for batch in batches {
                match evictions.try_send(batch) {
                    Ok(()) => {}
                    Err(TrySendError::Full(batch)) => {
                        warn!(
                            service = %batch.service,
                            dead = batch.dead.len(),
                            "Eviction queue full, dropping batch until next cycle"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        info!("Eviction queue closed, health checker stopping");
                        return;
                    }
                }
            }
        }

        info!("Health checker stopped");
    }

    pub fn start(
        self: Arc<Self>,
        evictions: mpsc::Sender<EvictionBatch>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(evictions, cancel).await })
    }
}
