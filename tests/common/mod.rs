//! Shared in-process doubles for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use replica_pool::config::PoolSettings;
use replica_pool::{BoxError, Capability, PoolManager, StaticDirectory, Transport};
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Raw "connection": the dialed address plus the dial sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRaw {
    pub address: String,
    pub generation: usize,
}

/// Handle handed to callers. Equal addresses with different generations are
/// distinct connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FakeHandle {
    pub address: String,
    pub generation: usize,
}

#[derive(Default)]
pub struct MockTransport {
    refused: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
    dials: AtomicUsize,
}

impl MockTransport {
    pub fn refuse(&self, address: &str) {
        self.refused.lock().unwrap().insert(address.to_string());
    }

    pub fn accept(&self, address: &str) {
        self.refused.lock().unwrap().remove(address);
    }

    /// Dials to `address` never complete; only the dial timeout ends them.
    pub fn stall(&self, address: &str) {
        self.stalled.lock().unwrap().insert(address.to_string());
    }

    /// Every successful dial takes at least `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Raw = FakeRaw;

    async fn dial(&self, address: &str) -> io::Result<FakeRaw> {
        let generation = self.dials.fetch_add(1, Ordering::SeqCst);
        let refused = self.refused.lock().unwrap().contains(address);
        if refused {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        let stalled = self.stalled.lock().unwrap().contains(address);
        if stalled {
            std::future::pending::<()>().await;
        }
        let latency = *self.latency.lock().unwrap();
        match latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
        Ok(FakeRaw {
            address: address.to_string(),
            generation,
        })
    }
}

/// Capability whose probe outcome is scripted per address.
#[derive(Default)]
pub struct MockCapability {
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    closed: Mutex<Vec<FakeHandle>>,
    probes: AtomicUsize,
}

impl MockCapability {
    pub fn fail_probe(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn hang_probe(&self, address: &str) {
        self.hanging.lock().unwrap().insert(address.to_string());
    }

    pub fn heal(&self, address: &str) {
        self.failing.lock().unwrap().remove(address);
        self.hanging.lock().unwrap().remove(address);
    }

    pub fn closed(&self) -> Vec<FakeHandle> {
        self.closed.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for MockCapability {
    type Raw = FakeRaw;
    type Handle = FakeHandle;

    async fn new_client(&self, raw: FakeRaw) -> Result<FakeHandle, BoxError> {
        Ok(FakeHandle {
            address: raw.address,
            generation: raw.generation,
        })
    }

    async fn probe(&self, handle: &FakeHandle) -> Result<(), BoxError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let hangs = self.hanging.lock().unwrap().contains(&handle.address);
        if hangs {
            std::future::pending::<()>().await;
        }
        let fails = self.failing.lock().unwrap().contains(&handle.address);
        if fails {
            return Err(format!("{} stopped responding", handle.address).into());
        }
        Ok(())
    }

    async fn close(&self, handle: FakeHandle) {
        self.closed.lock().unwrap().push(handle);
    }
}

pub struct Harness {
    pub directory: Arc<StaticDirectory>,
    pub transport: Arc<MockTransport>,
    pub capability: Arc<MockCapability>,
    pub manager: Arc<PoolManager<MockCapability, SharedTransport>>,
}

/// Lets the test keep a handle on the transport the manager owns.
pub struct SharedTransport(pub Arc<MockTransport>);

#[async_trait]
impl Transport for SharedTransport {
    type Raw = FakeRaw;

    async fn dial(&self, address: &str) -> io::Result<FakeRaw> {
        self.0.dial(address).await
    }
}

/// Fast timers so background loops are observable within a test.
pub fn fast_settings() -> PoolSettings {
    PoolSettings {
        health_check_interval: Duration::from_millis(50),
        full_scan_interval: Duration::from_secs(3600),
        probe_timeout: Duration::from_millis(20),
        dial_timeout: Duration::from_millis(200),
        eviction_queue_capacity: 16,
        prune_stale: true,
        max_concurrent_dials: 8,
    }
}

pub async fn harness(service: &str, namespace: &str, endpoints: &[&str]) -> Harness {
    harness_with(service, namespace, endpoints, fast_settings()).await
}

pub async fn harness_with(
    service: &str,
    namespace: &str,
    endpoints: &[&str],
    settings: PoolSettings,
) -> Harness {
    let directory = Arc::new(StaticDirectory::new());
    directory
        .set_endpoints(service, namespace, endpoints.iter().copied())
        .await;
    let transport = Arc::new(MockTransport::default());
    let manager = Arc::new(PoolManager::new(
        directory.clone(),
        SharedTransport(transport.clone()),
        settings,
    ));
    Harness {
        directory,
        transport,
        capability: Arc::new(MockCapability::default()),
        manager,
    }
}

/// Poll `check` until it holds or `deadline` passes.
pub async fn eventually<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
