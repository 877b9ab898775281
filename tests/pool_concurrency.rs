/// Pool concurrency tests
///
/// Races between first populates, refreshes, evictions and selection.
mod common;

use common::{harness, FakeHandle, MockCapability};
use replica_pool::pool::{Connection, DeadConnection, ServicePool};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

fn endpoints(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("10.0.0.{}", i)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_first_connects_populate_once() {
    let addrs = endpoints(12);
    let refs: Vec<&str> = addrs.iter().map(String::as_str).collect();
    let h = harness("search", "prod", &refs).await;

    let mut tasks = Vec::new();
    for _ in 0..64 {
        let manager = h.manager.clone();
        let capability = h.capability.clone();
        tasks.push(tokio::spawn(async move {
            manager.connect("search", "prod", capability).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.manager.registry().len(), 1);
    assert_eq!(h.transport.dial_count(), 12);

    let pool = h.manager.registry().get("search").unwrap();
    let snapshot = pool.snapshot().await;
    let unique: HashSet<&str> = snapshot.iter().map(|c| c.address()).collect();
    assert_eq!(snapshot.len(), 12);
    assert_eq!(unique.len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_keep_addresses_unique() {
    let addrs = endpoints(8);
    let refs: Vec<&str> = addrs.iter().map(String::as_str).collect();
    let h = harness("search", "prod", &refs[..4]).await;
    h.manager
        .connect("search", "prod", h.capability.clone())
        .await
        .unwrap();

    h.directory
        .set_endpoints("search", "prod", refs.iter().copied())
        .await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let manager = h.manager.clone();
        let capability = h.capability.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                manager.refresh("search").await.map(|_| ())
            } else {
                manager.connect("search", "prod", capability).await.map(|_| ())
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let pool = h.manager.registry().get("search").unwrap();
    let snapshot = pool.snapshot().await;
    let unique: HashSet<&str> = snapshot.iter().map(|c| c.address()).collect();
    assert_eq!(snapshot.len(), 8);
    assert_eq!(unique.len(), 8);
    // Each new address dialed exactly once.
    assert_eq!(h.transport.dial_count(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn selection_never_returns_an_evicted_connection() {
    let pool = Arc::new(ServicePool::new(
        "search",
        "prod",
        Arc::new(MockCapability::default()),
    ));
    let conns: Vec<Connection<FakeHandle>> = endpoints(50)
        .into_iter()
        .enumerate()
        .map(|(generation, address)| {
            Connection::new(
                FakeHandle {
                    address: address.clone(),
                    generation,
                },
                address,
                "search",
                "prod",
            )
        })
        .collect();
    pool.insert(conns).await;

    let victims: Vec<DeadConnection> = pool
        .snapshot()
        .await
        .iter()
        .take(40)
        .map(|c| DeadConnection::from(c.as_ref()))
        .collect();
    let evicted: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut readers = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let evicted = evicted.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..2_000 {
                let already_gone = evicted.lock().unwrap().clone();
                let selected = pool
                    .select_connection()
                    .await
                    .expect("pool never empties in this test");
                assert!(
                    !already_gone.contains(&selected.id()),
                    "selected connection {} after its eviction completed",
                    selected.id()
                );
                tokio::task::yield_now().await;
            }
        }));
    }

    let writer = {
        let pool = pool.clone();
        let evicted = evicted.clone();
        tokio::spawn(async move {
            for batch in victims.chunks(5) {
                let removed = pool.evict(batch).await;
                assert_eq!(removed.len(), batch.len());
                evicted
                    .lock()
                    .unwrap()
                    .extend(removed.iter().map(|c| c.id()));
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(pool.len().await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore] // Stress test - run with --ignored
async fn stress_ten_thousand_connects_across_services() {
    let h = harness("svc-0", "prod", &["10.1.0.1", "10.1.0.2"]).await;
    for s in 1..10 {
        let service = format!("svc-{}", s);
        let addrs: Vec<String> = (0..4).map(|i| format!("10.1.{}.{}", s, i)).collect();
        h.directory
            .set_endpoints(&service, "prod", addrs.iter().map(String::as_str))
            .await;
    }
    h.manager.start();

    let start = Instant::now();
    let mut tasks = Vec::new();
    for i in 0..10_000 {
        let manager = h.manager.clone();
        let capability = h.capability.clone();
        let service = format!("svc-{}", i % 10);
        tasks.push(tokio::spawn(async move {
            manager.connect(&service, "prod", capability).await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    let elapsed = start.elapsed();

    println!("10000 connects across 10 services in {:?}", elapsed);
    assert_eq!(successes, 10_000);
    assert_eq!(h.manager.registry().len(), 10);

    h.manager.shutdown().await;
}
