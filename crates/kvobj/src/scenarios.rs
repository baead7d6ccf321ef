//! Behavioural scenarios shared by every store backend.
//!
//! Each scenario takes an [`ObjectClient`] so the same assertions run against
//! the in-memory engine and, with the `redis` feature, a live server.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kvobj_store::{InMemoryStore, StoreClient, Wait};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::ObjectClient;
use crate::config::ObjectConfig;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Client under a fresh namespace so runs never see each other's keys.
fn isolated(store: Arc<dyn StoreClient>) -> ObjectClient {
    let config = ObjectConfig {
        namespace: Some(format!("kvobj-test-{}", Uuid::now_v7())),
        ..Default::default()
    };
    ObjectClient::with_config(store, config).expect("valid config")
}

async fn hash_round_trip(client: &ObjectClient) {
    let table = client.hash::<Value>("table");
    table.set("x", &json!({"k": 1})).await.unwrap();
    assert_eq!(table.get("x").await.unwrap(), Some(json!({"k": 1})));
    assert_eq!(table.get("y").await.unwrap(), None);

    assert!(table.delete("x").await.unwrap());
    assert!(!table.delete("x").await.unwrap());
}

async fn queue_fifo(client: &ObjectClient) {
    let queue = client.queue::<u32>("fifo");
    for i in 1..=5 {
        queue.push(&i).await.unwrap();
    }
    let mut out = Vec::new();
    while let Some(v) = queue.pop(Wait::NoWait).await.unwrap() {
        out.push(v);
    }
    assert_eq!(out, vec![1, 2, 3, 4, 5]);
}

async fn queue_zero_timeout(client: &ObjectClient) {
    let queue = client.queue::<u32>("empty");
    let start = Instant::now();
    assert_eq!(queue.pop(Duration::ZERO).await.unwrap(), None);
    assert!(start.elapsed() < Duration::from_millis(50));
}

async fn queue_blocking_handoff(client: &ObjectClient) {
    let queue = client.queue::<String>("handoff");
    let popper = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.push(&"payload".to_string()).await.unwrap();
    let got = popper.await.unwrap().unwrap();
    assert_eq!(got.as_deref(), Some("payload"));
}

async fn queue_cancellation_keeps_elements(client: &ObjectClient) {
    let queue = client.queue::<u32>("cancel");
    let pending = tokio::time::timeout(Duration::from_millis(50), queue.pop(Wait::Forever)).await;
    assert!(pending.is_err());

    queue.push(&42).await.unwrap();
    // The cancelled wait may hand the element back asynchronously.
    let got = queue.pop(Duration::from_secs(2)).await.unwrap();
    assert_eq!(got, Some(42));
}

async fn priority_scenario(client: &ObjectClient) {
    let pq = client.priority_queue::<String>("pq");
    pq.push(&"a".into(), 10.0).await.unwrap();
    pq.push(&"b".into(), 5.0).await.unwrap();
    pq.push(&"c".into(), 20.0).await.unwrap();

    assert_eq!(pq.pop().await.unwrap().as_deref(), Some("b"));
    assert_eq!(pq.pop().await.unwrap().as_deref(), Some("a"));
    assert_eq!(pq.pop().await.unwrap().as_deref(), Some("c"));
    assert_eq!(pq.pop().await.unwrap(), None);
}

async fn priority_concurrent_pops(client: &ObjectClient) {
    let pq = client.priority_queue::<u32>("race");
    for i in 0..100u32 {
        pq.push(&i, f64::from(i % 3)).await.unwrap();
    }
    let mut tasks = Vec::new();
    for _ in 0..6 {
        let pq = pq.clone();
        tasks.push(tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(v) = pq.pop().await.unwrap() {
                got.push(v);
            }
            got
        }));
    }
    let mut seen = HashSet::new();
    for t in tasks {
        for v in t.await.unwrap() {
            assert!(seen.insert(v));
        }
    }
    assert_eq!(seen.len(), 100);
}

async fn run_all(client: &ObjectClient) {
    hash_round_trip(client).await;
    queue_fifo(client).await;
    queue_zero_timeout(client).await;
    queue_blocking_handoff(client).await;
    queue_cancellation_keeps_elements(client).await;
    priority_scenario(client).await;
    priority_concurrent_pops(client).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenarios_against_in_memory_store() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    run_all(&isolated(store.clone())).await;
    assert!(store.is_empty());
}

#[cfg(feature = "redis")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a Redis server at REDIS_URL"]
async fn scenarios_against_redis() {
    use kvobj_store::{RedisConfig, RedisStore};

    init_tracing();
    let config = match std::env::var("REDIS_URL") {
        Ok(url) => RedisConfig { url },
        Err(_) => RedisConfig::default(),
    };
    let store = RedisStore::connect(&config).await.unwrap();
    run_all(&isolated(Arc::new(store))).await;
}
