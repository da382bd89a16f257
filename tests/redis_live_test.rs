//! Live Redis tests - ignored by default, run with:
//! `REDIS_URL=redis://127.0.0.1/ cargo test --test redis_live_test -- --ignored`
#![cfg(feature = "redis")]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use heimdall::cache::CacheBackend;
use heimdall::{AtomicStore, RedisStore};

async fn store() -> RedisStore {
    let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for live tests");
    let store = RedisStore::connect(url).await.expect("Failed to connect");
    store.ping().await.expect("Ping failed");
    store
}

/// Key unique to this run so reruns don't see old state.
fn key(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("heimdall:test:{name}:{nanos}")
}

#[tokio::test]
#[ignore]
async fn update_counter_matches_script_semantics() {
    let store = store().await;
    let counter = key("counter");
    let ttl = Duration::from_secs(30);

    assert_eq!(store.update_counter(&counter, -5, ttl).await.unwrap(), 0);
    assert!(!AtomicStore::exists(&store, &counter).await.unwrap());

    assert_eq!(store.update_counter(&counter, 10, ttl).await.unwrap(), 10);
    assert_eq!(store.update_counter(&counter, -4, ttl).await.unwrap(), 6);

    AtomicStore::delete(&store, &counter).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn cache_entries_report_remaining_ttl() {
    let store = store().await;
    let k = key("cache");

    CacheBackend::set(&store, &k, Bytes::from_static(b"\"v\""), Duration::from_secs(30))
        .await
        .unwrap();
    let entry = CacheBackend::get(&store, &k).await.unwrap().unwrap();
    assert_eq!(entry.value, Bytes::from_static(b"\"v\""));
    let remaining = entry.remaining().unwrap();
    assert!(remaining > Duration::from_secs(25) && remaining <= Duration::from_secs(30));

    CacheBackend::delete(&store, &k).await.unwrap();
    assert!(CacheBackend::get(&store, &k).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn set_membership() {
    let store = store().await;
    let set = key("set");

    store
        .set_add(&set, &["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert!(store.set_contains(&set, "a").await.unwrap());
    assert!(!store.set_contains(&set, "c").await.unwrap());

    AtomicStore::delete(&store, &set).await.unwrap();
}
