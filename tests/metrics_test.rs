//! Metrics emitted by the cache, retry, quota and provider paths.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter. The local recorder
//! only sees metrics emitted on the current thread, so every operation here
//! runs inline rather than in a spawned task.

use std::sync::Arc;
use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use bytes::Bytes;
use heimdall::cache::{CacheBackend, MemoryCache, TieredCache};
use heimdall::config::QuotaSettings;
use heimdall::providers::MidjourneyProvider;
use heimdall::store::User;
use heimdall::telemetry;
use heimdall::{
    Channel, HeimdallError, MemoryAtomicStore, MemoryStore, Provider, QuotaLedger,
    RequestContext, RetryPolicy,
};

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Counter value for `name` carrying label `label = value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
fn record<F, T>(work: F) -> (T, SnapshotVec)
where
    F: std::future::Future<Output = T>,
{
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let out = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(work))
    });
    (out, snapshotter.snapshot().into_vec())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cache_hits_and_misses_are_counted_per_tier() {
    let remote = Arc::new(MemoryCache::new());
    remote
        .set("remote-only", Bytes::from_static(b"1"), Duration::from_secs(60))
        .await
        .unwrap();
    let cache = TieredCache::tiered(MemoryCache::new(), remote);

    let (_, snapshot) = record(async {
        cache.set("k", &1u8, Duration::from_secs(60)).await.unwrap();
        cache.get::<u8>("k").await.unwrap();
        cache.get::<u8>("remote-only").await.unwrap();
        cache.get::<u8>("absent").await.unwrap();
    });

    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_HITS_TOTAL, "tier", "local"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_HITS_TOTAL, "tier", "remote"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn retries_are_counted_per_operation() {
    let policy = RetryPolicy::new()
        .max_attempts(3)
        .delay(Duration::from_millis(1));

    let (result, snapshot) = record(policy.retry("get_user_quota", || async {
        Err::<(), _>(HeimdallError::Storage("deadlock".to_string()))
    }));
    assert!(result.is_err());

    assert_eq!(
        counter_with_label(&snapshot, telemetry::RETRIES_TOTAL, "operation", "get_user_quota"),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn quota_updates_are_counted() {
    let users = Arc::new(MemoryStore::new());
    users.insert_user(User {
        id: 1,
        username: "alice".to_string(),
        group: "default".to_string(),
        status: 1,
        quota: 0,
    });
    let ledger = QuotaLedger::new(
        users,
        Some(Arc::new(MemoryAtomicStore::new())),
        RetryPolicy::new(),
        &QuotaSettings::default(),
    );

    let (_, snapshot) = record(async {
        ledger.update_quota(1, 10).await.unwrap();
        ledger.update_quota(1, -3).await.unwrap();
    });

    assert_eq!(
        counter_with_label(&snapshot, telemetry::QUOTA_UPDATES_TOTAL, "status", "ok"),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn failed_provider_request_records_metrics() {
    // No base URL: fails while building the request, before any I/O.
    let provider = MidjourneyProvider::new(Channel::default(), reqwest::Client::new(), false);
    let ctx = RequestContext::new(reqwest::Method::POST, "/mj/submit/imagine").body("{}");

    let (result, snapshot) = record(provider.send(&ctx));
    assert!(result.is_err());

    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::PROVIDER_REQUESTS_TOTAL,
            "status",
            "error"
        ),
        1
    );
    assert!(has_histogram(
        &snapshot,
        telemetry::PROVIDER_REQUEST_DURATION_SECONDS
    ));
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let cache = TieredCache::local(MemoryCache::new());
    cache.set("k", "v", Duration::from_secs(1)).await.unwrap();
    let _ = cache.get::<String>("k").await.unwrap();
}
