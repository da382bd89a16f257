//! Bounded in-process cache tier.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;

use super::{CacheBackend, CacheEntry};
use crate::Result;

/// Default byte budget of the local tier.
pub const DEFAULT_LOCAL_CAPACITY: u64 = 1024 * 1024;

/// Per-entry expiration: every entry lives exactly until its own deadline.
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        created_at: Instant,
    ) -> Option<Duration> {
        value
            .expires_at
            .map(|at| at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value
            .expires_at
            .map(|at| at.saturating_duration_since(updated_at))
    }
}

/// In-memory cache bounded by total key + value bytes.
///
/// Uses moka with a byte weigher and per-entry TTL, so entries written with
/// different lifetimes coexist. Eviction beyond the byte budget is LRU-ish
/// (moka's TinyLFU).
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, CacheEntry>,
}

impl MemoryCache {
    /// Create a cache with the default 1 MiB budget.
    pub fn new() -> Self {
        Self::with_capacity_bytes(DEFAULT_LOCAL_CAPACITY)
    }

    /// Create a cache holding at most `bytes` of keys and values.
    pub fn with_capacity_bytes(bytes: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(bytes)
            .weigher(|key: &String, entry: &CacheEntry| {
                u32::try_from(key.len() + entry.value.len()).unwrap_or(u32::MAX)
            })
            .expire_after(EntryExpiry)
            .build();
        Self { entries }
    }

    /// Insert an entry that already carries its deadline.
    pub(crate) async fn insert_entry(&self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_owned(), entry).await;
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .entries
            .get(key)
            .await
            .filter(|entry| !entry.is_expired()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.insert_entry(key, CacheEntry::expiring_in(value, ttl))
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}
