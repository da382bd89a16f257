//! Caching subsystem.
//!
//! - [`CacheBackend`]: raw key/bytes store with per-entry TTL. Implemented
//!   by [`MemoryCache`] (bounded, in-process) and, with the `redis` feature,
//!   by [`RedisStore`](crate::store::RedisStore).
//!
//! - [`TieredCache`]: a local [`MemoryCache`] in front of an optional
//!   distributed backend. Values are typed at each call site and serialized
//!   as JSON, so both tiers hold the same bytes. Remote hits are copied into
//!   the local tier with the remote entry's *remaining* lifetime; a local copy
//!   never outlives the entry it was copied from.
//!
//! - [`Coalescer`]: single-flight wrapper over [`TieredCache`] misses.

pub mod coalesce;
pub mod memory;

pub use coalesce::Coalescer;
pub use memory::MemoryCache;

use std::any::type_name;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::telemetry;
use crate::{HeimdallError, Result};

/// A stored value and its deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    /// `None` when the backend reports no expiry for the key.
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    /// Entry expiring `ttl` from now.
    pub fn expiring_in(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }

    /// Remaining lifetime, `None` if the entry never expires.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// Raw key/value store with TTL. No business logic.
///
/// `get` returns `Ok(None)` for absent or expired keys; errors are reserved
/// for the store itself failing.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logging/debugging.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Two-tier cache: bounded local memory plus an optional distributed backend.
///
/// Callers never learn which tiers are active; the accounting layer above
/// behaves the same either way.
pub struct TieredCache {
    local: MemoryCache,
    remote: Option<Arc<dyn CacheBackend>>,
}

impl TieredCache {
    /// Local tier only.
    pub fn local(local: MemoryCache) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    /// Local tier in front of a distributed backend.
    pub fn tiered(local: MemoryCache, remote: Arc<dyn CacheBackend>) -> Self {
        Self {
            local,
            remote: Some(remote),
        }
    }

    /// Whether a distributed tier is attached.
    pub fn is_distributed(&self) -> bool {
        self.remote.is_some()
    }

    /// Look up raw bytes, local tier first.
    pub async fn get_raw(&self, key: &str) -> Result<Option<Bytes>> {
        if let Some(entry) = self.local.get(key).await? {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "local").increment(1);
            return Ok(Some(entry.value));
        }

        if let Some(remote) = &self.remote {
            if let Some(entry) = remote.get(key).await? {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "remote").increment(1);
                // Keys without a deadline stay remote-only: the local copy
                // would have no bound on staleness.
                if entry.expires_at.is_some() && !entry.is_expired() {
                    self.local.insert_entry(key, entry.clone()).await;
                }
                return Ok(Some(entry.value));
            }
        }

        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        Ok(None)
    }

    /// Look up a typed value.
    ///
    /// `Ok(None)` means absent or expired. Bytes that do not decode as `T`
    /// are a [`HeimdallError::TypeMismatch`], never a silent default.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| HeimdallError::TypeMismatch {
                    key: key.to_owned(),
                    expected: type_name::<T>(),
                }),
            None => Ok(None),
        }
    }

    /// Store raw bytes in every tier.
    ///
    /// A zero TTL is rejected. If the distributed tier fails the local tier
    /// is left untouched so the tiers do not diverge.
    pub async fn set_raw(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(HeimdallError::InvalidInput(format!(
                "cache ttl for '{key}' must be greater than zero"
            )));
        }
        if let Some(remote) = &self.remote {
            remote.set(key, value.clone(), ttl).await?;
        }
        self.local.set(key, value, ttl).await
    }

    /// Serialize and store a typed value.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set_raw(key, Bytes::from(bytes), ttl).await
    }

    /// Remove a key from every tier.
    ///
    /// The distributed copy goes first: a read racing the delete can then
    /// only copy a value into the local tier before the local delete runs.
    pub async fn delete(&self, key: &str) -> Result<()> {
        if let Some(remote) = &self.remote {
            remote.delete(key).await?;
        }
        self.local.delete(key).await
    }

    /// Drop the local tier. The distributed tier is shared and left alone.
    pub fn clear_local(&self) {
        self.local.clear();
    }

    /// Best-effort write; failures are logged, not returned.
    pub(crate) async fn set_best_effort<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) {
        if let Err(e) = self.set(key, value, ttl).await {
            warn!(key, error = %e, "cache write failed");
        }
    }
}
