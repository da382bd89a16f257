//! Request coalescing ("single-flight") over [`TieredCache`] misses.
//!
//! Concurrent lookups of the same missing key share one origin computation:
//!
//! ```text
//!  caller A ─┐                      ┌─► cache.set(key) ─► publish ─┬─► A
//!  caller B ─┼─► miss ─► in-flight? ┤                              ├─► B
//!  caller C ─┘           (one per   └─ leader task runs compute()  └─► C
//!                         key)
//! ```
//!
//! The computation runs on its own task. Every caller, the one that started
//! it included, only *waits* on the published result with its own timeout, so
//! a caller giving up never cancels the computation: the value is still
//! cached for whoever asks next.
//!
//! The leader writes the cache before it leaves the registry. A caller that
//! missed the cache but found the registry empty may be racing a leader that
//! has just finished, so a new leader reads the cache once more before it
//! computes. Overlapping callers therefore run `compute` once.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::TieredCache;
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Result published to every waiter of one computation.
type Outcome = std::result::Result<Arc<dyn Any + Send + Sync>, HeimdallError>;

type Slot = watch::Receiver<Option<Outcome>>;

struct Inner {
    cache: Arc<TieredCache>,
    in_flight: Mutex<HashMap<String, Slot>>,
}

impl Inner {
    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the leader's registry entry even if the computation panics.
struct LeaderGuard {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.inner.registry().remove(&self.key);
    }
}

/// Single-flight lookups backed by a [`TieredCache`].
///
/// Cheap to clone; clones share the registry and the cache.
#[derive(Clone)]
pub struct Coalescer {
    inner: Arc<Inner>,
}

impl Coalescer {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The cache this coalescer fills.
    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.inner.cache
    }

    /// Number of keys with a computation currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.registry().len()
    }

    /// Return the cached value for `key`, or compute, cache and return it.
    ///
    /// - cache hit: returned immediately, `compute` is not called.
    /// - miss with a computation already running for `key`: waits for it.
    /// - miss with nothing running: starts `compute` on a new task and waits.
    ///
    /// On success the value is cached with `ttl` before any waiter sees it.
    /// A failed computation is delivered to all of its waiters and nothing is
    /// cached. A caller that waits longer than `timeout` gets
    /// [`HeimdallError::Timeout`]; the computation keeps running.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
        timeout: Duration,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if ttl.is_zero() {
            return Err(HeimdallError::InvalidInput(format!(
                "cache ttl for '{key}' must be greater than zero"
            )));
        }

        match self.inner.cache.get::<T>(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e @ HeimdallError::TypeMismatch { .. }) => return Err(e),
            Err(e) => warn!(key, error = %e, "cache lookup failed, falling back to origin"),
        }

        let mut slot = self.join_or_lead(key, ttl, compute);

        let outcome = match tokio::time::timeout(timeout, slot.wait_for(Option::is_some)).await {
            Ok(Ok(published)) => (*published).clone(),
            Ok(Err(_)) => None,
            Err(_) => {
                metrics::counter!(telemetry::COALESCE_TIMEOUTS_TOTAL).increment(1);
                return Err(HeimdallError::Timeout {
                    key: key.to_owned(),
                    waited: timeout,
                });
            }
        };

        match outcome {
            Some(Ok(value)) => value
                .downcast::<T>()
                .map(|v| (*v).clone())
                .map_err(|_| HeimdallError::TypeMismatch {
                    key: key.to_owned(),
                    expected: type_name::<T>(),
                }),
            Some(Err(e)) => Err(e),
            // Sender dropped without publishing: the computation panicked.
            None => Err(HeimdallError::Backend(format!(
                "computation for '{key}' ended without a result"
            ))),
        }
    }

    /// Attach to the running computation for `key`, or start one.
    fn join_or_lead<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Slot
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut registry = self.inner.registry();
        if let Some(slot) = registry.get(key) {
            metrics::counter!(telemetry::COALESCED_WAITS_TOTAL).increment(1);
            debug!(key, "joining in-flight computation");
            return slot.clone();
        }

        let (tx, rx) = watch::channel(None);
        registry.insert(key.to_owned(), rx.clone());
        drop(registry);

        let guard = LeaderGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_owned(),
        };
        tokio::spawn(async move {
            if let Ok(Some(value)) = guard.inner.cache.get::<T>(&guard.key).await {
                debug!(key = %guard.key, "value landed before computing, reusing it");
                drop(guard);
                let _ = tx.send(Some(Ok(Arc::new(value) as Arc<dyn Any + Send + Sync>)));
                return;
            }

            let outcome: Outcome = match compute().await {
                Ok(value) => {
                    guard
                        .inner
                        .cache
                        .set_best_effort(&guard.key, &value, ttl)
                        .await;
                    Ok(Arc::new(value) as Arc<dyn Any + Send + Sync>)
                }
                Err(e) => {
                    debug!(key = %guard.key, error = %e, "computation failed");
                    Err(e)
                }
            };
            drop(guard);
            // No receivers left is fine: everyone timed out, the value is cached.
            let _ = tx.send(Some(outcome));
        });

        rx
    }
}
