//! Per-user quota accounting.
//!
//! Two representations of a user's balance:
//!
//! - the durable balance in the [`UserRepository`], the source of truth;
//! - fast-path keys in the distributed [`AtomicStore`]: `user_quota:{id}`
//!   caches the durable balance, `user_realtime_quota:{id}` is a sliding-TTL
//!   counter reserving quota in real time under contention.
//!
//! With no atomic store configured every operation goes straight to the
//! durable store, and the realtime wrappers are no-ops.
//!
//! Counter updates are one atomic store operation each
//! ([`AtomicStore::update_counter`]), so concurrent updates of the same user
//! are linearized by the store and none is lost. A store failure is returned
//! as [`HeimdallError::QuotaUnavailable`], never read as a zero balance.

use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::config::QuotaSettings;
use crate::retry::RetryPolicy;
use crate::store::{AtomicStore, UserRepository};
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Cached durable balance.
pub fn user_quota_key(user_id: i64) -> String {
    format!("user_quota:{user_id}")
}

/// Realtime reservation counter.
pub fn user_realtime_quota_key(user_id: i64) -> String {
    format!("user_realtime_quota:{user_id}")
}

/// Atomic, race-free quota ledger.
pub struct QuotaLedger {
    users: Arc<dyn UserRepository>,
    fast_path: Option<Arc<dyn AtomicStore>>,
    retry: RetryPolicy,
    cache_ttl: Duration,
    realtime_ttl: Duration,
}

impl QuotaLedger {
    pub fn new(
        users: Arc<dyn UserRepository>,
        fast_path: Option<Arc<dyn AtomicStore>>,
        retry: RetryPolicy,
        settings: &QuotaSettings,
    ) -> Self {
        Self {
            users,
            fast_path,
            retry,
            cache_ttl: settings.cache_ttl(),
            realtime_ttl: settings.realtime_ttl(),
        }
    }

    /// Whether the fast-path layer is active.
    pub fn fast_path_enabled(&self) -> bool {
        self.fast_path.is_some()
    }

    async fn durable_quota(&self, user_id: i64) -> Result<i64> {
        self.retry
            .retry("get_user_quota", || self.users.get_user_quota(user_id))
            .await
    }

    /// Current balance.
    ///
    /// Reads the cached balance when present. Otherwise, or when the fast
    /// path fails, reads the durable store and seeds the cache on a best-effort
    /// basis. Fast-path trouble never fails the read.
    #[instrument(skip(self))]
    pub async fn get_quota(&self, user_id: i64) -> Result<i64> {
        let Some(fast) = &self.fast_path else {
            return self.durable_quota(user_id).await;
        };

        let key = user_quota_key(user_id);
        match fast.get(&key).await {
            Ok(Some(raw)) => match raw.parse::<i64>() {
                Ok(quota) => return Ok(quota),
                Err(_) => warn!(key, raw, "cached quota is not an integer, reloading"),
            },
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "quota cache read failed, using durable store"),
        }

        let quota = self.durable_quota(user_id).await?;
        if let Err(e) = fast.set(&key, &quota.to_string(), self.cache_ttl).await {
            warn!(key, error = %e, "failed to seed quota cache");
        }
        Ok(quota)
    }

    /// Reload the durable balance into the quota cache.
    pub async fn refresh_cached_quota(&self, user_id: i64) -> Result<()> {
        let Some(fast) = &self.fast_path else {
            return Ok(());
        };
        let quota = self.durable_quota(user_id).await?;
        fast.set(&user_quota_key(user_id), &quota.to_string(), self.cache_ttl)
            .await
    }

    /// Decrease the cached balance in place. An absent cache entry is left
    /// absent; the next read reloads it from the durable store.
    pub async fn decrease_cached_quota(&self, user_id: i64, amount: i64) -> Result<()> {
        let Some(fast) = &self.fast_path else {
            return Ok(());
        };
        let amount = non_negative(amount)?;
        fast.update_counter(&user_quota_key(user_id), -amount, self.cache_ttl)
            .await
            .map(|_| ())
            .map_err(|e| unavailable(user_id, e))
    }

    /// Apply `delta` and return the new balance.
    ///
    /// Without a fast path this updates the durable balance, attempted once:
    /// an error may come after the delta was applied, and a retry would
    /// charge it twice. With one, the
    /// realtime counter is updated atomically: a missing counter is created
    /// by a positive delta, while a negative delta against a missing counter
    /// is rejected and returns 0 without creating it. Every applied update
    /// restarts the counter's expiry window.
    #[instrument(skip(self))]
    pub async fn update_quota(&self, user_id: i64, delta: i64) -> Result<i64> {
        let Some(fast) = &self.fast_path else {
            return self
                .retry
                .clone()
                .classifier(|_| false)
                .retry("update_user_quota", || {
                    self.users.update_user_quota(user_id, delta)
                })
                .await;
        };

        let key = user_realtime_quota_key(user_id);
        match fast.update_counter(&key, delta, self.realtime_ttl).await {
            Ok(value) => {
                metrics::counter!(telemetry::QUOTA_UPDATES_TOTAL, "status" => "ok").increment(1);
                Ok(value)
            }
            Err(e) => {
                metrics::counter!(telemetry::QUOTA_UPDATES_TOTAL, "status" => "error")
                    .increment(1);
                Err(unavailable(user_id, e))
            }
        }
    }

    /// Reserve `amount` more realtime quota. No-op returning 0 without a
    /// fast path.
    pub async fn increase_realtime(&self, user_id: i64, amount: i64) -> Result<i64> {
        if !self.fast_path_enabled() {
            return Ok(0);
        }
        self.update_quota(user_id, non_negative(amount)?).await
    }

    /// Release `amount` of realtime quota. No-op returning 0 without a
    /// fast path.
    pub async fn decrease_realtime(&self, user_id: i64, amount: i64) -> Result<i64> {
        if !self.fast_path_enabled() {
            return Ok(0);
        }
        self.update_quota(user_id, -non_negative(amount)?).await
    }
}

fn non_negative(amount: i64) -> Result<i64> {
    if amount < 0 {
        return Err(HeimdallError::InvalidInput(format!(
            "quota amount must not be negative, got {amount}"
        )));
    }
    Ok(amount)
}

fn unavailable(user_id: i64, err: HeimdallError) -> HeimdallError {
    HeimdallError::QuotaUnavailable {
        user_id,
        reason: err.to_string(),
    }
}
