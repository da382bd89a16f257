//! Read-heavy lookups served through the coalescing cache.
//!
//! Token validity, user group, enabled flag and username are read on every
//! request. Each lookup goes [`Coalescer`] → [`TieredCache`](crate::cache::TieredCache)
//! → durable store, so a burst of identical misses costs one repository call.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::cache::Coalescer;
use crate::retry::RetryPolicy;
use crate::store::{AtomicStore, Token, UserRepository};
use crate::{HeimdallError, Result};

/// Set holding the keys of tokens issued before the migration cutoff.
pub const LEGACY_TOKENS_KEY: &str = "old_user_tokens_cache";

/// Tokens read per page while seeding the legacy index.
pub const LEGACY_BATCH_SIZE: usize = 1000;

const LEGACY_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Coalesced, cached user and token lookups.
#[derive(Clone)]
pub struct CachedLookups {
    coalescer: Coalescer,
    users: Arc<dyn UserRepository>,
    retry: RetryPolicy,
    ttl: Duration,
    timeout: Duration,
}

impl CachedLookups {
    /// `ttl` bounds how long a looked-up value is served from cache;
    /// `timeout` bounds how long a caller waits on a coalesced lookup.
    pub fn new(
        coalescer: Coalescer,
        users: Arc<dyn UserRepository>,
        retry: RetryPolicy,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            coalescer,
            users,
            retry,
            ttl,
            timeout,
        }
    }

    /// Token record for an API key.
    #[instrument(skip_all)]
    pub async fn token_by_key(&self, key: &str) -> Result<Token> {
        let users = Arc::clone(&self.users);
        let retry = self.retry.clone();
        let token_key = key.to_owned();
        self.coalescer
            .get_or_compute(
                &format!("token:{key}"),
                self.ttl,
                move || async move {
                    retry
                        .retry("get_token_by_key", || users.get_token_by_key(&token_key))
                        .await
                },
                self.timeout,
            )
            .await
    }

    /// Group of a user. Read straight from the durable store when no
    /// distributed tier is configured.
    #[instrument(skip(self))]
    pub async fn user_group(&self, user_id: i64) -> Result<String> {
        if !self.coalescer.cache().is_distributed() {
            return self
                .retry
                .retry("get_user_group", || self.users.get_user_group(user_id))
                .await;
        }

        let users = Arc::clone(&self.users);
        let retry = self.retry.clone();
        self.coalescer
            .get_or_compute(
                &format!("user_group:{user_id}"),
                self.ttl,
                move || async move {
                    retry
                        .retry("get_user_group", || users.get_user_group(user_id))
                        .await
                },
                self.timeout,
            )
            .await
    }

    #[instrument(skip(self))]
    pub async fn is_user_enabled(&self, user_id: i64) -> Result<bool> {
        let users = Arc::clone(&self.users);
        let retry = self.retry.clone();
        self.coalescer
            .get_or_compute(
                &format!("user_enabled:{user_id}"),
                self.ttl,
                move || async move {
                    retry
                        .retry("is_user_enabled", || users.is_user_enabled(user_id))
                        .await
                },
                self.timeout,
            )
            .await
    }

    /// Username of a user; a missing user is [`HeimdallError::NotFound`].
    #[instrument(skip(self))]
    pub async fn username(&self, user_id: i64) -> Result<String> {
        let users = Arc::clone(&self.users);
        let retry = self.retry.clone();
        self.coalescer
            .get_or_compute(
                &format!("user_name:{user_id}"),
                self.ttl,
                move || async move {
                    retry
                        .retry("get_username", || users.get_username(user_id))
                        .await?
                        .ok_or_else(|| HeimdallError::NotFound(format!("user {user_id} not found")))
                },
                self.timeout,
            )
            .await
    }
}

/// Membership index of tokens issued before the migration cutoff.
pub struct LegacyTokenIndex {
    store: Arc<dyn AtomicStore>,
    users: Arc<dyn UserRepository>,
    max_id: i64,
    pause: Duration,
}

impl LegacyTokenIndex {
    pub fn new(store: Arc<dyn AtomicStore>, users: Arc<dyn UserRepository>, max_id: i64) -> Self {
        Self {
            store,
            users,
            max_id,
            pause: LEGACY_BATCH_PAUSE,
        }
    }

    /// Pause between seeding batches (default: 100ms).
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Populate the index unless it already exists.
    ///
    /// Returns the number of keys added; 0 when the cutoff is disabled or
    /// the index was seeded before.
    #[instrument(skip(self), fields(max_id = self.max_id))]
    pub async fn seed(&self) -> Result<usize> {
        if self.max_id <= 0 || self.store.exists(LEGACY_TOKENS_KEY).await? {
            return Ok(0);
        }

        let mut offset = 0;
        loop {
            let keys = self
                .users
                .pluck_token_keys(self.max_id, LEGACY_BATCH_SIZE, offset)
                .await?;
            if keys.is_empty() {
                break;
            }
            self.store.set_add(LEGACY_TOKENS_KEY, &keys).await?;
            offset += keys.len();
            info!(indexed = offset, "legacy token batch indexed");
            if keys.len() < LEGACY_BATCH_SIZE {
                break;
            }
            tokio::time::sleep(self.pause).await;
        }
        Ok(offset)
    }

    /// Whether `key` belongs to a legacy token.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        self.store.set_contains(LEGACY_TOKENS_KEY, key).await
    }
}
