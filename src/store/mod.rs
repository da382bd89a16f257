//! Storage seams consumed by the core.
//!
//! The core never talks to a database or a Redis client directly. It goes
//! through three traits:
//!
//! - [`UserRepository`]: durable source of truth for tokens, users and
//!   quota balances.
//! - [`ChannelRepository`]: durable channel records.
//! - [`AtomicStore`]: the distributed key/counter store backing the
//!   fast-path quota counters and the legacy-token index.
//!
//! [`MemoryStore`] and [`MemoryAtomicStore`] implement them in-process (used
//! for embedding and tests); [`RedisStore`] implements [`AtomicStore`] and
//! [`CacheBackend`](crate::cache::CacheBackend) against Redis.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{MemoryAtomicStore, MemoryStore};
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::channel::{BatchChannelsParams, Channel, ChannelQuery};

/// An API token as stored durably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub name: String,
    /// 1 = enabled.
    pub status: i32,
    pub remain_quota: i64,
    pub unlimited_quota: bool,
    /// Unix seconds, -1 = never.
    pub expired_time: i64,
}

impl Token {
    pub fn is_enabled(&self) -> bool {
        self.status == 1
    }
}

/// A user as stored durably (only the fields the core reads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub group: String,
    /// 1 = enabled.
    pub status: i32,
    pub quota: i64,
}

/// Durable user/token store.
///
/// Absent records are reported as [`HeimdallError::NotFound`](crate::HeimdallError::NotFound);
/// any other error is treated as transient by the default
/// [`RetryPolicy`](crate::RetryPolicy).
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_token_by_key(&self, key: &str) -> Result<Token>;

    async fn get_user_group(&self, user_id: i64) -> Result<String>;

    async fn get_user_quota(&self, user_id: i64) -> Result<i64>;

    /// Apply `delta` to the durable balance and return the new balance.
    ///
    /// Not idempotent, so callers never retry it.
    async fn update_user_quota(&self, user_id: i64, delta: i64) -> Result<i64>;

    async fn is_user_enabled(&self, user_id: i64) -> Result<bool>;

    /// Username, or `None` if the user does not exist.
    async fn get_username(&self, user_id: i64) -> Result<Option<String>>;

    /// Keys of tokens with `id <= max_id`, ordered by id.
    async fn pluck_token_keys(&self, max_id: i64, limit: usize, offset: usize)
    -> Result<Vec<String>>;
}

/// Durable channel store.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn list(&self, query: &ChannelQuery) -> Result<Vec<Channel>>;

    async fn get(&self, id: i64) -> Result<Channel>;

    /// Insert all channels in one transaction, assigning ids.
    async fn insert_batch(&self, channels: &[Channel]) -> Result<Vec<i64>>;

    /// Update a channel. With `with_models == false` the stored model list
    /// is left untouched.
    async fn update(&self, channel: &Channel, with_models: bool) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Delete every channel sharing the tag of channel `id`.
    async fn delete_by_tag(&self, id: i64) -> Result<u64>;

    /// Delete every disabled channel.
    async fn delete_disabled(&self) -> Result<u64>;

    async fn delete_batch(&self, ids: &[i64]) -> Result<u64>;

    /// Set the API-version field of the listed channels.
    async fn update_api_version(&self, params: &BatchChannelsParams) -> Result<u64>;

    /// Remove a model from the model list of the listed channels.
    async fn remove_model(&self, params: &BatchChannelsParams) -> Result<u64>;
}

/// Distributed atomic store.
///
/// Every method is a single atomic operation on the store side; callers do
/// no locking of their own.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    /// Store name for logging/debugging.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Add `delta` to an integer key (absent = 0) and return the result.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()>;

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    /// Sliding-TTL counter update, atomic as a whole:
    ///
    /// - absent key, `delta < 0`: nothing is written, returns 0.
    /// - absent key, `delta >= 0`: key created at `delta`.
    /// - present key: `delta` added.
    ///
    /// Every applied update resets the key's expiry to `ttl`.
    async fn update_counter(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64>;
}
