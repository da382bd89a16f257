//! Redis-backed distributed store.
//!
//! One multiplexed connection is opened at startup and cloned per call.
//! [`RedisStore`] serves both as the distributed cache tier
//! ([`CacheBackend`]) and as the fast-path counter store ([`AtomicStore`]).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::AtomicStore;
use crate::Result;
use crate::cache::{CacheBackend, CacheEntry};

/// Existence check, initialization and increment in one server-side step.
///
/// A decrement against a missing counter must not create it: the counter
/// would start below the durable balance it is supposed to shadow.
const UPDATE_COUNTER_SCRIPT: &str = r#"
local key = KEYS[1]
local delta = tonumber(ARGV[1])
local ttl_secs = tonumber(ARGV[2])

if redis.call("EXISTS", key) == 0 then
  if delta < 0 then
    return 0
  end
  redis.call("SET", key, "0", "EX", ttl_secs)
end

local value = redis.call("INCRBY", key, delta)
redis.call("EXPIRE", key, ttl_secs)
return value
"#;

/// Redis client shared by the cache tier and the quota ledger.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    update_counter: redis::Script,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let client = redis::Client::open(url.as_ref())?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            update_counter: redis::Script::new(UPDATE_COUNTER_SCRIPT),
        })
    }

    fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    /// Round-trip check.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Redis rejects a zero expiry; anything below a second rounds up.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.connection();
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await?;
        Ok(value.map(|value| CacheEntry {
            value: Bytes::from(value),
            // -1: no expiry; -2 cannot pair with a value but reads as none.
            expires_at: u64::try_from(pttl)
                .ok()
                .map(|ms| Instant::now() + Duration::from_millis(ms)),
        }))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.pset_ex(key, value.as_ref(), ttl_millis(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

#[async_trait]
impl AtomicStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.set_ex(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection();
        Ok(conn.exists(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.connection();
        Ok(conn.incr(key, delta).await?)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection();
        let _: () = conn.sadd(key, members).await?;
        Ok(())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection();
        Ok(conn.sismember(key, member).await?)
    }

    async fn update_counter(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let mut conn = self.connection();
        let value: i64 = self
            .update_counter
            .key(key)
            .arg(delta)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }
}
