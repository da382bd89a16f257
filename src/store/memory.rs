//! In-process store implementations.
//!
//! [`MemoryStore`] is a durable-store stand-in for embedding and tests.
//! [`MemoryAtomicStore`] mirrors the Redis semantics the core depends on
//! (integer parsing, overflow rejection, per-key expiry) so the quota ledger
//! behaves the same against either store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{AtomicStore, ChannelRepository, Token, User, UserRepository};
use crate::channel::{BatchChannelsParams, Channel, ChannelQuery, channel_status};
use crate::{HeimdallError, Result};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory users, tokens and channels.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<i64, User>>,
    tokens: RwLock<BTreeMap<i64, Token>>,
    channels: RwLock<BTreeMap<i64, Channel>>,
    next_channel_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub fn insert_user(&self, user: User) {
        write(&self.users).insert(user.id, user);
    }

    /// Insert or replace a token.
    pub fn insert_token(&self, token: Token) {
        write(&self.tokens).insert(token.id, token);
    }

    /// Snapshot of all channels, ordered by id.
    pub fn channels(&self) -> Vec<Channel> {
        read(&self.channels).values().cloned().collect()
    }

    fn user<R>(&self, user_id: i64, f: impl FnOnce(&User) -> R) -> Result<R> {
        read(&self.users)
            .get(&user_id)
            .map(f)
            .ok_or_else(|| HeimdallError::NotFound(format!("user {user_id}")))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_token_by_key(&self, key: &str) -> Result<Token> {
        read(&self.tokens)
            .values()
            .find(|t| t.key == key)
            .cloned()
            .ok_or_else(|| HeimdallError::NotFound("token".into()))
    }

    async fn get_user_group(&self, user_id: i64) -> Result<String> {
        self.user(user_id, |u| u.group.clone())
    }

    async fn get_user_quota(&self, user_id: i64) -> Result<i64> {
        self.user(user_id, |u| u.quota)
    }

    async fn update_user_quota(&self, user_id: i64, delta: i64) -> Result<i64> {
        let mut users = write(&self.users);
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| HeimdallError::NotFound(format!("user {user_id}")))?;
        user.quota = user
            .quota
            .checked_add(delta)
            .ok_or_else(|| HeimdallError::InvalidInput("quota overflow".into()))?;
        Ok(user.quota)
    }

    async fn is_user_enabled(&self, user_id: i64) -> Result<bool> {
        self.user(user_id, |u| u.status == 1)
    }

    async fn get_username(&self, user_id: i64) -> Result<Option<String>> {
        Ok(read(&self.users).get(&user_id).map(|u| u.username.clone()))
    }

    async fn pluck_token_keys(
        &self,
        max_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>> {
        Ok(read(&self.tokens)
            .range(..=max_id)
            .skip(offset)
            .take(limit)
            .map(|(_, t)| t.key.clone())
            .collect())
    }
}

#[async_trait]
impl ChannelRepository for MemoryStore {
    async fn list(&self, query: &ChannelQuery) -> Result<Vec<Channel>> {
        let channels = read(&self.channels);
        let matching = channels.values().filter(|c| query.matches(c)).cloned();
        Ok(match query.window() {
            Some((offset, limit)) => matching.skip(offset).take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn get(&self, id: i64) -> Result<Channel> {
        read(&self.channels)
            .get(&id)
            .cloned()
            .ok_or_else(|| HeimdallError::NotFound(format!("channel {id}")))
    }

    async fn insert_batch(&self, channels: &[Channel]) -> Result<Vec<i64>> {
        let mut stored = write(&self.channels);
        Ok(channels
            .iter()
            .map(|channel| {
                let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed) + 1;
                stored.insert(
                    id,
                    Channel {
                        id,
                        ..channel.clone()
                    },
                );
                id
            })
            .collect())
    }

    async fn update(&self, channel: &Channel, with_models: bool) -> Result<()> {
        let mut stored = write(&self.channels);
        let existing = stored
            .get_mut(&channel.id)
            .ok_or_else(|| HeimdallError::NotFound(format!("channel {}", channel.id)))?;
        let models = if with_models {
            channel.models.clone()
        } else {
            std::mem::take(&mut existing.models)
        };
        *existing = Channel {
            models,
            created_time: existing.created_time,
            ..channel.clone()
        };
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        write(&self.channels)
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| HeimdallError::NotFound(format!("channel {id}")))
    }

    async fn delete_by_tag(&self, id: i64) -> Result<u64> {
        let mut stored = write(&self.channels);
        let tag = stored
            .get(&id)
            .map(|c| c.tag.clone())
            .ok_or_else(|| HeimdallError::NotFound(format!("channel {id}")))?;
        if tag.is_empty() {
            return Ok(stored.remove(&id).map_or(0, |_| 1));
        }
        let before = stored.len();
        stored.retain(|_, c| c.tag != tag);
        Ok((before - stored.len()) as u64)
    }

    async fn delete_disabled(&self) -> Result<u64> {
        let mut stored = write(&self.channels);
        let before = stored.len();
        stored.retain(|_, c| {
            c.status != channel_status::MANUALLY_DISABLED && c.status != channel_status::AUTO_DISABLED
        });
        Ok((before - stored.len()) as u64)
    }

    async fn delete_batch(&self, ids: &[i64]) -> Result<u64> {
        let mut stored = write(&self.channels);
        Ok(ids.iter().filter(|id| stored.remove(*id).is_some()).count() as u64)
    }

    async fn update_api_version(&self, params: &BatchChannelsParams) -> Result<u64> {
        let mut stored = write(&self.channels);
        let mut updated = 0;
        for id in &params.ids {
            if let Some(channel) = stored.get_mut(id) {
                channel.other = params.value.clone();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn remove_model(&self, params: &BatchChannelsParams) -> Result<u64> {
        let mut stored = write(&self.channels);
        let mut updated = 0;
        for id in &params.ids {
            if let Some(channel) = stored.get_mut(id) {
                if !channel.supports_model(&params.value) {
                    continue;
                }
                channel.models = channel
                    .model_list()
                    .into_iter()
                    .filter(|m| *m != params.value)
                    .collect::<Vec<_>>()
                    .join(",");
                updated += 1;
            }
        }
        Ok(updated)
    }
}

// ============================================================================
// MemoryAtomicStore
// ============================================================================

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// Single-process [`AtomicStore`].
///
/// One mutex serializes every operation, which gives the same per-key
/// atomicity Redis gives a script.
#[derive(Default)]
pub struct MemoryAtomicStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryAtomicStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| slot.live());
        slots
    }

    /// Remaining lifetime of a key, for tests and diagnostics.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.slots()
            .get(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

fn parse_int(key: &str, slot: &Slot) -> Result<i64> {
    match &slot.value {
        Value::Str(s) => s.parse().map_err(|_| {
            HeimdallError::Backend(format!("value at '{key}' is not an integer"))
        }),
        Value::Set(_) => Err(HeimdallError::Backend(format!(
            "value at '{key}' holds the wrong kind of value"
        ))),
    }
}

fn checked_add(current: i64, delta: i64) -> Result<i64> {
    current
        .checked_add(delta)
        .ok_or_else(|| HeimdallError::Backend("increment or decrement would overflow".into()))
}

#[async_trait]
impl AtomicStore for MemoryAtomicStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.slots().get(key).map(|slot| &slot.value) {
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(Value::Set(_)) => Err(HeimdallError::Backend(format!(
                "value at '{key}' holds the wrong kind of value"
            ))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.slots().insert(
            key.to_owned(),
            Slot {
                value: Value::Str(value.to_owned()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.slots().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slots().remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut slots = self.slots();
        let (current, expires_at) = match slots.get(key) {
            Some(slot) => (parse_int(key, slot)?, slot.expires_at),
            None => (0, None),
        };
        let next = checked_add(current, delta)?;
        slots.insert(
            key.to_owned(),
            Slot {
                value: Value::Str(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        let mut slots = self.slots();
        let slot = slots.entry(key.to_owned()).or_insert_with(|| Slot {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut slot.value {
            Value::Set(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            Value::Str(_) => Err(HeimdallError::Backend(format!(
                "value at '{key}' holds the wrong kind of value"
            ))),
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        match self.slots().get(key).map(|slot| &slot.value) {
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(Value::Str(_)) => Err(HeimdallError::Backend(format!(
                "value at '{key}' holds the wrong kind of value"
            ))),
            None => Ok(false),
        }
    }

    async fn update_counter(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let mut slots = self.slots();
        let current = match slots.get(key) {
            Some(slot) => parse_int(key, slot)?,
            None if delta < 0 => return Ok(0),
            None => 0,
        };
        let next = checked_add(current, delta)?;
        slots.insert(
            key.to_owned(),
            Slot {
                value: Value::Str(next.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(next)
    }
}
