//! Builder for configuring gateway instances

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::Gateway;
use crate::cache::{CacheBackend, Coalescer, MemoryCache, TieredCache};
use crate::channel::{ChannelAdmin, ChannelStore};
use crate::config::Config;
use crate::lookup::{CachedLookups, LegacyTokenIndex};
use crate::providers::ProviderRegistry;
use crate::quota::QuotaLedger;
use crate::store::{AtomicStore, ChannelRepository, MemoryStore, UserRepository};
use crate::Result;

/// Main entry point for creating gateway instances.
pub struct Heimdall;

impl Heimdall {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> HeimdallBuilder {
        HeimdallBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// Without explicit stores an in-process [`MemoryStore`] backs both
/// repositories. With `cache.redis_url` set (and no store injected) a Redis
/// connection backs the distributed cache tier and the fast-path quota layer.
#[derive(Default)]
pub struct HeimdallBuilder {
    config: Config,
    users: Option<Arc<dyn UserRepository>>,
    channels: Option<Arc<dyn ChannelRepository>>,
    remote_cache: Option<Arc<dyn CacheBackend>>,
    atomic_store: Option<Arc<dyn AtomicStore>>,
    registry: Option<ProviderRegistry>,
}

impl HeimdallBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Durable user/token repository.
    pub fn users(mut self, users: Arc<dyn UserRepository>) -> Self {
        self.users = Some(users);
        self
    }

    /// Durable channel repository.
    pub fn channels(mut self, channels: Arc<dyn ChannelRepository>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Distributed cache tier.
    pub fn remote_cache(mut self, remote: Arc<dyn CacheBackend>) -> Self {
        self.remote_cache = Some(remote);
        self
    }

    /// Fast-path atomic store. Enables realtime quota counters.
    pub fn atomic_store(mut self, store: Arc<dyn AtomicStore>) -> Self {
        self.atomic_store = Some(store);
        self
    }

    /// Provider registry (default: [`ProviderRegistry::with_defaults`]).
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the gateway.
    ///
    /// Connects to Redis when configured and nothing was injected, and starts
    /// seeding the legacy token index in the background when a migration
    /// cutoff is set.
    pub async fn build(self) -> Result<Gateway> {
        let HeimdallBuilder {
            config,
            users,
            channels,
            mut remote_cache,
            mut atomic_store,
            registry,
        } = self;
        config.validate()?;

        if remote_cache.is_none() && atomic_store.is_none() {
            if let Some(url) = config.cache.redis_url.as_deref().filter(|u| !u.is_empty()) {
                let (remote, atomic) = connect_redis(url).await?;
                remote_cache = Some(remote);
                atomic_store = Some(atomic);
            }
        }

        let (users, channels) = match (users, channels) {
            (Some(users), Some(channels)) => (users, channels),
            (users, channels) => {
                let memory = Arc::new(MemoryStore::new());
                let memory_users: Arc<dyn UserRepository> = memory.clone();
                let memory_channels: Arc<dyn ChannelRepository> = memory;
                (
                    users.unwrap_or(memory_users),
                    channels.unwrap_or(memory_channels),
                )
            }
        };

        let local = MemoryCache::with_capacity_bytes(config.cache.local_capacity_bytes);
        let cache = Arc::new(match remote_cache {
            Some(remote) => TieredCache::tiered(local, remote),
            None => TieredCache::local(local),
        });
        let coalescer = Coalescer::new(Arc::clone(&cache));
        let retry = config.retry.policy();

        let quota = QuotaLedger::new(
            Arc::clone(&users),
            atomic_store.clone(),
            retry.clone(),
            &config.quota,
        );
        let lookups = CachedLookups::new(
            coalescer.clone(),
            Arc::clone(&users),
            retry.clone(),
            config.quota.cache_ttl(),
            config.cache.timeout(),
        );
        let legacy_tokens = match &atomic_store {
            Some(store) if config.migration.old_token_max_id > 0 => Some(Arc::new(
                LegacyTokenIndex::new(
                    Arc::clone(store),
                    Arc::clone(&users),
                    config.migration.old_token_max_id,
                ),
            )),
            _ => None,
        };

        let channel_store = Arc::new(ChannelStore::new(channels, retry));
        let admin = ChannelAdmin::new(Arc::clone(&channel_store));
        let registry =
            registry.unwrap_or_else(|| ProviderRegistry::with_defaults(&config.midjourney));

        info!(
            distributed = cache.is_distributed(),
            fast_path = atomic_store.is_some(),
            "gateway initialised"
        );

        let gateway = Gateway {
            config,
            cache,
            coalescer,
            fast_path: atomic_store,
            quota,
            lookups,
            legacy_tokens,
            channels: channel_store,
            admin,
            registry,
            background: Mutex::new(Vec::new()),
        };

        if let Some(index) = gateway.legacy_tokens.clone() {
            gateway.track(tokio::spawn(async move {
                match index.seed().await {
                    Ok(count) => info!(count, "legacy token index ready"),
                    Err(e) => warn!(error = %e, "legacy token index seeding failed"),
                }
            }));
        }

        Ok(gateway)
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> Result<(Arc<dyn CacheBackend>, Arc<dyn AtomicStore>)> {
    let store = Arc::new(crate::store::RedisStore::connect(url).await?);
    store.ping().await?;
    info!("connected to redis");
    let remote: Arc<dyn CacheBackend> = store.clone();
    let atomic: Arc<dyn AtomicStore> = store;
    Ok((remote, atomic))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str) -> Result<(Arc<dyn CacheBackend>, Arc<dyn AtomicStore>)> {
    Err(crate::HeimdallError::Configuration(
        "cache.redis_url is set but heimdall was built without the `redis` feature".to_string(),
    ))
}
