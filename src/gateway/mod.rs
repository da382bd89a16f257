//! The gateway context object.
//!
//! [`Gateway`] owns every shared handle of the core: the tiered cache and its
//! coalescer, the fast-path store, the quota ledger, cached lookups, the
//! channel store and the provider registry. It is built once at startup with
//! [`Heimdall::builder`] and passed down explicitly; there is no global state.

mod builder;

pub use builder::{Heimdall, HeimdallBuilder};

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::cache::{Coalescer, TieredCache};
use crate::channel::{ChannelAdmin, ChannelStore};
use crate::config::Config;
use crate::lookup::{CachedLookups, LegacyTokenIndex};
use crate::providers::{ProviderRegistry, ProviderResponse, RequestContext};
use crate::quota::QuotaLedger;
use crate::store::AtomicStore;
use crate::{HeimdallError, Result};

/// Shared state of one gateway process.
pub struct Gateway {
    config: Config,
    cache: Arc<TieredCache>,
    coalescer: Coalescer,
    fast_path: Option<Arc<dyn AtomicStore>>,
    quota: QuotaLedger,
    lookups: CachedLookups,
    legacy_tokens: Option<Arc<LegacyTokenIndex>>,
    channels: Arc<ChannelStore>,
    admin: ChannelAdmin,
    registry: ProviderRegistry,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn coalescer(&self) -> &Coalescer {
        &self.coalescer
    }

    /// The distributed atomic store, when one is configured.
    pub fn fast_path(&self) -> Option<&Arc<dyn AtomicStore>> {
        self.fast_path.as_ref()
    }

    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    pub fn lookups(&self) -> &CachedLookups {
        &self.lookups
    }

    /// Legacy token index, present when a migration cutoff and a
    /// distributed store are both configured.
    pub fn legacy_tokens(&self) -> Option<&Arc<LegacyTokenIndex>> {
        self.legacy_tokens.as_ref()
    }

    pub fn channels(&self) -> &Arc<ChannelStore> {
        &self.channels
    }

    pub fn admin(&self) -> &ChannelAdmin {
        &self.admin
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Run a request against channel `channel_id`.
    ///
    /// Resolves the channel, builds its provider and runs build, execute and
    /// parse. Provider failures surface as [`HeimdallError::Provider`].
    #[instrument(skip(self, ctx), fields(method = %ctx.method, path = %ctx.path))]
    pub async fn dispatch(&self, channel_id: i64, ctx: &RequestContext) -> Result<ProviderResponse> {
        let channel = self.channels.get(channel_id).await?;
        if !channel.is_enabled() {
            return Err(HeimdallError::InvalidInput(format!(
                "channel {channel_id} is disabled"
            )));
        }
        let provider = self.registry.create(&channel)?;
        Ok(provider.send(ctx).await?)
    }

    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Stop background work and drop the local cache tier.
    ///
    /// The distributed tier is shared with other processes and left intact.
    pub fn shutdown(&self) {
        let handles =
            std::mem::take(&mut *self.background.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            handle.abort();
        }
        self.cache.clear_local();
        info!("gateway shut down");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        for handle in self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }
}
