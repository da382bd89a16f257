//! Channel type → provider construction.
//!
//! The registry holds no protocol logic. It maps a channel's declared type to
//! a [`ProviderFactory`] and hands that factory the channel plus an HTTP
//! client bound to the channel's proxy.
//!
//! ```text
//! Channel { type: 2, proxy: "http://p:3128", .. }
//!     │
//!     ▼
//! ProviderRegistry ── factories[2] ──► MidjourneyFactory
//!     │                                   │
//!     └── transport.client(proxy) ────────┴──► Arc<dyn Provider>
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tracing::debug;

use super::generic::HttpFactory;
use super::midjourney::MidjourneyFactory;
use super::traits::Provider;
use super::transport::TransportPool;
use crate::channel::{Channel, channel_type};
use crate::config::MidjourneySettings;
use crate::{HeimdallError, Result};

/// Builds a provider bound to one channel.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, channel: Channel, http: Client) -> Arc<dyn Provider>;
}

/// Registry of provider factories keyed by channel type.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<i32, Arc<dyn ProviderFactory>>,
    transport: TransportPool,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in providers: generic HTTP for
    /// [`channel_type::OPENAI`], Midjourney for [`channel_type::MIDJOURNEY`].
    pub fn with_defaults(midjourney: &MidjourneySettings) -> Self {
        let mut registry = Self::new();
        registry.register(channel_type::OPENAI, Arc::new(HttpFactory));
        registry.register(
            channel_type::MIDJOURNEY,
            Arc::new(MidjourneyFactory {
                notify_enabled: midjourney.notify_enabled,
            }),
        );
        registry
    }

    /// Register (or replace) the factory for a channel type.
    pub fn register(&mut self, channel_type: i32, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(channel_type, factory);
    }

    /// Whether a factory exists for `channel_type`.
    pub fn supports(&self, channel_type: i32) -> bool {
        self.factories.contains_key(&channel_type)
    }

    /// Shared transport pool.
    pub fn transport(&self) -> &TransportPool {
        &self.transport
    }

    /// Build the provider for `channel`.
    pub fn create(&self, channel: &Channel) -> Result<Arc<dyn Provider>> {
        let factory = self
            .factories
            .get(&channel.channel_type)
            .ok_or(HeimdallError::NoProvider {
                channel_type: channel.channel_type,
            })?;
        let http = self.transport.client(channel.proxy())?;
        let provider = factory.create(channel.clone(), http);
        debug!(
            channel_id = channel.id,
            provider = provider.name(),
            "provider created"
        );
        Ok(provider)
    }
}
