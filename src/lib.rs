//! Heimdall - quota accounting and provider dispatch for an AI API gateway
//!
//! This crate is the core of a gateway fronting several AI backends behind
//! one API. It provides:
//!
//! - a two-tier cache (bounded in-process memory plus optional Redis) with
//!   single-flight coalescing of concurrent misses;
//! - an atomic per-user quota ledger with sliding-TTL realtime counters;
//! - a provider registry mapping channels to backend protocol adapters;
//! - bounded retry of durable-store calls.
//!
//! Storage engines stay behind the traits in [`store`].
//!
//! # Example
//!
//! ```rust,no_run
//! use heimdall::{Heimdall, RequestContext};
//! use reqwest::Method;
//!
//! #[tokio::main]
//! async fn main() -> heimdall::Result<()> {
//!     let config = heimdall::Config::load(None)?;
//!     let gateway = Heimdall::builder().config(config).build().await?;
//!
//!     let remaining = gateway.quota().update_quota(42, -1_000).await?;
//!     println!("realtime balance: {remaining}");
//!
//!     let ctx = RequestContext::new(Method::POST, "/mj/submit/imagine")
//!         .body(r#"{"prompt":"a cat --fast"}"#);
//!     let response = gateway.dispatch(7, &ctx).await?;
//!     println!("{:?}", response.body);
//!
//!     gateway.shutdown();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod gateway;
pub mod lookup;
pub mod providers;
pub mod quota;
pub mod retry;
pub mod store;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{CacheBackend, CacheEntry, Coalescer, MemoryCache, TieredCache};
pub use channel::{ApiResponse, BatchChannelsParams, Channel, ChannelAdmin, ChannelQuery, ChannelStore};
pub use config::Config;
pub use error::{HeimdallError, ProviderError, Result};
pub use gateway::{Gateway, Heimdall, HeimdallBuilder};
pub use lookup::{CachedLookups, LegacyTokenIndex};
pub use providers::{
    Provider, ProviderFactory, ProviderRegistry, ProviderResponse, RequestContext, ResponseBody,
};
pub use quota::QuotaLedger;
pub use retry::RetryPolicy;
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use store::{AtomicStore, ChannelRepository, MemoryAtomicStore, MemoryStore, UserRepository};
