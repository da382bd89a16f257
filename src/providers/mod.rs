//! Backend protocol adapters.
//!
//! [`Provider`] is the capability contract, [`ProviderRegistry`] maps channel
//! types to factories, [`TransportPool`] shares HTTP clients per proxy.
//! Built-in adapters: [`HttpProvider`] (OpenAI-style passthrough) and
//! [`MidjourneyProvider`].

pub mod generic;
pub mod midjourney;
pub mod registry;
pub mod traits;
pub mod transport;

pub use generic::{HttpFactory, HttpProvider};
pub use midjourney::{MidjourneyFactory, MidjourneyProvider, MidjourneyResponse, UploadResponse};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use traits::{
    OutboundRequest, Provider, ProviderResponse, RawResponse, RequestContext, ResponseBody,
};
pub use transport::TransportPool;
