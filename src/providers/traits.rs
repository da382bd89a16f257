//! Provider capability contract.
//!
//! Every backend protocol is one [`Provider`] implementation owning its URL
//! construction, header construction and response parsing. A call runs in
//! three steps:
//!
//! ```text
//! RequestContext ─► build_request ─► OutboundRequest ─► execute ─► RawResponse ─► parse_response ─► ProviderResponse
//! ```
//!
//! Every step fails with a structured [`ProviderError`], so a relay can answer
//! its caller from `code`, `reason` and `status` alone.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::midjourney::{MidjourneyResponse, UploadResponse};
use crate::channel::Channel;
use crate::error::ProviderError;
use crate::telemetry;

/// Outbound timeout used when the caller does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-call inbound state. Owned by one call, never shared.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Request path appended to the channel's base URL, e.g. `/mj/submit/imagine`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Caller-selected model or mode, e.g. Midjourney's `fast`/`relax`.
    pub model_hint: Option<String>,
    pub timeout: Duration,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            model_hint: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn model_hint(mut self, hint: impl Into<String>) -> Self {
        self.model_hint = Some(hint.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the method may change backend state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

/// Fully built backend request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Duration,
}

/// Backend answer before interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Parsed backend answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Opaque JSON from a passthrough provider.
    Json(serde_json::Value),
    /// Midjourney task envelope.
    Midjourney(MidjourneyResponse),
    /// Midjourney upload envelope.
    Upload(UploadResponse),
}

/// Interpreted backend answer, raw bytes kept alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: ResponseBody,
    pub raw: Bytes,
}

/// A backend protocol adapter bound to one channel.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Channel this instance was built for.
    fn channel(&self) -> &Channel;

    /// Turn the inbound request into the backend's request.
    fn build_request(&self, ctx: &RequestContext) -> Result<OutboundRequest, ProviderError>;

    /// Issue the request within its timeout and read the full response.
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse, ProviderError>;

    /// Interpret the backend's answer.
    fn parse_response(&self, raw: RawResponse) -> Result<ProviderResponse, ProviderError>;

    /// Build, execute and parse in one go.
    async fn send(&self, ctx: &RequestContext) -> Result<ProviderResponse, ProviderError> {
        let start = Instant::now();
        let result = match self.build_request(ctx) {
            Ok(request) => match self.execute(request).await {
                Ok(raw) => self.parse_response(raw),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            telemetry::PROVIDER_REQUESTS_TOTAL,
            "provider" => self.name().to_owned(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            telemetry::PROVIDER_REQUEST_DURATION_SECONDS,
            "provider" => self.name().to_owned()
        )
        .record(start.elapsed().as_secs_f64());

        result
    }
}

/// Join a base URL and a request path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_owned()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Copy the inbound `name` header onto `headers`, if present.
pub(crate) fn pass_through(headers: &mut HeaderMap, inbound: &HeaderMap, name: HeaderName) {
    if let Some(value) = inbound.get(&name) {
        headers.insert(name, value.clone());
    }
}
