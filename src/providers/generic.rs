//! OpenAI-style passthrough provider.
//!
//! Forwards the inbound JSON body unchanged with Bearer authentication and
//! returns the backend's JSON. Non-2xx answers become a [`ProviderError`]
//! relaying the backend's status and body.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use super::registry::ProviderFactory;
use super::traits::{
    OutboundRequest, Provider, ProviderResponse, RawResponse, RequestContext, ResponseBody,
    join_url, pass_through,
};
use super::transport;
use crate::channel::Channel;
use crate::error::ProviderError;

/// Base URL used when the channel sets none.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Error codes reported by [`HttpProvider`].
pub mod error_code {
    /// The request could not be built or sent.
    pub const REQUEST: i32 = 1;
    /// The backend answered with a non-success status.
    pub const UPSTREAM: i32 = 2;
    /// The backend's answer is not JSON.
    pub const RESPONSE: i32 = 3;
}

/// Passthrough provider for one channel.
pub struct HttpProvider {
    channel: Channel,
    http: Client,
}

impl HttpProvider {
    pub fn new(channel: Channel, http: Client) -> Self {
        Self { channel, http }
    }

    fn base_url(&self) -> &str {
        self.channel.base_url().unwrap_or(DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    fn channel(&self) -> &Channel {
        &self.channel
    }

    fn build_request(&self, ctx: &RequestContext) -> Result<OutboundRequest, ProviderError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.channel.key)).map_err(|e| {
            ProviderError::new(error_code::REQUEST, "create_request_failed", 500).with_detail(e)
        })?;
        headers.insert(AUTHORIZATION, auth);
        pass_through(&mut headers, &ctx.headers, ACCEPT);
        if ctx.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            pass_through(&mut headers, &ctx.headers, CONTENT_TYPE);
        }

        Ok(OutboundRequest {
            method: ctx.method.clone(),
            url: join_url(self.base_url(), &ctx.path),
            headers,
            body: if ctx.is_mutating() { ctx.body.clone() } else { None },
            timeout: ctx.timeout,
        })
    }

    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse, ProviderError> {
        transport::send(&self.http, request, error_code::REQUEST).await
    }

    fn parse_response(&self, raw: RawResponse) -> Result<ProviderResponse, ProviderError> {
        let RawResponse { status, body: raw } = raw;
        if !(200..300).contains(&status) {
            return Err(
                ProviderError::new(error_code::UPSTREAM, "upstream_error", status).with_body(raw),
            );
        }
        if raw.is_empty() {
            return Err(
                ProviderError::new(error_code::RESPONSE, "empty_response_body", status)
                    .with_body(raw),
            );
        }

        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(ProviderResponse {
                status,
                body: ResponseBody::Json(value),
                raw,
            }),
            Err(e) => Err(
                ProviderError::new(error_code::RESPONSE, "unmarshal_response_body_failed", status)
                    .with_detail(e)
                    .with_body(raw),
            ),
        }
    }
}

/// Builds [`HttpProvider`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpFactory;

impl ProviderFactory for HttpFactory {
    fn create(&self, channel: Channel, http: Client) -> Arc<dyn Provider> {
        Arc::new(HttpProvider::new(channel, http))
    }
}
