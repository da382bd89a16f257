//! Midjourney proxy adapter.
//!
//! The backend is an asynchronous task API: submissions are JSON `POST`s that
//! return a task envelope, status polls are `GET`s.
//!
//! Outbound rewrites on mutating requests:
//! - `accountFilter` is replaced by `{"modes": [MODE]}` where `MODE` is the
//!   caller's model hint upper-cased (default `FAST`);
//! - `notifyHook` is dropped unless notifications are enabled;
//! - `--fast`, `--relax` and `--turbo` are removed from `prompt`, since the
//!   account filter already selects the mode.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::registry::ProviderFactory;
use super::traits::{
    OutboundRequest, Provider, ProviderResponse, RawResponse, RequestContext, ResponseBody,
    join_url, pass_through,
};
use super::transport;
use crate::channel::Channel;
use crate::error::ProviderError;

/// Midjourney's "unknown error" code.
pub const MJ_ERROR_UNKNOWN: i32 = 5;

/// Header carrying the channel secret.
pub const SECRET_HEADER: &str = "mj-api-secret";

const DEFAULT_MODE: &str = "fast";

const MODE_FLAGS: [&str; 3] = ["--fast", "--relax", "--turbo"];

/// Task envelope returned by submissions and polls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MidjourneyResponse {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Option<Value>,
    /// Task id.
    #[serde(default)]
    pub result: String,
}

/// Envelope returned by image uploads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub description: String,
    /// Uploaded image URLs.
    #[serde(default)]
    pub result: Vec<String>,
}

fn mj_error(reason: &str, status: u16) -> ProviderError {
    ProviderError::new(MJ_ERROR_UNKNOWN, reason, status)
}

/// Remove mode flags from a prompt and collapse the leftover whitespace.
pub fn strip_mode_flags(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .filter(|token| !MODE_FLAGS.iter().any(|flag| token.eq_ignore_ascii_case(flag)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Adapter for one Midjourney channel.
pub struct MidjourneyProvider {
    channel: Channel,
    http: Client,
    notify_enabled: bool,
}

impl MidjourneyProvider {
    pub fn new(channel: Channel, http: Client, notify_enabled: bool) -> Self {
        Self {
            channel,
            http,
            notify_enabled,
        }
    }

    fn rewrite_body(&self, ctx: &RequestContext) -> Result<Bytes, ProviderError> {
        let raw = ctx
            .body
            .as_ref()
            .ok_or_else(|| mj_error("request_body_not_found", 500))?;
        let mut body: Map<String, Value> = serde_json::from_slice(raw)
            .map_err(|e| mj_error("read_request_body_failed", 500).with_detail(e))?;

        let mode = ctx
            .model_hint
            .as_deref()
            .filter(|hint| !hint.is_empty())
            .unwrap_or(DEFAULT_MODE)
            .to_uppercase();
        body.insert("accountFilter".to_owned(), json!({ "modes": [mode] }));

        if !self.notify_enabled {
            body.remove("notifyHook");
        }

        if let Some(Value::String(prompt)) = body.get_mut("prompt") {
            *prompt = strip_mode_flags(prompt);
        }

        serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|e| mj_error("marshal_request_body_failed", 500).with_detail(e))
    }

    fn headers(&self, ctx: &RequestContext) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        let secret = HeaderValue::from_str(&self.channel.key)
            .map_err(|e| mj_error("create_request_failed", 500).with_detail(e))?;
        headers.insert(HeaderName::from_static(SECRET_HEADER), secret);
        pass_through(&mut headers, &ctx.headers, CONTENT_TYPE);
        pass_through(&mut headers, &ctx.headers, ACCEPT);
        Ok(headers)
    }
}

#[async_trait]
impl Provider for MidjourneyProvider {
    fn name(&self) -> &str {
        "midjourney"
    }

    fn channel(&self) -> &Channel {
        &self.channel
    }

    fn build_request(&self, ctx: &RequestContext) -> Result<OutboundRequest, ProviderError> {
        let base = self
            .channel
            .base_url()
            .ok_or_else(|| mj_error("base_url_not_found", 500))?;

        let body = if ctx.is_mutating() {
            Some(self.rewrite_body(ctx)?)
        } else {
            None
        };

        Ok(OutboundRequest {
            method: ctx.method.clone(),
            url: join_url(base, &ctx.path),
            headers: self.headers(ctx)?,
            body,
            timeout: ctx.timeout,
        })
    }

    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse, ProviderError> {
        transport::send(&self.http, request, MJ_ERROR_UNKNOWN).await
    }

    /// Task envelope first, upload envelope second. An empty body and an
    /// unparseable body are distinct failures; both keep the raw bytes.
    fn parse_response(&self, raw: RawResponse) -> Result<ProviderResponse, ProviderError> {
        let RawResponse { status, body: raw } = raw;
        if raw.is_empty() {
            return Err(mj_error("empty_response_body", status).with_body(raw));
        }

        let body = match serde_json::from_slice::<MidjourneyResponse>(&raw) {
            Ok(task) => ResponseBody::Midjourney(task),
            Err(task_err) => match serde_json::from_slice::<UploadResponse>(&raw) {
                Ok(upload) => ResponseBody::Upload(upload),
                Err(_) => {
                    return Err(mj_error("unmarshal_response_body_failed", status)
                        .with_detail(task_err)
                        .with_body(raw));
                }
            },
        };

        Ok(ProviderResponse { status, body, raw })
    }
}

/// Builds [`MidjourneyProvider`]s.
#[derive(Debug, Clone, Default)]
pub struct MidjourneyFactory {
    /// Forward `notifyHook` to the backend.
    pub notify_enabled: bool,
}

impl ProviderFactory for MidjourneyFactory {
    fn create(&self, channel: Channel, http: Client) -> Arc<dyn Provider> {
        Arc::new(MidjourneyProvider::new(channel, http, self.notify_enabled))
    }
}
