//! Shared outbound HTTP transport.
//!
//! `reqwest::Client` holds the connection pool, so clients are built once
//! per proxy setting and shared by every provider routed through that proxy.

use std::time::Duration;

use moka::sync::Cache;
use reqwest::Client;
use tracing::debug;

use super::traits::{OutboundRequest, RawResponse};
use crate::error::ProviderError;
use crate::{HeimdallError, Result};

/// Distinct proxy settings kept warm at once.
const MAX_CLIENTS: u64 = 64;

/// Clients idle this long are dropped along with their connections.
const CLIENT_IDLE: Duration = Duration::from_secs(600);

/// HTTP clients keyed by proxy URL (`""` = direct).
#[derive(Clone)]
pub struct TransportPool {
    clients: Cache<String, Client>,
}

impl Default for TransportPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportPool {
    pub fn new() -> Self {
        Self {
            clients: Cache::builder()
                .max_capacity(MAX_CLIENTS)
                .time_to_idle(CLIENT_IDLE)
                .build(),
        }
    }

    /// Client bound to `proxy`, built on first use.
    pub fn client(&self, proxy: Option<&str>) -> Result<Client> {
        let key = proxy.unwrap_or_default().to_owned();
        if let Some(client) = self.clients.get(&key) {
            return Ok(client);
        }

        let mut builder = Client::builder();
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                HeimdallError::Configuration(format!("invalid proxy '{proxy}': {e}"))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| HeimdallError::Configuration(format!("failed to build HTTP client: {e}")))?;

        debug!(proxy = %key, "built HTTP client");
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Number of cached clients.
    pub fn len(&self) -> u64 {
        self.clients.run_pending_tasks();
        self.clients.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Issue `request` with its timeout and read the whole body.
///
/// The response is consumed by the body read, which hands the connection
/// back to the pool on every exit path. Failures carry `error_code`.
pub async fn send(
    client: &Client,
    request: OutboundRequest,
    error_code: i32,
) -> std::result::Result<RawResponse, ProviderError> {
    let mut builder = client
        .request(request.method, &request.url)
        .headers(request.headers)
        .timeout(request.timeout);
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = builder.send().await.map_err(|e| {
        let (reason, status) = if e.is_timeout() {
            ("request_timeout", 504)
        } else if e.is_builder() {
            ("create_request_failed", 500)
        } else {
            ("do_request_failed", 500)
        };
        ProviderError::new(error_code, reason, status).with_detail(e)
    })?;

    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(|e| {
        ProviderError::new(error_code, "read_response_body_failed", status).with_detail(e)
    })?;

    Ok(RawResponse { status, body })
}
