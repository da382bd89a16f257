//! Heimdall error types

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// Heimdall error types
///
/// `Clone` so that a single coalesced failure can be handed to every waiter
/// of the same in-flight computation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HeimdallError {
    // Lookup errors
    /// Record absent from the durable store, or cache miss surfaced to a caller.
    /// Terminal: never retried.
    #[error("not found: {0}")]
    NotFound(String),

    // Storage errors
    /// Durable store failure (contention, lost connection, timeout).
    #[error("storage error: {0}")]
    Storage(String),

    /// Distributed cache / atomic store failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The fast-path quota store could not apply an update.
    #[error("quota ledger unavailable for user {user_id}: {reason}")]
    QuotaUnavailable { user_id: i64, reason: String },

    // Coalescing errors
    /// Caller gave up waiting on a coalesced computation. The computation
    /// itself keeps running and still populates the cache.
    #[error("timed out after {waited:?} waiting for '{key}'")]
    Timeout { key: String, waited: Duration },

    /// Cached or coalesced value does not have the type the caller asked for.
    #[error("type mismatch for '{key}': expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    // Provider/network errors
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("HTTP error: {0}")]
    Http(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no provider registered for channel type {channel_type}")]
    NoProvider { channel_type: i32 },
}

impl HeimdallError {
    /// Whether the error is worth retrying against the same store.
    ///
    /// Storage, backend and transport failures are transient. Lookups that
    /// found nothing, validation failures and local contract violations are
    /// permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            HeimdallError::Storage(_)
            | HeimdallError::Backend(_)
            | HeimdallError::Http(_)
            | HeimdallError::QuotaUnavailable { .. } => true,
            HeimdallError::Provider(e) => e.status >= 500,
            _ => false,
        }
    }

    /// Whether the error means "record absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, HeimdallError::NotFound(_))
    }
}

impl From<serde_json::Error> for HeimdallError {
    fn from(err: serde_json::Error) -> Self {
        HeimdallError::Json(err.to_string())
    }
}

impl From<reqwest::Error> for HeimdallError {
    fn from(err: reqwest::Error) -> Self {
        HeimdallError::Http(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for HeimdallError {
    fn from(err: redis::RedisError) -> Self {
        HeimdallError::Backend(err.to_string())
    }
}

/// Structured provider failure.
///
/// Carries everything a relay needs to answer the upstream caller without
/// parsing error strings: a stable numeric code, a reason key, the HTTP status
/// to relay and, when the backend answered at all, its raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderError {
    /// Stable error code (provider specific, e.g. Midjourney's `5` = unknown).
    pub code: i32,
    /// Machine-readable reason key, e.g. `empty_response_body`.
    pub reason: String,
    /// HTTP status to relay upstream.
    pub status: u16,
    /// Raw backend response body, kept for diagnosis.
    pub raw_body: Option<Bytes>,
    /// Underlying error message, if any.
    pub detail: Option<String>,
}

impl ProviderError {
    pub fn new(code: i32, reason: impl Into<String>, status: u16) -> Self {
        Self {
            code,
            reason: reason.into(),
            status,
            raw_body: None,
            detail: None,
        }
    }

    /// Attach the raw backend body.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.raw_body = Some(body);
        self
    }

    /// Attach the underlying error message.
    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "provider error {} ({}): {}",
            self.code, self.status, self.reason
        )?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {}

/// Result type alias for Heimdall operations
pub type Result<T> = std::result::Result<T, HeimdallError>;
