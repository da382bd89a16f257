//! Admin boundary for channel management.
//!
//! Every operation answers with an [`ApiResponse`]: failures are reported as
//! `success = false` plus a message, never as an `Err` or a panic, so a
//! request handler can serialize the result as-is.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{BatchChannelsParams, Channel, ChannelQuery, ChannelStore};
use crate::Result;

/// `{success, message, data}` envelope returned to admin callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                warn!(error = %e, "admin operation failed");
                Self::failure(e.to_string())
            }
        }
    }
}

impl ApiResponse<()> {
    /// Success without payload.
    pub fn done() -> Self {
        Self {
            success: true,
            message: String::new(),
            data: None,
        }
    }
}

/// Channel admin operations.
#[derive(Clone)]
pub struct ChannelAdmin {
    store: Arc<ChannelStore>,
}

impl ChannelAdmin {
    pub fn new(store: Arc<ChannelStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self, query: &ChannelQuery) -> ApiResponse<Vec<Channel>> {
        ApiResponse::from_result(self.store.list(query).await)
    }

    pub async fn get(&self, id: i64) -> ApiResponse<Channel> {
        ApiResponse::from_result(self.store.get(id).await)
    }

    /// Create channels from a (possibly multi-key) template.
    pub async fn add(&self, template: &Channel) -> ApiResponse<usize> {
        match self.store.create(template).await {
            Ok(count) => {
                ApiResponse::ok_with_message(count, format!("created {count} channel(s)"))
            }
            Err(e) => ApiResponse::from_result(Err(e)),
        }
    }

    /// Update a channel and echo it back.
    pub async fn update(&self, channel: Channel) -> ApiResponse<Channel> {
        ApiResponse::from_result(self.store.update(&channel).await.map(|()| channel))
    }

    pub async fn delete(&self, id: i64) -> ApiResponse<()> {
        match self.store.delete(id).await {
            Ok(()) => ApiResponse::done(),
            Err(e) => ApiResponse::from_result(Err(e)),
        }
    }

    pub async fn delete_tag(&self, id: i64) -> ApiResponse<u64> {
        ApiResponse::from_result(self.store.delete_by_tag(id).await)
    }

    pub async fn delete_disabled(&self) -> ApiResponse<u64> {
        ApiResponse::from_result(self.store.delete_disabled().await)
    }

    pub async fn batch_delete(&self, params: &BatchChannelsParams) -> ApiResponse<u64> {
        ApiResponse::from_result(self.store.delete_batch(&params.ids).await)
    }

    pub async fn batch_update_api_version(&self, params: &BatchChannelsParams) -> ApiResponse<u64> {
        match self.store.update_api_version(params).await {
            Ok(count) => ApiResponse::ok_with_message(count, "updated"),
            Err(e) => ApiResponse::from_result(Err(e)),
        }
    }

    pub async fn batch_delete_model(&self, params: &BatchChannelsParams) -> ApiResponse<u64> {
        match self.store.remove_model(params).await {
            Ok(count) => ApiResponse::ok_with_message(count, "updated"),
            Err(e) => ApiResponse::from_result(Err(e)),
        }
    }
}
