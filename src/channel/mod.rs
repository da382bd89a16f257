//! Channel records and their store.
//!
//! A [`Channel`] is an admin-configured backend credential/endpoint set. The
//! [`ChannelStore`] owns the data model rules (bulk expansion of key blobs,
//! partial updates, batch operations); persistence sits behind
//! [`ChannelRepository`]. The JSON admin boundary lives in [`admin`].

pub mod admin;

pub use admin::{ApiResponse, ChannelAdmin};

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::retry::RetryPolicy;
use crate::store::ChannelRepository;
use crate::{HeimdallError, Result};

/// Rows per insert statement when creating channels in bulk.
pub const INSERT_BATCH_SIZE: usize = 1000;

/// Well-known channel types.
pub mod channel_type {
    /// Generic OpenAI-style HTTP backend.
    pub const OPENAI: i32 = 1;
    /// Asynchronous Midjourney proxy backend.
    pub const MIDJOURNEY: i32 = 2;
}

/// Channel status values.
pub mod channel_status {
    pub const ENABLED: i32 = 1;
    pub const MANUALLY_DISABLED: i32 = 2;
    pub const AUTO_DISABLED: i32 = 3;
}

fn default_status() -> i32 {
    channel_status::ENABLED
}

/// A provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "type", default)]
    pub channel_type: i32,
    /// Provider secret. On create, may hold several newline-separated keys.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    /// On create, may hold several newline-separated URLs.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Comma-separated model list.
    #[serde(default)]
    pub models: String,
    #[serde(default)]
    pub group: String,
    /// Outbound proxy URL, empty/None = direct.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_status")]
    pub status: i32,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub tag: String,
    /// Free-form provider setting; the API version for Azure-style backends.
    #[serde(default)]
    pub other: String,
    /// Unix seconds.
    #[serde(default)]
    pub created_time: i64,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            id: 0,
            channel_type: channel_type::OPENAI,
            key: String::new(),
            name: String::new(),
            base_url: None,
            models: String::new(),
            group: String::new(),
            proxy: None,
            status: channel_status::ENABLED,
            weight: 0,
            priority: 0,
            tag: String::new(),
            other: String::new(),
            created_time: 0,
        }
    }
}

impl Channel {
    pub fn is_enabled(&self) -> bool {
        self.status == channel_status::ENABLED
    }

    /// Models this channel serves.
    pub fn model_list(&self) -> Vec<&str> {
        self.models
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .collect()
    }

    /// Whether `model` is in the model list.
    pub fn supports_model(&self, model: &str) -> bool {
        self.model_list().contains(&model)
    }

    /// Non-empty base URL, if configured.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|u| !u.is_empty())
    }

    /// Non-empty proxy URL, if configured.
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref().filter(|p| !p.is_empty())
    }
}

/// Filter for listing channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelQuery {
    /// Substring match on the name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub channel_type: Option<i32>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub tag: Option<String>,
    /// 1-based page.
    #[serde(default)]
    pub page: usize,
    /// Page size, 0 = no paging.
    #[serde(default)]
    pub size: usize,
}

impl ChannelQuery {
    pub fn matches(&self, channel: &Channel) -> bool {
        self.name
            .as_deref()
            .is_none_or(|n| channel.name.contains(n))
            && self.channel_type.is_none_or(|t| channel.channel_type == t)
            && self.status.is_none_or(|s| channel.status == s)
            && self.tag.as_deref().is_none_or(|t| channel.tag == t)
    }

    /// `(offset, limit)` for this page, `None` if unpaged. An offset past
    /// `usize::MAX` saturates, which reads as an empty page.
    pub fn window(&self) -> Option<(usize, usize)> {
        (self.size > 0).then(|| {
            let offset = self.page.saturating_sub(1).saturating_mul(self.size);
            (offset, self.size)
        })
    }
}

/// Parameters of the batch admin operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchChannelsParams {
    #[serde(default)]
    pub ids: Vec<i64>,
    /// Operation argument: the API version, or the model to remove.
    #[serde(default)]
    pub value: String,
}

impl BatchChannelsParams {
    fn validate(&self) -> Result<()> {
        if self.ids.is_empty() {
            return Err(HeimdallError::InvalidInput("ids must not be empty".into()));
        }
        Ok(())
    }
}

/// Split a create request into sibling channels.
///
/// `template.key` holds newline-separated keys; `template.base_url` optional
/// newline-separated URLs. The sibling for key `i` is bound to
/// `urls[min(i, M - 1)]`, so a single URL is shared by every sibling. An
/// empty URL line falls back to the first URL. Empty key lines produce no
/// channel but still count for numbering: siblings after the first are named
/// `{name}_{i + 1}`.
pub fn expand_channels(template: &Channel, created_time: i64) -> Vec<Channel> {
    let urls: Vec<&str> = template
        .base_url()
        .map(|blob| blob.split('\n').map(str::trim).collect())
        .unwrap_or_default();

    template
        .key
        .split('\n')
        .map(str::trim)
        .enumerate()
        .filter(|(_, key)| !key.is_empty())
        .map(|(index, key)| {
            let mut channel = template.clone();
            channel.key = key.to_string();
            channel.created_time = created_time;
            if index > 0 {
                channel.name = format!("{}_{}", template.name, index + 1);
            }
            if let Some(last) = urls.len().checked_sub(1) {
                let url = match urls[index.min(last)] {
                    "" => urls[0],
                    url => url,
                };
                channel.base_url = Some(url.to_string());
            }
            channel
        })
        .collect()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Channel CRUD and batch operations over a [`ChannelRepository`].
pub struct ChannelStore {
    repo: Arc<dyn ChannelRepository>,
    retry: RetryPolicy,
}

impl ChannelStore {
    pub fn new(repo: Arc<dyn ChannelRepository>, retry: RetryPolicy) -> Self {
        Self { repo, retry }
    }

    pub async fn list(&self, query: &ChannelQuery) -> Result<Vec<Channel>> {
        self.repo.list(query).await
    }

    /// Fetch one channel. On the request path, so retried.
    pub async fn get(&self, id: i64) -> Result<Channel> {
        self.retry
            .retry("get_channel", || self.repo.get(id))
            .await
    }

    /// Create one channel per key in `template.key`; returns how many.
    ///
    /// Inserts run in batches of [`INSERT_BATCH_SIZE`]. A failing batch
    /// aborts the rest and the error names its row range; earlier batches
    /// stay committed.
    pub async fn create(&self, template: &Channel) -> Result<usize> {
        let channels = expand_channels(template, unix_now());
        if channels.is_empty() {
            return Err(HeimdallError::InvalidInput("no channel key given".into()));
        }

        for (n, batch) in channels.chunks(INSERT_BATCH_SIZE).enumerate() {
            let start = n * INSERT_BATCH_SIZE;
            self.repo.insert_batch(batch).await.map_err(|e| {
                HeimdallError::Storage(format!(
                    "batch insert failed (rows {}-{}): {e}",
                    start + 1,
                    start + batch.len()
                ))
            })?;
        }

        info!(name = %template.name, count = channels.len(), "channels created");
        Ok(channels.len())
    }

    /// Update a channel. An empty model list means "metadata only": the
    /// stored model list is kept.
    pub async fn update(&self, channel: &Channel) -> Result<()> {
        if channel.id <= 0 {
            return Err(HeimdallError::InvalidInput("channel id is required".into()));
        }
        self.repo.update(channel, !channel.models.is_empty()).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        self.repo.delete(id).await
    }

    pub async fn delete_by_tag(&self, id: i64) -> Result<u64> {
        self.repo.delete_by_tag(id).await
    }

    pub async fn delete_disabled(&self) -> Result<u64> {
        self.repo.delete_disabled().await
    }

    pub async fn delete_batch(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Err(HeimdallError::InvalidInput("ids must not be empty".into()));
        }
        self.repo.delete_batch(ids).await
    }

    pub async fn update_api_version(&self, params: &BatchChannelsParams) -> Result<u64> {
        params.validate()?;
        self.repo.update_api_version(params).await
    }

    pub async fn remove_model(&self, params: &BatchChannelsParams) -> Result<u64> {
        params.validate()?;
        if params.value.trim().is_empty() {
            return Err(HeimdallError::InvalidInput("model must not be empty".into()));
        }
        self.repo.remove_model(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(keys: &str, urls: Option<&str>) -> Channel {
        Channel {
            name: "name".into(),
            key: keys.into(),
            base_url: urls.map(String::from),
            ..Channel::default()
        }
    }

    #[test]
    fn single_url_is_shared() {
        let channels = expand_channels(&template("k1\nk2\nk3", Some("u1")), 42);
        let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["name", "name_2", "name_3"]);
        assert!(channels.iter().all(|c| c.base_url.as_deref() == Some("u1")));
        assert!(channels.iter().all(|c| c.created_time == 42));
    }

    #[test]
    fn urls_bind_positionally() {
        let channels = expand_channels(&template("k1\nk2\nk3", Some("u1\nu2\nu3")), 0);
        let bound: Vec<_> = channels
            .iter()
            .map(|c| (c.key.as_str(), c.base_url.as_deref().unwrap()))
            .collect();
        assert_eq!(bound, [("k1", "u1"), ("k2", "u2"), ("k3", "u3")]);
    }

    #[test]
    fn fewer_urls_than_keys_reuse_last() {
        let channels = expand_channels(&template("k1\nk2\nk3", Some("u1\nu2")), 0);
        let urls: Vec<_> = channels
            .iter()
            .map(|c| c.base_url.as_deref().unwrap())
            .collect();
        assert_eq!(urls, ["u1", "u2", "u2"]);
    }

    #[test]
    fn no_url_leaves_base_url_unset() {
        let channels = expand_channels(&template("k1\nk2", None), 0);
        assert!(channels.iter().all(|c| c.base_url.is_none()));
    }

    #[test]
    fn blank_keys_are_skipped_but_numbered() {
        let channels = expand_channels(&template("k1\n\nk3\n", None), 0);
        let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["name", "name_3"]);
    }

    #[test]
    fn crlf_blobs_are_trimmed() {
        let channels = expand_channels(&template("k1\r\nk2\r\n", Some("u1\r\n")), 0);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].key, "k1");
        assert_eq!(channels[1].base_url.as_deref(), Some("u1"));
    }

    #[test]
    fn model_list_parsing() {
        let channel = Channel {
            models: "gpt-4o, mj_imagine,,".into(),
            ..Channel::default()
        };
        assert_eq!(channel.model_list(), ["gpt-4o", "mj_imagine"]);
        assert!(channel.supports_model("mj_imagine"));
        assert!(!channel.supports_model("dall-e-3"));
    }

    #[test]
    fn query_window() {
        let query = ChannelQuery {
            page: 3,
            size: 10,
            ..ChannelQuery::default()
        };
        assert_eq!(query.window(), Some((20, 10)));
        assert_eq!(ChannelQuery::default().window(), None);
    }

    #[test]
    fn query_window_saturates() {
        let query = ChannelQuery {
            page: usize::MAX,
            size: 2,
            ..ChannelQuery::default()
        };
        assert_eq!(query.window(), Some((usize::MAX, 2)));
    }
}
