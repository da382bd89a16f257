//! ChannelStore and the admin boundary over the in-memory repository.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use heimdall::channel::{channel_status, channel_type};
use heimdall::{
    BatchChannelsParams, Channel, ChannelAdmin, ChannelQuery, ChannelRepository, ChannelStore,
    HeimdallError, MemoryStore, Result, RetryPolicy,
};

fn store_with(repo: Arc<MemoryStore>) -> (Arc<ChannelStore>, ChannelAdmin) {
    let store = Arc::new(ChannelStore::new(repo, RetryPolicy::new()));
    (Arc::clone(&store), ChannelAdmin::new(store))
}

fn template(name: &str, keys: &str, urls: Option<&str>) -> Channel {
    Channel {
        name: name.to_string(),
        key: keys.to_string(),
        base_url: urls.map(str::to_string),
        models: "gpt-4o,mj_imagine".to_string(),
        ..Channel::default()
    }
}

#[tokio::test]
async fn bulk_create_shares_single_url() {
    let repo = Arc::new(MemoryStore::new());
    let (_, admin) = store_with(repo.clone());

    let resp = admin.add(&template("name", "k1\nk2\nk3", Some("u1"))).await;
    assert!(resp.success, "{}", resp.message);
    assert_eq!(resp.data, Some(3));

    let channels = repo.channels();
    let summary: Vec<_> = channels
        .iter()
        .map(|c| (c.name.as_str(), c.key.as_str(), c.base_url.as_deref()))
        .collect();
    assert_eq!(
        summary,
        [
            ("name", "k1", Some("u1")),
            ("name_2", "k2", Some("u1")),
            ("name_3", "k3", Some("u1")),
        ]
    );
    assert!(channels.iter().all(|c| c.created_time > 0));
}

#[tokio::test]
async fn bulk_create_binds_urls_positionally() {
    let repo = Arc::new(MemoryStore::new());
    let (store, _) = store_with(repo.clone());

    store
        .create(&template("name", "k1\nk2\nk3", Some("u1\nu2\nu3")))
        .await
        .unwrap();

    let urls: Vec<_> = repo
        .channels()
        .into_iter()
        .map(|c| c.base_url.unwrap())
        .collect();
    assert_eq!(urls, ["u1", "u2", "u3"]);
}

#[tokio::test]
async fn bulk_create_without_keys_is_rejected() {
    let (_, admin) = store_with(Arc::new(MemoryStore::new()));
    let resp = admin.add(&template("empty", "\n\n", None)).await;
    assert!(!resp.success);
    assert!(resp.data.is_none());
}

/// Repository whose `fail_on`-th insert batch fails.
struct FlakyInserts {
    inner: MemoryStore,
    batches: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl ChannelRepository for FlakyInserts {
    async fn list(&self, query: &ChannelQuery) -> Result<Vec<Channel>> {
        self.inner.list(query).await
    }

    async fn get(&self, id: i64) -> Result<Channel> {
        self.inner.get(id).await
    }

    async fn insert_batch(&self, channels: &[Channel]) -> Result<Vec<i64>> {
        if self.batches.fetch_add(1, Ordering::SeqCst) == self.fail_on {
            return Err(HeimdallError::Storage("disk full".to_string()));
        }
        self.inner.insert_batch(channels).await
    }

    async fn update(&self, channel: &Channel, with_models: bool) -> Result<()> {
        self.inner.update(channel, with_models).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn delete_by_tag(&self, id: i64) -> Result<u64> {
        self.inner.delete_by_tag(id).await
    }

    async fn delete_disabled(&self) -> Result<u64> {
        self.inner.delete_disabled().await
    }

    async fn delete_batch(&self, ids: &[i64]) -> Result<u64> {
        self.inner.delete_batch(ids).await
    }

    async fn update_api_version(&self, params: &BatchChannelsParams) -> Result<u64> {
        self.inner.update_api_version(params).await
    }

    async fn remove_model(&self, params: &BatchChannelsParams) -> Result<u64> {
        self.inner.remove_model(params).await
    }
}

#[tokio::test]
async fn bulk_create_runs_in_batches_and_names_failing_range() {
    let repo = Arc::new(FlakyInserts {
        inner: MemoryStore::new(),
        batches: AtomicUsize::new(0),
        fail_on: 1,
    });
    let store = ChannelStore::new(repo.clone(), RetryPolicy::new());

    let keys: Vec<String> = (1..=2500).map(|i| format!("sk-{i}")).collect();
    let err = store
        .create(&template("bulk", &keys.join("\n"), None))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("rows 1001-2000"), "{message}");
    assert_eq!(repo.inner.channels().len(), 1000);
    assert_eq!(repo.batches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn metadata_only_update_keeps_models() {
    let repo = Arc::new(MemoryStore::new());
    let (store, admin) = store_with(repo.clone());
    store.create(&template("orig", "k1", None)).await.unwrap();
    let mut channel = repo.channels().remove(0);

    channel.name = "renamed".to_string();
    channel.models = String::new();
    let resp = admin.update(channel.clone()).await;
    assert!(resp.success);

    let stored = store.get(channel.id).await.unwrap();
    assert_eq!(stored.name, "renamed");
    assert_eq!(stored.models, "gpt-4o,mj_imagine");

    channel.models = "dall-e-3".to_string();
    store.update(&channel).await.unwrap();
    assert_eq!(store.get(channel.id).await.unwrap().models, "dall-e-3");
}

#[tokio::test]
async fn update_without_id_is_rejected() {
    let (_, admin) = store_with(Arc::new(MemoryStore::new()));
    let resp = admin.update(template("x", "k", None)).await;
    assert!(!resp.success);
    assert!(resp.message.contains("id"));
}

#[tokio::test]
async fn delete_variants() {
    let repo = Arc::new(MemoryStore::new());
    let (store, admin) = store_with(repo.clone());

    let tagged = Channel {
        tag: "pool-a".to_string(),
        ..template("tagged", "a1\na2\na3", None)
    };
    store.create(&tagged).await.unwrap();
    let disabled = Channel {
        status: channel_status::AUTO_DISABLED,
        ..template("off", "d1\nd2", None)
    };
    store.create(&disabled).await.unwrap();
    store.create(&template("plain", "p1\np2", None)).await.unwrap();
    assert_eq!(repo.channels().len(), 7);

    let first_tagged = repo.channels()[0].id;
    assert_eq!(admin.delete_tag(first_tagged).await.data, Some(3));
    assert_eq!(admin.delete_disabled().await.data, Some(2));

    let plain: Vec<i64> = repo.channels().iter().map(|c| c.id).collect();
    assert_eq!(plain.len(), 2);
    assert!(admin.delete(plain[0]).await.success);
    assert!(!admin.delete(plain[0]).await.success, "already deleted");

    let resp = admin
        .batch_delete(&BatchChannelsParams {
            ids: vec![plain[1], 9_999],
            ..BatchChannelsParams::default()
        })
        .await;
    assert_eq!(resp.data, Some(1));
    assert!(repo.channels().is_empty());
}

#[tokio::test]
async fn empty_id_lists_are_validation_errors() {
    let (_, admin) = store_with(Arc::new(MemoryStore::new()));
    let empty = BatchChannelsParams {
        ids: Vec::new(),
        value: "2024-06-01".to_string(),
    };

    for resp in [
        admin.batch_delete(&empty).await,
        admin.batch_update_api_version(&empty).await,
        admin.batch_delete_model(&empty).await,
    ] {
        assert!(!resp.success);
        assert!(resp.message.contains("ids must not be empty"), "{}", resp.message);
    }
}

#[tokio::test]
async fn batch_update_api_version_and_remove_model() {
    let repo = Arc::new(MemoryStore::new());
    let (store, admin) = store_with(repo.clone());
    store.create(&template("c", "k1\nk2", None)).await.unwrap();
    let ids: Vec<i64> = repo.channels().iter().map(|c| c.id).collect();

    let resp = admin
        .batch_update_api_version(&BatchChannelsParams {
            ids: ids.clone(),
            value: "2024-06-01".to_string(),
        })
        .await;
    assert_eq!(resp.data, Some(2));
    assert!(repo.channels().iter().all(|c| c.other == "2024-06-01"));

    let resp = admin
        .batch_delete_model(&BatchChannelsParams {
            ids,
            value: "mj_imagine".to_string(),
        })
        .await;
    assert_eq!(resp.data, Some(2));
    assert!(repo.channels().iter().all(|c| c.models == "gpt-4o"));
}

#[tokio::test]
async fn list_filters_and_pages() {
    let repo = Arc::new(MemoryStore::new());
    let (store, admin) = store_with(repo);
    let keys: Vec<String> = (1..=5).map(|i| format!("k{i}")).collect();
    store.create(&template("openai", &keys.join("\n"), None)).await.unwrap();
    store
        .create(&Channel {
            channel_type: channel_type::MIDJOURNEY,
            ..template("mj", "m1", None)
        })
        .await
        .unwrap();

    let mj = admin
        .list(&ChannelQuery {
            channel_type: Some(channel_type::MIDJOURNEY),
            ..ChannelQuery::default()
        })
        .await;
    assert_eq!(mj.data.unwrap().len(), 1);

    let page = admin
        .list(&ChannelQuery {
            name: Some("openai".to_string()),
            page: 2,
            size: 2,
            ..ChannelQuery::default()
        })
        .await
        .data
        .unwrap();
    let names: Vec<_> = page.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["openai_3", "openai_4"]);
}

#[tokio::test]
async fn page_past_the_end_is_empty() {
    let repo = Arc::new(MemoryStore::new());
    let (store, admin) = store_with(repo);
    store.create(&template("openai", "k1\nk2\nk3", None)).await.unwrap();

    let resp = admin
        .list(&ChannelQuery {
            page: usize::MAX,
            size: 2,
            ..ChannelQuery::default()
        })
        .await;
    assert!(resp.success);
    assert!(resp.data.unwrap().is_empty());
}

#[tokio::test]
async fn admin_response_serializes_as_envelope() {
    let (_, admin) = store_with(Arc::new(MemoryStore::new()));
    let resp = admin.get(12345).await;
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["success"], false);
    assert!(json["message"].as_str().unwrap().contains("not found"));
    assert!(json.get("data").is_none());
}
