//! End-to-end wiring through the builder.

use std::sync::Arc;
use std::time::Duration;

use heimdall::channel::{channel_status, channel_type};
use heimdall::store::Token;
use heimdall::{
    Channel, Config, Gateway, Heimdall, HeimdallError, MemoryAtomicStore, MemoryCache,
    MemoryStore, RequestContext, ResponseBody,
};
use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn gateway_with(store: Arc<MemoryStore>) -> Gateway {
    Heimdall::builder()
        .users(store.clone())
        .channels(store)
        .build()
        .await
        .unwrap()
}

async fn add_channel(gateway: &Gateway, channel: Channel) -> i64 {
    let resp = gateway.admin().add(&channel).await;
    assert!(resp.success, "{}", resp.message);
    let listed = gateway
        .channels()
        .list(&heimdall::ChannelQuery {
            name: Some(channel.name.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    listed[0].id
}

#[tokio::test]
async fn dispatch_reaches_midjourney_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mj/submit/imagine"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "description": "submitted",
            "result": "task-9"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_with(Arc::new(MemoryStore::new())).await;
    let id = add_channel(
        &gateway,
        Channel {
            channel_type: channel_type::MIDJOURNEY,
            name: "mj-main".to_string(),
            key: "secret".to_string(),
            base_url: Some(server.uri()),
            ..Channel::default()
        },
    )
    .await;

    let ctx = RequestContext::new(Method::POST, "/mj/submit/imagine")
        .body(json!({"prompt": "a lighthouse --turbo"}).to_string());
    let resp = gateway.dispatch(id, &ctx).await.unwrap();

    let ResponseBody::Midjourney(task) = resp.body else {
        panic!("expected task envelope");
    };
    assert_eq!(task.result, "task-9");
}

#[tokio::test]
async fn provider_failure_surfaces_as_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let gateway = gateway_with(Arc::new(MemoryStore::new())).await;
    let id = add_channel(
        &gateway,
        Channel {
            channel_type: channel_type::MIDJOURNEY,
            name: "mj-down".to_string(),
            key: "secret".to_string(),
            base_url: Some(server.uri()),
            ..Channel::default()
        },
    )
    .await;

    let ctx = RequestContext::new(Method::POST, "/mj/submit/imagine").body("{}");
    let err = gateway.dispatch(id, &ctx).await.unwrap_err();
    match err {
        HeimdallError::Provider(e) => {
            assert_eq!(e.reason, "empty_response_body");
            assert_eq!(e.status, 503);
        }
        other => panic!("expected provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn disabled_channel_is_not_dispatched() {
    let gateway = gateway_with(Arc::new(MemoryStore::new())).await;
    let id = add_channel(
        &gateway,
        Channel {
            name: "off".to_string(),
            key: "sk".to_string(),
            status: channel_status::MANUALLY_DISABLED,
            ..Channel::default()
        },
    )
    .await;

    let err = gateway
        .dispatch(id, &RequestContext::new(Method::GET, "/v1/models"))
        .await
        .unwrap_err();
    assert!(matches!(err, HeimdallError::InvalidInput(_)));
}

#[tokio::test]
async fn unknown_channel_type_has_no_provider() {
    let gateway = gateway_with(Arc::new(MemoryStore::new())).await;
    let id = add_channel(
        &gateway,
        Channel {
            channel_type: 99,
            name: "exotic".to_string(),
            key: "sk".to_string(),
            ..Channel::default()
        },
    )
    .await;

    let err = gateway
        .dispatch(id, &RequestContext::new(Method::GET, "/"))
        .await
        .unwrap_err();
    assert!(matches!(err, HeimdallError::NoProvider { channel_type: 99 }));
}

#[tokio::test]
async fn missing_channel_is_not_found() {
    let gateway = gateway_with(Arc::new(MemoryStore::new())).await;
    let err = gateway
        .dispatch(404, &RequestContext::new(Method::GET, "/"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn injected_stores_enable_fast_path_and_legacy_index() {
    let store = Arc::new(MemoryStore::new());
    for id in 1..=3 {
        store.insert_token(Token {
            id,
            user_id: 1,
            key: format!("sk-old-{id}"),
            name: String::new(),
            status: 1,
            remain_quota: 0,
            unlimited_quota: true,
            expired_time: -1,
        });
    }
    let mut config = Config::default();
    config.migration.old_token_max_id = 2;

    let gateway = Heimdall::builder()
        .config(config)
        .users(store.clone())
        .channels(store)
        .remote_cache(Arc::new(MemoryCache::new()))
        .atomic_store(Arc::new(MemoryAtomicStore::new()))
        .build()
        .await
        .unwrap();

    assert!(gateway.cache().is_distributed());
    assert!(gateway.quota().fast_path_enabled());

    let index = gateway.legacy_tokens().unwrap().clone();
    let mut seeded = false;
    for _ in 0..100 {
        if index.contains("sk-old-1").await.unwrap() {
            seeded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seeded, "background seeding never completed");
    assert!(index.contains("sk-old-2").await.unwrap());
    assert!(!index.contains("sk-old-3").await.unwrap());
}

#[tokio::test]
async fn shutdown_clears_local_tier() {
    let gateway = gateway_with(Arc::new(MemoryStore::new())).await;
    gateway
        .cache()
        .set("k", &1u8, Duration::from_secs(60))
        .await
        .unwrap();

    gateway.shutdown();
    assert_eq!(gateway.cache().get::<u8>("k").await.unwrap(), None);
}
