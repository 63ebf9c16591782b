use std::sync::Arc;
use std::time::Duration;

use batchrpc::oauth::{AuthToken, FileTokenStorage, TokenStorage};
use batchrpc::{Client, Error};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{self, JsonRpcResponder, RPC_PATH, TOKEN_PATH};

async fn mount_token_endpoint(server: &MockServer, delay: Duration, expected: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "new",
                    "refresh_token": "refresh-2",
                    "expires_in": 3600,
                    "token_type": "Bearer"
                }))
                .set_delay(delay),
        )
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_expired_for_old_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_expired_token_renewed_and_request_retried_once() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, Duration::ZERO, 1).await;
    mount_expired_for_old_token(&server).await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .and(header("authorization", "Bearer new"))
        .respond_with(JsonRpcResponder::new(|_, params| Ok(params.clone())))
        .expect(1)
        .mount(&server)
        .await;

    let client = common::client(common::config(&server));
    let mut queue = client.queue();
    queue.enqueue("a", "item.get", json!({"id": 1})).unwrap();

    let (outcomes, error) = client.batch(&mut queue).collect_all().await;
    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(common::rpc_bodies(&server).await.len(), 2);
    assert_eq!(client.coordinator().renewal_count(), 1);

    let snapshot = client.coordinator().snapshot().await.unwrap();
    assert_eq!(snapshot.token.access_token, "new");
    assert_eq!(snapshot.token.refresh_token, "refresh-2");
}

#[tokio::test]
async fn test_second_expiry_after_renewal_is_fatal() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, Duration::ZERO, 1).await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = common::client(common::config(&server));
    let mut queue = client.queue();
    queue.enqueue("a", "item.get", json!({})).unwrap();
    queue.enqueue("b", "item.get", json!({})).unwrap();

    let mut results = client.batch(&mut queue);
    assert!(matches!(results.next().await, Some(Err(Error::Auth(_)))));
    assert!(results.next().await.is_none());
    assert_eq!(common::rpc_bodies(&server).await.len(), 2);
}

#[tokio::test]
async fn test_auth_expired_error_code_triggers_renewal() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, Duration::ZERO, 1).await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .and(header("authorization", "Bearer old"))
        .respond_with(JsonRpcResponder::new(|_, _| Err((-32001, "Session expired".into()))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .and(header("authorization", "Bearer new"))
        .respond_with(JsonRpcResponder::new(|_, _| Ok(json!(true))))
        .mount(&server)
        .await;

    let client = common::client(common::config(&server));
    assert_eq!(client.call("session.ping", json!({})).await.unwrap(), json!(true));
}

#[tokio::test]
async fn test_concurrent_sequences_share_one_renewal() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, Duration::from_millis(150), 1).await;
    mount_expired_for_old_token(&server).await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .and(header("authorization", "Bearer new"))
        .respond_with(JsonRpcResponder::new(|_, params| Ok(params.clone())))
        .mount(&server)
        .await;

    let client = common::client(common::config(&server));

    let run = |client: Client, prefix: &'static str| async move {
        let mut queue = client.queue();
        for i in 0..3 {
            queue
                .enqueue(format!("{prefix}{i}"), "item.get", json!({"i": i}))
                .unwrap();
        }
        client.batch(&mut queue).collect_all().await
    };

    let (left, right) = tokio::join!(run(client.clone(), "l"), run(client.clone(), "r"));
    assert!(left.1.is_none() && right.1.is_none());
    assert_eq!(left.0.len(), 3);
    assert_eq!(right.0.len(), 3);
    assert_eq!(client.coordinator().renewal_count(), 1);
}

#[tokio::test]
async fn test_rejected_refresh_token_poisons_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_expired_for_old_token(&server).await;

    let client = common::client(common::config(&server));
    let err = client.call("item.get", json!({})).await.unwrap_err();
    assert!(err.is_auth());
    assert!(client.coordinator().is_invalid().await);

    // No further exchange and no further wire traffic.
    let err = client.call("item.get", json!({})).await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(common::rpc_bodies(&server).await.len(), 1);

    client
        .coordinator()
        .reconfigure(AuthToken::new("fresh", "refresh-9", Some(3600)))
        .await;
    assert!(!client.coordinator().is_invalid().await);
}

#[tokio::test]
async fn test_renewed_token_persisted_to_file_storage() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, Duration::ZERO, 1).await;
    mount_expired_for_old_token(&server).await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .and(header("authorization", "Bearer new"))
        .respond_with(JsonRpcResponder::new(|_, _| Ok(json!("pong"))))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileTokenStorage::new(dir.path()));
    storage
        .save("crm", &AuthToken::new("old", "refresh-1", Some(3600)))
        .unwrap();

    let mut config = common::config(&server);
    config.credentials.profile = "crm".into();
    let client = Client::builder(config)
        .with_storage(storage.clone())
        .build()
        .unwrap();

    assert_eq!(client.call("ping", json!({})).await.unwrap(), json!("pong"));

    let stored = storage.load("crm").unwrap().unwrap();
    assert_eq!(stored.access_token, "new");
    assert_eq!(stored.refresh_token, "refresh-2");
}
