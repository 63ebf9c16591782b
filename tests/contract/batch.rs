use batchrpc::{CommandKey, Error, Outcome};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{self, JsonRpcResponder, RPC_PATH};

fn item_get(method: &str, params: &Value) -> Result<Value, (i64, String)> {
    match (method, params["id"].as_str()) {
        ("item.get", Some("b")) => Err((404, "no such item".into())),
        ("item.get", Some(id)) => Ok(json!({"id": id, "name": format!("item {id}")})),
        _ => Err((-32601, "Method not found".into())),
    }
}

#[tokio::test]
async fn test_chunks_in_order_with_isolated_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(item_get))
        .mount(&server)
        .await;

    let mut config = common::config(&server);
    config.batch.max_chunk_size = 2;
    let client = common::client(config);

    let mut queue = client.queue();
    for key in ["a", "b", "c"] {
        queue.enqueue(key, "item.get", json!({"id": key})).unwrap();
    }

    let (outcomes, error) = client.batch(&mut queue).collect_all().await;
    assert!(error.is_none(), "unexpected fatal error: {error:?}");

    let bodies = common::rpc_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(common::batch_ids(&bodies[0]), vec!["a", "b"]);
    assert_eq!(common::batch_ids(&bodies[1]), vec!["c"]);
    assert_eq!(bodies[0][0]["jsonrpc"], "2.0");
    assert_eq!(bodies[0][0]["method"], "item.get");

    assert_eq!(outcomes.len(), 3);
    let a = outcomes[0].value().unwrap();
    assert_eq!(a.key, CommandKey::from("a"));
    assert_eq!(a.value["name"], "item a");
    match &outcomes[1] {
        Outcome::Failed(e) => {
            assert_eq!(e.key, CommandKey::from("b"));
            assert_eq!(e.code(), Some(404));
        }
        other => panic!("expected b to fail, got {other:?}"),
    }
    assert_eq!(outcomes[2].value().unwrap().key, CommandKey::from("c"));
}

#[tokio::test]
async fn test_request_count_matches_chunking() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(|_, params| Ok(params.clone())))
        .mount(&server)
        .await;

    let mut config = common::config(&server);
    config.batch.max_chunk_size = 50;
    let client = common::client(config);

    let mut queue = client.queue();
    for i in 0..120i64 {
        queue.enqueue(i, "item.touch", json!({"n": i})).unwrap();
    }

    let (outcomes, error) = client.batch(&mut queue).collect_all().await;
    assert!(error.is_none());
    let keys: Vec<CommandKey> = outcomes
        .iter()
        .map(|o| o.value().unwrap().key.clone())
        .collect();
    assert_eq!(keys, (0..120i64).map(CommandKey::from).collect::<Vec<_>>());

    let sizes: Vec<usize> = common::rpc_bodies(&server)
        .await
        .iter()
        .map(|b| b.as_array().unwrap().len())
        .collect();
    assert_eq!(sizes, vec![50, 50, 20]);
}

#[tokio::test]
async fn test_missing_key_is_per_command_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"jsonrpc": "2.0", "id": "a", "result": 1}
        ])))
        .mount(&server)
        .await;

    let client = common::client(common::config(&server));
    let mut queue = client.queue();
    queue.enqueue("a", "item.get", json!({})).unwrap();
    queue.enqueue("b", "item.get", json!({})).unwrap();

    let (outcomes, error) = client.batch(&mut queue).collect_all().await;
    assert!(error.is_none());
    assert!(outcomes[0].is_value());
    match &outcomes[1] {
        Outcome::Failed(e) => assert!(e.is_protocol()),
        other => panic!("expected missing result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_retried_then_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = common::config(&server);
    config.batch.max_chunk_size = 1;
    let client = common::client(config);
    let mut queue = client.queue();
    queue.enqueue("a", "item.get", json!({})).unwrap();
    queue.enqueue("b", "item.get", json!({})).unwrap();

    let mut results = client.batch(&mut queue);
    match results.next().await {
        Some(Err(Error::Transport { attempts, .. })) => assert_eq!(attempts, 3),
        other => panic!("expected transport failure, got {other:?}"),
    }
    // The second chunk is never attempted.
    assert!(results.next().await.is_none());
}

#[tokio::test]
async fn test_rate_limit_waits_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(item_get))
        .mount(&server)
        .await;

    let client = common::client(common::config(&server));
    let mut queue = client.queue();
    queue.enqueue("a", "item.get", json!({"id": "a"})).unwrap();

    let (outcomes, error) = client.batch(&mut queue).collect_all().await;
    assert!(error.is_none());
    assert_eq!(outcomes.len(), 1);
    assert_eq!(common::rpc_bodies(&server).await.len(), 2);
}

#[tokio::test]
async fn test_rate_limit_code_on_one_entry_is_not_resent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(|_, params| match params["id"].as_str() {
            Some("b") => Err((-32029, "quota exceeded".into())),
            _ => Ok(json!({"added": true})),
        }))
        .mount(&server)
        .await;

    let client = common::client(common::config(&server));
    let mut queue = client.queue();
    queue.enqueue("a", "deal.add", json!({"id": "a"})).unwrap();
    queue.enqueue("b", "deal.add", json!({"id": "b"})).unwrap();

    let (outcomes, error) = client.batch(&mut queue).collect_all().await;
    assert!(error.is_none(), "unexpected fatal error: {error:?}");
    assert_eq!(common::rpc_bodies(&server).await.len(), 1);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].value().unwrap().key, CommandKey::from("a"));
    match &outcomes[1] {
        Outcome::Failed(e) => assert_eq!(e.code(), Some(-32029)),
        other => panic!("expected b to fail, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_id_in_response_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"jsonrpc": "2.0", "id": "a", "result": 1},
            {"jsonrpc": "2.0", "id": "intruder", "result": 2}
        ])))
        .mount(&server)
        .await;

    let client = common::client(common::config(&server));
    let mut queue = client.queue();
    queue.enqueue("a", "item.get", json!({})).unwrap();

    let (outcomes, error) = client.batch(&mut queue).collect_all().await;
    assert!(outcomes.is_empty());
    assert!(matches!(error, Some(Error::Protocol(_))));
}

#[tokio::test]
async fn test_single_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(|method, _| match method {
            "contact.fields" => Ok(json!(["id", "name", "email"])),
            _ => Err((-32601, "Method not found".into())),
        }))
        .mount(&server)
        .await;

    let client = common::client(common::config(&server));
    let fields = client.call("contact.fields", Value::Null).await.unwrap();
    assert_eq!(fields, json!(["id", "name", "email"]));

    let err = client.call("contact.unknown", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Remote { code: -32601, .. }));
}
