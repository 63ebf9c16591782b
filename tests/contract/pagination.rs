use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use batchrpc::{Command, CommandKey, Error, ListItem, Outcome, PageCursor};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{self, JsonRpcResponder, RPC_PATH};

async fn mount_dataset(server: &MockServer, size: u64) {
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(move |method, params| match method {
            "contact.list" => Ok(common::dataset_page(size, params)),
            _ => Err((-32601, "Method not found".into())),
        }))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_paginate_130_items_in_three_pages() {
    let server = MockServer::start().await;
    mount_dataset(&server, 130).await;
    let client = common::client(common::config(&server));

    let mut seq = client
        .paginate("contact.list", json!({"filter": {"active": true}}))
        .unwrap();
    let mut ids = Vec::new();
    while let Some(item) = seq.next().await {
        let value = item.unwrap().into_result().unwrap();
        ids.push(value["id"].as_u64().unwrap());
    }
    assert_eq!(ids, (0..130).collect::<Vec<u64>>());
    assert_eq!(seq.requests_issued(), 3);
    assert_eq!(
        seq.cursor(),
        Some(PageCursor {
            offset: 130,
            total: Some(130)
        })
    );

    let bodies = common::rpc_bodies(&server).await;
    let windows: Vec<(u64, u64)> = bodies
        .iter()
        .map(|b| {
            assert_eq!(b["params"]["filter"], json!({"active": true}));
            (
                b["params"]["offset"].as_u64().unwrap(),
                b["params"]["limit"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(windows, vec![(0, 50), (50, 50), (100, 50)]);
}

#[tokio::test]
async fn test_paginate_is_lazy() {
    let server = MockServer::start().await;
    mount_dataset(&server, 130).await;
    let client = common::client(common::config(&server));

    let mut seq = client.paginate("contact.list", Value::Null).unwrap();
    for _ in 0..50 {
        seq.next().await.unwrap().unwrap();
    }
    assert_eq!(common::rpc_bodies(&server).await.len(), 1);
    drop(seq);
    assert_eq!(common::rpc_bodies(&server).await.len(), 1);
}

#[tokio::test]
async fn test_paginate_stops_when_total_shrinks() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(move |_, params| {
            // Records are deleted after the first page is served.
            let size = if seen.fetch_add(1, Ordering::SeqCst) == 0 { 130 } else { 60 };
            Ok(common::dataset_page(size, params))
        }))
        .mount(&server)
        .await;
    let client = common::client(common::config(&server));

    let (items, error) = client
        .paginate("contact.list", json!({}))
        .unwrap()
        .collect_all()
        .await;
    assert!(error.is_none());
    assert_eq!(items.len(), 60);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_paginate_unknown_total_stops_on_short_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(|_, params| {
            let mut page = common::dataset_page(75, params);
            page["total"] = Value::Null;
            Ok(page)
        }))
        .mount(&server)
        .await;
    let client = common::client(common::config(&server));

    let seq = client.paginate("contact.list", json!({})).unwrap();
    let (items, error) = seq.collect_all().await;
    assert!(error.is_none());
    assert_eq!(items.len(), 75);
    assert_eq!(common::rpc_bodies(&server).await.len(), 2);
}

#[tokio::test]
async fn test_page_failure_aborts_after_yielded_items() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(move |_, params| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(common::dataset_page(130, params))
            } else {
                Err((-32000, "backend unavailable".into()))
            }
        }))
        .mount(&server)
        .await;
    let client = common::client(common::config(&server));

    let (items, error) = client
        .paginate("contact.list", json!({}))
        .unwrap()
        .collect_all()
        .await;
    assert_eq!(items.len(), 50);
    assert!(matches!(error, Some(Error::Remote { code: -32000, .. })));
}

#[tokio::test]
async fn test_malformed_page_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(|_, _| Ok(json!([1, 2, 3]))))
        .mount(&server)
        .await;
    let client = common::client(common::config(&server));

    let mut seq = client.paginate("contact.list", json!({})).unwrap();
    assert!(matches!(seq.next().await, Some(Err(Error::Protocol(_)))));
    assert!(seq.next().await.is_none());
}

#[tokio::test]
async fn test_total() {
    let server = MockServer::start().await;
    mount_dataset(&server, 130).await;
    let client = common::client(common::config(&server));

    assert_eq!(client.total("contact.list", json!({})).await.unwrap(), Some(130));
    assert_eq!(common::rpc_bodies(&server).await.len(), 1);
}

#[tokio::test]
async fn test_paginate_many_folds_pages_into_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(|method, params| match method {
            "deal.list" if params["stage"] == "open" => Ok(common::dataset_page(70, params)),
            "deal.list" if params["stage"] == "closed" => Ok(common::dataset_page(20, params)),
            _ => Err((404, "unknown stage".into())),
        }))
        .mount(&server)
        .await;
    let client = common::client(common::config(&server));

    let lists = vec![
        Command::new("open", "deal.list", json!({"stage": "open"})).unwrap(),
        Command::new("lost", "deal.list", json!({"stage": "lost"})).unwrap(),
        Command::new("closed", "deal.list", json!({"stage": "closed"})).unwrap(),
    ];
    let (outcomes, error) = client.paginate_many(lists).unwrap().collect_all().await;
    assert!(error.is_none());

    let mut per_list = std::collections::HashMap::<String, usize>::new();
    let mut failed = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Value(ListItem { list, .. }) => *per_list.entry(list.to_string()).or_default() += 1,
            Outcome::Failed(e) => failed.push(e.key.clone()),
        }
    }
    assert_eq!(per_list["open"], 70);
    assert_eq!(per_list["closed"], 20);
    assert_eq!(failed, vec![CommandKey::from("lost")]);

    // Round one carries all three lists in one batch, round two only "open".
    let bodies = common::rpc_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(common::batch_ids(&bodies[0]), vec!["open", "lost", "closed"]);
    assert_eq!(common::batch_ids(&bodies[1]), vec!["open"]);
    assert_eq!(bodies[1][0]["params"]["offset"], 50);
}

#[tokio::test]
async fn test_paginate_many_rejects_duplicate_lists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    let client = common::client(common::config(&server));

    let lists = vec![
        Command::new("x", "deal.list", json!({})).unwrap(),
        Command::new("x", "deal.list", json!({})).unwrap(),
    ];
    assert!(matches!(client.paginate_many(lists), Err(Error::Argument(_))));
}

#[tokio::test]
async fn test_paginate_many_delivers_good_pages_before_malformed_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .respond_with(JsonRpcResponder::new(|_, params| match params["stage"].as_str() {
            Some("open") => Ok(common::dataset_page(20, params)),
            _ => Ok(json!("not a page")),
        }))
        .mount(&server)
        .await;
    let client = common::client(common::config(&server));

    let lists = vec![
        Command::new("open", "deal.list", json!({"stage": "open"})).unwrap(),
        Command::new("broken", "deal.list", json!({"stage": "broken"})).unwrap(),
    ];
    let mut seq = client.paginate_many(lists).unwrap();
    let mut open = 0;
    let error = loop {
        match seq.next().await {
            Some(Ok(Outcome::Value(ListItem { list, .. }))) => {
                assert_eq!(list, CommandKey::from("open"));
                open += 1;
            }
            Some(Ok(Outcome::Failed(e))) => panic!("unexpected per-list failure: {e:?}"),
            Some(Err(e)) => break e,
            None => panic!("sequence ended without the malformed page error"),
        }
    };
    assert_eq!(open, 20);
    assert!(matches!(error, Error::Protocol(_)));
    assert!(seq.next().await.is_none());
    assert_eq!(common::rpc_bodies(&server).await.len(), 1);
}
