use std::sync::Arc;

use batchrpc::config::StorageBackend;
use batchrpc::oauth::AuthToken;
use batchrpc::{Client, Config};
use serde_json::{Value, json};
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

pub const RPC_PATH: &str = "/rpc";
pub const TOKEN_PATH: &str = "/token";

type Handler = dyn Fn(&str, &Value) -> Result<Value, (i64, String)> + Send + Sync;

/// Answers JSON-RPC requests (single or batch) by calling `handler` per entry,
/// echoing each request id. Batch replies are returned in reverse order.
pub struct JsonRpcResponder {
    handler: Arc<Handler>,
}

impl JsonRpcResponder {
    pub fn new(
        handler: impl Fn(&str, &Value) -> Result<Value, (i64, String)> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    fn reply(&self, entry: &Value) -> Value {
        let id = entry["id"].clone();
        let method = entry["method"].as_str().unwrap_or_default();
        match (self.handler)(method, &entry["params"]) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
            }
        }
    }
}

impl Respond for JsonRpcResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let reply = match &body {
            Value::Array(entries) => Value::Array(entries.iter().rev().map(|e| self.reply(e)).collect()),
            single => self.reply(single),
        };
        ResponseTemplate::new(200).set_body_json(reply)
    }
}

/// Serves `contact.list` from a dataset of `size` items with offset/limit paging.
pub fn dataset_page(size: u64, params: &Value) -> Value {
    let offset = params["offset"].as_u64().unwrap_or(0);
    let limit = params["limit"].as_u64().unwrap_or(50);
    let end = (offset + limit).min(size);
    let items: Vec<Value> = (offset.min(size)..end).map(|i| json!({"id": i})).collect();
    json!({"items": items, "total": size, "offset": offset})
}

pub fn config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.endpoint.url = format!("{}{}", server.uri(), RPC_PATH);
    config.endpoint.request_timeout_secs = 5;
    config.credentials.token_url = Some(format!("{}{}", server.uri(), TOKEN_PATH));
    config.credentials.storage_backend = StorageBackend::Memory;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 20;
    config.retry.rate_limit_backoff_ms = 1;
    config
}

pub fn client(config: Config) -> Client {
    Client::builder(config)
        .with_token(AuthToken::new("old", "refresh-1", Some(3600)))
        .build()
        .unwrap()
}

/// Bodies of every request the server saw on the RPC path, in arrival order.
pub async fn rpc_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == RPC_PATH)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

/// Ids of each batch request, as strings.
pub fn batch_ids(body: &Value) -> Vec<String> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|e| match &e["id"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}
