//! JSON-RPC 2.0 framing for single calls and batch chunks.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::batch::ChunkResult;
use crate::command::{Command, CommandKey};
use crate::error::{Error, PerCommandError, Result};

pub const JSONRPC_VERSION: &str = "2.0";

/// Error object carried by a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One decoded response entry: either a result or an error, never both.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Result(Value),
    Error(RpcError),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode one request object.
pub fn encode_call(id: &CommandKey, method: &str, params: &Map<String, Value>) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Encode a chunk as a batch array, in command order.
pub fn encode_batch(chunk: &[Command]) -> Value {
    Value::Array(
        chunk
            .iter()
            .map(|c| encode_call(c.key(), c.method(), c.params()))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a batch response against the chunk that produced it.
///
/// The result follows the chunk's order, not the order of the response body.
/// Keys the response omits become per-command protocol errors; ids that were
/// never submitted, or appear twice, mean the response cannot be trusted at all.
pub fn decode_batch(body: Value, chunk: &[Command]) -> Result<ChunkResult> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(obj) if obj.contains_key("error") => {
            let (_, reply) = decode_entry(Value::Object(obj))?;
            return match reply {
                Reply::Error(e) => Err(Error::Protocol(format!(
                    "batch rejected as a whole ({}): {}",
                    e.code, e.message
                ))),
                Reply::Result(_) => Err(Error::Protocol(
                    "batch answered with a single result object".into(),
                )),
            };
        }
        other => {
            return Err(Error::Protocol(format!(
                "batch response must be an array, got {}",
                type_name(&other)
            )));
        }
    };

    let submitted: HashSet<&CommandKey> = chunk.iter().map(Command::key).collect();
    let mut replies: HashMap<CommandKey, Reply> = HashMap::with_capacity(entries.len());

    for entry in entries {
        let (id, reply) = decode_entry(entry)?;
        let id = id.ok_or_else(|| {
            Error::Protocol("batch response entry without an id".into())
        })?;
        if !submitted.contains(&id) {
            return Err(Error::Protocol(format!(
                "batch response contains unknown id '{id}'"
            )));
        }
        if replies.insert(id.clone(), reply).is_some() {
            return Err(Error::Protocol(format!(
                "batch response contains id '{id}' more than once"
            )));
        }
    }

    let results = chunk
        .iter()
        .map(|command| {
            let key = command.key().clone();
            let outcome = match replies.remove(&key) {
                Some(Reply::Result(value)) => Ok(value),
                Some(Reply::Error(e)) => Err(PerCommandError::application(
                    key.clone(),
                    e.code,
                    e.message,
                    e.data,
                )),
                None => Err(PerCommandError::missing(key.clone())),
            };
            (key, outcome)
        })
        .collect();

    Ok(ChunkResult::new(results))
}

/// Decode the response to a single, non-batched call.
pub fn decode_single(body: Value, id: &CommandKey) -> Result<Value> {
    if body.is_array() {
        return Err(Error::Protocol(
            "single call answered with a batch array".into(),
        ));
    }
    let (reply_id, reply) = decode_entry(body)?;
    // Servers answer parse-level failures with a null id.
    if let Some(reply_id) = reply_id {
        if &reply_id != id {
            return Err(Error::Protocol(format!(
                "response id '{reply_id}' does not match request id '{id}'"
            )));
        }
    }
    match reply {
        Reply::Result(value) => Ok(value),
        Reply::Error(e) => Err(Error::Remote {
            code: e.code,
            message: e.message,
            data: e.data,
        }),
    }
}

/// Error codes of a response that failed as a whole.
///
/// `Some` only when the body is a single error object or every entry of a
/// batch carries an error code. A batch with any successful entry yields
/// `None`, since its siblings already ran on the server.
pub fn chunk_error_codes(body: &Value) -> Option<Vec<i64>> {
    fn code_of(entry: &Value) -> Option<i64> {
        entry.get("error")?.get("code")?.as_i64()
    }
    match body {
        Value::Array(entries) if entries.is_empty() => None,
        Value::Array(entries) => entries.iter().map(code_of).collect(),
        other => code_of(other).map(|code| vec![code]),
    }
}

fn decode_entry(entry: Value) -> Result<(Option<CommandKey>, Reply)> {
    let mut obj = match entry {
        Value::Object(obj) => obj,
        other => {
            return Err(Error::Protocol(format!(
                "response entry must be an object, got {}",
                type_name(&other)
            )));
        }
    };

    let id = match obj.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(serde_json::from_value::<CommandKey>(raw).map_err(|e| {
            Error::Protocol(format!("response id is neither a string nor an integer: {e}"))
        })?),
    };

    let reply = match (obj.remove("result"), obj.remove("error")) {
        (Some(_), Some(error)) if !error.is_null() => {
            return Err(Error::Protocol(
                "response entry carries both result and error".into(),
            ));
        }
        (Some(result), _) => Reply::Result(result),
        (None, Some(raw)) => Reply::Error(serde_json::from_value(raw).map_err(|e| {
            Error::Protocol(format!("malformed error object: {e}"))
        })?),
        (None, None) => {
            return Err(Error::Protocol(
                "response entry carries neither result nor error".into(),
            ));
        }
    };

    Ok((id, reply))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
