//! Pending remote calls and the queue that orders them.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Prefix the JSON-RPC 2.0 protocol reserves for its own methods.
const RESERVED_METHOD_PREFIX: &str = "rpc.";

// ---------------------------------------------------------------------------
// CommandKey
// ---------------------------------------------------------------------------

/// Caller-supplied correlation token, sent as the JSON-RPC `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for CommandKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for CommandKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for CommandKey {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for CommandKey {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// One remote method name plus its parameters. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    key: CommandKey,
    method: String,
    params: Map<String, Value>,
}

impl Command {
    /// Validate and build a command.
    ///
    /// `params` must be a JSON object, or `null` for a call without parameters.
    pub fn new(key: impl Into<CommandKey>, method: impl Into<String>, params: Value) -> Result<Self> {
        let key = key.into();
        let method = method.into();
        validate_method(&method)?;
        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::Argument(format!(
                    "parameters for '{method}' must be a JSON object, got {}",
                    json_kind(&other)
                )));
            }
        };
        Ok(Self { key, method, params })
    }

    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }
}

fn validate_method(method: &str) -> Result<()> {
    if method.is_empty() {
        return Err(Error::Argument("method name must not be empty".into()));
    }
    if method.chars().any(char::is_whitespace) {
        return Err(Error::Argument(format!(
            "method name '{method}' must not contain whitespace"
        )));
    }
    if method.starts_with(RESERVED_METHOD_PREFIX) {
        return Err(Error::Argument(format!(
            "method name '{method}' uses the reserved '{RESERVED_METHOD_PREFIX}' prefix"
        )));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// Ordered set of pending commands for one batch operation.
///
/// The queue may hold more commands than fit in one wire request; splitting
/// happens when the batch is dispatched.
#[derive(Debug, Default, Clone)]
pub struct CommandQueue {
    commands: Vec<Command>,
    keys: HashSet<CommandKey>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
            keys: HashSet::with_capacity(capacity),
        }
    }

    /// Queue a call. Fails when `key` is already queued or the call is malformed.
    pub fn enqueue(
        &mut self,
        key: impl Into<CommandKey>,
        method: impl Into<String>,
        params: Value,
    ) -> Result<()> {
        let command = Command::new(key, method, params)?;
        self.push(command)
    }

    /// Queue an already-built command.
    pub fn push(&mut self, command: Command) -> Result<()> {
        if self.keys.contains(command.key()) {
            return Err(Error::Argument(format!(
                "duplicate command key '{}'",
                command.key()
            )));
        }
        self.keys.insert(command.key().clone());
        self.commands.push(command);
        Ok(())
    }

    /// Remove every queued command.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.keys.clear();
    }

    /// Take the queued commands in insertion order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<Command> {
        self.keys.clear();
        std::mem::take(&mut self.commands)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn contains_key(&self, key: &CommandKey) -> bool {
        self.keys.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }
}
