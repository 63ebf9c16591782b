//! Chunking of queued commands into JSON-RPC batch requests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::command::{Command, CommandKey, CommandQueue};
use crate::error::{Error, PerCommandError, Result};
use crate::net::TransportClient;
use crate::sequence::{Outcome, ResultSequence, SequenceSource};
use crate::wire;

/// Default number of commands per wire request.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 50;

/// Largest batch the service accepts in one request.
pub const MAX_CHUNK_CEILING: usize = 1000;

// =============================================================================
// Results
// =============================================================================

/// Per-command results of one chunk, in the chunk's order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkResult {
    entries: Vec<(CommandKey, std::result::Result<Value, PerCommandError>)>,
}

impl ChunkResult {
    pub fn new(entries: Vec<(CommandKey, std::result::Result<Value, PerCommandError>)>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(CommandKey, std::result::Result<Value, PerCommandError>)> {
        self.entries.iter()
    }

    pub fn get(&self, key: &CommandKey) -> Option<&std::result::Result<Value, PerCommandError>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CommandKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert into sequence elements.
    pub fn into_outcomes(self) -> Vec<Outcome<KeyedValue>> {
        self.entries
            .into_iter()
            .map(|(key, result)| match result {
                Ok(value) => Outcome::Value(KeyedValue { key, value }),
                Err(e) => Outcome::Failed(e),
            })
            .collect()
    }
}

impl IntoIterator for ChunkResult {
    type Item = (CommandKey, std::result::Result<Value, PerCommandError>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A successful command result with the key it was submitted under.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedValue {
    pub key: CommandKey,
    pub value: Value,
}

impl KeyedValue {
    /// Deserialize the raw value into a caller type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

// =============================================================================
// BatchDispatcher
// =============================================================================

/// Splits commands into order-preserving chunks and sends each chunk as one
/// JSON-RPC batch.
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    transport: Arc<TransportClient>,
    max_chunk_size: usize,
}

impl BatchDispatcher {
    pub fn new(transport: Arc<TransportClient>, max_chunk_size: usize) -> Result<Self> {
        if max_chunk_size == 0 || max_chunk_size > MAX_CHUNK_CEILING {
            return Err(Error::Config(format!(
                "max_chunk_size must be between 1 and {MAX_CHUNK_CEILING}, got {max_chunk_size}"
            )));
        }
        Ok(Self {
            transport,
            max_chunk_size,
        })
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn transport(&self) -> &Arc<TransportClient> {
        &self.transport
    }

    /// Contiguous chunks of at most `max_chunk_size`, in order.
    pub fn plan(&self, commands: Vec<Command>) -> Vec<Vec<Command>> {
        plan_chunks(commands, self.max_chunk_size)
    }

    /// Drain `queue` and deliver its results lazily, chunk by chunk.
    pub fn dispatch(&self, queue: &mut CommandQueue) -> ResultSequence<KeyedValue> {
        self.dispatch_commands(queue.drain())
    }

    pub fn dispatch_commands(&self, commands: Vec<Command>) -> ResultSequence<KeyedValue> {
        if commands.is_empty() {
            return ResultSequence::empty();
        }
        let chunks: VecDeque<Vec<Command>> = self.plan(commands).into();
        debug!(chunks = chunks.len(), max_chunk_size = self.max_chunk_size, "Planned dispatch");
        ResultSequence::new(ChunkSource {
            dispatcher: self.clone(),
            chunks,
            index: 0,
        })
    }

    /// Send one chunk as a single wire request.
    pub async fn dispatch_chunk(&self, chunk: &[Command]) -> Result<ChunkResult> {
        if chunk.is_empty() {
            return Ok(ChunkResult::default());
        }
        if chunk.len() > self.max_chunk_size {
            return Err(Error::Argument(format!(
                "chunk of {} commands exceeds max_chunk_size {}",
                chunk.len(),
                self.max_chunk_size
            )));
        }
        let body = self.transport.execute(&wire::encode_batch(chunk)).await?;
        wire::decode_batch(body, chunk)
    }
}

fn plan_chunks(commands: Vec<Command>, size: usize) -> Vec<Vec<Command>> {
    let mut chunks = Vec::with_capacity(commands.len().div_ceil(size));
    let mut iter = commands.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

struct ChunkSource {
    dispatcher: BatchDispatcher,
    chunks: VecDeque<Vec<Command>>,
    index: usize,
}

#[async_trait]
impl SequenceSource for ChunkSource {
    type Item = KeyedValue;

    async fn next_step(&mut self) -> Option<Result<Vec<Outcome<KeyedValue>>>> {
        let chunk = self.chunks.pop_front()?;
        self.index += 1;
        debug!(chunk = self.index, size = chunk.len(), "Dispatching chunk");
        match self.dispatcher.dispatch_chunk(&chunk).await {
            Ok(result) => Some(Ok(result.into_outcomes())),
            Err(e) => {
                // Later chunks are never attempted.
                self.chunks.clear();
                Some(Err(e))
            }
        }
    }
}
