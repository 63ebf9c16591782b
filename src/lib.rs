//! Batched JSON-RPC over HTTP.
//!
//! Queue many independent remote calls, send them as order-preserving batch
//! chunks, and consume the results lazily; multi-page listings and credential
//! renewal are handled underneath.
//!
//! ```no_run
//! # async fn run() -> batchrpc::Result<()> {
//! use batchrpc::{Client, Config, Outcome};
//! use serde_json::json;
//!
//! let config = Config::load(std::path::Path::new("batchrpc.toml"))
//!     .map_err(|e| batchrpc::Error::Config(e.to_string()))?;
//! let client = Client::builder(config).build()?;
//!
//! let mut queue = client.queue();
//! queue.enqueue("a", "contact.get", json!({"id": 1}))?;
//! queue.enqueue("b", "contact.get", json!({"id": 2}))?;
//!
//! let mut results = client.batch(&mut queue);
//! while let Some(item) = results.next().await {
//!     match item? {
//!         Outcome::Value(v) => println!("{} => {}", v.key, v.value),
//!         Outcome::Failed(e) => eprintln!("{e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod net;
pub mod oauth;
pub mod pagination;
pub mod sequence;
pub mod telemetry;
pub mod wire;

pub use batch::{BatchDispatcher, ChunkResult, KeyedValue};
pub use client::{Client, ClientBuilder};
pub use command::{Command, CommandKey, CommandQueue};
pub use config::Config;
pub use error::{CommandErrorKind, Error, PerCommandError, Result};
pub use net::{Transport, TransportClient};
pub use oauth::{AuthToken, CredentialCoordinator};
pub use pagination::{ListItem, PageCursor, PaginationDriver};
pub use sequence::{Outcome, ResultSequence};
