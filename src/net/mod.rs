//! Wire plumbing: HTTP client, single-attempt transport, retry policy and the
//! authenticated [`TransportClient`] on top of them.

pub mod client;
pub mod http;
pub mod retry;
pub mod traits;
pub mod transport;

pub use client::{HttpClient, HttpClientBuilder};
pub use http::HttpTransport;
pub use retry::RetryPolicy;
pub use traits::{Transport, TransportFailure};
pub use transport::{ErrorCodes, TransportClient};
