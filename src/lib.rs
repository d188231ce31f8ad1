//! Async client for Haystack servers speaking Zinc over HTTP.
//!
//! The crate authenticates with a SCRAM-SHA-256 handshake carried in HTTP
//! headers, keeps the resulting bearer token fresh, submits Zinc grids with
//! bounded retries, and writes large history sample sets in concurrent
//! chunks. [`client::Client`] wires the pieces together; the lower layers are
//! public for callers that need finer control.

pub mod auth;
pub mod client;
pub mod config;
pub mod entities;
pub mod error;
pub mod history;
pub mod retry;
pub mod session;
pub mod transport;
pub mod zinc;

#[cfg(any(test, feature = "test-support"))]
pub mod test_helpers;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{AuthPhase, ClientError};
