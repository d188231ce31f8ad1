//! Error taxonomy for the Haystack client.
//!
//! Every fallible operation in the crate returns [`ClientError`]. The enum
//! separates transport faults (which [`crate::retry::RetryPolicy`] may retry)
//! from domain faults reported inside successful HTTP responses (which are
//! never retried), and [`ClientError::is_retryable`] is the only place that
//! makes that call.

use std::fmt;

use thiserror::Error;

/// Number of response body characters kept in a [`ClientError::Server`].
pub const MAX_ERROR_BODY: usize = 500;

/// Phase of the SCRAM handshake in which authentication failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthPhase {
    /// Initial `HELLO` exchange that mints the first handshake token.
    Hello,
    /// Client-first message and the server-first challenge.
    ClientFirst,
    /// Client-final message, token issue, and server signature check.
    ClientFinal,
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hello => "HELLO",
            Self::ClientFirst => "CLIENT-FIRST",
            Self::ClientFinal => "CLIENT-FINAL",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the Haystack client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The SCRAM handshake violated a precondition. Never retried.
    #[error("authentication failed during {phase}: {message}")]
    Authentication {
        /// Handshake phase that failed.
        phase: AuthPhase,
        /// Description of the violated precondition.
        message: String,
    },
    /// The request could not reach the server or timed out.
    #[error("connection failed: {message}")]
    Connection {
        /// Transport-level description.
        message: String,
        /// Whether the failure was a request timeout.
        timed_out: bool,
    },
    /// The server answered with a non-200 status.
    #[error("request failed with status {status}: {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated to [`MAX_ERROR_BODY`] characters.
        body: String,
    },
    /// A commit grid was rejected by the server inside a 200 response.
    #[error("commit failed: {0}")]
    Commit(String),
    /// A history write was rejected by the server inside a 200 response.
    #[error("history write failed: {0}")]
    HistoryWrite(String),
    /// A read-before-write found no matching entity.
    #[error("entity {0} not found")]
    EntityNotFound(String),
    /// Input was rejected before any network call.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A response could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl ClientError {
    /// Build a [`ClientError::Authentication`] for `phase`.
    pub fn auth(phase: AuthPhase, message: impl Into<String>) -> Self {
        Self::Authentication {
            phase,
            message: message.into(),
        }
    }

    /// Build a [`ClientError::Server`], truncating the body.
    #[must_use]
    pub fn server(status: u16, body: &str) -> Self {
        Self::Server {
            status,
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        }
    }

    /// Build a [`ClientError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self { Self::Validation(message.into()) }

    /// Whether a retry of the same request could succeed.
    ///
    /// Only network faults, timeouts, and 5xx responses qualify.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Server { status, .. } => *status >= 500 && *status < 600,
            _ => false,
        }
    }

    /// Whether the server rejected the bearer token.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Server { status: 401, .. })
    }
}
