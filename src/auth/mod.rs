//! Authentication: SCRAM-SHA-256 handshake and the bearer token lifecycle.
//!
//! [`ScramAuthenticator`] runs the handshake over its own transport and
//! [`TokenManager`] caches the resulting [`AuthToken`], refreshing it at most
//! once at a time.

pub mod authenticator;
pub mod scram;
pub mod token;

pub use authenticator::{ABOUT_ENDPOINT, Authenticate, Credentials, ScramAuthenticator};
pub use token::{AuthToken, DEFAULT_TOKEN_CACHE, TokenManager, TokenProvider};
