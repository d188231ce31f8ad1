//! The three-phase SCRAM handshake carried over HTTP headers.
//!
//! `HELLO` announces the user and receives a handshake token,
//! `CLIENT-FIRST` trades the client-first message for the server challenge,
//! and `CLIENT-FINAL` sends the proof and receives the bearer token together
//! with the server signature. Each phase checks its status code and headers
//! before the next one starts; the first violation ends the handshake.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use base64::{
    Engine as _,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use tracing::{debug, info};

use super::{
    scram::{ClientFinal, ClientFirst},
    token::AuthToken,
};
use crate::{
    error::{AuthPhase, ClientError},
    retry::RetryPolicy,
    transport::{
        AUTHENTICATION_INFO,
        AUTHORIZATION,
        HttpRequest,
        HttpResponse,
        HttpTransport,
        WWW_AUTHENTICATE,
        endpoint_url,
    },
};

/// Endpoint every handshake phase is sent to.
pub const ABOUT_ENDPOINT: &str = "about";

/// Hash algorithm announced in `SCRAM` authorization headers.
const HASH_NAME: &str = "SHA-256";

/// Produces a fresh bearer token.
#[async_trait]
pub trait Authenticate: Send + Sync {
    /// Run a complete handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Authentication`] for any handshake violation
    /// and [`ClientError::Connection`] once transport retries are exhausted.
    async fn authenticate(&self) -> Result<AuthToken, ClientError>;
}

/// Username and password for the handshake.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Bundle a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The username.
    #[must_use]
    pub fn username(&self) -> &str { &self.username }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Unpadded base64url, as the server expects in headers.
pub(crate) fn encode_b64url(data: &str) -> String { URL_SAFE_NO_PAD.encode(data) }

/// Append the `=` padding the server strips from base64url fields.
fn restore_padding(data: &str) -> String {
    let missing = data.len().next_multiple_of(4) - data.len();
    format!("{data}{}", "=".repeat(missing))
}

fn decode_b64url(phase: AuthPhase, data: &str) -> Result<String, ClientError> {
    let bytes = URL_SAFE
        .decode(restore_padding(data))
        .map_err(|e| ClientError::auth(phase, format!("data field is not base64url: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| ClientError::auth(phase, format!("data field is not UTF-8: {e}")))
}

/// Split a header made of `key=value` attributes.
fn parse_attributes<'a>(header: &'a str, separator: &str) -> Vec<(&'a str, &'a str)> {
    header
        .split(separator)
        .filter_map(|part| part.trim().split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

/// Parse a `WWW-Authenticate` challenge. Attributes are comma-separated and
/// the value may start with a case-insensitive `scram ` scheme.
fn parse_challenge(header: &str) -> Vec<(&str, &str)> {
    let trimmed = header.trim_start();
    let body = match trimmed.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("scram ") => trimmed.get(6..).unwrap_or_default(),
        _ => trimmed,
    };
    parse_attributes(body, ",")
}

/// Parse an `Authentication-Info` header. Attributes are separated by a
/// comma followed by a space.
fn parse_authentication_info(header: &str) -> Vec<(&str, &str)> { parse_attributes(header, ", ") }

fn attribute<'a>(attrs: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn require<'a>(
    phase: AuthPhase,
    attrs: &[(&'a str, &'a str)],
    key: &str,
    header: &str,
) -> Result<&'a str, ClientError> {
    attribute(attrs, key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ClientError::auth(phase, format!("{header} header has no {key}")))
}

fn require_header<'a>(
    phase: AuthPhase,
    response: &'a HttpResponse,
    name: &str,
) -> Result<&'a str, ClientError> {
    response
        .header(name)
        .ok_or_else(|| ClientError::auth(phase, format!("response has no {name} header")))
}

/// SCRAM-SHA-256 authenticator over a dedicated transport.
pub struct ScramAuthenticator {
    transport: Arc<dyn HttpTransport>,
    url: String,
    credentials: Credentials,
    retry: RetryPolicy,
    client_nonce: Option<String>,
}

impl fmt::Debug for ScramAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramAuthenticator")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl ScramAuthenticator {
    /// Authenticator targeting `<base_url>/<project>/about`.
    ///
    /// `transport` should not be shared with authenticated API traffic.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        project: &str,
        credentials: Credentials,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            url: endpoint_url(base_url, project, ABOUT_ENDPOINT),
            credentials,
            retry,
            client_nonce: None,
        }
    }

    /// Pin the client nonce so a scripted server can answer deterministically.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn with_client_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.client_nonce = Some(nonce.into());
        self
    }

    async fn send(&self, authorization: &str) -> Result<HttpResponse, ClientError> {
        self.retry
            .execute(|| {
                let request = HttpRequest::get(self.url.clone()).header(AUTHORIZATION, authorization);
                self.transport.execute(request)
            })
            .await
    }

    async fn hello(&self) -> Result<String, ClientError> {
        let phase = AuthPhase::Hello;
        let response = self
            .send(&format!(
                "HELLO username={}",
                encode_b64url(self.credentials.username())
            ))
            .await?;
        if response.status != 200 && response.status != 401 {
            return Err(ClientError::auth(
                phase,
                format!("unexpected status {}", response.status),
            ));
        }
        let header = require_header(phase, &response, WWW_AUTHENTICATE)?;
        let attrs = parse_challenge(header);
        Ok(require(phase, &attrs, "handshakeToken", WWW_AUTHENTICATE)?.to_owned())
    }

    async fn client_first(
        &self,
        handshake_token: &str,
        state: ClientFirst,
    ) -> Result<(String, ClientFinal), ClientError> {
        let phase = AuthPhase::ClientFirst;
        let response = self
            .send(&scram_authorization(handshake_token, &state.message()))
            .await?;
        if response.status != 401 {
            return Err(ClientError::auth(
                phase,
                format!("expected status 401, got {}", response.status),
            ));
        }
        let header = require_header(phase, &response, WWW_AUTHENTICATE)?;
        let attrs = parse_challenge(header);
        let next_token = require(phase, &attrs, "handshakeToken", WWW_AUTHENTICATE)?;
        let server_first = decode_b64url(phase, require(phase, &attrs, "data", WWW_AUTHENTICATE)?)?;
        let challenged = state.receive_server_first(&server_first)?;
        Ok((next_token.to_owned(), challenged))
    }

    async fn client_final(
        &self,
        handshake_token: &str,
        state: &ClientFinal,
    ) -> Result<AuthToken, ClientError> {
        let phase = AuthPhase::ClientFinal;
        let response = self
            .send(&scram_authorization(handshake_token, state.message()))
            .await?;
        if response.status != 200 {
            return Err(ClientError::auth(
                phase,
                format!("expected status 200, got {}", response.status),
            ));
        }
        let header = require_header(phase, &response, AUTHENTICATION_INFO)?;
        let attrs = parse_authentication_info(header);
        let token = require(phase, &attrs, "authToken", AUTHENTICATION_INFO)?;
        let server_final = decode_b64url(phase, require(phase, &attrs, "data", AUTHENTICATION_INFO)?)?;
        state.verify_server_final(&server_final)?;
        Ok(AuthToken::new(token))
    }
}

fn scram_authorization(handshake_token: &str, message: &str) -> String {
    format!(
        "SCRAM handshakeToken={handshake_token}, hash={HASH_NAME}, data={}",
        encode_b64url(message)
    )
}

#[async_trait]
impl Authenticate for ScramAuthenticator {
    async fn authenticate(&self) -> Result<AuthToken, ClientError> {
        let username = self.credentials.username();
        info!(url = %self.url, username, "starting SCRAM handshake");

        let hello_token = self.hello().await?;
        debug!("HELLO accepted");

        let first = match &self.client_nonce {
            Some(nonce) => ClientFirst::with_nonce(username, &self.credentials.password, nonce),
            None => ClientFirst::new(username, &self.credentials.password)?,
        };
        let (final_token, fin) = self.client_first(&hello_token, first).await?;
        debug!("server challenge received");

        let token = self.client_final(&final_token, &fin).await?;
        info!(username, token = %token.prefix(), "SCRAM handshake complete");
        Ok(token)
    }
}
