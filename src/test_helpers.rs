//! In-memory server fakes for unit and integration tests.
//!
//! [`ScriptedTransport`] answers each request with a closure and records
//! what it saw; [`scram_server`] plays the server side of the RFC 7677
//! example exchange.

use std::{
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::{
    auth::{AuthToken, Credentials, ScramAuthenticator, TokenProvider, authenticator::encode_b64url},
    error::ClientError,
    retry::RetryPolicy,
    session::SessionManager,
    transport::{AUTHENTICATION_INFO, AUTHORIZATION, HttpRequest, HttpResponse, HttpTransport, WWW_AUTHENTICATE},
};

/// Base URL used by the scripted sessions.
pub const BASE_URL: &str = "http://haystack.test/api";
/// Project used by the scripted sessions.
pub const PROJECT: &str = "demo";

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, ClientError> + Send + Sync;

/// A transport that answers from a closure.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    /// Transport answering every request with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, ClientError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Hold each request for `delay` before answering.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Highest number of requests that were in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize { self.peak.load(Ordering::SeqCst) }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(&request)
    }
}

/// A 200 response carrying `body` as JSON.
///
/// # Errors
///
/// Never fails; the `Result` matches the handler signature.
pub fn ok_json(body: &Json) -> Result<HttpResponse, ClientError> { Ok(HttpResponse::new(200, body.to_string())) }

/// A token provider holding a fixed token until invalidated.
#[derive(Debug)]
pub struct StaticTokens(Mutex<Option<AuthToken>>);

impl StaticTokens {
    /// Provider holding `token`.
    #[must_use]
    pub fn new(token: &str) -> Arc<Self> { Arc::new(Self(Mutex::new(Some(AuthToken::new(token))))) }

    /// Provider holding nothing.
    #[must_use]
    pub fn empty() -> Arc<Self> { Arc::new(Self(Mutex::new(None))) }
}

impl TokenProvider for StaticTokens {
    fn cached_token(&self) -> Option<AuthToken> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn invalidate(&self) { *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None; }
}

/// Retry policy with millisecond delays and no jitter.
#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3)
        .with_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_jitter(false)
}

/// Session against [`BASE_URL`]/[`PROJECT`] over `transport`.
#[must_use]
pub fn scripted_session(transport: &Arc<ScriptedTransport>, tokens: Arc<dyn TokenProvider>) -> SessionManager {
    let shared: Arc<dyn HttpTransport> = transport.clone();
    SessionManager::new(shared, BASE_URL, PROJECT, tokens, fast_retry())
}

/// Username of the RFC 7677 example.
pub const SCRAM_USER: &str = "user";
/// Password of the RFC 7677 example.
pub const SCRAM_PASSWORD: &str = "pencil";
/// Client nonce of the RFC 7677 example.
pub const SCRAM_CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
/// Server-first message of the RFC 7677 example.
pub const SCRAM_SERVER_FIRST: &str =
    "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
/// Client-final message of the RFC 7677 example.
pub const SCRAM_CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
/// Server-final message of the RFC 7677 example.
pub const SCRAM_SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";
/// Handshake token minted by the scripted `HELLO` reply.
pub const HELLO_HANDSHAKE_TOKEN: &str = "aabbcc";
/// Handshake token minted by the scripted challenge.
pub const CHALLENGE_HANDSHAKE_TOKEN: &str = "ddeeff";
/// Bearer token issued by the scripted server.
pub const ISSUED_TOKEN: &str = "tok-xyz";

fn scram_header(token: &str, message: &str) -> String {
    format!(
        "SCRAM handshakeToken={token}, hash=SHA-256, data={}",
        encode_b64url(message)
    )
}

/// Answer one handshake request as the RFC 7677 server would.
///
/// Requests that do not match the expected phase get a 403.
///
/// # Errors
///
/// Never fails; the `Result` matches the handler signature.
pub fn scram_server(request: &HttpRequest) -> Result<HttpResponse, ClientError> {
    let authorization = request.header_value(AUTHORIZATION).unwrap_or_default();
    let hello = format!("HELLO username={}", encode_b64url(SCRAM_USER));
    let client_first = scram_header(
        HELLO_HANDSHAKE_TOKEN,
        &format!("n,,n={SCRAM_USER},r={SCRAM_CLIENT_NONCE}"),
    );
    let client_final = scram_header(CHALLENGE_HANDSHAKE_TOKEN, SCRAM_CLIENT_FINAL);

    let response = if authorization == hello {
        HttpResponse::new(401, "").with_header(
            WWW_AUTHENTICATE,
            format!("SCRAM handshakeToken={HELLO_HANDSHAKE_TOKEN}, hash=SHA-256"),
        )
    } else if authorization == client_first {
        HttpResponse::new(401, "").with_header(
            WWW_AUTHENTICATE,
            format!(
                "SCRAM handshakeToken={CHALLENGE_HANDSHAKE_TOKEN}, hash=SHA-256, data={}",
                encode_b64url(SCRAM_SERVER_FIRST)
            ),
        )
    } else if authorization == client_final {
        HttpResponse::new(200, "").with_header(
            AUTHENTICATION_INFO,
            format!(
                "authToken={ISSUED_TOKEN}, data={}, hash=SHA-256",
                encode_b64url(SCRAM_SERVER_FINAL)
            ),
        )
    } else {
        HttpResponse::new(403, "unexpected handshake message")
    };
    Ok(response)
}

/// Authenticator for the RFC 7677 user with its nonce pinned.
#[must_use]
pub fn rfc7677_authenticator(transport: Arc<dyn HttpTransport>) -> ScramAuthenticator {
    ScramAuthenticator::new(
        transport,
        BASE_URL,
        PROJECT,
        Credentials::new(SCRAM_USER, SCRAM_PASSWORD),
        fast_retry(),
    )
    .with_client_nonce(SCRAM_CLIENT_NONCE)
}
