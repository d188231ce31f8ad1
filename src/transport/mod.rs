//! HTTP transport primitive.
//!
//! Every network call in the crate goes through [`HttpTransport`], so the
//! authenticator and the session can run against a real `reqwest` pool or an
//! in-memory fake. The transport reports only transport faults as errors;
//! any HTTP status, including 4xx and 5xx, comes back as an
//! [`HttpResponse`] for the caller to classify.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ClientError;

pub mod reqwest_adapter;

pub use reqwest_adapter::ReqwestTransport;

/// Request header carrying handshake or bearer credentials.
pub const AUTHORIZATION: &str = "Authorization";
/// Response header carrying SCRAM challenges.
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
/// Response header carrying the issued token and server signature.
pub const AUTHENTICATION_INFO: &str = "Authentication-Info";
/// Request body media type header.
pub const CONTENT_TYPE: &str = "Content-Type";
/// Response media type header.
pub const ACCEPT: &str = "Accept";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default maximum idle connections kept per host.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Join `<base>/<project>/<endpoint>`, collapsing redundant slashes at the
/// seams.
#[must_use]
pub fn endpoint_url(base_url: &str, project: &str, endpoint: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        project.trim_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// HTTP method used by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

/// An outbound HTTP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Header name/value pairs in insertion order.
    pub headers: Vec<(String, String)>,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: Option<String>,
}

impl HttpRequest {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Start a `GET` request.
    pub fn get(url: impl Into<String>) -> Self { Self::new(Method::Get, url) }

    /// Start a `POST` request.
    pub fn post(url: impl Into<String>) -> Self { Self::new(Method::Post, url) }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    /// Append query parameters.
    #[must_use]
    pub fn query<K: ToString, V: ToString>(mut self, params: &[(K, V)]) -> Self {
        self.query
            .extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Look up a header, ignoring case.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> { find_header(&self.headers, name) }
}

/// A received HTTP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8.
    pub body: String,
}

impl HttpResponse {
    /// Response with `status` and `body` and no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    /// Look up a header, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> { find_header(&self.headers, name) }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Sends one HTTP request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] when the request cannot be sent
    /// or the response cannot be read, including timeouts. HTTP error
    /// statuses are not errors at this layer.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError>;
}
