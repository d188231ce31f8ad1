//! Authenticated request execution.
//!
//! [`SessionManager`] turns an endpoint name and a payload into an
//! authenticated, retried HTTP request and hands back the parsed JSON body.
//! It reads whatever token is currently cached and never starts a handshake
//! itself.

use std::{fmt, sync::Arc};

use serde_json::{Value as Json, json};
use tracing::{debug, warn};

use crate::{
    auth::TokenProvider,
    error::ClientError,
    retry::RetryPolicy,
    transport::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HttpRequest, HttpResponse, HttpTransport, endpoint_url},
    zinc::Grid,
};

/// Media type of Zinc request bodies.
pub const ZINC_MEDIA_TYPE: &str = "text/zinc; charset=utf-8";
/// Media type of JSON bodies.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Builds and sends authenticated API requests.
pub struct SessionManager {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    project: String,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Session for `<base_url>/<project>/` using the tokens in `tokens`.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        project: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            project: project.into(),
            tokens,
            retry,
        }
    }

    /// Absolute URL of `endpoint`.
    #[must_use]
    pub fn build_url(&self, endpoint: &str) -> String { endpoint_url(&self.base_url, &self.project, endpoint) }

    /// POST `grid` as Zinc.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Server`] for a non-200 status and
    /// [`ClientError::Connection`] once transport retries are exhausted.
    pub async fn post_grid(&self, endpoint: &str, grid: &Grid) -> Result<Json, ClientError> {
        let body = grid.to_zinc();
        debug!(endpoint, rows = grid.len(), bytes = body.len(), "posting grid");
        self.dispatch(endpoint, |url| {
            HttpRequest::post(url)
                .header(CONTENT_TYPE, ZINC_MEDIA_TYPE)
                .body(body.clone())
        })
        .await
    }

    /// GET `endpoint` with query `params`.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::post_grid`].
    pub async fn get_json(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Json, ClientError> {
        self.dispatch(endpoint, |url| HttpRequest::get(url).query(params))
            .await
    }

    /// POST `body` as JSON.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::post_grid`].
    pub async fn post_json(&self, endpoint: &str, body: &Json) -> Result<Json, ClientError> {
        let payload = body.to_string();
        self.dispatch(endpoint, |url| {
            HttpRequest::post(url)
                .header(CONTENT_TYPE, JSON_MEDIA_TYPE)
                .body(payload.clone())
        })
        .await
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        let accepting = request.header(ACCEPT, JSON_MEDIA_TYPE);
        match self.tokens.cached_token() {
            Some(token) => accepting.header(AUTHORIZATION, format!("Bearer authToken={}", token.as_str())),
            None => accepting,
        }
    }

    async fn dispatch<F>(&self, endpoint: &str, build: F) -> Result<Json, ClientError>
    where
        F: Fn(String) -> HttpRequest,
    {
        let url = self.build_url(endpoint);
        self.retry
            .execute(|| {
                let request = self.authorize(build(url.clone()));
                async move {
                    let response = self.transport.execute(request).await?;
                    self.interpret(response)
                }
            })
            .await
    }

    fn interpret(&self, response: HttpResponse) -> Result<Json, ClientError> {
        if response.status != 200 {
            if response.status == 401 {
                warn!("server rejected bearer token");
                self.tokens.invalidate();
            }
            return Err(ClientError::server(response.status, &response.body));
        }
        Ok(parse_body(response.body))
    }
}

/// Parse a 200 body as JSON, wrapping non-JSON text as `{"text": body}`.
fn parse_body(body: String) -> Json {
    match serde_json::from_str(&body) {
        Ok(json) => json,
        Err(_) => json!({ "text": body }),
    }
}
