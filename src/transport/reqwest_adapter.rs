//! [`HttpTransport`] backed by a `reqwest` connection pool.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::error::ClientError;

/// A pooled HTTP client.
///
/// Each instance owns its own connection pool. The client keeps one
/// instance for the SCRAM handshake and a separate one for authenticated
/// traffic, because the server rejects connections reused across the
/// authentication boundary.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a pool with a per-request `timeout` and at most `pool_size`
    /// idle connections per host. Redirects are not followed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration, pool_size: usize) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(pool_size)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ClientError::Connection {
                message: format!("failed to build HTTP client: {e}"),
                timed_out: false,
            })?;
        Ok(Self { client })
    }
}

fn connection_error(err: &reqwest::Error) -> ClientError {
    ClientError::Connection {
        message: err.to_string(),
        timed_out: err.is_timeout(),
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let HttpRequest {
            method,
            url,
            headers,
            query,
            body,
        } = request;
        let mut builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(payload) = body {
            builder = builder.body(payload);
        }

        let response = builder.send().await.map_err(|e| connection_error(&e))?;
        let status = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();
        let text = response.text().await.map_err(|e| connection_error(&e))?;
        debug!(%url, status, bytes = text.len(), "http response");
        Ok(HttpResponse {
            status,
            headers: response_headers,
            body: text,
        })
    }
}
