//! Client configuration.
//!
//! Values are layered with `figment`: built-in defaults, then an optional
//! TOML file, then `HAYSTACK_`-prefixed environment variables. Later layers
//! win.

use std::{fmt, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ClientError,
    history::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT},
    retry::{DEFAULT_MAX_RETRIES, RetryPolicy},
    transport::{DEFAULT_POOL_SIZE, DEFAULT_TIMEOUT},
};

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "HAYSTACK_";
/// Configuration file read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "haystack.toml";

const DEFAULT_TOKEN_CACHE_SECS: u64 = 3600;

/// Connection and tuning settings for [`crate::client::Client`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server API root, for example `http://host:8080/api`.
    pub base_url: String,
    /// Project name.
    pub project: String,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the first attempt for transport faults.
    pub max_retries: u32,
    /// Idle connections kept per host in each pool.
    pub pool_size: usize,
    /// Lifetime of a cached bearer token in seconds.
    pub token_cache_secs: u64,
    /// Samples per chunk for chunked history writes.
    pub chunk_size: usize,
    /// Chunks in flight at once for chunked history writes.
    pub max_concurrent: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            project: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
            pool_size: DEFAULT_POOL_SIZE,
            token_cache_secs: DEFAULT_TOKEN_CACHE_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("pool_size", &self.pool_size)
            .field("token_cache_secs", &self.token_cache_secs)
            .field("chunk_size", &self.chunk_size)
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

#[cfg(feature = "toml")]
fn merge_file(figment: Figment, path: &Path) -> Figment {
    use figment::providers::{Format, Toml};
    figment.merge(Toml::file(path))
}

#[cfg(not(feature = "toml"))]
fn merge_file(figment: Figment, _path: &Path) -> Figment { figment }

impl ClientConfig {
    /// Configuration with the given connection settings and default tuning.
    pub fn new(
        base_url: impl Into<String>,
        project: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            project: project.into(),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// The layered provider stack for `path`.
    #[must_use]
    pub fn figment(path: &Path) -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        merge_file(figment, path).merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load from [`DEFAULT_CONFIG_FILE`] and the environment.
    ///
    /// # Errors
    ///
    /// As for [`ClientConfig::load_from`].
    pub fn load() -> Result<Self, ClientError> { Self::load_from(Path::new(DEFAULT_CONFIG_FILE)) }

    /// Load from `path` and the environment. A missing file is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if a value has the wrong type or
    /// a required setting is missing.
    pub fn load_from(path: &Path) -> Result<Self, ClientError> {
        let config: Self = Self::figment(path)
            .extract()
            .map_err(|e| ClientError::validation(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the connection settings are present.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] naming the first missing setting.
    pub fn validate(&self) -> Result<(), ClientError> {
        let required = [
            ("base_url", &self.base_url),
            ("project", &self.project),
            ("username", &self.username),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ClientError::validation(format!(
                "{name} is required (set {ENV_PREFIX}{})",
                name.to_uppercase()
            )));
        }
        if self.chunk_size == 0 {
            return Err(ClientError::validation("chunk_size must be at least 1"));
        }
        Ok(())
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }

    /// Lifetime of a cached bearer token.
    #[must_use]
    pub const fn token_cache(&self) -> Duration { Duration::from_secs(self.token_cache_secs) }

    /// Retry policy for transport faults.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy { RetryPolicy::new(self.max_retries) }
}
