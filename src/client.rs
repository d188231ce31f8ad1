//! High-level client wiring authentication, session, and operations.

use std::{future::Future, sync::Arc};

use serde_json::Value as Json;
use tracing::{error, info, warn};

use crate::{
    auth::{Authenticate, Credentials, ScramAuthenticator, TokenManager, TokenProvider},
    config::ClientConfig,
    entities::{Entity, EntityOps},
    error::ClientError,
    history::{HistorySample, HistoryWriter, WriteMethod, WriteResult},
    session::SessionManager,
    transport::{HttpTransport, ReqwestTransport},
    zinc::{Dict, Ref},
};

/// An authenticated connection to one project.
///
/// Authentication uses its own connection pool; API calls share a second
/// one. A call rejected with 401 triggers one forced token refresh and one
/// replay.
#[derive(Debug)]
pub struct Client {
    tokens: Arc<TokenManager>,
    history: HistoryWriter,
    entities: EntityOps,
    chunk_size: usize,
    max_concurrent: usize,
}

impl Client {
    /// Build both connection pools and authenticate.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for incomplete configuration,
    /// [`ClientError::Connection`] if a pool cannot be built, and the
    /// handshake's errors.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let auth: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config.timeout(), config.pool_size)?);
        let api: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config.timeout(), config.pool_size)?);
        let authenticator = ScramAuthenticator::new(
            auth,
            &config.base_url,
            &config.project,
            Credentials::new(config.username.as_str(), config.password.as_str()),
            config.retry_policy(),
        );
        Self::with_parts(config, Arc::new(authenticator), api).await
    }

    /// Assemble a client from an authenticator and an API transport, then
    /// authenticate.
    ///
    /// # Errors
    ///
    /// Returns the handshake's errors.
    pub async fn with_parts(
        config: &ClientConfig,
        authenticator: Arc<dyn Authenticate>,
        api: Arc<dyn HttpTransport>,
    ) -> Result<Self, ClientError> {
        info!(base_url = %config.base_url, project = %config.project, username = %config.username, "connecting");
        let tokens = Arc::new(TokenManager::new(authenticator, config.token_cache()));
        tokens.get_token().await?;
        info!("authenticated");

        let provider: Arc<dyn TokenProvider> = tokens.clone();
        let session = Arc::new(SessionManager::new(
            api,
            config.base_url.as_str(),
            config.project.as_str(),
            provider,
            config.retry_policy(),
        ));
        Ok(Self {
            tokens,
            history: HistoryWriter::new(Arc::clone(&session)),
            entities: EntityOps::new(session),
            chunk_size: config.chunk_size,
            max_concurrent: config.max_concurrent,
        })
    }

    /// Run `op` with a live token, refreshing and replaying once on 401.
    async fn with_reauth<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.tokens.get_token().await?;
        match op().await {
            Err(err) if err.is_unauthorized() => {
                warn!("token rejected, re-authenticating");
                self.tokens.refresh_token().await?;
                op().await
            }
            other => other,
        }
    }

    /// Rows matching a Haystack filter.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read(&self, filter: &str) -> Result<Vec<Dict>, ClientError> {
        self.with_reauth(|| self.entities.read_by_filter(filter)).await
    }

    /// One row by id.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_by_id(&self, id: &Ref) -> Result<Option<Dict>, ClientError> {
        self.with_reauth(|| self.entities.read_by_id(id)).await
    }

    /// Rows for several ids.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_by_ids(&self, ids: &[Ref]) -> Result<Vec<Dict>, ClientError> {
        self.with_reauth(|| self.entities.read_by_ids(ids)).await
    }

    /// All sites.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_sites(&self) -> Result<Vec<Dict>, ClientError> {
        self.with_reauth(|| self.entities.read_sites()).await
    }

    /// Equipment, optionally under one site.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_equipment(&self, site: Option<&Ref>) -> Result<Vec<Dict>, ClientError> {
        self.with_reauth(|| self.entities.read_equipment(site)).await
    }

    /// Points, optionally under a site and an equip.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_points(&self, site: Option<&Ref>, equip: Option<&Ref>) -> Result<Vec<Dict>, ClientError> {
        self.with_reauth(|| self.entities.read_points(site, equip))
            .await
    }

    /// Points as [`Entity`] records.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] for rows that are not points and the
    /// session's errors.
    pub async fn read_point_entities(
        &self,
        site: Option<&Ref>,
        equip: Option<&Ref>,
    ) -> Result<Vec<Entity>, ClientError> {
        self.with_reauth(|| self.entities.read_point_entities(site, equip))
            .await
    }

    /// The project's `about` record.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn about(&self) -> Result<Json, ClientError> { self.with_reauth(|| self.entities.about()).await }

    /// The project's time zone name.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if the project has none.
    pub async fn project_timezone(&self) -> Result<String, ClientError> {
        self.with_reauth(|| self.entities.project_timezone()).await
    }

    /// Create entities.
    ///
    /// # Errors
    ///
    /// As for [`EntityOps::create`].
    pub async fn create(&self, entities: &[Entity]) -> Result<Vec<Dict>, ClientError> {
        self.with_reauth(|| self.entities.create(entities)).await
    }

    /// Update entities.
    ///
    /// # Errors
    ///
    /// As for [`EntityOps::update`].
    pub async fn update(&self, entities: &[Entity]) -> Result<Vec<Dict>, ClientError> {
        self.with_reauth(|| self.entities.update(entities)).await
    }

    /// Delete one entity with optimistic locking.
    ///
    /// # Errors
    ///
    /// As for [`EntityOps::delete_entity`].
    pub async fn delete_entity(&self, id: &Ref) -> Result<(), ClientError> {
        self.with_reauth(|| self.entities.delete_entity(id)).await
    }

    /// Delete several entities.
    ///
    /// # Errors
    ///
    /// As for [`EntityOps::delete_entities`].
    pub async fn delete_entities(&self, ids: &[Ref]) -> Result<(), ClientError> {
        self.with_reauth(|| self.entities.delete_entities(ids)).await
    }

    /// Write one batch of samples. Failures are reported in the result.
    pub async fn write_history(&self, samples: &[HistorySample], method: WriteMethod) -> WriteResult {
        match self
            .with_reauth(|| self.history.try_write(samples, method))
            .await
        {
            Ok(result) => result,
            Err(err) => {
                error!(count = samples.len(), error = %err, "history write failed");
                WriteResult::failed(err.to_string())
            }
        }
    }

    /// Write samples in chunks using the configured chunk size and
    /// concurrency.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for a zero chunk size, and the
    /// handshake's errors if no token can be obtained.
    pub async fn write_history_chunked(&self, samples: &[HistorySample]) -> Result<Vec<WriteResult>, ClientError> {
        self.tokens.get_token().await?;
        self.history
            .write_chunked(samples, self.chunk_size, self.max_concurrent)
            .await
    }

    /// The chunked history writer, for callers choosing their own chunking.
    #[must_use]
    pub const fn history(&self) -> &HistoryWriter { &self.history }

    /// The entity and query operations.
    #[must_use]
    pub const fn entities(&self) -> &EntityOps { &self.entities }
}
