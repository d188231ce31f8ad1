//! Bearer token cache with single-flight refresh.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use super::authenticator::Authenticate;
use crate::error::ClientError;

/// Default lifetime of a cached token.
pub const DEFAULT_TOKEN_CACHE: Duration = Duration::from_secs(3600);

/// Characters of a token shown in logs.
const LOG_PREFIX_LEN: usize = 6;

/// An opaque bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a server-issued token.
    pub fn new(token: impl Into<String>) -> Self { Self(token.into()) }

    /// The raw token text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }

    /// A short, log-safe prefix of the token.
    #[must_use]
    pub fn prefix(&self) -> String {
        let head: String = self.0.chars().take(LOG_PREFIX_LEN).collect();
        format!("{head}...")
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthToken").field(&self.prefix()).finish()
    }
}

/// Read access to the current token, as used by request builders.
pub trait TokenProvider: Send + Sync {
    /// The cached token if one exists and has not expired. Never triggers a
    /// handshake.
    fn cached_token(&self) -> Option<AuthToken>;

    /// Drop the cached token.
    fn invalidate(&self);
}

#[derive(Clone)]
struct CachedToken {
    token: AuthToken,
    /// `None` when the cache duration runs past the clock's range.
    expires_at: Option<Instant>,
}

/// Owns the token lifecycle.
///
/// At most one handshake runs at a time per manager. Callers that find the
/// cache empty or expired queue on the refresh lock and re-check the cache
/// once they hold it, so a burst of callers shares one handshake.
pub struct TokenManager {
    authenticator: Arc<dyn Authenticate>,
    cache_duration: Duration,
    cached: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("cache_duration", &self.cache_duration)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Manager caching each token for `cache_duration`.
    pub fn new(authenticator: Arc<dyn Authenticate>, cache_duration: Duration) -> Self {
        Self {
            authenticator,
            cache_duration,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    fn valid_token(&self) -> Option<AuthToken> {
        let guard = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|c| c.expires_at.is_none_or(|at| Instant::now() < at))
            .map(|c| c.token.clone())
    }

    fn store(&self, token: AuthToken) {
        let entry = CachedToken {
            token,
            expires_at: Instant::now().checked_add(self.cache_duration),
        };
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(entry);
    }

    async fn run_handshake(&self) -> Result<AuthToken, ClientError> {
        info!("refreshing auth token");
        let token = self.authenticator.authenticate().await?;
        self.store(token.clone());
        Ok(token)
    }

    /// Return the cached token, running a handshake first if it is absent or
    /// expired.
    ///
    /// # Errors
    ///
    /// Propagates the handshake error; the cache is left empty.
    pub async fn get_token(&self) -> Result<AuthToken, ClientError> {
        if let Some(token) = self.valid_token() {
            return Ok(token);
        }
        let _guard = self.refresh.lock().await;
        if let Some(token) = self.valid_token() {
            debug!("token refreshed by a concurrent caller");
            return Ok(token);
        }
        self.run_handshake().await
    }

    /// Force a new handshake, replacing the cached token.
    ///
    /// Callers that observed the same stale token while another refresh was
    /// running receive that refresh's token instead of starting another.
    ///
    /// # Errors
    ///
    /// Propagates the handshake error.
    pub async fn refresh_token(&self) -> Result<AuthToken, ClientError> {
        let stale = self.valid_token();
        let _guard = self.refresh.lock().await;
        if let Some(current) = self.valid_token() {
            if stale.as_ref() != Some(&current) {
                debug!("token refreshed by a concurrent caller");
                return Ok(current);
            }
        }
        self.run_handshake().await
    }

    /// Drop the cached token so the next [`TokenManager::get_token`] runs a
    /// handshake.
    pub fn invalidate(&self) {
        debug!("invalidating auth token");
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl TokenProvider for TokenManager {
    fn cached_token(&self) -> Option<AuthToken> { self.valid_token() }

    fn invalidate(&self) { Self::invalidate(self); }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rstest::rstest;
    use tokio::task::JoinSet;

    use super::*;
    use crate::error::AuthPhase;

    #[derive(Default)]
    struct CountingAuth {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Authenticate for CountingAuth {
        async fn authenticate(&self) -> Result<AuthToken, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(ClientError::auth(AuthPhase::Hello, "rejected"));
            }
            Ok(AuthToken::new(format!("token-{n}")))
        }
    }

    fn manager(auth: &Arc<CountingAuth>, ttl: Duration) -> Arc<TokenManager> {
        let shared: Arc<dyn Authenticate> = auth.clone();
        Arc::new(TokenManager::new(shared, ttl))
    }

    #[rstest]
    #[tokio::test]
    async fn concurrent_callers_share_one_handshake() {
        let auth = Arc::new(CountingAuth::default());
        let tokens = manager(&auth, DEFAULT_TOKEN_CACHE);
        let mut set = JoinSet::new();
        for _ in 0..16 {
            let caller = Arc::clone(&tokens);
            set.spawn(async move { caller.get_token().await });
        }
        let results = set.join_all().await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.expect("token").as_str(), "token-1");
        }
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn expired_token_triggers_new_handshake() {
        let auth = Arc::new(CountingAuth::default());
        let tokens = manager(&auth, Duration::from_secs(60));
        assert_eq!(tokens.get_token().await.expect("first").as_str(), "token-1");
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(tokens.get_token().await.expect("cached").as_str(), "token-1");
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(tokens.cached_token().is_none());
        assert_eq!(tokens.get_token().await.expect("second").as_str(), "token-2");
    }

    #[rstest]
    #[tokio::test]
    async fn invalidate_clears_cache() {
        let auth = Arc::new(CountingAuth::default());
        let tokens = manager(&auth, DEFAULT_TOKEN_CACHE);
        tokens.get_token().await.expect("first");
        TokenProvider::invalidate(tokens.as_ref());
        assert!(tokens.cached_token().is_none());
        assert_eq!(tokens.get_token().await.expect("second").as_str(), "token-2");
    }

    #[rstest]
    #[tokio::test]
    async fn concurrent_forced_refreshes_are_deduplicated() {
        let auth = Arc::new(CountingAuth::default());
        let tokens = manager(&auth, DEFAULT_TOKEN_CACHE);
        tokens.get_token().await.expect("first");
        let mut set = JoinSet::new();
        for _ in 0..8 {
            let caller = Arc::clone(&tokens);
            set.spawn(async move { caller.refresh_token().await });
        }
        for result in set.join_all().await {
            assert_eq!(result.expect("token").as_str(), "token-2");
        }
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn failed_handshake_leaves_cache_empty() {
        let auth = Arc::new(CountingAuth {
            fail: true,
            ..CountingAuth::default()
        });
        let tokens = manager(&auth, DEFAULT_TOKEN_CACHE);
        assert!(tokens.get_token().await.is_err());
        assert!(tokens.cached_token().is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn oversized_cache_duration_never_expires() {
        let auth = Arc::new(CountingAuth::default());
        let tokens = manager(&auth, Duration::from_secs(u64::MAX));
        assert_eq!(tokens.get_token().await.expect("first").as_str(), "token-1");
        assert_eq!(tokens.get_token().await.expect("cached").as_str(), "token-1");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn debug_shows_only_prefix() {
        let token = AuthToken::new("abcdefghijklmnop");
        let rendered = format!("{token:?}");
        assert!(rendered.contains("abcdef..."));
        assert!(!rendered.contains("ghij"));
    }
}
