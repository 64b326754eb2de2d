//! Expiring token cache with per-kind single-flight refresh.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{HostError, MeetflowError};

/// Tokens expiring within this window are refreshed.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(30);

/// Lifetimes beyond this are treated as "does not expire".
const MAX_LIFETIME: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `now + after`, saturating at [`MAX_LIFETIME`] instead of overflowing.
fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(MAX_LIFETIME)).unwrap_or(now)
}

/// A bearer token and its remaining lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// The token value.
    pub token: String,
    /// Time until the token expires.
    pub expires_in: Duration,
}

impl AccessToken {
    /// Creates a token.
    #[must_use]
    pub fn new(token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            token: token.into(),
            expires_in,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Issues fresh tokens for a credential kind.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetches a new token of `kind`.
    async fn fetch(&self, kind: &str) -> Result<AccessToken, HostError>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

type Slot = Arc<Mutex<Option<CachedToken>>>;

/// Caches tokens by credential kind.
///
/// At most one fetch per kind is in flight: concurrent callers queue on the
/// kind's slot and reuse the token the first caller stored. A failed fetch is
/// not cached, so the next caller fetches again.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    refresh_buffer: Duration,
    slots: DashMap<String, Slot>,
}

impl TokenCache {
    /// Creates a cache over `source` with the default refresh buffer.
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            slots: DashMap::new(),
        }
    }

    /// Sets the refresh buffer.
    #[must_use]
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// The refresh buffer.
    #[must_use]
    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    fn slot(&self, kind: &str) -> Slot {
        Arc::clone(self.slots.entry(kind.to_string()).or_default().value())
    }

    fn usable(&self, cached: &CachedToken, now: Instant) -> Option<AccessToken> {
        // A buffer too large to add to `now` leaves nothing usable.
        let refresh_at = now.checked_add(self.refresh_buffer)?;
        (cached.expires_at > refresh_at).then(|| {
            AccessToken::new(cached.token.clone(), cached.expires_at.duration_since(now))
        })
    }

    /// Returns a valid token of `kind`, fetching one if needed.
    pub async fn get(&self, kind: &str) -> Result<AccessToken, MeetflowError> {
        let slot = self.slot(kind);
        let mut cached = slot.lock().await;

        if let Some(token) = cached.as_ref().and_then(|c| self.usable(c, Instant::now())) {
            return Ok(token);
        }
        if cached.is_some() {
            debug!(kind, "Cached token expired or about to expire");
        }

        let fresh = self.source.fetch(kind).await.map_err(|e| {
            warn!(kind, error = %e, "Failed to fetch token");
            MeetflowError::Credential(format!("Failed to fetch {kind} token: {e}"))
        })?;
        if fresh.token.is_empty() {
            return Err(MeetflowError::Credential(format!(
                "Token source returned an empty {kind} token"
            )));
        }

        info!(kind, expires_in_secs = fresh.expires_in.as_secs(), "Token refreshed");
        *cached = Some(CachedToken {
            token: fresh.token.clone(),
            expires_at: deadline(Instant::now(), fresh.expires_in),
        });
        Ok(fresh)
    }

    /// Stores a token obtained elsewhere.
    pub async fn set(&self, kind: &str, token: AccessToken) -> Result<(), MeetflowError> {
        if token.token.is_empty() {
            return Err(MeetflowError::Credential("Token cannot be empty".to_string()));
        }
        let slot = self.slot(kind);
        *slot.lock().await = Some(CachedToken {
            token: token.token,
            expires_at: deadline(Instant::now(), token.expires_in),
        });
        debug!(kind, "Token stored");
        Ok(())
    }

    /// Returns the cached token if it is still valid, without fetching.
    ///
    /// Returns `None` while a refresh for the kind is in flight.
    #[must_use]
    pub fn peek(&self, kind: &str) -> Option<AccessToken> {
        let slot = self.slots.get(kind).map(|s| Arc::clone(s.value()))?;
        let cached = slot.try_lock().ok()?;
        cached.as_ref().and_then(|c| self.usable(c, Instant::now()))
    }

    /// Returns true if a valid token of `kind` is cached.
    #[must_use]
    pub fn has_valid(&self, kind: &str) -> bool {
        self.peek(kind).is_some()
    }

    /// Drops the cached token of `kind`.
    pub fn invalidate(&self, kind: &str) {
        if self.slots.remove(kind).is_some() {
            info!(kind, "Token invalidated");
        }
    }

    /// Drops every cached token.
    pub fn invalidate_all(&self) {
        self.slots.clear();
        info!("All tokens invalidated");
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("refresh_buffer", &self.refresh_buffer)
            .field("kinds", &self.slots.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        calls: AtomicU32,
        lifetime: Duration,
        delay: Duration,
    }

    impl CountingSource {
        fn new(lifetime: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                lifetime,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self, kind: &str) -> Result<AccessToken, HostError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(AccessToken::new(format!("{kind}-{n}"), self.lifetime))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_reused_until_refresh_buffer() {
        let source = Arc::new(CountingSource::new(Duration::from_secs(120)));
        let cache = TokenCache::new(source.clone());

        assert_eq!(cache.get("deepgram").await.unwrap().token, "deepgram-1");
        tokio::time::advance(Duration::from_secs(80)).await;
        let token = cache.get("deepgram").await.unwrap();
        assert_eq!(token.token, "deepgram-1");
        assert!(token.expires_in <= Duration::from_secs(40));
        assert!(token.expires_in > Duration::from_secs(39));

        // 29s left is inside the refresh buffer.
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("deepgram").await.unwrap().token, "deepgram-2");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_independent() {
        let source = Arc::new(CountingSource::new(Duration::from_secs(600)));
        let cache = TokenCache::new(source.clone());

        assert_eq!(cache.get("a").await.unwrap().token, "a-1");
        assert_eq!(cache.get("b").await.unwrap().token, "b-2");
        assert_eq!(cache.get("a").await.unwrap().token, "a-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let mut source = CountingSource::new(Duration::from_secs(600));
        source.delay = Duration::from_millis(100);
        let source = Arc::new(source);
        let cache = Arc::new(TokenCache::new(source.clone()));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get("deepgram").await.map(|t| t.token) })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "deepgram-1");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch() {
        let source = Arc::new(CountingSource::new(Duration::from_secs(600)));
        let cache = TokenCache::new(source.clone());

        cache.get("a").await.unwrap();
        cache.get("b").await.unwrap();
        assert!(cache.has_valid("a"));

        cache.invalidate("a");
        assert!(!cache.has_valid("a"));
        assert!(cache.has_valid("b"));
        assert_eq!(cache.get("a").await.unwrap().token, "a-3");

        cache.invalidate_all();
        assert!(!cache.has_valid("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_and_peek() {
        let source = Arc::new(CountingSource::new(Duration::from_secs(600)));
        let cache = TokenCache::new(source.clone());

        cache
            .set("cloud", AccessToken::new("abc", Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(cache.peek("cloud").map(|t| t.token), Some("abc".to_string()));
        assert_eq!(cache.get("cloud").await.unwrap().token, "abc");
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        assert!(cache
            .set("cloud", AccessToken::new("", Duration::from_secs(60)))
            .await
            .is_err());
        assert!(cache.peek("missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_token_is_never_cached_as_valid() {
        let source = Arc::new(CountingSource::new(Duration::from_secs(10)));
        let cache = TokenCache::new(source.clone());

        cache.get("a").await.unwrap();
        cache.get("a").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reported_and_not_cached() {
        let mut source = MockTokenSource::new();
        source
            .expect_fetch()
            .times(2)
            .returning(|_| Err(HostError::message("unauthorized")));
        let cache = TokenCache::new(Arc::new(source));

        let err = cache.get("deepgram").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Credential error: Failed to fetch deepgram token: unauthorized"
        );
        assert!(cache.get("deepgram").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_lifetime_is_cached() {
        let mut source = MockTokenSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(AccessToken::new("forever", Duration::MAX)));
        let cache = TokenCache::new(Arc::new(source));

        assert_eq!(cache.get("a").await.unwrap().token, "forever");
        tokio::time::advance(Duration::from_secs(24 * 60 * 60)).await;
        let token = cache.get("a").await.unwrap();
        assert_eq!(token.token, "forever");
        assert!(token.expires_in > Duration::from_secs(365 * 24 * 60 * 60));

        cache
            .set("b", AccessToken::new("also", Duration::MAX))
            .await
            .unwrap();
        assert!(cache.has_valid("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_refresh_buffer_always_refetches() {
        let source = Arc::new(CountingSource::new(Duration::from_secs(600)));
        let cache =
            TokenCache::new(source.clone()).with_refresh_buffer(Duration::from_secs(u64::MAX));

        assert_eq!(cache.get("a").await.unwrap().token, "a-1");
        assert!(cache.peek("a").is_none());
        assert_eq!(cache.get("a").await.unwrap().token, "a-2");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AccessToken::new("secret", Duration::from_secs(1));
        assert!(!format!("{token:?}").contains("secret"));
    }
}
