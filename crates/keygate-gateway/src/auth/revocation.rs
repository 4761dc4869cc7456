//! Token revocation.
//!
//! Revoked tokens are kept as `revoked:<token>` keys with a TTL equal to the
//! token's remaining lifetime, so storage stays proportional to tokens that
//! are revoked but not yet expired.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use keygate_core::{CacheBackend, CacheConfig, FailPolicy};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{AuthError, TokenClaims};

const KEY_PREFIX: &str = "revoked:";
/// Deadline used when `now + ttl` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Cache backend failure.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend rejected or failed the operation.
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<sled::Error> for CacheError {
    fn from(e: sled::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Keyed TTL store behind the revocation set.
///
/// Implementations must offer read-your-writes for a key: an `exists` issued
/// after a completed `insert` observes it.
#[async_trait]
pub trait RevocationCache: Send + Sync + std::fmt::Debug {
    /// Store `key` until `ttl` elapses.
    async fn insert(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Whether `key` is present and unexpired.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

/// In-process TTL map.
#[derive(Debug, Default)]
pub struct MemoryRevocationCache {
    entries: RwLock<HashMap<String, Instant>>,
}

impl MemoryRevocationCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove `key` if its deadline has passed, re-checked under the write
    /// lock. Returns whether the key is still live.
    async fn evict_if_expired(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(deadline) if *deadline > now => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl RevocationCache for MemoryRevocationCache {
    async fn insert(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let deadline = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        self.entries.write().await.insert(key.to_string(), deadline);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let deadline = self.entries.read().await.get(key).copied();
        match deadline {
            Some(deadline) if deadline > now => Ok(true),
            Some(_) => Ok(self.evict_if_expired(key).await),
            None => Ok(false),
        }
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, deadline| *deadline > now);
        Ok(before - entries.len())
    }
}

/// Revocation set persisted in a sled tree.
///
/// Values hold the expiry as big-endian Unix milliseconds, so revocations
/// survive restarts and expire on wall-clock time.
#[derive(Debug, Clone)]
pub struct SledRevocationCache {
    tree: sled::Tree,
}

impl SledRevocationCache {
    /// Open or create the cache at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let db = sled::open(path)?;
        Self::with_db(&db)
    }

    /// Use the `revoked` tree of an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened.
    pub fn with_db(db: &sled::Db) -> Result<Self, CacheError> {
        Ok(Self {
            tree: db.open_tree("revoked")?,
        })
    }

    /// Remove `key` only if it still holds `observed`. Returns whether the
    /// key is live afterwards.
    fn evict_if_unchanged(&self, key: &str, observed: sled::IVec) -> Result<bool, CacheError> {
        match self
            .tree
            .compare_and_swap(key.as_bytes(), Some(observed), None::<sled::IVec>)?
        {
            Ok(()) => Ok(false),
            // Rewritten since it was read
            Err(swap) => Ok(swap
                .current
                .as_deref()
                .and_then(decode_expiry)
                .is_some_and(|expires_at| expires_at > now_millis())),
        }
    }
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

fn decode_expiry(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}

#[async_trait]
impl RevocationCache for SledRevocationCache {
    async fn insert(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = now_millis().saturating_add(ttl_ms);
        self.tree
            .insert(key.as_bytes(), expires_at.to_be_bytes().to_vec())?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let Some(value) = self.tree.get(key.as_bytes())? else {
            return Ok(false);
        };
        let expires_at = decode_expiry(&value)
            .ok_or_else(|| CacheError::Backend(format!("corrupt entry for {key}")))?;
        if expires_at > now_millis() {
            Ok(true)
        } else {
            self.evict_if_unchanged(key, value)
        }
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = now_millis();
        let mut removed = 0;
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let expired = decode_expiry(&value).is_none_or(|expires_at| expires_at <= now);
            if expired
                && self
                    .tree
                    .compare_and_swap(&key, Some(&value), None::<sled::IVec>)?
                    .is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// The revocation set used by validation and logout.
///
/// Every call is bounded by a timeout and tied to a cancellation token; a
/// cache that cannot answer yields `RevocationStoreUnavailable`.
#[derive(Debug, Clone)]
pub struct RevocationStore {
    cache: Arc<dyn RevocationCache>,
    timeout: Duration,
    policy: FailPolicy,
}

impl RevocationStore {
    /// Wrap a cache backend. The fail policy defaults to closed.
    #[must_use]
    pub fn new(cache: Arc<dyn RevocationCache>, timeout: Duration) -> Self {
        Self {
            cache,
            timeout,
            policy: FailPolicy::Closed,
        }
    }

    /// Set the policy applied when the cache cannot answer.
    #[must_use]
    pub fn with_policy(mut self, policy: FailPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the store described by the cache config.
    ///
    /// # Errors
    ///
    /// Returns `RevocationStoreUnavailable` if the URI is invalid or the
    /// backend cannot be opened.
    pub fn connect(config: &CacheConfig) -> Result<Self, AuthError> {
        let backend = config
            .backend()
            .map_err(|e| AuthError::RevocationStoreUnavailable(e.to_string()))?;

        let cache: Arc<dyn RevocationCache> = match &backend {
            CacheBackend::Memory => Arc::new(MemoryRevocationCache::new()),
            CacheBackend::Sled(path) => Arc::new(
                SledRevocationCache::open(path)
                    .map_err(|e| AuthError::RevocationStoreUnavailable(e.to_string()))?,
            ),
        };

        tracing::info!(
            backend = ?backend,
            timeout_ms = config.timeout_ms,
            policy = ?config.fail_policy,
            "Revocation store ready"
        );
        Ok(Self::new(cache, config.timeout()).with_policy(config.fail_policy))
    }

    /// Policy for unanswerable lookups.
    #[must_use]
    pub fn policy(&self) -> FailPolicy {
        self.policy
    }

    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Revoke `token` for `ttl`. A zero TTL is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `RevocationStoreUnavailable` or `Cancelled` if the write does
    /// not complete.
    pub async fn revoke(
        &self,
        token: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.guarded(cancel, self.cache.insert(&cache_key(token), ttl))
            .await
    }

    /// Revoke `token` for the rest of its lifetime.
    ///
    /// # Errors
    ///
    /// See [`RevocationStore::revoke`].
    pub async fn revoke_claims(
        &self,
        token: &str,
        claims: &TokenClaims,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let ttl = claims.remaining(Utc::now());
        self.revoke(token, ttl, cancel).await?;
        tracing::info!(user_id = %claims.id, ttl_secs = ttl.as_secs(), "Token revoked");
        Ok(())
    }

    /// Whether `token` is revoked.
    ///
    /// # Errors
    ///
    /// Returns `RevocationStoreUnavailable` or `Cancelled` if the cache does
    /// not answer; the caller decides how to treat the unknown.
    pub async fn contains(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, AuthError> {
        self.guarded(cancel, self.cache.exists(&cache_key(token)))
            .await
    }

    /// Drop expired entries from the backend.
    ///
    /// # Errors
    ///
    /// Returns `RevocationStoreUnavailable` if the backend fails.
    pub async fn purge_expired(&self, cancel: &CancellationToken) -> Result<usize, AuthError> {
        self.guarded(cancel, self.cache.purge_expired()).await
    }

    async fn guarded<T>(
        &self,
        cancel: &CancellationToken,
        op: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, AuthError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AuthError::Cancelled),
            result = tokio::time::timeout(self.timeout, op) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Revocation cache call failed");
                    Err(AuthError::RevocationStoreUnavailable(e.to_string()))
                }
                Err(_) => {
                    tracing::error!(
                        timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                        "Revocation cache call timed out"
                    );
                    Err(AuthError::RevocationStoreUnavailable(format!(
                        "timed out after {}ms",
                        self.timeout.as_millis()
                    )))
                }
            },
        }
    }
}

fn cache_key(token: &str) -> String {
    format!("{KEY_PREFIX}{token}")
}
