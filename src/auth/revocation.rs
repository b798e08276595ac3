//! Revocation Store
//! Mission: Expiring key-value records for the token blacklist, session hints
//! and the user response cache

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const REVOKED_MARKER: &str = "revoked";

/// Key under which a logged-out token is blacklisted
pub fn blacklist_key(token: &str) -> String {
    format!("blacklist:{}", token)
}

/// Key of the optional token -> user id hint
pub fn session_key(token: &str) -> String {
    format!("token:{}", token)
}

/// Key of the cached user response
pub fn user_key(user_id: i64) -> String {
    format!("user:{}", user_id)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache call timed out")]
    Timeout,
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Expiring key-value cache contract.
///
/// Implementations provide their own atomicity per call; callers bound each
/// call with a deadline.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    ttl: Duration,
}

/// Each entry lives exactly as long as the TTL it was written with
struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache store backed by moka
pub struct MemoryCacheStore {
    cache: Cache<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { cache }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            // Already expired; make sure no stale value survives either
            self.cache.invalidate(key).await;
            return Ok(());
        }

        self.cache
            .insert(
                key.to_string(),
                CacheEntry {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
