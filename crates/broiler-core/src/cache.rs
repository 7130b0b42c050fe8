//! Cache store port and adapters
//!
//! One-time tokens (account verification, password reset) and refresh
//! session records live in a key/value store with per-entry expiry.
//! Production uses Redis; tests and single-node development use an
//! in-process moka cache with the same TTL semantics.

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::{Duration, Instant};

use crate::{BroilerError, Result};

/// Key/value store with optional per-key expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the value stored under `key`, if present and not expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    ///
    /// # Arguments
    /// * `key` - Cache key
    /// * `value` - Value to store
    /// * `ttl` - Time to live; `None` keeps the entry until deleted
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove `key`, returning whether an entry was deleted
    async fn del(&self, key: &str) -> Result<bool>;

    /// Connectivity check used by the health endpoint
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

/// Per-entry expiry: each value carries its own TTL
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process cache store backed by moka
#[derive(Clone)]
pub struct MemoryCache {
    cache: Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(100_000)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self { cache }
    }

    /// Number of live entries (approximate, for diagnostics)
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.cache
            .insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }
}

// ============================================================================
// Redis backend
// ============================================================================

/// Redis-backed cache store
///
/// Uses a [`ConnectionManager`], which reconnects transparently and is
/// cheap to clone per command.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| BroilerError::CacheError(format!("Redis connection error: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BroilerError::CacheError(format!("Redis connection error: {e}")))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| BroilerError::CacheError(format!("Redis GET error: {e}")))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        if let Some(ttl) = ttl {
            // SETEX rejects zero
            let _: () = conn
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| BroilerError::CacheError(format!("Redis SETEX error: {e}")))?;
        } else {
            let _: () = conn
                .set(key, value)
                .await
                .map_err(|e| BroilerError::CacheError(format!("Redis SET error: {e}")))?;
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = conn
            .del(key)
            .await
            .map_err(|e| BroilerError::CacheError(format!("Redis DEL error: {e}")))?;
        Ok(count > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BroilerError::CacheError(format!("Redis PING error: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let cache = MemoryCache::new();

        cache.set("USER:KEY", "value", None).await.unwrap();
        assert_eq!(cache.get("USER:KEY").await.unwrap().as_deref(), Some("value"));

        assert!(cache.del("USER:KEY").await.unwrap());
        assert!(!cache.del("USER:KEY").await.unwrap());
        assert!(cache.get("USER:KEY").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = MemoryCache::new();

        tokio_test::assert_ok!(cache.set("k", "first", None).await);
        tokio_test::assert_ok!(cache.set("k", "second", None).await);
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();

        cache
            .set("short", "v", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        cache
            .set("long", "v", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.get("short").await.unwrap().is_none());
        assert!(cache.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_resets_ttl() {
        let cache = MemoryCache::new();

        cache
            .set("k", "v1", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        cache.set("k", "v2", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v2"));
    }
}
