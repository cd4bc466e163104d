use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Keyed cache with expiry, used by the hardened path for sessions and
/// brute-force counters.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn set(&self, key: &str, value: &str, expiry_seconds: u64) -> Result<(), anyhow::Error>;
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error>;
    /// Increment a counter, setting its expiry when it is first created.
    async fn incr(&self, key: &str, expiry_seconds: u64) -> Result<i64, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisSessionCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisSessionCache {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis session cache");
        let client = Client::open(url)?;

        // ConnectionManager reconnects automatically
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn set(&self, key: &str, value: &str, expiry_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(expiry_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str, expiry_seconds: u64) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(expiry_seconds.max(1))
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment counter: {}", e))?;
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process session cache honouring expiry, for tests and local runs.
pub struct MemorySessionCache {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl Default for MemorySessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every operation fail, as if the cache were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, anyhow::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("Session cache unavailable");
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory cache mutex poisoned: {}", e))?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(entries)
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn set(&self, key: &str, value: &str, expiry_seconds: u64) -> Result<(), anyhow::Error> {
        self.entries()?.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(expiry_seconds.max(1)),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self.entries()?.get(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        Ok(self.entries()?.remove(key).is_some())
    }

    async fn incr(&self, key: &str, expiry_seconds: u64) -> Result<i64, anyhow::Error> {
        let mut entries = self.entries()?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: Instant::now() + Duration::from_secs(expiry_seconds.max(1)),
        });
        let count = entry.value.parse::<i64>().unwrap_or(0) + 1;
        entry.value = count.to_string();
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.entries().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() -> Result<(), anyhow::Error> {
        let cache = MemorySessionCache::new();
        cache.set("session:1", "42", 60).await?;
        assert_eq!(cache.get("session:1").await?.as_deref(), Some("42"));
        assert!(cache.delete("session:1").await?);
        assert!(!cache.delete("session:1").await?);
        assert_eq!(cache.get("session:1").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_incr_counts_from_one() -> Result<(), anyhow::Error> {
        let cache = MemorySessionCache::new();
        assert_eq!(cache.incr("attempts:a@x.com", 60).await?, 1);
        assert_eq!(cache.incr("attempts:a@x.com", 60).await?, 2);
        assert_eq!(cache.incr("attempts:b@x.com", 60).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unavailable_cache_fails_every_call() {
        let cache = MemorySessionCache::new();
        cache.set_unavailable(true);
        assert!(cache.get("k").await.is_err());
        assert!(cache.set("k", "v", 1).await.is_err());
        assert!(cache.health_check().await.is_err());
    }
}
