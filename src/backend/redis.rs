use crate::backend::KvBackend;
use crate::error::{RagError, RagResult};
use async_trait::async_trait;
use fred::{
    clients::RedisPool,
    interfaces::{ClientLike, KeysInterface},
    types::{Builder, Expiration, RedisConfig as FredRedisConfig, Scanner},
};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Connection settings for the Redis cache backend
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Redis connection URL (redis:// or rediss://)
    pub url: String,
    /// Connection pool size
    pub max_connections: usize,
    /// Connection and command timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_connections: 10,
            timeout_secs: 5,
        }
    }
}

/// Redis-backed key/value cache with connection pooling.
///
/// Every failure maps to `RagError::CacheUnavailable`; callers are expected
/// to fail open rather than propagate cache outages.
pub struct RedisKvBackend {
    client: RedisPool,
}

impl RedisKvBackend {
    /// Create a new pooled Redis client and wait for the connection
    pub async fn connect(settings: RedisSettings) -> RagResult<Self> {
        info!("Initializing Redis cache backend at {}", settings.url);

        if !settings.url.starts_with("redis://") && !settings.url.starts_with("rediss://") {
            return Err(RagError::Config(
                "Redis URL must start with redis:// or rediss://".to_string(),
            ));
        }

        let redis_config = FredRedisConfig::from_url(&settings.url)
            .map_err(|e| RagError::Config(format!("Invalid Redis URL: {}", e)))?;

        let timeout_secs = settings.timeout_secs;
        let client = Builder::from_config(redis_config)
            .with_connection_config(|conn_config| {
                conn_config.connection_timeout = Duration::from_secs(timeout_secs);
            })
            .with_performance_config(|perf_config| {
                perf_config.auto_pipeline = true;
                perf_config.default_command_timeout = Duration::from_secs(timeout_secs);
            })
            .build_pool(settings.max_connections)
            .map_err(|e| RagError::CacheUnavailable(format!("Failed to create Redis pool: {}", e)))?;

        client
            .connect()
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("Failed to connect to Redis: {}", e)))?;

        client
            .wait_for_connect()
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("Redis connection timeout: {}", e)))?;

        info!("Redis cache backend connected");
        Ok(Self { client })
    }

    /// Check connection health with a bounded ping
    pub async fn health_check(&self) -> RagResult<()> {
        let ping_result = timeout(Duration::from_secs(5), self.client.ping::<String>()).await;

        match ping_result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                error!("Redis health check failed: {}", e);
                Err(RagError::CacheUnavailable(format!("Health check failed: {}", e)))
            }
            Err(_) => {
                error!("Redis health check timed out");
                Err(RagError::CacheUnavailable("Health check timed out".to_string()))
            }
        }
    }
}

#[async_trait]
impl KvBackend for RedisKvBackend {
    async fn get(&self, key: &str) -> RagResult<Option<String>> {
        self.client
            .get(key)
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("GET {} failed: {}", key, e)))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> RagResult<()> {
        let expiration = ttl_secs.map(|secs| Expiration::EX(secs as i64));
        let _: () = self
            .client
            .set(key, value, expiration, None, false)
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("SET {} failed: {}", key, e)))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> RagResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        // UNLINK for non-blocking deletion
        let deleted: i64 = self
            .client
            .unlink(keys.to_vec())
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("UNLINK failed: {}", e)))?;
        Ok(deleted as u64)
    }

    async fn scan_keys(&self, pattern: &str) -> RagResult<Vec<String>> {
        debug!("Scanning Redis keys matching '{}'", pattern);

        let mut keys = Vec::new();
        let mut scan_stream = self.client.next().scan(pattern, Some(100), None);

        while let Some(page) = scan_stream.next().await {
            let mut page = page
                .map_err(|e| RagError::CacheUnavailable(format!("SCAN failed: {}", e)))?;
            if let Some(results) = page.take_results() {
                keys.extend(results.into_iter().filter_map(|k| k.into_string()));
            }
            page.next()
                .map_err(|e| RagError::CacheUnavailable(format!("SCAN failed: {}", e)))?;
        }

        Ok(keys)
    }

    async fn increment(&self, key: &str) -> RagResult<i64> {
        self.client
            .incr(key)
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("INCR {} failed: {}", key, e)))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> RagResult<()> {
        let _: bool = self
            .client
            .expire(key, ttl_secs as i64)
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("EXPIRE {} failed: {}", key, e)))?;
        Ok(())
    }
}
