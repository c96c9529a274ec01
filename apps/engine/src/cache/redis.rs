use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use super::{CacheError, CacheKey, CachedLocator, LocatorCache};

/// Shared cache for multi-host runs. Entries are JSON strings without expiry;
/// invalidation is explicit.
pub struct RedisLocatorCache {
    connection: MultiplexedConnection,
}

impl RedisLocatorCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Redis locator cache connected");
        Ok(Self { connection })
    }
}

#[async_trait]
impl LocatorCache for RedisLocatorCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedLocator>, CacheError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(key.render()).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, entry: CachedLocator) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let raw = serde_json::to_string(&entry)?;
        conn.set::<_, _, ()>(key.render(), raw).await?;
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key.render()).await?;
        Ok(())
    }
}
