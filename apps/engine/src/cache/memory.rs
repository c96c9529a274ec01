use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheError, CacheKey, CachedLocator, LocatorCache};

/// Process-local cache for tests.
#[derive(Default)]
pub struct MemoryLocatorCache {
    entries: RwLock<HashMap<String, CachedLocator>>,
}

impl MemoryLocatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl LocatorCache for MemoryLocatorCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedLocator>, CacheError> {
        Ok(self.entries.read().await.get(&key.render()).cloned())
    }

    async fn put(&self, key: &CacheKey, entry: CachedLocator) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.render(), entry);
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.entries.write().await.remove(&key.render());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Locator;
    use crate::oracle::FieldKind;

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let cache = MemoryLocatorCache::new();
        let key = CacheKey::new("lever", "sig", "email");
        cache
            .put(&key, CachedLocator::new(Locator::css("#email"), FieldKind::Email))
            .await
            .unwrap();

        let hit = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(hit.locator, Locator::css("#email"));

        cache.invalidate(&key).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
        assert_eq!(cache.len().await, 0);
    }
}
