use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CacheError, CacheKey, CachedLocator, LocatorCache};

/// JSON-file cache: one object mapping rendered keys to entries.
///
/// The whole file is rewritten on every mutation. Writes go through a
/// temporary sibling and a rename so a crash never leaves a torn file.
pub struct FileLocatorCache {
    path: PathBuf,
    entries: Mutex<Option<BTreeMap<String, CachedLocator>>>,
}

impl FileLocatorCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    async fn load(path: &Path) -> Result<BTreeMap<String, CachedLocator>, CacheError> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    warn!(
                        "Locator cache at {} is unreadable, starting empty: {e}",
                        path.display()
                    );
                    Ok(BTreeMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, entries: &BTreeMap<String, CachedLocator>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Persisted {} locator(s) to {}", entries.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl LocatorCache for FileLocatorCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedLocator>, CacheError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        Ok(guard.as_ref().and_then(|m| m.get(&key.render()).cloned()))
    }

    async fn put(&self, key: &CacheKey, entry: CachedLocator) -> Result<(), CacheError> {
        let mut guard = self.entries.lock().await;
        let mut entries = match guard.take() {
            Some(entries) => entries,
            None => Self::load(&self.path).await?,
        };
        entries.insert(key.render(), entry);
        let result = self.persist(&entries).await;
        *guard = Some(entries);
        result
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut guard = self.entries.lock().await;
        let mut entries = match guard.take() {
            Some(entries) => entries,
            None => Self::load(&self.path).await?,
        };
        let removed = entries.remove(&key.render()).is_some();
        let result = if removed {
            self.persist(&entries).await
        } else {
            Ok(())
        };
        *guard = Some(entries);
        result
    }
}
