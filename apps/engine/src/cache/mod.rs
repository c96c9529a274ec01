//! Locator cache: remembers where a field was found on a given form shape.
//!
//! Keys are `locator:{ats}:{form_signature}:{field}`. Entries are written only
//! after a successful attempt and are dropped the moment they fail to resolve.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::browser::Locator;
use crate::oracle::FieldKind;

pub mod file;
#[cfg(test)]
pub mod memory;
pub mod redis;

pub use file::FileLocatorCache;
#[cfg(test)]
pub use memory::MemoryLocatorCache;
pub use self::redis::RedisLocatorCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Cache file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub ats_type: String,
    pub form_signature: String,
    pub field: String,
}

impl CacheKey {
    pub fn new(ats_type: &str, form_signature: &str, field: &str) -> Self {
        Self {
            ats_type: ats_type.to_string(),
            form_signature: form_signature.to_string(),
            field: field.to_string(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "locator:{}:{}:{}",
            self.ats_type, self.form_signature, self.field
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedLocator {
    pub locator: Locator,
    pub kind: FieldKind,
    pub validated_at: DateTime<Utc>,
}

impl CachedLocator {
    pub fn new(locator: Locator, kind: FieldKind) -> Self {
        Self {
            locator,
            kind,
            validated_at: Utc::now(),
        }
    }
}

/// Key-value store for validated locators. Backends: memory, JSON file, Redis.
#[async_trait]
pub trait LocatorCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedLocator>, CacheError>;

    async fn put(&self, key: &CacheKey, entry: CachedLocator) -> Result<(), CacheError>;

    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError>;
}
