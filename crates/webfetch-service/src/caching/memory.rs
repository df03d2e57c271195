use std::io;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use uuid::Uuid;

use crate::types::ContentKind;

use super::{CacheStore, CachedResponse, EntryMetadata, RequestKey};

/// A [`CacheStore`] that keeps responses in memory.
///
/// The store is unbounded. Entries live until they are replaced or the store is cleared.
#[derive(Debug, Clone)]
pub struct MemoryCacheStore {
    cache: moka::sync::Cache<RequestKey, CachedResponse>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        let cache = moka::sync::Cache::builder()
            .name("webfetch-responses")
            .build();
        Self { cache }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCacheStore {
    fn contains(&self, key: &RequestKey, max_age: Option<Duration>) -> bool {
        self.cache
            .get(key)
            .is_some_and(|entry| entry.metadata.is_fresh(max_age))
    }

    fn get(&self, key: &RequestKey) -> Option<CachedResponse> {
        self.cache.get(key)
    }

    fn put(
        &self,
        key: &RequestKey,
        correlation_id: Uuid,
        content_kind: ContentKind,
        body: Bytes,
        mime_type: &str,
    ) -> io::Result<()> {
        let entry = CachedResponse {
            metadata: EntryMetadata {
                correlation_id,
                content_kind,
                mime_type: mime_type.to_owned(),
                time_created: SystemTime::now(),
            },
            body,
        };
        self.cache.insert(key.clone(), entry);
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        self.cache.invalidate_all();
        Ok(())
    }
}
