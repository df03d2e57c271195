//! # Response caching
//!
//! Every successful response is persisted under its [`RequestKey`], together with the
//! time it was written. Whether an entry can be reused is decided at lookup time by comparing its
//! age against the validity requested by the caller, so the same entry may be fresh for one
//! request and stale for another. Entries are never evicted; a newer response for the same key
//! simply replaces the old one.
//!
//! Two stores are available:
//!
//! - [`FsCacheStore`] persists responses below the configured `cache_dir`. Each entry consists of
//!   a data file and a JSON `.metadata` sidecar. Writes go through a temporary file which is
//!   atomically moved into place.
//! - [`MemoryCacheStore`] keeps responses in memory for the lifetime of the process. It is used
//!   when no `cache_dir` is configured.
//!
//! Lookup failures are never errors. A missing, unreadable or corrupt entry is a miss.
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::types::ContentKind;

mod fs;
mod memory;
mod request_key;

#[cfg(test)]
mod tests;

pub use fs::FsCacheStore;
pub use memory::MemoryCacheStore;
pub(crate) use request_key::parse_url;
pub use request_key::{RequestKey, RequestKeyBuilder};

/// Everything that is stored about a response besides its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// A unique id generated for the request that produced this entry.
    pub correlation_id: Uuid,
    /// The resolved kind of the body, never [`ContentKind::Auto`] for fetched responses.
    pub content_kind: ContentKind,
    /// The `Content-Type` of the response, empty for canned data.
    pub mime_type: String,
    pub time_created: SystemTime,
}

impl EntryMetadata {
    pub fn is_fresh(&self, max_age: Option<Duration>) -> bool {
        is_fresh(self.time_created, max_age)
    }
}

/// A response read back from a [`CacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub metadata: EntryMetadata,
    pub body: Bytes,
}

/// Persistent storage for responses.
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Returns `true` if an entry exists for `key` that is younger than `max_age`.
    ///
    /// Without `max_age`, any existing entry qualifies.
    fn contains(&self, key: &RequestKey, max_age: Option<Duration>) -> bool;

    /// Returns the entry for `key` regardless of its age.
    fn get(&self, key: &RequestKey) -> Option<CachedResponse>;

    /// Stores a response, replacing any previous entry for `key`.
    fn put(
        &self,
        key: &RequestKey,
        correlation_id: Uuid,
        content_kind: ContentKind,
        body: Bytes,
        mime_type: &str,
    ) -> io::Result<()>;

    /// Removes all entries.
    fn clear(&self) -> io::Result<()>;
}

/// Opens the store selected by the configuration.
pub fn open_store(config: &Config) -> io::Result<Arc<dyn CacheStore>> {
    Ok(match config.cache_dir.as_deref() {
        Some(dir) => Arc::new(FsCacheStore::new(dir)?),
        None => Arc::new(MemoryCacheStore::new()),
    })
}

/// Checks whether something created at `time_created` is still younger than `max_age`.
///
/// Timestamps from the future count as brand new.
pub(crate) fn is_fresh(time_created: SystemTime, max_age: Option<Duration>) -> bool {
    let Some(max_age) = max_age else {
        return true;
    };
    let age = SystemTime::now()
        .duration_since(time_created)
        .unwrap_or_default();
    age < max_age
}
