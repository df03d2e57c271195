use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::types::ContentKind;

use super::{CacheStore, CachedResponse, EntryMetadata, RequestKey};

/// The fs operations could race with a concurrent [`clear`](CacheStore::clear) removing the
/// directories we are operating in, so they are retried a couple of times.
const MAX_RETRIES: usize = 2;

/// A [`CacheStore`] that persists responses on the file system.
///
/// The layout below the base directory is:
///
/// - `responses/aa/bbccdd/eeff...`: the response body.
/// - `responses/aa/bbccdd/eeff....metadata`: an [`EntryMetadata`] JSON document.
/// - `tmp/`: temporary files that are being written.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    /// Directory holding the cache entries.
    cache_dir: PathBuf,

    /// Directory to use for temporary files.
    ///
    /// New entries are written to a temporary file in this sibling directory first. Once fully
    /// written, the file is atomically moved to its final location inside `cache_dir`.
    tmp_dir: PathBuf,
}

impl FsCacheStore {
    /// Opens the store rooted at `base`, creating directories as needed.
    ///
    /// Temporary files left over by a previous process are removed.
    pub fn new(base: &Path) -> io::Result<Self> {
        let cache_dir = base.join("responses");
        let tmp_dir = base.join("tmp");
        fs::create_dir_all(&cache_dir)?;
        fs::create_dir_all(&tmp_dir)?;

        let store = Self { cache_dir, tmp_dir };
        store.cleanup_tmp()?;
        Ok(store)
    }

    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        self.cache_dir.join(key.cache_path())
    }

    fn cleanup_tmp(&self) -> io::Result<()> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.tmp_dir)? {
            let path = entry?.path();
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        error = &e as &dyn std::error::Error,
                        path = %path.display(),
                        "Failed to remove stale temp file",
                    );
                }
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "Removed stale temp files");
        }
        Ok(())
    }

    /// Create a new temporary file to use in the cache.
    fn tempfile(&self) -> io::Result<NamedTempFile> {
        let mut retries = 0;
        loop {
            retries += 1;

            if let Err(e) = fs::create_dir_all(&self.tmp_dir) {
                tracing::error!(path = %self.tmp_dir.display(), "Failed to create tmp directory: {:?}", e);
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                continue;
            }

            match tempfile::Builder::new()
                .prefix("tmp")
                .tempfile_in(&self.tmp_dir)
            {
                Ok(temp_file) => return Ok(temp_file),
                Err(e) => {
                    tracing::error!(path = %self.tmp_dir.display(), "Failed to create temp file: {:?}", e);
                    if retries > MAX_RETRIES {
                        return Err(e);
                    }
                }
            }
        }
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut temp_file = self.tempfile()?;
        temp_file.write_all(contents)?;
        temp_file.as_file().sync_data()?;
        persist_tempfile(temp_file, path)?;
        Ok(())
    }
}

impl CacheStore for FsCacheStore {
    fn contains(&self, key: &RequestKey, max_age: Option<Duration>) -> bool {
        let path = self.entry_path(key);
        match read_metadata(&path) {
            Ok(Some(metadata)) => metadata.is_fresh(max_age) && path.is_file(),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "Failed to read cache metadata",
                );
                false
            }
        }
    }

    fn get(&self, key: &RequestKey) -> Option<CachedResponse> {
        let path = self.entry_path(key);
        let result = read_metadata(&path).and_then(|metadata| {
            let Some(metadata) = metadata else {
                return Ok(None);
            };
            let body = catch_not_found(|| fs::read(&path))?;
            Ok(body.map(|body| CachedResponse {
                metadata,
                body: Bytes::from(body),
            }))
        });

        match result {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "Failed to read cache entry",
                );
                None
            }
        }
    }

    fn put(
        &self,
        key: &RequestKey,
        correlation_id: Uuid,
        content_kind: ContentKind,
        body: Bytes,
        mime_type: &str,
    ) -> io::Result<()> {
        let path = self.entry_path(key);
        let metadata = EntryMetadata {
            correlation_id,
            content_kind,
            mime_type: mime_type.to_owned(),
            time_created: SystemTime::now(),
        };
        let metadata = serde_json::to_vec(&metadata)?;

        // The metadata is written last, it marks the entry as complete.
        self.write_file(&path, &body)?;
        self.write_file(&metadata_path(&path), &metadata)?;

        tracing::trace!(key = %key, path = %path.display(), size = body.len(), "Cache entry written");
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        catch_not_found(|| fs::remove_dir_all(&self.cache_dir))?;
        fs::create_dir_all(&self.cache_dir)
    }
}

fn metadata_path(path: &Path) -> PathBuf {
    let mut path = path.as_os_str().to_owned();
    path.push(".metadata");
    path.into()
}

fn read_metadata(path: &Path) -> io::Result<Option<EntryMetadata>> {
    let Some(contents) = catch_not_found(|| fs::read(metadata_path(path)))? else {
        return Ok(None);
    };
    let metadata = serde_json::from_slice(&contents)?;
    Ok(Some(metadata))
}

fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}

fn persist_tempfile(mut temp_file: NamedTempFile, cache_path: &Path) -> io::Result<fs::File> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist item"))?;

    let mut retries = 0;
    let file = loop {
        retries += 1;

        if let Err(e) = fs::create_dir_all(parent) {
            tracing::error!(path = %parent.display(), "Failed to create cache directory: {:?}", e);
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        match temp_file.persist(cache_path) {
            Ok(file) => break file,
            Err(e) => {
                temp_file = e.file;
                let err = e.error;
                tracing::error!(path = %cache_path.display(), "Failed to persist cache file: {:?}", err);
                if retries > MAX_RETRIES {
                    return Err(err);
                }
            }
        }
    };
    Ok(file)
}
