use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use uuid::Uuid;

use crate::types::ContentKind;

use super::*;

/// Returns every store flavor, together with the guard of its directory.
fn stores() -> Vec<(tempfile::TempDir, Arc<dyn CacheStore>)> {
    let fs_dir = tempfile::tempdir().unwrap();
    let fs_store = Arc::new(FsCacheStore::new(fs_dir.path()).unwrap());
    let memory_dir = tempfile::tempdir().unwrap();
    vec![
        (fs_dir, fs_store as Arc<dyn CacheStore>),
        (memory_dir, Arc::new(MemoryCacheStore::new())),
    ]
}

#[test]
fn test_missing_entry() {
    for (_dir, store) in stores() {
        let key = RequestKey::for_testing("missing");
        assert!(!store.contains(&key, None));
        assert!(!store.contains(&key, Some(Duration::from_secs(3600))));
        assert!(store.get(&key).is_none());
    }
}

#[test]
fn test_put_and_get() {
    for (_dir, store) in stores() {
        let key = RequestKey::for_testing("items");
        let correlation_id = Uuid::new_v4();
        let before = SystemTime::now() - Duration::from_secs(1);

        store
            .put(
                &key,
                correlation_id,
                ContentKind::Text,
                Bytes::from("hello"),
                "text/plain; charset=utf-8",
            )
            .unwrap();

        let entry = store.get(&key).unwrap();
        assert_eq!(entry.body, "hello");
        assert_eq!(entry.metadata.correlation_id, correlation_id);
        assert_eq!(entry.metadata.content_kind, ContentKind::Text);
        assert_eq!(entry.metadata.mime_type, "text/plain; charset=utf-8");
        assert!(entry.metadata.time_created >= before);
    }
}

#[test]
fn test_validity_is_checked_at_query_time() {
    for (_dir, store) in stores() {
        let key = RequestKey::for_testing("validity");
        store
            .put(&key, Uuid::new_v4(), ContentKind::Raw, Bytes::from("x"), "")
            .unwrap();

        assert!(store.contains(&key, None));
        assert!(store.contains(&key, Some(Duration::from_secs(60))));
        // an entry is never younger than zero
        assert!(!store.contains(&key, Some(Duration::ZERO)));
        // stale entries can still be read back
        assert!(store.get(&key).is_some());
    }
}

#[test]
fn test_put_overwrites() {
    for (_dir, store) in stores() {
        let key = RequestKey::for_testing("overwrite");
        let second_id = Uuid::new_v4();

        store
            .put(&key, Uuid::new_v4(), ContentKind::Text, Bytes::from("first"), "text/plain")
            .unwrap();
        store
            .put(&key, second_id, ContentKind::Raw, Bytes::from("second"), "")
            .unwrap();

        let entry = store.get(&key).unwrap();
        assert_eq!(entry.body, "second");
        assert_eq!(entry.metadata.correlation_id, second_id);
        assert_eq!(entry.metadata.content_kind, ContentKind::Raw);
    }
}

#[test]
fn test_clear() {
    for (_dir, store) in stores() {
        let a = RequestKey::for_testing("a");
        let b = RequestKey::for_testing("b");
        for key in [&a, &b] {
            store
                .put(key, Uuid::new_v4(), ContentKind::Raw, Bytes::from("x"), "")
                .unwrap();
        }

        store.clear().unwrap();

        assert!(store.get(&a).is_none());
        assert!(!store.contains(&b, None));

        // the store is still usable afterwards
        store
            .put(&a, Uuid::new_v4(), ContentKind::Raw, Bytes::from("y"), "")
            .unwrap();
        assert_eq!(store.get(&a).unwrap().body, "y");
    }
}

#[test]
fn test_fs_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let key = RequestKey::for_testing("persistent");
    {
        let store = FsCacheStore::new(dir.path()).unwrap();
        store
            .put(&key, Uuid::new_v4(), ContentKind::Raw, Bytes::from(vec![0u8, 159, 146]), "")
            .unwrap();
    }

    let store = FsCacheStore::new(dir.path()).unwrap();
    let entry = store.get(&key).unwrap();
    assert_eq!(&entry.body[..], &[0u8, 159, 146]);
}

#[test]
fn test_open_store_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        cache_dir: Some(dir.path().to_owned()),
        ..Default::default()
    };
    let store = open_store(&config).unwrap();
    let key = RequestKey::for_testing("configured");
    store
        .put(&key, Uuid::new_v4(), ContentKind::Raw, Bytes::from("x"), "")
        .unwrap();

    assert!(dir.path().join("responses").join(key.cache_path()).is_file());
}
