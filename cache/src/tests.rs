// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::PathBuf;
use std::sync::Arc;

use target::{LocalTarget, Target};

use super::{CacheKey, HostCache, TargetCache};

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn keys_are_stable_and_namespaced() {
    let dir = tempfile::TempDir::new().unwrap();
    let a = write_file(&dir, "a", b"identical bytes");
    let b = write_file(&dir, "b", b"identical bytes");
    let c = write_file(&dir, "c", b"different bytes");

    assert_eq!(
        CacheKey::compute("dex", &a).unwrap(),
        CacheKey::compute("dex", &b).unwrap()
    );
    assert_ne!(
        CacheKey::compute("dex", &a).unwrap(),
        CacheKey::compute("dex", &c).unwrap()
    );
    assert_ne!(
        CacheKey::compute("dex", &a).unwrap(),
        CacheKey::compute("pushed", &a).unwrap()
    );
    assert!(CacheKey::compute("dex", &a).unwrap().as_str().starts_with("dex."));
}

#[tokio::test]
async fn publish_then_lookup_roundtrips() {
    let dir = tempfile::TempDir::new().unwrap();
    let cache = HostCache::new(dir.path().join("cache")).unwrap();
    let source = write_file(&dir, "artifact.jar", b"jar bytes");
    let key = CacheKey::compute("dex", &source).unwrap();

    let destination = dir.path().join("out.jar");
    assert!(!cache.lookup(&key, &destination).await.unwrap());

    cache.publish(&key, &source).await.unwrap();
    assert!(cache.lookup(&key, &destination).await.unwrap());
    assert_eq!(std::fs::read(&destination).unwrap(), b"jar bytes");
}

#[tokio::test]
async fn publish_is_idempotent() {
    let dir = tempfile::TempDir::new().unwrap();
    let cache = HostCache::new(dir.path().join("cache")).unwrap();
    let source = write_file(&dir, "artifact.jar", b"jar bytes");
    let key = CacheKey::compute("dex", &source).unwrap();

    cache.publish(&key, &source).await.unwrap();
    cache.publish(&key, &source).await.unwrap();

    // Exactly one complete entry, no leftover staging files.
    let entries: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec![key.as_str().to_owned()]);
}

#[tokio::test]
async fn concurrent_publishes_leave_a_complete_entry() {
    let dir = tempfile::TempDir::new().unwrap();
    let cache = HostCache::new(dir.path().join("cache")).unwrap();
    let source = write_file(&dir, "artifact.jar", &vec![7_u8; 64 * 1024]);
    let key = CacheKey::compute("dex", &source).unwrap();

    let publishes = (0..8).map(|_| {
        let cache = cache.clone();
        let key = key.clone();
        let source = source.clone();
        tokio::spawn(async move { cache.publish(&key, &source).await })
    });
    for publish in publishes {
        publish.await.unwrap().unwrap();
    }

    let destination = dir.path().join("out.jar");
    assert!(cache.lookup(&key, &destination).await.unwrap());
    assert_eq!(std::fs::read(&destination).unwrap(), vec![7_u8; 64 * 1024]);
}

#[tokio::test]
async fn target_cache_roundtrips_through_a_target() {
    let dir = tempfile::TempDir::new().unwrap();
    let target: Arc<dyn Target> = Arc::new(LocalTarget::new());
    let cache = TargetCache::new(target, dir.path().join("device-cache"));
    cache.prepare().await.unwrap();

    let source = write_file(&dir, "classes.jar", b"dexed");
    let key = CacheKey::compute("pushed", &source).unwrap();
    let destination = dir.path().join("deployed.jar");

    assert!(!cache.lookup(&key, &destination).await.unwrap());
    cache.publish_from_local(&key, &source).await.unwrap();
    cache.publish_from_local(&key, &source).await.unwrap();
    assert!(cache.lookup(&key, &destination).await.unwrap());
    assert_eq!(std::fs::read(&destination).unwrap(), b"dexed");
}
