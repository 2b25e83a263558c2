// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use target::Target;

///
/// A content-addressed key: a namespace tag (`dex`, `pushed`, ...) plus the fingerprint of the
/// source bytes. Identical inputs always produce identical keys, which is the whole point.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(namespace: &str, source: &Path) -> Result<CacheKey, String> {
        let digest = hashing::hash_file(source)
            .map_err(|e| format!("Failed to fingerprint {}: {e}", source.display()))?;
        Ok(CacheKey(format!("{namespace}.{}", digest.hash.to_hex())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// A cache of whole artifacts on the host filesystem, keyed by content fingerprint.
///
/// Entries are published by copying to a unique temporary file under the cache root and then
/// renaming into place, so any file that is readable under its final name is complete: readers
/// may race writers but can never observe a partial artifact. Publishing an already-present key
/// is a no-op rather than an error.
///
#[derive(Clone, Debug)]
pub struct HostCache {
    root: PathBuf,
}

impl HostCache {
    pub fn new(root: PathBuf) -> Result<HostCache, String> {
        std::fs::create_dir_all(&root)
            .map_err(|e| format!("Failed to create cache root {}: {e}", root.display()))?;
        Ok(HostCache { root })
    }

    fn entry(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    ///
    /// Copies the cached entry for `key` to `destination` and returns true, or returns false
    /// when the key has never been published.
    ///
    pub async fn lookup(&self, key: &CacheKey, destination: &Path) -> Result<bool, String> {
        let entry = self.entry(key);
        if !tokio::fs::try_exists(&entry).await.unwrap_or(false) {
            return Ok(false);
        }
        tokio::fs::copy(&entry, destination).await.map_err(|e| {
            format!(
                "Failed to copy cache entry {key} to {}: {e}",
                destination.display()
            )
        })?;
        debug!("cache hit for {key}");
        Ok(true)
    }

    ///
    /// Publishes `source` under `key`. Concurrent publishes of the same key are safe: each
    /// writes its own temporary file, and the rename makes one of them the entry.
    ///
    pub async fn publish(&self, key: &CacheKey, source: &Path) -> Result<(), String> {
        let entry = self.entry(key);
        if tokio::fs::try_exists(&entry).await.unwrap_or(false) {
            return Ok(());
        }
        let root = self.root.clone();
        let source = source.to_owned();
        let staged = tokio::task::spawn_blocking(move || {
            let staged = tempfile::NamedTempFile::new_in(&root)
                .map_err(|e| format!("Failed to stage cache entry in {}: {e}", root.display()))?;
            std::fs::copy(&source, staged.path())
                .map_err(|e| format!("Failed to copy {} into cache: {e}", source.display()))?;
            Ok::<_, String>(staged)
        })
        .await
        .map_err(|e| format!("Cache publish task failed: {e}"))??;
        staged
            .persist(&entry)
            .map_err(|e| format!("Failed to publish cache entry {key}: {e}"))?;
        debug!("published cache entry {key}");
        Ok(())
    }
}

///
/// The same contract as `HostCache`, backed by a `Target`'s filesystem: used to keep one copy
/// of each pushed artifact on a device so that unchanged artifacts are never pushed twice.
///
/// The target is handed in as a capability at construction; the cache has no other knowledge of
/// the environment it lives on.
///
#[derive(Clone)]
pub struct TargetCache {
    target: Arc<dyn Target>,
    root: PathBuf,
}

impl TargetCache {
    pub fn new(target: Arc<dyn Target>, root: PathBuf) -> TargetCache {
        TargetCache { target, root }
    }

    pub async fn prepare(&self) -> Result<(), String> {
        self.target.mkdirs(&self.root).await
    }

    fn entry(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Copies the cached on-target entry to the on-target `destination`, if present.
    pub async fn lookup(&self, key: &CacheKey, destination: &Path) -> Result<bool, String> {
        let entry = self.entry(key);
        if !self.target.exists(&entry).await {
            return Ok(false);
        }
        self.target.cp(&entry, destination).await?;
        debug!("target cache hit for {key}");
        Ok(true)
    }

    ///
    /// Publishes a local file under `key` on the target: pushed to a temporary name first, then
    /// moved into place, mirroring the host cache's rename-after-copy discipline.
    ///
    pub async fn publish_from_local(&self, key: &CacheKey, source: &Path) -> Result<(), String> {
        let entry = self.entry(key);
        if self.target.exists(&entry).await {
            return Ok(());
        }
        let staged = self.root.join(format!("{}.tmp.{}", key.as_str(), std::process::id()));
        self.target.push(source, &staged).await?;
        self.target.mv(&staged, &entry).await?;
        debug!("published target cache entry {key}");
        Ok(())
    }
}

impl fmt::Debug for TargetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetCache")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
