// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage estimate sources.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ResilienceError, Result};

/// Raw estimate as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageEstimate {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

/// Narrow capability interface over the platform storage-estimate API.
#[async_trait]
pub trait StorageSignalSource: Send + Sync + 'static {
    async fn estimate(&self) -> Result<StorageEstimate>;
}

/// Measures a local data directory against a fixed byte budget.
#[derive(Debug, Clone)]
pub struct DirectoryStorageSource {
    root: PathBuf,
    quota_bytes: u64,
}

impl DirectoryStorageSource {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Sum of regular file sizes beneath `root`. A missing root counts as empty.
pub(crate) async fn directory_size(root: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else if meta.is_file() {
                total = total.saturating_add(meta.len());
            }
        }
    }
    Ok(total)
}

#[async_trait]
impl StorageSignalSource for DirectoryStorageSource {
    async fn estimate(&self) -> Result<StorageEstimate> {
        let used_bytes = directory_size(&self.root).await?;
        Ok(StorageEstimate {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

/// Deterministic fake with settable values and a read counter.
#[derive(Debug, Default)]
pub struct FixedStorageSource {
    estimate: Mutex<StorageEstimate>,
    failure: Mutex<Option<String>>,
    reads: AtomicU64,
}

impl FixedStorageSource {
    #[must_use]
    pub fn new(used_bytes: u64, quota_bytes: u64) -> Self {
        Self {
            estimate: Mutex::new(StorageEstimate { used_bytes, quota_bytes }),
            failure: Mutex::new(None),
            reads: AtomicU64::new(0),
        }
    }

    pub fn set(&self, used_bytes: u64, quota_bytes: u64) {
        *self.estimate.lock() = StorageEstimate { used_bytes, quota_bytes };
    }

    /// Make every estimate fail with `message` (`None` to recover).
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageSignalSource for FixedStorageSource {
    async fn estimate(&self) -> Result<StorageEstimate> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.lock().clone() {
            return Err(ResilienceError::Storage(message));
        }
        Ok(*self.estimate.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_source_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 100]).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("b.bin"), vec![0u8; 50]).unwrap();

        let source = DirectoryStorageSource::new(dir.path(), 1000);
        let estimate = source.estimate().await.unwrap();
        assert_eq!(estimate.used_bytes, 150);
        assert_eq!(estimate.quota_bytes, 1000);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryStorageSource::new(dir.path().join("absent"), 10);
        assert_eq!(source.estimate().await.unwrap().used_bytes, 0);
    }

    #[tokio::test]
    async fn test_fixed_source_failure_injection() {
        let source = FixedStorageSource::new(1, 2);
        assert_eq!(source.estimate().await.unwrap().used_bytes, 1);
        source.set_failure(Some("quota api unavailable"));
        assert!(source.estimate().await.is_err());
        source.set_failure(None);
        source.set(5, 10);
        assert_eq!(source.estimate().await.unwrap(), StorageEstimate { used_bytes: 5, quota_bytes: 10 });
        assert_eq!(source.reads(), 3);
    }
}
