// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache eviction: drop synced local entries older than a retention window.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::error::Result;

/// What an eviction pass removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EvictionReport {
    pub entries_removed: u64,
    pub bytes_freed: u64,
}

#[async_trait]
pub trait CacheEvictor: Send + Sync + 'static {
    /// Remove cached entries whose age is at least `retention`.
    async fn evict_older_than(&self, retention: Duration) -> Result<EvictionReport>;
}

/// Deletes files under a cache directory by modification time.
#[derive(Debug, Clone)]
pub struct DirectoryCacheEvictor {
    root: PathBuf,
}

impl DirectoryCacheEvictor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CacheEvictor for DirectoryCacheEvictor {
    async fn evict_older_than(&self, retention: Duration) -> Result<EvictionReport> {
        let now = SystemTime::now();
        let mut report = EvictionReport::default();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    stack.push(entry.path());
                    continue;
                }
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .unwrap_or(Duration::ZERO);
                if age < retention {
                    continue;
                }
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        report.entries_removed += 1;
                        report.bytes_freed = report.bytes_freed.saturating_add(meta.len());
                        debug!(path = %entry.path().display(), "Evicted cache entry");
                    }
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Failed to evict cache entry");
                    }
                }
            }
        }

        info!(
            removed = report.entries_removed,
            bytes = report.bytes_freed,
            retention_secs = retention.as_secs(),
            "Cache eviction complete"
        );
        crate::metrics::record_eviction(report.entries_removed, report.bytes_freed);
        Ok(report)
    }
}
