// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed durable queue.
//!
//! Survives process restarts. Schema:
//! ```sql
//! CREATE TABLE pending_actions (
//!   seq INTEGER PRIMARY KEY,      -- enqueue order
//!   id TEXT NOT NULL UNIQUE,
//!   action_name TEXT NOT NULL,
//!   payload BLOB NOT NULL,
//!   enqueued_at INTEGER NOT NULL, -- epoch millis
//!   attempts INTEGER NOT NULL,
//!   max_attempts INTEGER NOT NULL,
//!   next_attempt_at INTEGER NOT NULL,
//!   status TEXT NOT NULL,         -- queued | in_flight | dead_letter
//!   last_error TEXT
//! )
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::pending_action::PendingAction;
use super::queue_store::{QueueStore, SyncCounters};
use crate::error::Result;

pub struct SqliteQueueStore {
    pool: SqlitePool,
    path: Option<String>,
}

impl SqliteQueueStore {
    /// Open (or create) a queue database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let url = format!("sqlite://{}?mode=rwc", path_str);
        info!(path = %path_str, "Opening durable sync queue");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&url)
            .await?;

        // WAL mode: concurrent readers while the flush worker writes
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

        let store = Self {
            pool,
            path: Some(path_str),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database (lost on drop).
    pub async fn in_memory() -> Result<Self> {
        // One connection that never idles out, or the database disappears
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool, path: None };
        store.init_schema().await?;
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_actions (
                seq INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                action_name TEXT NOT NULL,
                payload BLOB NOT NULL,
                enqueued_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                next_attempt_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Sync queue schema ready");
        Ok(())
    }

    fn row_to_action(row: &SqliteRow) -> Result<PendingAction> {
        let status: String = row.try_get("status")?;
        Ok(PendingAction {
            seq: row.try_get::<i64, _>("seq")? as u64,
            id: row.try_get("id")?,
            action_name: row.try_get("action_name")?,
            payload: row.try_get("payload")?,
            enqueued_at: row.try_get("enqueued_at")?,
            attempts: row.try_get::<i64, _>("attempts")? as u32,
            max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
            next_attempt_at: row.try_get("next_attempt_at")?,
            status: status.parse()?,
            last_error: row.try_get("last_error")?,
        })
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(&self, action: &PendingAction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_actions
                (seq, id, action_name, payload, enqueued_at, attempts, max_attempts, next_attempt_at, status, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(action.seq as i64)
        .bind(&action.id)
        .bind(&action.action_name)
        .bind(&action.payload)
        .bind(action.enqueued_at)
        .bind(i64::from(action.attempts))
        .bind(i64::from(action.max_attempts))
        .bind(action.next_attempt_at)
        .bind(action.status.as_str())
        .bind(&action.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, action: &PendingAction) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE pending_actions
            SET attempts = ?, next_attempt_at = ?, status = ?, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(action.attempts))
        .bind(action.next_attempt_at)
        .bind(action.status.as_str())
        .bind(&action.last_error)
        .bind(&action.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(crate::error::ResilienceError::NotFound(action.id.clone()));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pending_actions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_all(&self) -> Result<Vec<PendingAction>> {
        let rows = sqlx::query("SELECT * FROM pending_actions ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_action).collect()
    }

    async fn load_counters(&self) -> Result<SyncCounters> {
        let rows = sqlx::query("SELECT name, value FROM sync_counters")
            .fetch_all(&self.pool)
            .await?;
        let mut counters = SyncCounters::default();
        for row in rows {
            let name: String = row.try_get("name")?;
            let value = row.try_get::<i64, _>("value")?.max(0) as u64;
            match name.as_str() {
                "total_queued" => counters.total_queued = value,
                "completed" => counters.completed = value,
                "failed" => counters.failed = value,
                _ => {}
            }
        }
        Ok(counters)
    }

    async fn save_counters(&self, counters: &SyncCounters) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (name, value) in [
            ("total_queued", counters.total_queued),
            ("completed", counters.completed),
            ("failed", counters.failed),
        ] {
            sqlx::query(
                "INSERT INTO sync_counters (name, value) VALUES (?, ?) \
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            )
            .bind(name)
            .bind(value as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::pending_action::ActionStatus;

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteQueueStore::in_memory().await.unwrap();
        let mut a = PendingAction::new(1, "crew.update", b"{\"id\":1}".to_vec(), 1_000, 5);
        let b = PendingAction::new(2, "audit.submit", vec![0, 159, 146, 150], 1_001, 3);
        store.insert(&b).await.unwrap();
        store.insert(&a).await.unwrap();

        a.attempts = 1;
        a.next_attempt_at = 5_000;
        a.last_error = Some("503".into());
        store.update(&a).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], a);
        assert_eq!(all[1], b);

        assert!(store.remove(&a.id).await.unwrap());
        assert!(!store.remove(&a.id).await.unwrap());
        assert!(store.update(&a).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let mut dead = PendingAction::new(7, "doc.upload", b"x".to_vec(), 0, 5);
        {
            let store = SqliteQueueStore::open(&path).await.unwrap();
            store.insert(&dead).await.unwrap();
            dead.status = ActionStatus::DeadLetter;
            dead.attempts = 5;
            store.update(&dead).await.unwrap();
            store
                .save_counters(&SyncCounters {
                    total_queued: 9,
                    completed: 8,
                    failed: 1,
                })
                .await
                .unwrap();
            store.close().await;
        }

        let store = SqliteQueueStore::open(&path).await.unwrap();
        assert_eq!(store.path(), Some(path.to_string_lossy().as_ref()));
        assert_eq!(store.load_all().await.unwrap(), vec![dead]);
        assert_eq!(store.load_counters().await.unwrap().completed, 8);
    }

    #[tokio::test]
    async fn test_counters_default_to_zero() {
        let store = SqliteQueueStore::in_memory().await.unwrap();
        assert_eq!(store.load_counters().await.unwrap(), SyncCounters::default());
    }
}
