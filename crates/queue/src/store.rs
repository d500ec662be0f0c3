use crate::error::{QueueError, Result};
use crate::types::{NewQueueRow, QueueCounts, QueueRow, QueueStatus};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex as AsyncMutex;

/// Maximum ids bound into a single `IN (...)` clause, matching the store's
/// parameter limit headroom.
const MAX_IDS_PER_STATEMENT: usize = 500;

/// A crash-safe, file-backed work queue. One instance owns one connection;
/// cross-process sharing is safe because the store runs in WAL mode.
#[derive(Clone)]
pub struct Queue {
    conn: Arc<AsyncMutex<Connection>>,
    wal_checkpoint_interval: u64,
    commits_since_checkpoint: Arc<AtomicU64>,
}

impl Queue {
    /// Open (creating if absent) the queue database at `path`.
    pub async fn open(path: PathBuf, wal_checkpoint_interval: u64) -> Result<Self> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
            conn.pragma_update(None, "cache_size", -64_000i64)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS queue (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    batch_id TEXT NOT NULL,
                    document TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL,
                    processing_started_at INTEGER,
                    worker_identity TEXT
                );
                CREATE INDEX IF NOT EXISTS queue_status_created_at_idx
                    ON queue (status, created_at);
                CREATE TABLE IF NOT EXISTS queue_metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT
                );",
            )?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(AsyncMutex::new(conn)),
            wal_checkpoint_interval,
            commits_since_checkpoint: Arc::new(AtomicU64::new(0)),
        })
    }

    pub async fn open_at(dir: &Path, wal_checkpoint_interval: u64) -> Result<Self> {
        Self::open(dir.join("queue.db"), wal_checkpoint_interval).await
    }

    /// Insert all rows in one transaction, all `pending`, sharing one
    /// `batch_id`.
    pub async fn enqueue(&self, rows: Vec<NewQueueRow>) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.clone();
        let now = unix_now();
        let count = rows.len();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO queue (batch_id, document, status, retry_count, created_at)
                     VALUES (?1, ?2, 'pending', 0, ?3)",
                )?;
                for row in &rows {
                    stmt.execute(rusqlite::params![row.batch_id, row.document.to_string(), now])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await??;
        Ok(count)
    }

    /// Atomically claim up to `n` pending rows in FIFO order.
    pub async fn dequeue(&self, n: usize, worker_identity: &str) -> Result<Vec<QueueRow>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.clone();
        let worker_identity = worker_identity.to_string();
        let now = unix_now();
        tokio::task::spawn_blocking(move || -> Result<Vec<QueueRow>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "UPDATE queue SET status = 'processing',
                     processing_started_at = ?1,
                     worker_identity = ?2
                 WHERE id IN (
                     SELECT id FROM queue WHERE status = 'pending'
                     ORDER BY created_at ASC LIMIT ?3
                 )
                 RETURNING id, batch_id, document, status, retry_count, created_at,
                           processing_started_at, worker_identity",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![now, worker_identity, n as i64], row_from_sql)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }

    /// Delete committed rows (persisted by the consumer).
    pub async fn commit(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.clone();
        let ids = ids.to_vec();
        let checkpoint_due = self.note_commits(ids.len() as u64);
        let wal_checkpoint_interval = self.wal_checkpoint_interval;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
                let placeholders = placeholders(chunk.len());
                let sql = format!("DELETE FROM queue WHERE id IN ({placeholders})");
                conn.execute(&sql, params_from_iter(chunk.iter()))?;
            }
            if checkpoint_due && wal_checkpoint_interval > 0 {
                conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
            }
            Ok(())
        })
        .await?
    }

    fn note_commits(&self, n: u64) -> bool {
        if self.wal_checkpoint_interval == 0 {
            return false;
        }
        let prev = self.commits_since_checkpoint.fetch_add(n, Ordering::Relaxed);
        let next = prev + n;
        if next >= self.wal_checkpoint_interval {
            self.commits_since_checkpoint.store(0, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Requeue failed/stale-delivery rows, bumping `retry_count` and moving
    /// to `failed` once the cap is reached.
    pub async fn requeue(&self, ids: &[i64], max_retries: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.clone();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
                let placeholders = placeholders(chunk.len());
                let sql = format!(
                    "UPDATE queue SET
                        retry_count = retry_count + 1,
                        status = CASE WHEN retry_count + 1 >= ?{n1} THEN 'failed' ELSE 'pending' END,
                        worker_identity = CASE WHEN retry_count + 1 >= ?{n1} THEN worker_identity ELSE NULL END,
                        processing_started_at = CASE WHEN retry_count + 1 >= ?{n1} THEN processing_started_at ELSE NULL END
                     WHERE id IN ({placeholders})",
                    n1 = chunk.len() + 1,
                );
                let mut bind: Vec<&dyn rusqlite::ToSql> =
                    chunk.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
                bind.push(&max_retries);
                conn.execute(&sql, bind.as_slice())?;
            }
            Ok(())
        })
        .await?
    }

    /// Requeue orphaned `processing` rows: those owned by a dead worker, and
    /// those whose lease has expired regardless of owner.
    pub async fn requeue_stale<F>(&self, stale_timeout: Duration, is_alive: F) -> Result<usize>
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        let conn = self.conn.clone();
        let stale_cutoff = unix_now() - stale_timeout.as_secs() as i64;
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let conn = conn.blocking_lock();

            let mut owners_stmt = conn.prepare(
                "SELECT DISTINCT worker_identity FROM queue
                 WHERE status = 'processing' AND worker_identity IS NOT NULL",
            )?;
            let owners = owners_stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(owners_stmt);

            let mut recovered = 0usize;

            for owner in owners {
                if is_alive(&owner) {
                    continue;
                }
                recovered += conn.execute(
                    "UPDATE queue SET status = 'pending', processing_started_at = NULL,
                         worker_identity = NULL
                     WHERE status = 'processing' AND worker_identity = ?1",
                    rusqlite::params![owner],
                )?;
            }

            recovered += conn.execute(
                "UPDATE queue SET status = 'pending', processing_started_at = NULL,
                     worker_identity = NULL
                 WHERE status = 'processing'
                   AND (processing_started_at IS NULL OR processing_started_at < ?1)",
                rusqlite::params![stale_cutoff],
            )?;

            Ok(recovered)
        })
        .await?
    }

    /// Remove all rows and enqueue-completion metadata, for clean rebuilds.
    pub async fn clear(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM queue", [])?;
            conn.execute(
                "DELETE FROM queue_metadata WHERE key IN \
                 ('enqueue_started_at', 'enqueue_completed', 'enqueue_commit_hash')",
                [],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn mark_enqueue_started(&self) -> Result<()> {
        self.set_metadata("enqueue_started_at", &unix_now().to_string())
            .await?;
        self.set_metadata("enqueue_completed", "false").await
    }

    pub async fn set_enqueue_commit_hash(&self, commit_hash: &str) -> Result<()> {
        self.set_metadata("enqueue_commit_hash", commit_hash).await
    }

    pub async fn mark_enqueue_completed(&self) -> Result<()> {
        self.set_metadata("enqueue_completed", "true").await
    }

    pub async fn is_enqueue_completed(&self) -> Result<bool> {
        Ok(self.get_metadata("enqueue_completed").await?.as_deref() == Some("true"))
    }

    /// Whether a `mark_enqueue_started()` call has ever been recorded. The
    /// Run Controller uses this together with [`Queue::is_enqueue_completed`]
    /// to detect a run that died mid-enqueue: started, never completed.
    pub async fn is_enqueue_started(&self) -> Result<bool> {
        Ok(self.get_metadata("enqueue_started_at").await?.is_some())
    }

    pub async fn enqueue_commit_hash(&self) -> Result<Option<String>> {
        self.get_metadata("enqueue_commit_hash").await
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO queue_metadata (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT value FROM queue_metadata WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(QueueError::from)
        })
        .await?
    }

    /// Grouped pending/processing/failed counts via a single grouped count
    /// query.
    pub async fn counts(&self) -> Result<QueueCounts> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<QueueCounts> {
            let conn = conn.blocking_lock();
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM queue GROUP BY status")?;
            let mut out = QueueCounts::default();
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let n: i64 = row.get(1)?;
                match QueueStatus::from_str(&status) {
                    Some(QueueStatus::Pending) => out.pending = n as u64,
                    Some(QueueStatus::Processing) => out.processing = n as u64,
                    Some(QueueStatus::Failed) => out.failed = n as u64,
                    None => {}
                }
            }
            Ok(out)
        })
        .await?
    }
}

fn row_from_sql(row: &rusqlite::Row) -> rusqlite::Result<QueueRow> {
    let document_raw: String = row.get(2)?;
    let document = serde_json::from_str(&document_raw).unwrap_or(serde_json::Value::Null);
    let status_raw: String = row.get(3)?;
    Ok(QueueRow {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        document,
        status: QueueStatus::from_str(&status_raw).unwrap_or(QueueStatus::Pending),
        retry_count: row.get(4)?,
        created_at: row.get(5)?,
        processing_started_at: row.get(6)?,
        worker_identity: row.get(7)?,
    })
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn new_queue() -> (Queue, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let queue = Queue::open_at(dir.path(), 0).await.unwrap();
        (queue, dir)
    }

    fn row(batch: &str, n: i64) -> NewQueueRow {
        NewQueueRow {
            batch_id: batch.to_string(),
            document: json!({ "n": n }),
        }
    }

    #[tokio::test]
    async fn enqueue_dequeue_commit_round_trip() {
        let (queue, _dir) = new_queue().await;
        queue
            .enqueue(vec![row("b1", 1), row("b1", 2), row("b1", 3)])
            .await
            .unwrap();

        let claimed = queue.dequeue(2, "worker-1").await.unwrap();
        assert_eq!(claimed.len(), 2);
        for r in &claimed {
            assert_eq!(r.status, QueueStatus::Processing);
        }

        let ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
        queue.commit(&ids).await.unwrap();

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 0);
    }

    #[tokio::test]
    async fn dequeue_never_double_claims() {
        let (queue, _dir) = new_queue().await;
        let mut rows = Vec::new();
        for i in 0..10 {
            rows.push(row("b1", i));
        }
        queue.enqueue(rows).await.unwrap();

        let a = queue.dequeue(5, "worker-a").await.unwrap();
        let b = queue.dequeue(5, "worker-b").await.unwrap();
        let a_ids: std::collections::HashSet<i64> = a.iter().map(|r| r.id).collect();
        let b_ids: std::collections::HashSet<i64> = b.iter().map(|r| r.id).collect();
        assert!(a_ids.is_disjoint(&b_ids));
        assert_eq!(a_ids.len() + b_ids.len(), 10);
    }

    #[tokio::test]
    async fn requeue_moves_to_failed_after_max_retries() {
        let (queue, _dir) = new_queue().await;
        queue.enqueue(vec![row("b1", 1)]).await.unwrap();
        let claimed = queue.dequeue(1, "worker-1").await.unwrap();
        let ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();

        queue.requeue(&ids, 2).await.unwrap();
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.pending, 1);

        let claimed = queue.dequeue(1, "worker-1").await.unwrap();
        let ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
        queue.requeue(&ids, 2).await.unwrap();
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn requeue_stale_recovers_dead_owners_and_expired_leases() {
        let (queue, _dir) = new_queue().await;
        queue.enqueue(vec![row("b1", 1), row("b1", 2)]).await.unwrap();
        queue.dequeue(2, "dead-worker").await.unwrap();

        let recovered = queue
            .requeue_stale(Duration::from_secs(3600), |_owner| false)
            .await
            .unwrap();
        assert_eq!(recovered, 2);
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.processing, 0);
    }

    #[tokio::test]
    async fn clear_removes_rows_and_metadata() {
        let (queue, _dir) = new_queue().await;
        queue.enqueue(vec![row("b1", 1)]).await.unwrap();
        queue.mark_enqueue_started().await.unwrap();
        queue.mark_enqueue_completed().await.unwrap();

        queue.clear().await.unwrap();
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.total(), 0);
        assert!(!queue.is_enqueue_completed().await.unwrap());
    }

    #[tokio::test]
    async fn enqueue_lifecycle_metadata_round_trips() {
        let (queue, _dir) = new_queue().await;
        assert!(!queue.is_enqueue_completed().await.unwrap());
        queue.mark_enqueue_started().await.unwrap();
        queue.set_enqueue_commit_hash("deadbeef").await.unwrap();
        queue.mark_enqueue_completed().await.unwrap();
        assert!(queue.is_enqueue_completed().await.unwrap());
        assert_eq!(
            queue.enqueue_commit_hash().await.unwrap().as_deref(),
            Some("deadbeef")
        );
    }
}
