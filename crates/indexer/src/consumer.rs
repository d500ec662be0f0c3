//! Drains the Work Queue via the Search Backend Adapter. Grounded on
//! `spec.md` §4.5's main-loop pseudocode: bounded in-flight batches tracked
//! with a `tokio::task::JoinSet`, rather than a counting semaphore, so the
//! "wait for one to finish" step is a direct `join_next().await`.

use crate::error::Result;
use crate::stats::RunStats;
use indexer_queue::{Queue, QueueRow};
use indexer_search_backend::{SearchBackend, UpsertInput, UpsertOutcome};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub concurrency: usize,
    pub batch_size: usize,
    pub max_retries: i64,
    pub stale_timeout: Duration,
    pub watch: bool,
    pub polling_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 500,
            max_retries: 5,
            stale_timeout: Duration::from_secs(300),
            watch: false,
            polling_interval: Duration::from_secs(2),
        }
    }
}

pub struct Consumer {
    queue: Queue,
    backend: Arc<dyn SearchBackend>,
    index: String,
    worker_identity: String,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(queue: Queue, backend: Arc<dyn SearchBackend>, index: String, config: ConsumerConfig) -> Self {
        Self {
            queue,
            backend,
            index,
            worker_identity: worker_identity(),
            config,
        }
    }

    /// Drains the queue. In watch mode this only returns on an unrecoverable
    /// error; callers should otherwise treat it as running forever.
    pub async fn run(&self) -> Result<RunStats> {
        self.queue.requeue_stale(self.config.stale_timeout, is_process_alive).await?;

        let mut stats = RunStats::new();
        let mut in_flight: tokio::task::JoinSet<RunStats> = tokio::task::JoinSet::new();

        loop {
            if in_flight.len() >= self.config.concurrency {
                if let Some(joined) = in_flight.join_next().await {
                    stats.merge(&joined.map_err(|e| crate::error::IndexerError::Other(e.to_string()))?);
                }
                continue;
            }

            let rows = self.queue.dequeue(self.config.batch_size, &self.worker_identity).await?;
            if !rows.is_empty() {
                let queue = self.queue.clone();
                let backend = self.backend.clone();
                let index = self.index.clone();
                let max_retries = self.config.max_retries;
                in_flight.spawn(async move { process_batch(&queue, backend.as_ref(), &index, rows, max_retries).await });
            } else if self.config.watch {
                tokio::time::sleep(self.config.polling_interval).await;
            } else if in_flight.is_empty() {
                break;
            } else if let Some(joined) = in_flight.join_next().await {
                stats.merge(&joined.map_err(|e| crate::error::IndexerError::Other(e.to_string()))?);
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            stats.merge(&joined.map_err(|e| crate::error::IndexerError::Other(e.to_string()))?);
        }
        Ok(stats)
    }
}

/// `bulk_upsert` one batch, mapping successes/failures back to rows **by
/// input index** (never by `chunk_id` — content-collisions would otherwise
/// leave rows stuck), then commit the succeeded rows and requeue the
/// failed ones. A transport-level error fails and requeues the whole batch.
async fn process_batch(
    queue: &Queue,
    backend: &dyn SearchBackend,
    index: &str,
    rows: Vec<QueueRow>,
    max_retries: i64,
) -> RunStats {
    let mut stats = RunStats::new();
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

    let inputs: Vec<Option<UpsertInput>> = rows
        .iter()
        .map(|r| serde_json::from_value::<UpsertInput>(r.document.clone()).ok())
        .collect();
    let valid_indices: Vec<usize> = inputs
        .iter()
        .enumerate()
        .filter_map(|(i, input)| input.as_ref().map(|_| i))
        .collect();
    let valid_inputs: Vec<UpsertInput> = valid_indices.iter().map(|&i| inputs[i].clone().unwrap()).collect();

    let mut malformed: Vec<i64> = inputs
        .iter()
        .enumerate()
        .filter(|(_, input)| input.is_none())
        .map(|(i, _)| rows[i].id)
        .collect();

    let outcomes = match backend.bulk_upsert(&valid_inputs, index).await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            log::warn!("bulk_upsert failed for batch of {}: {e}", ids.len());
            if let Err(requeue_err) = queue.requeue(&ids, max_retries).await {
                log::error!("best-effort requeue after transport failure also failed: {requeue_err}");
            }
            stats.rows_requeued += ids.len();
            return stats;
        }
    };

    let mut committed = Vec::new();
    let mut requeued = Vec::new();
    for (outcome_idx, outcome) in outcomes.into_iter().enumerate() {
        let row_idx = valid_indices[outcome_idx];
        let row_id = rows[row_idx].id;
        match outcome {
            UpsertOutcome::Success => committed.push(row_id),
            UpsertOutcome::Failure(reason) => {
                log::warn!("row {row_id} failed bulk upsert: {reason}");
                requeued.push(row_id);
            }
        }
    }
    requeued.append(&mut malformed);

    if !committed.is_empty() {
        if let Err(e) = queue.commit(&committed).await {
            log::error!("failed to commit {} rows: {e}", committed.len());
        } else {
            stats.rows_committed += committed.len();
        }
    }
    if !requeued.is_empty() {
        if let Err(e) = queue.requeue(&requeued, max_retries).await {
            log::error!("failed to requeue {} rows: {e}", requeued.len());
        } else {
            stats.rows_requeued += requeued.len();
        }
    }

    stats
}

fn worker_identity() -> String {
    format!("{}-{}", std::process::id(), unix_now_ms())
}

/// Liveness probe for `requeue_stale`'s dead-owner detection. The queue is a
/// local embedded store, so worker identities are same-host PIDs; liveness
/// is simply "does `/proc/<pid>` still exist". This only holds for
/// same-host consumers sharing one queue directory.
fn is_process_alive(worker_identity: &str) -> bool {
    let Some(pid_str) = worker_identity.split('-').next() else {
        return false;
    };
    let Ok(pid) = pid_str.parse::<u32>() else {
        return false;
    };
    if pid == std::process::id() {
        return true;
    }
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

fn unix_now_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_search_backend::{ChunkDocument, FakeSearchBackend, LocationDocument};
    use serde_json::json;

    fn upsert_input(chunk_id: &str, file_path: &str) -> UpsertInput {
        UpsertInput {
            chunk: ChunkDocument {
                chunk_id: chunk_id.to_string(),
                language: "rust".to_string(),
                kind: "function_item".to_string(),
                container_path: String::new(),
                imports: vec![],
                exports: vec![],
                symbols: vec![],
                content: "fn f() {}".to_string(),
                semantic_text: "language: rust\n".to_string(),
            },
            location: LocationDocument {
                location_id: format!("{chunk_id}-loc"),
                chunk_id: chunk_id.to_string(),
                file_path: file_path.to_string(),
                directory_path: String::new(),
                directory_name: String::new(),
                directory_depth: 0,
                start_line: 1,
                end_line: 1,
                git_branch: "main".to_string(),
                git_file_hash: "h".to_string(),
                created_at: 0,
                updated_at: 0,
            },
        }
    }

    #[tokio::test]
    async fn drains_queue_and_commits_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Queue::open_at(dir.path(), 0).await.unwrap();
        let mut rows = Vec::new();
        for i in 0..10 {
            rows.push(indexer_queue::NewQueueRow {
                batch_id: "b1".to_string(),
                document: serde_json::to_value(upsert_input(&format!("c{i}"), &format!("f{i}.rs"))).unwrap(),
            });
        }
        queue.enqueue(rows).await.unwrap();

        let backend: Arc<dyn SearchBackend> = Arc::new(FakeSearchBackend::new());
        let consumer = Consumer::new(
            queue.clone(),
            backend,
            "idx".to_string(),
            ConsumerConfig {
                concurrency: 2,
                batch_size: 3,
                ..ConsumerConfig::default()
            },
        );

        let stats = consumer.run().await.unwrap();
        assert_eq!(stats.rows_committed, 10);
        assert_eq!(stats.rows_requeued, 0);
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.total(), 0);
    }

    #[tokio::test]
    async fn malformed_document_is_requeued_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Queue::open_at(dir.path(), 0).await.unwrap();
        queue
            .enqueue(vec![indexer_queue::NewQueueRow {
                batch_id: "b1".to_string(),
                document: json!({ "not": "a valid upsert input" }),
            }])
            .await
            .unwrap();

        let backend: Arc<dyn SearchBackend> = Arc::new(FakeSearchBackend::new());
        let consumer = Consumer::new(
            queue.clone(),
            backend,
            "idx".to_string(),
            ConsumerConfig {
                concurrency: 1,
                batch_size: 10,
                max_retries: 5,
                ..ConsumerConfig::default()
            },
        );
        let stats = consumer.run().await.unwrap();
        assert_eq!(stats.rows_requeued, 1);
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
    }
}
