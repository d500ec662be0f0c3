//! The Producer's bounded pool of long-lived parsing workers.
//!
//! Grounded on the teacher's `limits.rs` semaphore-guard idiom
//! (`acquire_indexing_permit` returning an `IndexingPermit` whose `Drop`
//! releases the slot), generalized from "a counting permit" to "an owned
//! worker handle returned to an idle stack on `Drop`". Each worker owns a
//! long-lived [`code_chunker::Chunker`] and is messaged one file at a time
//! over a `tokio::sync::mpsc` channel; the coordinator awaits exactly one
//! `oneshot` response per request, which replaces the original system's
//! paired success/failure listener pair with a single channel that can only
//! ever be fulfilled once.

use code_chunker::{Chunker, ChunkerConfig, ChunkingStats};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

pub struct ParseRequest {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    reply: oneshot::Sender<ParseOutcome>,
}

#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Success {
        chunks: Vec<code_chunker::Chunk>,
        stats: ChunkingStats,
        file_hash: String,
    },
    Failure {
        error: String,
    },
}

/// A long-lived parsing worker's send half, leased from the pool's idle
/// stack for the duration of one request and returned on `Drop`.
struct WorkerLease {
    tx: Option<mpsc::Sender<ParseRequest>>,
    idle_tx: mpsc::Sender<mpsc::Sender<ParseRequest>>,
}

impl WorkerLease {
    /// The worker is dead or unresponsive; do not return it to the idle
    /// stack. The pool shrinks by one rather than risk re-queuing a sender
    /// whose receiver has already gone away.
    fn discard(mut self) {
        self.tx = None;
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = self.idle_tx.try_send(tx);
        }
    }
}

/// Bounded pool of reusable parsing workers. `parse` suspends until a
/// worker is idle, so callers may spawn far more concurrent `parse` futures
/// than `size()` without overrunning it.
pub struct WorkerPool {
    idle_rx: tokio::sync::Mutex<mpsc::Receiver<mpsc::Sender<ParseRequest>>>,
    idle_tx: mpsc::Sender<mpsc::Sender<ParseRequest>>,
    size: usize,
    _workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize, config: ChunkerConfig) -> Self {
        let size = size.max(1);
        let (idle_tx, idle_rx) = mpsc::channel(size);
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = mpsc::channel::<ParseRequest>(1);
            workers.push(tokio::spawn(worker_loop(rx, config.clone())));
            idle_tx
                .try_send(tx)
                .expect("idle channel sized to pool capacity");
        }
        Self {
            idle_rx: tokio::sync::Mutex::new(idle_rx),
            idle_tx,
            size,
            _workers: workers,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Parse one file on an idle worker, suspending until one is free.
    pub async fn parse(&self, absolute_path: PathBuf, relative_path: String) -> ParseOutcome {
        let worker_tx = {
            let mut rx = self.idle_rx.lock().await;
            match rx.recv().await {
                Some(tx) => tx,
                None => {
                    return ParseOutcome::Failure {
                        error: "worker pool has no live workers".to_string(),
                    }
                }
            }
        };

        let lease = WorkerLease {
            tx: Some(worker_tx.clone()),
            idle_tx: self.idle_tx.clone(),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ParseRequest {
            absolute_path,
            relative_path: relative_path.clone(),
            reply: reply_tx,
        };

        if worker_tx.send(request).await.is_err() {
            lease.discard();
            return ParseOutcome::Failure {
                error: format!("worker for {relative_path} is no longer accepting work"),
            };
        }

        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                lease.discard();
                ParseOutcome::Failure {
                    error: format!("worker died while parsing {relative_path}"),
                }
            }
        }
        // `lease` drops here, returning the worker's sender to the idle
        // stack on the success path.
    }
}

async fn worker_loop(mut rx: mpsc::Receiver<ParseRequest>, config: ChunkerConfig) {
    let chunker = Chunker::new(config);
    while let Some(request) = rx.recv().await {
        let outcome = parse_one(&chunker, &request.absolute_path, &request.relative_path);
        let _ = request.reply.send(outcome);
    }
}

fn parse_one(chunker: &Chunker, absolute_path: &std::path::Path, relative_path: &str) -> ParseOutcome {
    let content = match std::fs::read_to_string(absolute_path) {
        Ok(content) => content,
        Err(e) => {
            return ParseOutcome::Failure {
                error: format!("read {relative_path}: {e}"),
            }
        }
    };

    match chunker.chunk_file(relative_path, &content) {
        Ok((chunks, stats)) => ParseOutcome::Success {
            chunks,
            stats,
            file_hash: sha256_hex(content.as_bytes()),
        },
        Err(e) => ParseOutcome::Failure {
            error: format!("chunk {relative_path}: {e}"),
        },
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn parses_a_file_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        fs::write(&file, "fn hello() {}\n").unwrap();

        let pool = WorkerPool::new(2, ChunkerConfig::default());
        let outcome = pool.parse(file, "a.rs".to_string()).await;
        match outcome {
            ParseOutcome::Success { chunks, file_hash, .. } => {
                assert!(!chunks.is_empty());
                assert_eq!(file_hash.len(), 64);
            }
            ParseOutcome::Failure { error } => panic!("expected success, got {error}"),
        }
    }

    #[tokio::test]
    async fn missing_file_yields_failure_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(1, ChunkerConfig::default());
        let outcome = pool
            .parse(dir.path().join("missing.rs"), "missing.rs".to_string())
            .await;
        assert!(matches!(outcome, ParseOutcome::Failure { .. }));
    }

    #[tokio::test]
    async fn pool_serializes_work_across_single_worker() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = Vec::new();
        for i in 0..5 {
            let path = dir.path().join(format!("f{i}.rs"));
            fs::write(&path, format!("fn f{i}() {{}}\n")).unwrap();
            files.push(path);
        }

        let pool = std::sync::Arc::new(WorkerPool::new(1, ChunkerConfig::default()));
        let mut join_set = tokio::task::JoinSet::new();
        for (i, path) in files.into_iter().enumerate() {
            let pool = pool.clone();
            join_set.spawn(async move { pool.parse(path, format!("f{i}.rs")).await });
        }
        let mut successes = 0;
        while let Some(res) = join_set.join_next().await {
            if matches!(res.unwrap(), ParseOutcome::Success { .. }) {
                successes += 1;
            }
        }
        assert_eq!(successes, 5);
    }
}
