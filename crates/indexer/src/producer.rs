//! Runs the Chunker across a repository's files and enqueues the results.
//! File selection (full scan vs. status-classified incremental diff),
//! worker-pool dispatch and the enqueue lifecycle are all driven from here;
//! grounded on `spec.md` §4.4.

use crate::error::{IndexerError, Result};
use crate::git::{ChangeStatus, ChangedFile};
use crate::stats::RunStats;
use crate::worker_pool::{ParseOutcome, WorkerPool};
use code_chunker::{Chunk, Language, LanguageRegistry};
use indexer_queue::{NewQueueRow, Queue};
use indexer_search_backend::{ChunkDocument, LocationDocument, SearchBackend, UpsertInput};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct Producer {
    queue: Queue,
    backend: Arc<dyn SearchBackend>,
    pool: Arc<WorkerPool>,
    index: String,
    branch: String,
    max_queue_size: Option<usize>,
}

/// How long to sleep between backlog checks while `enqueue_files` is
/// throttled by `max_queue_size`.
const BACKPRESSURE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

impl Producer {
    pub fn new(
        queue: Queue,
        backend: Arc<dyn SearchBackend>,
        pool: Arc<WorkerPool>,
        index: String,
        branch: String,
    ) -> Self {
        Self {
            queue,
            backend,
            pool,
            index,
            branch,
            max_queue_size: None,
        }
    }

    /// Caps how many pending rows may sit in the queue at once; once
    /// reached, `enqueue_files` blocks new batches until the Consumer has
    /// drained it back below the limit. `None` (the default) is unbounded.
    pub fn with_max_queue_size(mut self, max_queue_size: Option<usize>) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    async fn wait_for_backlog_headroom(&self) -> Result<()> {
        let Some(max) = self.max_queue_size else {
            return Ok(());
        };
        loop {
            let counts = self.queue.counts().await?;
            if (counts.pending as usize) < max {
                return Ok(());
            }
            tokio::time::sleep(BACKPRESSURE_POLL_INTERVAL).await;
        }
    }

    /// Full file selection: enqueue every file the scanner found.
    pub async fn run_full(&self, repo_root: &Path, files: Vec<PathBuf>, head: &str) -> Result<RunStats> {
        self.queue.mark_enqueue_started().await?;
        let stats = self.enqueue_files(repo_root, files).await?;
        self.queue.set_enqueue_commit_hash(head).await?;
        self.queue.mark_enqueue_completed().await?;
        Ok(stats)
    }

    /// Incremental file selection: dispatch on each changed file's A/M/D/R/C
    /// status. `M` pre-deletes even if the extension is no longer enabled,
    /// so a shrinking language set still purges stale locations.
    pub async fn run_incremental(
        &self,
        repo_root: &Path,
        changes: Vec<ChangedFile>,
        head: &str,
        registry: &LanguageRegistry,
    ) -> Result<RunStats> {
        self.queue.mark_enqueue_started().await?;
        let mut stats = RunStats::new();
        let mut to_index = Vec::new();

        for change in changes {
            let enabled = registry.language_for_path(&change.path) != Language::Unknown;
            match change.status {
                ChangeStatus::Added => {
                    if enabled {
                        to_index.push(change.path);
                    }
                }
                ChangeStatus::Modified => {
                    self.delete_path(&change.path).await?;
                    if enabled {
                        to_index.push(change.path);
                    }
                }
                ChangeStatus::Deleted => {
                    self.delete_path(&change.path).await?;
                }
                ChangeStatus::Renamed => {
                    if let Some(old) = &change.old_path {
                        self.delete_path(old).await?;
                    }
                    if enabled {
                        to_index.push(change.path);
                    }
                }
                ChangeStatus::Copied => {
                    if enabled {
                        to_index.push(change.path);
                    }
                }
            }
        }

        let file_stats = self.enqueue_files(repo_root, to_index).await?;
        stats.merge(&file_stats);
        self.queue.set_enqueue_commit_hash(head).await?;
        self.queue.mark_enqueue_completed().await?;
        Ok(stats)
    }

    async fn delete_path(&self, relative: &Path) -> Result<()> {
        let file_path = to_forward_slash(relative);
        self.backend.delete_by_file_path(&file_path, &self.index).await?;
        Ok(())
    }

    async fn enqueue_files(&self, repo_root: &Path, files: Vec<PathBuf>) -> Result<RunStats> {
        let mut stats = RunStats::new();
        if files.is_empty() {
            return Ok(stats);
        }

        let mut join_set = tokio::task::JoinSet::new();
        for absolute_path in files {
            let relative_path = relative_path_of(repo_root, &absolute_path);
            let pool = self.pool.clone();
            join_set.spawn(async move {
                let outcome = pool.parse(absolute_path, relative_path.clone()).await;
                (relative_path, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (relative_path, outcome) =
                joined.map_err(|e| IndexerError::Other(format!("parse task panicked: {e}")))?;
            match outcome {
                ParseOutcome::Success {
                    chunks,
                    stats: parse_stats,
                    file_hash,
                } => {
                    let language = chunks
                        .first()
                        .map(|c| c.language.clone())
                        .unwrap_or_else(|| "unknown".to_string());
                    stats.add_file(&language);
                    stats.add_chunks(parse_stats.chunks_produced, parse_stats.chunks_skipped);
                    if chunks.is_empty() {
                        continue;
                    }
                    let rows = self.build_rows(&chunks, &relative_path, &file_hash)?;
                    self.wait_for_backlog_headroom().await?;
                    self.queue.enqueue(rows).await?;
                }
                ParseOutcome::Failure { error } => {
                    log::warn!("parse failed for {relative_path}: {error}");
                    stats.add_file_failure(format!("{relative_path}: {error}"));
                }
            }
        }

        Ok(stats)
    }

    fn build_rows(&self, chunks: &[Chunk], relative_path: &str, file_hash: &str) -> Result<Vec<NewQueueRow>> {
        let now = unix_now_ms();
        let batch_id = format!("{relative_path}@{now}");
        let (directory_path, directory_name, directory_depth) = directory_parts(relative_path);

        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let chunk_id = chunk.chunk_id();
            let loc_id = location_id(&chunk_id, relative_path, &self.branch, chunk.start_line, chunk.end_line);

            let chunk_doc = ChunkDocument {
                chunk_id: chunk_id.clone(),
                language: chunk.language.clone(),
                kind: chunk.kind.clone(),
                container_path: chunk.container_path.clone(),
                imports: chunk.imports.iter().map(convert_import).collect(),
                exports: chunk.exports.iter().map(convert_export).collect(),
                symbols: chunk.symbols.iter().map(convert_symbol).collect(),
                content: chunk.content.clone(),
                semantic_text: chunk.semantic_text(),
            };
            let location_doc = LocationDocument {
                location_id: loc_id,
                chunk_id,
                file_path: relative_path.to_string(),
                directory_path: directory_path.clone(),
                directory_name: directory_name.clone(),
                directory_depth,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                git_branch: self.branch.clone(),
                git_file_hash: file_hash.to_string(),
                created_at: now,
                updated_at: now,
            };
            let document = serde_json::to_value(UpsertInput {
                chunk: chunk_doc,
                location: location_doc,
            })?;
            rows.push(NewQueueRow {
                batch_id: batch_id.clone(),
                document,
            });
        }
        Ok(rows)
    }
}

fn relative_path_of(repo_root: &Path, absolute_path: &Path) -> String {
    let relative = absolute_path.strip_prefix(repo_root).unwrap_or(absolute_path);
    to_forward_slash(relative)
}

fn to_forward_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn directory_parts(relative_path: &str) -> (String, String, usize) {
    let path = Path::new(relative_path);
    let directory_path = path
        .parent()
        .map(to_forward_slash)
        .filter(|p| !p.is_empty())
        .unwrap_or_default();
    let directory_name = Path::new(&directory_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let directory_depth = if directory_path.is_empty() {
        0
    } else {
        directory_path.matches('/').count() + 1
    };
    (directory_path, directory_name, directory_depth)
}

/// `location_id = H(chunk_id, file_path, branch, start_line, end_line)`.
fn location_id(chunk_id: &str, file_path: &str, branch: &str, start_line: usize, end_line: usize) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(chunk_id.as_bytes());
    hasher.update(b"|");
    hasher.update(file_path.as_bytes());
    hasher.update(b"|");
    hasher.update(branch.as_bytes());
    hasher.update(b"|");
    hasher.update(start_line.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(end_line.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn convert_import(import: &code_chunker::ImportRef) -> indexer_search_backend::ImportRef {
    indexer_search_backend::ImportRef {
        path: import.path.clone(),
        kind: match import.kind {
            code_chunker::ImportKind::Module => "module",
            code_chunker::ImportKind::File => "file",
        }
        .to_string(),
        symbols: import.symbols.clone(),
    }
}

fn convert_export(export: &code_chunker::ExportRef) -> indexer_search_backend::ExportRef {
    indexer_search_backend::ExportRef {
        name: export.name.clone(),
        kind: match export.kind {
            code_chunker::ExportKind::Named => "named",
            code_chunker::ExportKind::Default => "default",
            code_chunker::ExportKind::Namespace => "namespace",
        }
        .to_string(),
        target: export.target.clone(),
    }
}

fn convert_symbol(symbol: &code_chunker::SymbolRef) -> indexer_search_backend::SymbolRef {
    indexer_search_backend::SymbolRef {
        name: symbol.name.clone(),
        kind: symbol.kind.clone(),
        line: symbol.line,
    }
}

fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_chunker::ChunkerConfig;
    use indexer_search_backend::FakeSearchBackend;
    use std::fs;

    fn new_pool() -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(2, ChunkerConfig::default()))
    }

    #[tokio::test]
    async fn run_full_enqueues_one_batch_per_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        fs::write(dir.path().join("b.rs"), "fn b() {}\n").unwrap();

        let queue_dir = tempfile::tempdir().unwrap();
        let queue = indexer_queue::Queue::open_at(queue_dir.path(), 0).await.unwrap();
        let backend: Arc<dyn SearchBackend> = Arc::new(FakeSearchBackend::new());

        let producer = Producer::new(
            queue.clone(),
            backend,
            new_pool(),
            "my-index".to_string(),
            "main".to_string(),
        );

        let files = vec![dir.path().join("a.rs"), dir.path().join("b.rs")];
        let stats = producer.run_full(dir.path(), files, "deadbeef").await.unwrap();

        assert_eq!(stats.files_seen, 2);
        assert!(stats.chunks_enqueued > 0);
        assert!(queue.is_enqueue_completed().await.unwrap());
        assert_eq!(queue.enqueue_commit_hash().await.unwrap().as_deref(), Some("deadbeef"));

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.pending as usize, stats.chunks_enqueued);
    }

    #[tokio::test]
    async fn incremental_deletes_before_reindexing_modified_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("m.rs"), "fn m() {}\n").unwrap();

        let queue_dir = tempfile::tempdir().unwrap();
        let queue = indexer_queue::Queue::open_at(queue_dir.path(), 0).await.unwrap();
        let backend = Arc::new(FakeSearchBackend::new());
        backend.ensure_indices("my-index").await.unwrap();

        let stale_chunk = ChunkDocument {
            chunk_id: "stale".to_string(),
            language: "rust".to_string(),
            kind: "function_item".to_string(),
            container_path: String::new(),
            imports: vec![],
            exports: vec![],
            symbols: vec![],
            content: "stale".to_string(),
            semantic_text: "stale".to_string(),
        };
        let stale_location = LocationDocument {
            location_id: "loc-stale".to_string(),
            chunk_id: "stale".to_string(),
            file_path: "m.rs".to_string(),
            directory_path: String::new(),
            directory_name: String::new(),
            directory_depth: 0,
            start_line: 1,
            end_line: 1,
            git_branch: "main".to_string(),
            git_file_hash: "h".to_string(),
            created_at: 0,
            updated_at: 0,
        };
        backend
            .bulk_upsert(
                &[UpsertInput {
                    chunk: stale_chunk,
                    location: stale_location,
                }],
                "my-index",
            )
            .await
            .unwrap();
        assert_eq!(backend.location_count_for_file("my-index", "m.rs"), 1);

        let backend_dyn: Arc<dyn SearchBackend> = backend.clone();
        let producer = Producer::new(
            queue.clone(),
            backend_dyn,
            new_pool(),
            "my-index".to_string(),
            "main".to_string(),
        );

        let changes = vec![ChangedFile {
            status: ChangeStatus::Modified,
            path: PathBuf::from("m.rs"),
            old_path: None,
        }];
        let registry = LanguageRegistry::default();
        let stats = producer
            .run_incremental(dir.path(), changes, "cafef00d", &registry)
            .await
            .unwrap();

        assert_eq!(backend.location_count_for_file("my-index", "m.rs"), 0);
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.pending as usize, stats.chunks_enqueued);
        assert!(stats.chunks_enqueued > 0);
    }

    #[tokio::test]
    async fn backlog_headroom_is_immediate_when_unbounded() {
        let queue_dir = tempfile::tempdir().unwrap();
        let queue = indexer_queue::Queue::open_at(queue_dir.path(), 0).await.unwrap();
        let producer = Producer::new(
            queue,
            Arc::new(FakeSearchBackend::new()),
            new_pool(),
            "my-index".to_string(),
            "main".to_string(),
        );
        tokio::time::timeout(std::time::Duration::from_millis(50), producer.wait_for_backlog_headroom())
            .await
            .expect("unbounded backlog check must not block")
            .unwrap();
    }

    #[tokio::test]
    async fn backlog_headroom_blocks_until_the_consumer_drains_it() {
        let queue_dir = tempfile::tempdir().unwrap();
        let queue = indexer_queue::Queue::open_at(queue_dir.path(), 0).await.unwrap();
        queue
            .enqueue(vec![
                NewQueueRow {
                    batch_id: "b".to_string(),
                    document: serde_json::json!({}),
                },
                NewQueueRow {
                    batch_id: "b".to_string(),
                    document: serde_json::json!({}),
                },
            ])
            .await
            .unwrap();

        let producer = Producer::new(
            queue.clone(),
            Arc::new(FakeSearchBackend::new()),
            new_pool(),
            "my-index".to_string(),
            "main".to_string(),
        )
        .with_max_queue_size(Some(2));

        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), producer.wait_for_backlog_headroom())
                .await
                .is_err(),
            "backlog at the cap must block"
        );

        let claimed = queue.dequeue(1, "worker-1").await.unwrap();
        queue.commit(&claimed.iter().map(|r| r.id).collect::<Vec<_>>()).await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), producer.wait_for_backlog_headroom())
            .await
            .expect("backlog check must unblock once drained below the cap")
            .unwrap();
    }

    #[test]
    fn directory_parts_for_nested_file() {
        let (path, name, depth) = directory_parts("src/foo/bar.rs");
        assert_eq!(path, "src/foo");
        assert_eq!(name, "foo");
        assert_eq!(depth, 2);
    }

    #[test]
    fn directory_parts_for_root_file() {
        let (path, name, depth) = directory_parts("bar.rs");
        assert_eq!(path, "");
        assert_eq!(name, "");
        assert_eq!(depth, 0);
    }
}
