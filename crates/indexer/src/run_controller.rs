//! Decides per-repository indexing behavior and coordinates the whole-index
//! lifecycle: mode selection, the reindex lock, commit-watermark advance
//! timing and the atomic alias swap. Grounded on `spec.md` §4.6; the mode
//! decision tree is shaped like the teacher's `assess_staleness` in the
//! original `index_state.rs` (a pure function over an explicit enum of
//! reasons).

use crate::error::Result;
use crate::git;
use crate::health;
use crate::producer::Producer;
use crate::scanner::FileScanner;
use crate::stats::RunStats;
use crate::worker_pool::WorkerPool;
use code_chunker::{ChunkerConfig, LanguageRegistry};
use indexer_queue::Queue;
use indexer_search_backend::{normalize_alias, SearchBackend};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Bootstrap,
    FullRebuild,
    Resume,
    NoOp,
    Incremental,
}

/// Everything `choose_run_mode` needs to decide, gathered up front so the
/// decision itself stays a pure function.
#[derive(Debug, Clone)]
pub struct ModeInputs {
    pub alias_exists: bool,
    pub watermark: Option<String>,
    pub clean_requested: bool,
    pub enqueue_started_not_completed: bool,
    pub head: Option<String>,
    pub queue_empty: bool,
    pub watch: bool,
}

pub fn choose_run_mode(inputs: &ModeInputs) -> RunMode {
    if !inputs.alias_exists {
        return RunMode::Bootstrap;
    }
    if inputs.watermark.is_none() || inputs.clean_requested {
        return RunMode::FullRebuild;
    }
    if inputs.enqueue_started_not_completed {
        return RunMode::Resume;
    }
    if inputs.watch {
        return RunMode::Incremental;
    }
    if inputs.queue_empty && inputs.head.is_some() && inputs.head == inputs.watermark {
        return RunMode::NoOp;
    }
    RunMode::Incremental
}

pub struct RepositoryRun {
    pub repo_root: PathBuf,
    pub index: String,
    pub branch: String,
    pub clean: bool,
    pub watch: bool,
    pub max_diff_paths: usize,
    pub reindex_lock_ttl_secs: i64,
    pub reindex_lock_owner: String,
    pub keep_old: bool,
    pub worker_pool_size: usize,
    pub max_queue_size: Option<usize>,
    /// Directory the work queue database lives in; `health.json` is
    /// persisted alongside it.
    pub queue_dir: PathBuf,
}

pub struct RunController {
    backend: Arc<dyn SearchBackend>,
    queue: Queue,
    registry: LanguageRegistry,
    chunker_config: ChunkerConfig,
}

impl RunController {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        queue: Queue,
        registry: LanguageRegistry,
        chunker_config: ChunkerConfig,
    ) -> Self {
        Self {
            backend,
            queue,
            registry,
            chunker_config,
        }
    }

    /// Runs one repository to completion (or, in watch mode, until the
    /// caller's enclosing loop stops calling it again — watch mode is
    /// driven by the Consumer's own sleep loop, not by this method looping).
    pub async fn run_repository(&self, run: &RepositoryRun) -> Result<RunStats> {
        let alias = normalize_alias(&run.index);
        let alias_exists = self.backend.resolve_alias_to_write_index(&alias).await.is_ok();
        let watermark = self.backend.get_commit_watermark(&run.branch, &run.index).await?;
        let enqueue_started_not_completed =
            self.queue.is_enqueue_started().await? && !self.queue.is_enqueue_completed().await?;
        let head = git::current_head(&run.repo_root).await;
        let queue_empty = self.queue.counts().await?.total() == 0;

        let mode_inputs = ModeInputs {
            alias_exists,
            watermark: watermark.clone(),
            clean_requested: run.clean,
            enqueue_started_not_completed,
            head: head.clone(),
            queue_empty,
            watch: run.watch,
        };
        let mode = choose_run_mode(&mode_inputs);
        log::info!("repository {:?} branch {} selected mode {:?}", run.repo_root, run.branch, mode);

        let reason = match mode {
            RunMode::Bootstrap => "bootstrap",
            RunMode::FullRebuild => "full_rebuild",
            RunMode::Resume => "resume",
            RunMode::Incremental => "incremental",
            RunMode::NoOp => "noop",
        };

        match mode {
            RunMode::NoOp => Ok(RunStats::new()),
            RunMode::Bootstrap => self.run_clean(run, &alias, head.as_deref(), reason).await,
            RunMode::FullRebuild => self.run_clean(run, &alias, head.as_deref(), reason).await,
            // Resume is only reached when the alias and watermark already
            // exist (the Bootstrap/FullRebuild branches catch their
            // absence), so the interrupted run was necessarily incremental.
            // Clear the half-populated queue and redo the diff from the
            // stored watermark.
            RunMode::Resume => {
                self.queue.clear().await?;
                self.run_incremental_mode(run, watermark.as_deref(), head.as_deref(), reason).await
            }
            RunMode::Incremental => {
                self.run_incremental_mode(run, watermark.as_deref(), head.as_deref(), reason).await
            }
        }
    }

    /// Bootstrap and full-rebuild both populate a fresh backing index under
    /// the reindex lock, then atomically swap the alias onto it.
    async fn run_clean(&self, run: &RepositoryRun, alias: &str, head: Option<&str>, reason: &str) -> Result<RunStats> {
        let acquired = self
            .backend
            .acquire_reindex_lock(&run.index, &run.reindex_lock_owner, run.reindex_lock_ttl_secs)
            .await?;
        if !acquired {
            log::warn!("reindex lock for {} held by another run, skipping this run", run.index);
            return Ok(RunStats::new());
        }

        let previous_index = self.backend.resolve_alias_to_write_index(alias).await.ok();
        let new_index = format!("{}-{}", run.index, unix_now_ms());

        let result = async {
            self.backend.ensure_indices(&new_index).await?;
            self.queue.clear().await?;
            let stats = self.run_full_into(run, &new_index, head, reason).await?;
            self.backend.swap_alias(alias, &new_index).await?;
            if let Some(branch_head) = head {
                self.backend.update_commit_watermark(&run.branch, &new_index, branch_head).await?;
            }
            Ok::<RunStats, crate::error::IndexerError>(stats)
        }
        .await;

        if let (Ok(_), Some(previous)) = (&result, previous_index.as_ref()) {
            if !run.keep_old && previous != &new_index {
                if let Err(e) = self.backend.delete_index(previous).await {
                    log::warn!("failed to delete previous backing index {previous}: {e}");
                }
            }
        }

        self.backend.release_reindex_lock(&run.index, &run.reindex_lock_owner).await?;
        result
    }

    async fn run_full_into(&self, run: &RepositoryRun, index: &str, head: Option<&str>, reason: &str) -> Result<RunStats> {
        let Some(head) = head else {
            log::warn!("repository {:?} has no resolvable HEAD, skipping full index", run.repo_root);
            return Ok(RunStats::new());
        };
        let scanner = FileScanner::new(&run.repo_root).with_registry(self.registry.clone());
        let files = scanner.scan()?;
        let pool = Arc::new(WorkerPool::new(
            run.worker_pool_size.min(files.len().max(1)),
            self.chunker_config.clone(),
        ));
        let producer = Producer::new(
            self.queue.clone(),
            self.backend.clone(),
            pool,
            index.to_string(),
            run.branch.clone(),
        )
        .with_max_queue_size(run.max_queue_size);
        let mut stats = producer.run_full(&run.repo_root, files, head).await?;
        stats.merge(&self.drain_and_advance(run, index, head).await?);
        self.record_health(run, &stats, reason).await;
        Ok(stats)
    }

    async fn run_incremental_mode(
        &self,
        run: &RepositoryRun,
        watermark: Option<&str>,
        head: Option<&str>,
        reason: &str,
    ) -> Result<RunStats> {
        let Some(head) = head else {
            log::warn!("repository {:?} has no resolvable HEAD, skipping incremental run", run.repo_root);
            return Ok(RunStats::new());
        };
        let Some(watermark) = watermark else {
            return self.run_full_into(run, &run.index, Some(head), reason).await;
        };
        if watermark == head && !run.watch {
            return Ok(RunStats::new());
        }

        let changes = git::diff_between_heads(&run.repo_root, watermark, head, run.max_diff_paths).await;
        let Some(changes) = changes else {
            log::warn!(
                "git diff between {watermark} and {head} for {:?} could not be trusted; treating this run as a no-op",
                run.repo_root
            );
            return Ok(RunStats::new());
        };

        let pool = Arc::new(WorkerPool::new(run.worker_pool_size.max(1), self.chunker_config.clone()));
        let producer = Producer::new(
            self.queue.clone(),
            self.backend.clone(),
            pool,
            run.index.clone(),
            run.branch.clone(),
        )
        .with_max_queue_size(run.max_queue_size);
        let mut stats = producer
            .run_incremental(&run.repo_root, changes, head, &self.registry)
            .await?;
        stats.merge(&self.drain_and_advance(run, &run.index, head).await?);
        self.record_health(run, &stats, reason).await;
        Ok(stats)
    }

    /// Runs the Consumer to drain the queue, then advances the commit
    /// watermark — only after the drain, never after enqueue, so an
    /// interrupted run redoes the tail of the work rather than skipping it.
    async fn drain_and_advance(&self, run: &RepositoryRun, index: &str, head: &str) -> Result<RunStats> {
        let consumer = crate::consumer::Consumer::new(
            self.queue.clone(),
            self.backend.clone(),
            index.to_string(),
            crate::consumer::ConsumerConfig {
                watch: run.watch,
                ..crate::consumer::ConsumerConfig::default()
            },
        );
        let stats = consumer.run().await?;
        self.backend.update_commit_watermark(&run.branch, index, head).await?;
        Ok(stats)
    }

    /// Persists `health.json` next to the queue database; a write failure
    /// here is logged, not propagated, since it only affects observability
    /// of a run that already completed.
    async fn record_health(&self, run: &RepositoryRun, stats: &RunStats, reason: &str) {
        if let Err(e) = health::write_health_snapshot(&run.queue_dir, stats, reason).await {
            log::warn!("failed to write health snapshot for {:?}: {e}", run.repo_root);
        }
    }
}

fn unix_now_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Sequentially runs every configured repository; a failure in one
/// repository logs, sets a non-zero exit code, and continues with the next.
pub async fn run_all(controller: &RunController, runs: &[RepositoryRun]) -> RunStats {
    let mut total = RunStats::new();
    for run in runs {
        match controller.run_repository(run).await {
            Ok(stats) => total.merge(&stats),
            Err(e) => {
                log::error!("repository {:?} failed: {e}", run.repo_root);
                total.add_file_failure(format!("{:?}: {e}", run.repo_root));
                if let Err(write_err) = health::append_failure_reason(&run.queue_dir, "run_repository", &e.to_string()).await
                {
                    log::warn!("failed to record failure in health snapshot for {:?}: {write_err}", run.repo_root);
                }
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> ModeInputs {
        ModeInputs {
            alias_exists: true,
            watermark: Some("abc".to_string()),
            clean_requested: false,
            enqueue_started_not_completed: false,
            head: Some("abc".to_string()),
            queue_empty: true,
            watch: false,
        }
    }

    #[test]
    fn missing_alias_bootstraps() {
        let mut i = inputs();
        i.alias_exists = false;
        assert_eq!(choose_run_mode(&i), RunMode::Bootstrap);
    }

    #[test]
    fn missing_watermark_forces_full_rebuild() {
        let mut i = inputs();
        i.watermark = None;
        assert_eq!(choose_run_mode(&i), RunMode::FullRebuild);
    }

    #[test]
    fn clean_flag_forces_full_rebuild_even_with_watermark() {
        let mut i = inputs();
        i.clean_requested = true;
        assert_eq!(choose_run_mode(&i), RunMode::FullRebuild);
    }

    #[test]
    fn unfinished_enqueue_resumes() {
        let mut i = inputs();
        i.enqueue_started_not_completed = true;
        assert_eq!(choose_run_mode(&i), RunMode::Resume);
    }

    #[test]
    fn up_to_date_and_idle_is_noop() {
        assert_eq!(choose_run_mode(&inputs()), RunMode::NoOp);
    }

    #[test]
    fn watch_mode_never_settles_into_noop() {
        let mut i = inputs();
        i.watch = true;
        assert_eq!(choose_run_mode(&i), RunMode::Incremental);
    }

    #[test]
    fn stale_watermark_triggers_incremental() {
        let mut i = inputs();
        i.head = Some("def".to_string());
        assert_eq!(choose_run_mode(&i), RunMode::Incremental);
    }

    #[test]
    fn nonempty_queue_prevents_noop() {
        let mut i = inputs();
        i.queue_empty = false;
        assert_eq!(choose_run_mode(&i), RunMode::Incremental);
    }
}
