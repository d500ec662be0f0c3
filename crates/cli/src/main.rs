mod config;
mod metrics;
mod repo;

use crate::config::Config;
use crate::metrics::{MetricsExporter, RunSnapshot};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexer_core::{
    default_pool_size, parse_pool_size, run_all, Consumer, ConsumerConfig, RepositoryRun, RunController, RunStats,
};
use indexer_queue::Queue;
use indexer_search_backend::{HttpSearchBackend, SearchBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "semantic-code-indexer",
    about = "Turns repositories into content-addressed chunks and drives them into a search backend"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone or pull a repository to `<queue_base>/.repos/<name>` without indexing it.
    Setup {
        repo_url: String,
        #[arg(long)]
        token: Option<String>,
    },

    /// Index one or more repositories. Each `repo_arg` is `path-or-url[:index_name]`.
    Index {
        #[arg(required = true)]
        repo_args: Vec<String>,
        #[arg(long)]
        clean: bool,
        #[arg(long)]
        pull: bool,
        #[arg(long)]
        watch: bool,
        #[arg(long)]
        token: Option<String>,
        #[arg(long, default_value = "main")]
        branch: String,
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Diff-and-enqueue a single already-checked-out directory against the stored watermark.
    IncrementalIndex {
        directory: PathBuf,
        #[arg(long = "queue-dir")]
        queue_dir: Option<PathBuf>,
        #[arg(long = "elasticsearch-index")]
        elasticsearch_index: Option<String>,
        #[arg(long, default_value = "main")]
        branch: String,
    },

    /// Drain the durable work queue into the search backend without scanning a repository.
    Worker {
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        watch: bool,
    },

    /// Query the search backend's symbol aggregation for one index.
    Search {
        query: String,
        #[arg(long)]
        index: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Delete all rows and enqueue bookkeeping from the work queue, forcing the next run to rebuild.
    ClearQueue {
        #[arg(long = "queue-dir")]
        queue_dir: Option<PathBuf>,
    },

    /// Print the current pending/processing/failed queue counts as JSON.
    MonitorQueue {
        #[arg(long = "queue-dir")]
        queue_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            log::error!("fatal: {e:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = Config::from_env().context("reading configuration from the environment")?;

    match cli.command {
        Commands::Setup { repo_url, token } => run_setup(&config, &repo_url, token.as_deref()).await,
        Commands::Index {
            repo_args,
            clean,
            pull,
            watch,
            token,
            branch,
            concurrency,
        } => {
            if watch && repo_args.len() > 1 {
                anyhow::bail!("--watch is only valid with a single repository");
            }
            run_index(&config, repo_args, clean, pull, watch, token.as_deref(), &branch, concurrency).await
        }
        Commands::IncrementalIndex {
            directory,
            queue_dir,
            elasticsearch_index,
            branch,
        } => run_incremental_index(&config, &directory, queue_dir, elasticsearch_index, &branch).await,
        Commands::Worker { concurrency, watch } => run_worker(&config, concurrency, watch).await,
        Commands::Search { query, index, limit } => run_search(&config, &query, index, limit).await,
        Commands::ClearQueue { queue_dir } => run_clear_queue(&config, queue_dir).await,
        Commands::MonitorQueue { queue_dir } => run_monitor_queue(&config, queue_dir).await,
    }
}

async fn run_setup(config: &Config, repo_url: &str, token: Option<&str>) -> Result<i32> {
    let arg = repo::parse_repo_arg(repo_url);
    let dest = repo::checkout_path(Path::new(&config.queue_base_dir), &arg.index_name);
    indexer_core::clone_or_pull(&arg.source, &dest, token)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("setting up {repo_url} at {dest:?}"))?;
    log::info!("repository {repo_url} is ready at {dest:?}");
    Ok(0)
}

async fn run_index(
    config: &Config,
    repo_args: Vec<String>,
    clean: bool,
    pull: bool,
    watch: bool,
    token: Option<&str>,
    branch: &str,
    concurrency: Option<usize>,
) -> Result<i32> {
    let backend = build_backend(config)?;
    let pool_size = match concurrency {
        Some(n) => parse_pool_size(Some(&n.to_string()), default_pool_size()),
        None => config.worker_pool_size(),
    };

    let mut runs = Vec::new();
    for raw in &repo_args {
        let arg = repo::parse_repo_arg(raw);
        let repo_root = if repo::is_url(&arg.source) {
            let dest = repo::checkout_path(Path::new(&config.queue_base_dir), &arg.index_name);
            if pull || !dest.exists() {
                indexer_core::clone_or_pull(&arg.source, &dest, token)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))
                    .with_context(|| format!("acquiring {} at {dest:?}", arg.source))?;
            }
            dest
        } else {
            let path = PathBuf::from(&arg.source);
            if pull {
                indexer_core::clone_or_pull(&arg.source, &path, token)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))
                    .with_context(|| format!("pulling {path:?}"))?;
            }
            path
        };

        let queue_dir = Path::new(&config.queue_base_dir).join(&arg.index_name);
        let queue = Queue::open_at(&queue_dir, 100).await.context("opening work queue")?;
        let chunker_config = config.chunker.clone().with_repo_root(repo_root.clone());
        let controller = RunController::new(backend.clone(), queue, config.language_registry(), chunker_config);

        runs.push((
            controller,
            RepositoryRun {
                repo_root,
                index: arg.index_name,
                branch: branch.to_string(),
                clean,
                watch,
                max_diff_paths: 20_000,
                reindex_lock_ttl_secs: 3600,
                reindex_lock_owner: worker_owner(),
                keep_old: false,
                worker_pool_size: pool_size,
                max_queue_size: config.max_queue_size,
                queue_dir,
            },
        ));
    }

    let mut total = RunStats::new();
    for (controller, repository_run) in &runs {
        let stats = run_all(controller, std::slice::from_ref(repository_run)).await;
        total.merge(&stats);
    }

    print_summary(&total);
    Ok(exit_code_for(&total))
}

async fn run_incremental_index(
    config: &Config,
    directory: &Path,
    queue_dir: Option<PathBuf>,
    elasticsearch_index: Option<String>,
    branch: &str,
) -> Result<i32> {
    let index_name = elasticsearch_index
        .or_else(|| config.index_name.clone())
        .context("an index name is required via --elasticsearch-index or ELASTICSEARCH_INDEX_NAME")?;
    let queue_dir = queue_dir.unwrap_or_else(|| Path::new(&config.queue_base_dir).join(&index_name));

    let backend = build_backend(config)?;
    let queue = Queue::open_at(&queue_dir, 100).await.context("opening work queue")?;
    let chunker_config = config.chunker.clone().with_repo_root(directory.to_path_buf());
    let controller = RunController::new(backend, queue, config.language_registry(), chunker_config);

    let repository_run = RepositoryRun {
        repo_root: directory.to_path_buf(),
        index: index_name,
        branch: branch.to_string(),
        clean: false,
        watch: false,
        max_diff_paths: 20_000,
        reindex_lock_ttl_secs: 3600,
        reindex_lock_owner: worker_owner(),
        keep_old: false,
        worker_pool_size: config.worker_pool_size(),
        max_queue_size: config.max_queue_size,
        queue_dir,
    };

    let stats = run_all(&controller, std::slice::from_ref(&repository_run)).await;
    print_summary(&stats);
    Ok(exit_code_for(&stats))
}

async fn run_worker(config: &Config, concurrency: Option<usize>, watch: bool) -> Result<i32> {
    let index_name = config
        .index_name
        .clone()
        .context("ELASTICSEARCH_INDEX_NAME is required to run a standalone worker")?;
    let queue_dir = Path::new(&config.queue_base_dir).join(&index_name);
    let queue = Queue::open_at(&queue_dir, 100).await.context("opening work queue")?;
    let backend = build_backend(config)?;

    let exporter = if let Some(bind) = &config.telemetry_endpoint {
        Some(MetricsExporter::new(bind).await.context("starting the metrics endpoint")?)
    } else {
        None
    };

    let consumer_config = ConsumerConfig {
        concurrency: concurrency.unwrap_or(4),
        batch_size: config.batch_size,
        watch,
        ..ConsumerConfig::default()
    };
    let worker_pool_size = config.worker_pool_size() as u64;

    let gauge_refresh = exporter.clone().map(|exporter| {
        let queue = queue.clone();
        let interval = config.telemetry_interval;
        tokio::spawn(async move { refresh_queue_gauges(&queue, &exporter, worker_pool_size, interval).await })
    });

    let consumer = Consumer::new(queue.clone(), backend, index_name, consumer_config);
    let stats = consumer.run().await.context("draining the work queue")?;

    if let Some(handle) = gauge_refresh {
        handle.abort();
    }

    if let Some(exporter) = &exporter {
        let counts = queue.counts().await.context("reading final queue counts")?;
        exporter.update(&RunSnapshot {
            queue: counts,
            rows_committed: stats.rows_committed as u64,
            rows_requeued: stats.rows_requeued as u64,
            rows_failed: stats.rows_failed as u64,
            batch_duration_ms: stats.time_ms as f64,
            worker_pool_size,
        });
    }

    print_summary(&stats);
    Ok(exit_code_for(&stats))
}

async fn run_search(config: &Config, query: &str, index: Option<String>, limit: usize) -> Result<i32> {
    let index = index
        .or_else(|| config.index_name.clone())
        .context("an index name is required via --index or ELASTICSEARCH_INDEX_NAME")?;
    let backend = build_backend(config)?;
    let mut results = backend.aggregate_by_symbols(query, &index).await.context("querying the search backend")?;
    results.truncate(limit);
    print_json(&results);
    Ok(0)
}

async fn run_clear_queue(config: &Config, queue_dir: Option<PathBuf>) -> Result<i32> {
    let queue_dir = queue_dir.unwrap_or_else(|| Path::new(&config.queue_base_dir).to_path_buf());
    let queue = Queue::open_at(&queue_dir, 100).await.context("opening work queue")?;
    queue.clear().await.context("clearing the work queue")?;
    log::info!("cleared work queue at {queue_dir:?}");
    Ok(0)
}

async fn run_monitor_queue(config: &Config, queue_dir: Option<PathBuf>) -> Result<i32> {
    let queue_dir = queue_dir.unwrap_or_else(|| Path::new(&config.queue_base_dir).to_path_buf());
    let queue = Queue::open_at(&queue_dir, 100).await.context("opening work queue")?;
    let counts = queue.counts().await.context("reading queue counts")?;
    print_json(&counts);
    Ok(0)
}

/// Keeps the scrape endpoint's queue-depth gauges fresh between batches
/// during a long `worker --watch` run; aborted once `Consumer::run` returns.
async fn refresh_queue_gauges(queue: &Queue, exporter: &MetricsExporter, worker_pool_size: u64, interval: std::time::Duration) {
    loop {
        tokio::time::sleep(interval).await;
        match queue.counts().await {
            Ok(counts) => exporter.update(&RunSnapshot {
                queue: counts,
                worker_pool_size,
                ..RunSnapshot::default()
            }),
            Err(e) => log::warn!("failed to refresh queue gauges: {e}"),
        }
    }
}

fn build_backend(config: &Config) -> Result<Arc<dyn SearchBackend>> {
    let backend = HttpSearchBackend::new(config.backend.clone()).context("constructing the search backend client")?;
    Ok(Arc::new(backend))
}

fn worker_owner() -> String {
    format!("{}-{}", hostname(), std::process::id())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn exit_code_for(stats: &RunStats) -> i32 {
    if stats.files_failed > 0 || stats.rows_failed > 0 {
        1
    } else {
        0
    }
}

fn print_summary(stats: &RunStats) {
    print_json(stats);
}

/// JSON-encode `value` to stdout, swallowing a broken pipe (e.g. the
/// caller piped this process into `head`) rather than treating it as a
/// process failure.
fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            use std::io::Write;
            if let Err(e) = writeln!(std::io::stdout(), "{line}") {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    log::warn!("failed to write output: {e}");
                }
            }
        }
        Err(e) => log::warn!("failed to serialize output: {e}"),
    }
}
