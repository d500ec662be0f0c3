//! Prometheus metrics export for `worker`/`index --watch`, grounded on the
//! teacher's `MetricsExporter` (raw `hyper::Server` + `prometheus::Registry`,
//! one struct field per gauge, `update()` pushing a snapshot into them), with
//! the gauge set replaced: queue depth by status, batch throughput and
//! duration, and backend-bulk failure counts instead of the teacher's
//! file-watcher health fields.

use anyhow::{anyhow, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use indexer_queue::QueueCounts;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Snapshot handed to [`MetricsExporter::update`] once per drained batch or
/// polling tick.
#[derive(Debug, Clone, Default)]
pub struct RunSnapshot {
    pub queue: QueueCounts,
    pub rows_committed: u64,
    pub rows_requeued: u64,
    pub rows_failed: u64,
    pub batch_duration_ms: f64,
    pub worker_pool_size: u64,
}

#[derive(Clone)]
pub struct MetricsExporter {
    _registry: Arc<Registry>,
    queue_pending: IntGauge,
    queue_processing: IntGauge,
    queue_failed: IntGauge,
    rows_committed_total: IntCounter,
    rows_requeued_total: IntCounter,
    rows_failed_total: IntCounter,
    batch_duration_ms: Histogram,
    worker_pool_size: IntGauge,
    _server_handle: Arc<JoinHandle<()>>,
}

impl MetricsExporter {
    pub async fn new(bind: &str) -> Result<Self> {
        let addr: SocketAddr = bind.parse()?;
        let registry = Arc::new(Registry::new());

        let queue_pending = IntGauge::with_opts(Opts::new("indexer_queue_pending", "Pending rows in the work queue"))?;
        let queue_processing =
            IntGauge::with_opts(Opts::new("indexer_queue_processing", "Rows currently claimed by a consumer"))?;
        let queue_failed =
            IntGauge::with_opts(Opts::new("indexer_queue_failed", "Rows that exhausted their retry budget"))?;
        let rows_committed_total =
            IntCounter::with_opts(Opts::new("indexer_rows_committed_total", "Rows successfully upserted into the backend"))?;
        let rows_requeued_total =
            IntCounter::with_opts(Opts::new("indexer_rows_requeued_total", "Rows returned to pending after a failed batch"))?;
        let rows_failed_total =
            IntCounter::with_opts(Opts::new("indexer_rows_failed_total", "Rows moved to the failed state"))?;
        let batch_duration_ms = Histogram::with_opts(HistogramOpts::new(
            "indexer_batch_duration_ms",
            "Time to bulk-upsert one consumer batch",
        ))?;
        let worker_pool_size = IntGauge::with_opts(Opts::new("indexer_worker_pool_size", "Configured producer worker pool size"))?;

        registry.register(Box::new(queue_pending.clone()))?;
        registry.register(Box::new(queue_processing.clone()))?;
        registry.register(Box::new(queue_failed.clone()))?;
        registry.register(Box::new(rows_committed_total.clone()))?;
        registry.register(Box::new(rows_requeued_total.clone()))?;
        registry.register(Box::new(rows_failed_total.clone()))?;
        registry.register(Box::new(batch_duration_ms.clone()))?;
        registry.register(Box::new(worker_pool_size.clone()))?;

        let server_registry = Arc::clone(&registry);
        let make_service = make_service_fn(move |_| {
            let registry = Arc::clone(&server_registry);
            async move {
                Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| {
                    let registry = Arc::clone(&registry);
                    async move {
                        let encoder = TextEncoder::new();
                        let metric_families = registry.gather();
                        let mut buffer = Vec::new();
                        encoder.encode(&metric_families, &mut buffer).unwrap_or(());
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(200)
                                .header("Content-Type", encoder.format_type())
                                .body(Body::from(buffer))
                                .expect("valid HTTP response"),
                        )
                    }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|err| anyhow!("failed to bind metrics endpoint on {addr}: {err}"))?
            .serve(make_service);

        let handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                log::error!("metrics endpoint failed: {err}");
            }
        });

        Ok(Self {
            _registry: registry,
            queue_pending,
            queue_processing,
            queue_failed,
            rows_committed_total,
            rows_requeued_total,
            rows_failed_total,
            batch_duration_ms,
            worker_pool_size,
            _server_handle: Arc::new(handle),
        })
    }

    /// Overwrite the queue-depth and pool-size gauges, and add this batch's
    /// counts/duration to the running counters and histogram. Counters only
    /// ever move forward, matching at-least-once delivery: a requeued row
    /// that later commits is counted in both.
    pub fn update(&self, snapshot: &RunSnapshot) {
        self.queue_pending.set(snapshot.queue.pending as i64);
        self.queue_processing.set(snapshot.queue.processing as i64);
        self.queue_failed.set(snapshot.queue.failed as i64);
        self.worker_pool_size.set(snapshot.worker_pool_size as i64);
        self.rows_committed_total.inc_by(snapshot.rows_committed);
        self.rows_requeued_total.inc_by(snapshot.rows_requeued);
        self.rows_failed_total.inc_by(snapshot.rows_failed);
        if snapshot.batch_duration_ms > 0.0 {
            self.batch_duration_ms.observe(snapshot.batch_duration_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_accumulates_counters_across_snapshots() {
        let exporter = MetricsExporter::new("127.0.0.1:0").await.unwrap();
        exporter.update(&RunSnapshot {
            queue: QueueCounts { pending: 5, processing: 1, failed: 0 },
            rows_committed: 10,
            rows_requeued: 1,
            rows_failed: 0,
            batch_duration_ms: 42.0,
            worker_pool_size: 4,
        });
        assert_eq!(exporter.rows_committed_total.get(), 10);
        exporter.update(&RunSnapshot {
            queue: QueueCounts { pending: 2, processing: 0, failed: 0 },
            rows_committed: 3,
            rows_requeued: 0,
            rows_failed: 0,
            batch_duration_ms: 10.0,
            worker_pool_size: 4,
        });
        assert_eq!(exporter.rows_committed_total.get(), 13);
        assert_eq!(exporter.queue_pending.get(), 2);
    }
}
