//! Per-run summary persisted next to the queue database, adapted from the
//! teacher's `.context/health.json` snapshot (`write_health_snapshot`/
//! `append_failure_reason`/`read_health_snapshot`). The model-id and
//! graph-cache fields were specific to the teacher's local vector index and
//! have no counterpart here.

use crate::stats::RunStats;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

const MAX_FAILURES: usize = 5;
const HEALTH_FILE_NAME: &str = "health.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub last_success_unix_ms: u64,
    pub last_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_per_sec: Option<f32>,
    pub files_seen: usize,
    pub chunks_enqueued: usize,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_unix_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    pub failure_count: usize,
}

pub fn health_file_path(queue_dir: &Path) -> PathBuf {
    queue_dir.join(HEALTH_FILE_NAME)
}

pub async fn write_health_snapshot(queue_dir: &Path, stats: &RunStats, reason: &str) -> Result<HealthSnapshot> {
    let mut snapshot = read_health_snapshot(queue_dir).await?.unwrap_or_else(empty_snapshot);

    snapshot.last_success_unix_ms = current_unix_ms();
    snapshot.last_duration_ms = stats.time_ms;
    snapshot.files_per_sec = if stats.time_ms > 0 {
        #[allow(clippy::cast_precision_loss)]
        Some(stats.files_seen as f32 / (stats.time_ms as f32 / 1000.0))
    } else {
        None
    };
    snapshot.files_seen = stats.files_seen;
    snapshot.chunks_enqueued = stats.chunks_enqueued;
    snapshot.reason = reason.to_string();

    persist(queue_dir, &snapshot).await?;
    Ok(snapshot)
}

pub async fn append_failure_reason(queue_dir: &Path, reason: &str, detail: &str) -> Result<()> {
    let mut snapshot = read_health_snapshot(queue_dir).await?.unwrap_or_else(empty_snapshot);

    snapshot.failure_reasons.push(format!("{reason}: {detail}"));
    snapshot.last_failure_unix_ms = Some(current_unix_ms());
    snapshot.last_failure_reason = Some(detail.to_string());
    if snapshot.failure_reasons.len() > MAX_FAILURES {
        let start = snapshot.failure_reasons.len() - MAX_FAILURES;
        snapshot.failure_reasons = snapshot.failure_reasons.split_off(start);
    }
    snapshot.failure_count = snapshot.failure_reasons.len();

    persist(queue_dir, &snapshot).await
}

pub async fn read_health_snapshot(queue_dir: &Path) -> Result<Option<HealthSnapshot>> {
    let path = health_file_path(queue_dir);
    match fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn persist(queue_dir: &Path, snapshot: &HealthSnapshot) -> Result<()> {
    let path = health_file_path(queue_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_vec_pretty(snapshot)?;
    fs::write(&path, data).await?;
    Ok(())
}

fn empty_snapshot() -> HealthSnapshot {
    HealthSnapshot {
        last_success_unix_ms: 0,
        last_duration_ms: 0,
        files_per_sec: None,
        files_seen: 0,
        chunks_enqueued: 0,
        reason: "never_run".to_string(),
        failure_reasons: Vec::new(),
        last_failure_unix_ms: None,
        last_failure_reason: None,
        failure_count: 0,
    }
}

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|dur| u64::try_from(dur.as_millis()).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = RunStats::new();
        stats.add_file("rust");
        stats.add_chunks(4, 0);
        stats.time_ms = 1000;

        write_health_snapshot(dir.path(), &stats, "incremental").await.unwrap();
        let snapshot = read_health_snapshot(dir.path()).await.unwrap().unwrap();
        assert_eq!(snapshot.reason, "incremental");
        assert_eq!(snapshot.chunks_enqueued, 4);
        assert_eq!(snapshot.files_per_sec, Some(1.0));
    }

    #[tokio::test]
    async fn failure_reasons_cap_at_max_and_keep_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..8 {
            append_failure_reason(dir.path(), "bulk_upsert", &format!("attempt {i}"))
                .await
                .unwrap();
        }
        let snapshot = read_health_snapshot(dir.path()).await.unwrap().unwrap();
        assert_eq!(snapshot.failure_count, MAX_FAILURES);
        assert!(snapshot.failure_reasons.last().unwrap().contains("attempt 7"));
    }
}
