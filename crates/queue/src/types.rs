use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`QueueRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

/// A single producer-to-consumer hand-off unit: a serialized chunk + location
/// document, plus the bookkeeping the queue needs to claim, commit or requeue
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRow {
    pub id: i64,
    pub batch_id: String,
    pub document: serde_json::Value,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub created_at: i64,
    pub processing_started_at: Option<i64>,
    pub worker_identity: Option<String>,
}

/// A not-yet-persisted row, as produced by the Producer for one file.
#[derive(Debug, Clone)]
pub struct NewQueueRow {
    pub batch_id: String,
    pub document: serde_json::Value,
}

/// Grouped pending/processing/failed counts, as returned by a single grouped
/// `COUNT(*) ... GROUP BY status` query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
}

impl QueueCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.failed
    }
}
