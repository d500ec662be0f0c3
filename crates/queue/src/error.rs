use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("queue document serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("queue task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
