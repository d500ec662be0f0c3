use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chunker error: {0}")]
    ChunkerError(#[from] code_chunker::ChunkerError),

    #[error("Queue error: {0}")]
    QueueError(#[from] indexer_queue::QueueError),

    #[error("Search backend error: {0}")]
    BackendError(#[from] indexer_search_backend::BackendError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("git failure: {0}")]
    GitError(String),

    #[error("{0}")]
    Other(String),
}
