use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("search backend misconfigured: {0}")]
    Configuration(String),

    #[error("search backend transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("search backend returned an error response: {0}")]
    Response(String),

    #[error("alias {0} resolves to multiple backing indices with no explicit write index")]
    AmbiguousAlias(String),

    #[error("reindex lock for {index} is already held by {holder}")]
    ReindexLockHeld { index: String, holder: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Elasticsearch-style error classes the adapter treats as race-successes
/// rather than failures (alias/index already exists, lock already held by
/// the winner of a race).
pub fn is_conflict_class(status: u16, error_type: Option<&str>) -> bool {
    if status == 409 {
        return true;
    }
    matches!(
        error_type,
        Some("resource_already_exists_exception") | Some("illegal_argument_exception")
    )
}
