use crate::error::Result;
use crate::types::{ReindexLock, SymbolAggregate, UpsertInput, UpsertOutcome};
use async_trait::async_trait;

/// Abstracts the external search/storage service behind the narrow
/// interface the indexing pipeline needs: index + alias lifecycle, bulk
/// upsert/delete, symbol aggregation, commit watermarks and the reindex
/// lock. Implementers hide the wire format entirely.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Create the primary chunk index, locations index, and settings index
    /// with their declared field mappings if absent, and ensure the
    /// consumer-facing alias exists. Conflicts (409-class) are treated as
    /// race-successes.
    async fn ensure_indices(&self, index: &str) -> Result<()>;

    /// Resolve an alias to its single backing index, or the explicit write
    /// index if the alias has more than one target.
    async fn resolve_alias_to_write_index(&self, alias: &str) -> Result<String>;

    /// Group inputs by `chunk_id`; `create` each distinct chunk document
    /// (409 counts as success), then write every location document. Returns
    /// one outcome per input, in input order.
    async fn bulk_upsert(&self, inputs: &[UpsertInput], index: &str) -> Result<Vec<UpsertOutcome>>;

    /// Paginated point-in-time scan over the locations index for
    /// `file_path`; deletes matching locations, then deletes any chunk
    /// documents left with zero remaining locations.
    async fn delete_by_file_path(&self, file_path: &str, index: &str) -> Result<()>;

    /// Query the chunk index for chunks matching `query`, then join against
    /// the locations index to produce `file_path -> sorted symbol list`.
    async fn aggregate_by_symbols(&self, query: &str, index: &str) -> Result<Vec<SymbolAggregate>>;

    async fn get_commit_watermark(&self, branch: &str, index: &str) -> Result<Option<String>>;

    async fn update_commit_watermark(&self, branch: &str, index: &str, commit_hash: &str) -> Result<()>;

    /// Create-only acquire with conditional delete on expiry. Returns
    /// `Ok(true)` if the lock was obtained.
    async fn acquire_reindex_lock(&self, index: &str, owner: &str, ttl_secs: i64) -> Result<bool>;

    async fn release_reindex_lock(&self, index: &str, owner: &str) -> Result<()>;

    async fn read_reindex_lock(&self, index: &str) -> Result<Option<ReindexLock>>;

    /// Atomically repoint `alias` to only `to_index`, for a clean rebuild's
    /// alias swap: the new backing index is populated silently, then this
    /// moves the alias in one operation so readers never see a partial
    /// index.
    async fn swap_alias(&self, alias: &str, to_index: &str) -> Result<()>;

    /// Delete a backing index, used to clean up the previous generation
    /// after a clean rebuild's alias swap, unless `keep_old` was requested.
    async fn delete_index(&self, index: &str) -> Result<()>;
}
