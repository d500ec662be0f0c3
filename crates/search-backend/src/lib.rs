//! Adapter over the external search service. Hides the wire format behind a
//! narrow trait: index/alias lifecycle, bulk upsert/delete, symbol
//! aggregation, commit watermarks, and the reindex lock.

mod backend;
mod config;
mod error;
mod fake;
mod http;
mod paths;
mod types;

pub use backend::SearchBackend;
pub use config::BackendConfig;
pub use error::{is_conflict_class, BackendError, Result};
pub use fake::FakeSearchBackend;
pub use http::HttpSearchBackend;
pub use paths::{locations_index_name, normalize_alias, settings_index_name, REINDEX_LOCK_DOC_ID};
pub use types::{
    ChunkDocument, ExportRef, ImportRef, LocationDocument, ReindexLock, SymbolAggregate, SymbolRef,
    UpsertInput, UpsertOutcome,
};
