//! Language-dispatched extractor turning a file into a deterministic
//! sequence of content-addressed [`Chunk`] records.
//!
//! ## Architecture
//!
//! ```text
//! file path + content
//!     │
//!     ├──> extension → Language (LanguageRegistry)
//!     │
//!     ├──> Language::capabilities() selects a strategy:
//!     │      syntax-tree │ sql │ paragraph │ line-window │ whole-file
//!     │
//!     └──> Vec<Chunk> + ChunkingStats
//! ```
//!
//! Chunk identity (`chunk_id`) and the `semantic_text` payload are
//! deliberately independent of file path, branch and line numbers — see
//! [`Chunk::chunk_id`] and [`Chunk::semantic_text`].

mod ast_analyzer;
mod chunker;
mod config;
mod error;
mod language;
mod shell;
mod sql;
mod strategy;
mod types;

pub use chunker::Chunker;
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use language::{Language, LanguageCapabilities, LanguageRegistry};
pub use types::{Chunk, ChunkingStats, ExportKind, ExportRef, ImportKind, ImportRef, SymbolRef};
