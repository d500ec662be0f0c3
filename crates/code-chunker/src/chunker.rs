use crate::ast_analyzer::AstAnalyzer;
use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use crate::language::{Language, LanguageRegistry};
use crate::shell::extract_shell_exports;
use crate::sql::chunk_sql;
use crate::strategy::{chunk_by_line_window, chunk_by_paragraph, chunk_whole_file};
use crate::types::{Chunk, ChunkingStats};
use indexer_protocol::repo_root::normalize_relative_import;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// Turns one file into a deterministic sequence of [`Chunk`] records. Does
/// not write to the Work Queue or the Search Backend; it only returns
/// records and per-call stats.
pub struct Chunker {
    config: ChunkerConfig,
    registry: LanguageRegistry,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        config
            .validate()
            .expect("invalid chunker configuration provided");
        Self {
            config,
            registry: LanguageRegistry::default(),
        }
    }

    pub fn with_registry(config: ChunkerConfig, registry: LanguageRegistry) -> Self {
        config
            .validate()
            .expect("invalid chunker configuration provided");
        Self { config, registry }
    }

    pub fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Read and chunk a file from disk.
    pub fn chunk_path(&self, path: impl AsRef<Path>) -> Result<(Vec<Chunk>, ChunkingStats)> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let file_path = path.to_str().unwrap_or("unknown");
        self.chunk_file(file_path, &content)
    }

    /// Chunk an in-memory file. `file_path` drives extension-based language
    /// dispatch and relative-import normalization; it is never embedded in
    /// the emitted chunks' `semantic_text`.
    pub fn chunk_file(&self, file_path: &str, content: &str) -> Result<(Vec<Chunk>, ChunkingStats)> {
        let mut stats = ChunkingStats {
            files_processed: 1,
            total_bytes: content.len() as u64,
            ..Default::default()
        };

        if content.is_empty() {
            return Err(ChunkerError::EmptyContent);
        }

        let ext = Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let language = self.registry.language_for_extension(ext);

        if language == Language::Unknown {
            log::warn!("{}", ChunkerError::UnsupportedExtension(file_path.to_string()));
            return Ok((vec![], stats));
        }

        let raw_chunks = self.dispatch(content, language).map_err(|reason| {
            stats.parse_errors += 1;
            ChunkerError::ParserCrash {
                file: file_path.to_string(),
                reason,
            }
        })?;

        let mut chunks = Vec::with_capacity(raw_chunks.len());
        for mut chunk in raw_chunks {
            if chunk.byte_len() > self.config.max_chunk_size_bytes {
                stats.chunks_skipped += 1;
                continue;
            }
            self.normalize_imports(file_path, &mut chunk);
            if language == Language::Shell {
                chunk.exports = extract_shell_exports(&chunk.content);
            }
            stats.chunks_produced += 1;
            chunks.push(chunk);
        }

        Ok((chunks, stats))
    }

    /// Run the strategy selected by `language`'s capability set. Parser
    /// panics are caught and surfaced as a string reason rather than
    /// unwinding past the caller, matching the fatal-per-file error
    /// semantics the Producer expects.
    fn dispatch(&self, content: &str, language: Language) -> std::result::Result<Vec<Chunk>, String> {
        let capabilities = language.capabilities();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if capabilities.can_syntax_tree {
                match AstAnalyzer::new(self.config.clone(), language)
                    .and_then(|mut analyzer| analyzer.chunk(content))
                {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        log::warn!(
                            "ast chunking failed for {}, falling back to whole-file: {e}",
                            language.as_str()
                        );
                        chunk_whole_file(content, language.as_str())
                    }
                }
            } else if capabilities.can_sql {
                chunk_sql(content, language.as_str())
            } else if capabilities.can_paragraph {
                chunk_by_paragraph(&self.config, content, language.as_str())
            } else if capabilities.can_line_window {
                chunk_by_line_window(&self.config, content, language.as_str())
            } else if capabilities.can_whole_file {
                chunk_whole_file(content, language.as_str())
            } else {
                vec![]
            }
        }));

        outcome.map_err(|payload| {
            payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "parser panicked".to_string())
        })
    }

    /// Re-express relative imports against the repository root. Imports
    /// that are already module paths (not `./` or `../`) pass through
    /// unchanged; if no repository root was discovered, normalization is
    /// skipped entirely.
    fn normalize_imports(&self, file_path: &str, chunk: &mut Chunk) {
        let Some(repo_root) = self.config.repo_root.as_deref() else {
            return;
        };
        let path = Path::new(file_path);
        for import in &mut chunk.imports {
            if let Some(normalized) = normalize_relative_import(repo_root, path, &import.path) {
                import.path = normalized;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUST_CODE: &str = r#"
use std::collections::HashMap;

/// Main function
fn main() {
    println!("Hello, world!");
}

struct Point {
    x: i32,
    y: i32,
}

impl Point {
    fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}
"#;

    #[test]
    fn chunks_rust_file_via_ast() {
        let chunker = Chunker::default();
        let (chunks, stats) = chunker.chunk_file("test.rs", RUST_CODE).unwrap();
        assert!(chunks.len() >= 3);
        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.chunks_produced, chunks.len());
    }

    #[test]
    fn empty_content_is_rejected() {
        let chunker = Chunker::default();
        assert!(chunker.chunk_file("test.rs", "").is_err());
    }

    #[test]
    fn unknown_extension_yields_empty_chunk_set_not_an_error() {
        let chunker = Chunker::default();
        let (chunks, stats) = chunker.chunk_file("data.bin", "whatever content").unwrap();
        assert!(chunks.is_empty());
        assert_eq!(stats.chunks_skipped, 0);
    }

    #[test]
    fn oversized_chunk_is_skipped_not_emitted() {
        let config = ChunkerConfig {
            max_chunk_size_bytes: 10,
            ..ChunkerConfig::default()
        };
        let chunker = Chunker::new(config);
        let (chunks, stats) = chunker.chunk_file("notes.txt", "this paragraph is definitely longer than ten bytes").unwrap();
        assert!(chunks.is_empty());
        assert!(stats.chunks_skipped > 0);
    }

    #[test]
    fn markdown_dispatches_to_paragraph_strategy() {
        let chunker = Chunker::default();
        let (chunks, _) = chunker
            .chunk_file("readme.md", "# Title\n\nSome body text here.\n")
            .unwrap();
        assert!(chunks.iter().all(|c| c.kind == "paragraph"));
    }

    #[test]
    fn dbt_model_dispatches_to_sql_parser() {
        let chunker = Chunker::default();
        let (chunks, _) = chunker
            .chunk_file("model.sql", "select * from {{ ref('orders') }};\n")
            .unwrap();
        assert!(chunks.iter().any(|c| c.kind == "statement"));
    }

    #[test]
    fn shell_exports_are_populated_after_line_window_dispatch() {
        let chunker = Chunker::default();
        let (chunks, _) = chunker
            .chunk_file("deploy.sh", "export VERSION=1\necho building\n")
            .unwrap();
        assert!(chunks.iter().any(|c| c.exports.iter().any(|e| e.name == "VERSION")));
    }
}
