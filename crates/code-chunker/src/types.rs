use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportRef {
    pub path: String,
    pub kind: ImportKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Module,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportRef {
    pub name: String,
    pub kind: ExportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Named,
    Default,
    Namespace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolRef {
    pub name: String,
    pub kind: String,
    pub line: usize,
}

/// A parser-emitted unit of indexable text. Identity (`chunk_id`) is
/// content-only: independent of file path, branch, line numbers, and file
/// hash, so identical code across files collapses to one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub language: String,
    /// Parser-assigned open tag: `function_declaration`, `cte`, `macro`,
    /// `statement`, `paragraph`, etc. Not a closed enum — new strategies
    /// introduce new tags without touching this type.
    pub kind: String,
    #[serde(default)]
    pub container_path: String,
    #[serde(default)]
    pub imports: Vec<ImportRef>,
    #[serde(default)]
    pub exports: Vec<ExportRef>,
    #[serde(default)]
    pub symbols: Vec<SymbolRef>,
    pub start_line: usize,
    pub end_line: usize,
}

impl Chunk {
    /// `H(type, language, content)`, collision-resistant and independent of
    /// everything file-specific.
    pub fn chunk_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_bytes());
        hasher.update(b"|");
        hasher.update(self.language.as_bytes());
        hasher.update(b"|");
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// `language`/`kind`/`container_path` headers followed by `content`, and
    /// nothing file-specific. Any caller tempted to fold in `file_path` or
    /// line numbers here is building a metadata leak into identity-bearing
    /// payload.
    pub fn semantic_text(&self) -> String {
        format!(
            "language: {}\nkind: {}\ncontainer_path: {}\n\n{}",
            self.language, self.kind, self.container_path, self.content
        )
    }

    pub fn byte_len(&self) -> usize {
        self.content.len()
    }
}

/// Per-run counters the Chunker reports alongside its chunks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChunkingStats {
    pub files_processed: usize,
    pub chunks_produced: usize,
    pub chunks_skipped: usize,
    pub parse_errors: usize,
    pub total_bytes: u64,
}

impl ChunkingStats {
    pub fn merge(&mut self, other: &ChunkingStats) {
        self.files_processed += other.files_processed;
        self.chunks_produced += other.chunks_produced;
        self.chunks_skipped += other.chunks_skipped;
        self.parse_errors += other.parse_errors;
        self.total_bytes += other.total_bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            language: "typescript".to_string(),
            kind: "function_declaration".to_string(),
            container_path: String::new(),
            imports: vec![],
            exports: vec![],
            symbols: vec![],
            start_line: 1,
            end_line: 1,
        }
    }

    #[test]
    fn identical_type_language_content_yields_identical_id() {
        let a = chunk("fn hello() {}");
        let b = chunk("fn hello() {}");
        assert_eq!(a.chunk_id(), b.chunk_id());
    }

    #[test]
    fn differing_content_yields_different_id() {
        let a = chunk("fn hello() {}");
        let b = chunk("fn goodbye() {}");
        assert_ne!(a.chunk_id(), b.chunk_id());
    }

    #[test]
    fn semantic_text_carries_no_file_specific_metadata() {
        let mut c = chunk("fn hello() {}");
        c.container_path = "MyStruct".to_string();
        let text = c.semantic_text();
        assert!(text.contains("fn hello() {}"));
        assert!(text.contains("MyStruct"));
        assert!(!text.contains("start_line"));
        assert!(!text.to_lowercase().contains(".rs"));
    }
}
