use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportRef {
    pub path: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportRef {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolRef {
    pub name: String,
    pub kind: String,
    pub line: usize,
}

/// The content-addressed chunk document. Carries nothing file-specific: no
/// path, branch, or line numbers — those live on [`LocationDocument`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDocument {
    pub chunk_id: String,
    pub language: String,
    pub kind: String,
    #[serde(default)]
    pub container_path: String,
    #[serde(default)]
    pub imports: Vec<ImportRef>,
    #[serde(default)]
    pub exports: Vec<ExportRef>,
    #[serde(default)]
    pub symbols: Vec<SymbolRef>,
    pub content: String,
    pub semantic_text: String,
}

impl ChunkDocument {
    /// Builds the `semantic_text` payload: `language`/`kind`/`container_path`
    /// headers followed by `content`, and nothing file-specific.
    pub fn build_semantic_text(language: &str, kind: &str, container_path: &str, content: &str) -> String {
        format!("language: {language}\nkind: {kind}\ncontainer_path: {container_path}\n\n{content}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationDocument {
    pub location_id: String,
    pub chunk_id: String,
    pub file_path: String,
    pub directory_path: String,
    pub directory_name: String,
    pub directory_depth: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub git_branch: String,
    pub git_file_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One producer-emitted occurrence: a chunk plus the single location it was
/// found at. `bulk_upsert` receives a slice of these and must report success
/// or failure per input index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertInput {
    pub chunk: ChunkDocument,
    pub location: LocationDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Success,
    Failure(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolAggregate {
    pub file_path: String,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReindexLock {
    pub holder: String,
    pub acquired_at: i64,
    pub expires_at: i64,
}
