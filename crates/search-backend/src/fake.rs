use crate::backend::SearchBackend;
use crate::error::Result;
use crate::paths::normalize_alias;
use crate::types::{ChunkDocument, LocationDocument, ReindexLock, SymbolAggregate, UpsertInput, UpsertOutcome};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct IndexState {
    chunks: HashMap<String, ChunkDocument>,
    locations: HashMap<String, LocationDocument>,
    aliases: HashSet<String>,
    watermarks: HashMap<String, String>,
    reindex_lock: Option<ReindexLock>,
}

/// In-memory [`SearchBackend`] double for unit and integration tests. No
/// network, no persistence: every index lives for the lifetime of the
/// struct.
#[derive(Default)]
pub struct FakeSearchBackend {
    indices: Mutex<HashMap<String, IndexState>>,
}

impl FakeSearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self, index: &str) -> usize {
        self.indices
            .lock()
            .unwrap()
            .get(index)
            .map(|s| s.chunks.len())
            .unwrap_or(0)
    }

    pub fn location_count_for_file(&self, index: &str, file_path: &str) -> usize {
        self.indices
            .lock()
            .unwrap()
            .get(index)
            .map(|s| s.locations.values().filter(|l| l.file_path == file_path).count())
            .unwrap_or(0)
    }

    pub fn has_chunk(&self, index: &str, chunk_id: &str) -> bool {
        self.indices
            .lock()
            .unwrap()
            .get(index)
            .map(|s| s.chunks.contains_key(chunk_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl SearchBackend for FakeSearchBackend {
    async fn ensure_indices(&self, index: &str) -> Result<()> {
        let mut indices = self.indices.lock().unwrap();
        let state = indices.entry(index.to_string()).or_default();
        state.aliases.insert(normalize_alias(index));
        Ok(())
    }

    async fn resolve_alias_to_write_index(&self, alias: &str) -> Result<String> {
        let indices = self.indices.lock().unwrap();
        for (name, state) in indices.iter() {
            if state.aliases.contains(alias) {
                return Ok(name.clone());
            }
        }
        Err(crate::error::BackendError::Response(format!(
            "no index backs alias {alias}"
        )))
    }

    async fn bulk_upsert(&self, inputs: &[UpsertInput], index: &str) -> Result<Vec<UpsertOutcome>> {
        let mut indices = self.indices.lock().unwrap();
        let state = indices.entry(index.to_string()).or_default();
        let mut outcomes = Vec::with_capacity(inputs.len());
        for input in inputs {
            state
                .chunks
                .entry(input.chunk.chunk_id.clone())
                .or_insert_with(|| input.chunk.clone());
            state
                .locations
                .insert(input.location.location_id.clone(), input.location.clone());
            outcomes.push(UpsertOutcome::Success);
        }
        Ok(outcomes)
    }

    async fn delete_by_file_path(&self, file_path: &str, index: &str) -> Result<()> {
        let mut indices = self.indices.lock().unwrap();
        let Some(state) = indices.get_mut(index) else {
            return Ok(());
        };
        let removed_chunk_ids: Vec<String> = state
            .locations
            .values()
            .filter(|l| l.file_path == file_path)
            .map(|l| l.chunk_id.clone())
            .collect();
        state.locations.retain(|_, l| l.file_path != file_path);
        for chunk_id in removed_chunk_ids {
            let has_remaining = state.locations.values().any(|l| l.chunk_id == chunk_id);
            if !has_remaining {
                state.chunks.remove(&chunk_id);
            }
        }
        Ok(())
    }

    async fn aggregate_by_symbols(&self, query: &str, index: &str) -> Result<Vec<SymbolAggregate>> {
        let indices = self.indices.lock().unwrap();
        let Some(state) = indices.get(index) else {
            return Ok(Vec::new());
        };
        let matching_chunk_ids: HashSet<&String> = state
            .chunks
            .values()
            .filter(|c| c.symbols.iter().any(|s| s.name.contains(query)) || c.content.contains(query))
            .map(|c| &c.chunk_id)
            .collect();

        let mut by_file: HashMap<String, Vec<String>> = HashMap::new();
        for location in state.locations.values() {
            if !matching_chunk_ids.contains(&location.chunk_id) {
                continue;
            }
            if let Some(chunk) = state.chunks.get(&location.chunk_id) {
                by_file
                    .entry(location.file_path.clone())
                    .or_default()
                    .extend(chunk.symbols.iter().map(|s| s.name.clone()));
            }
        }
        let mut out: Vec<SymbolAggregate> = by_file
            .into_iter()
            .map(|(file_path, mut symbols)| {
                symbols.sort();
                symbols.dedup();
                SymbolAggregate { file_path, symbols }
            })
            .collect();
        out.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(out)
    }

    async fn get_commit_watermark(&self, branch: &str, index: &str) -> Result<Option<String>> {
        let indices = self.indices.lock().unwrap();
        Ok(indices
            .get(index)
            .and_then(|s| s.watermarks.get(branch))
            .cloned())
    }

    async fn update_commit_watermark(&self, branch: &str, index: &str, commit_hash: &str) -> Result<()> {
        let mut indices = self.indices.lock().unwrap();
        let state = indices.entry(index.to_string()).or_default();
        state.watermarks.insert(branch.to_string(), commit_hash.to_string());
        Ok(())
    }

    async fn acquire_reindex_lock(&self, index: &str, owner: &str, ttl_secs: i64) -> Result<bool> {
        let mut indices = self.indices.lock().unwrap();
        let state = indices.entry(index.to_string()).or_default();
        let now = current_unix_secs();
        if let Some(existing) = &state.reindex_lock {
            if existing.expires_at > now {
                return Ok(false);
            }
        }
        state.reindex_lock = Some(ReindexLock {
            holder: owner.to_string(),
            acquired_at: now,
            expires_at: now + ttl_secs,
        });
        Ok(true)
    }

    async fn release_reindex_lock(&self, index: &str, owner: &str) -> Result<()> {
        let mut indices = self.indices.lock().unwrap();
        if let Some(state) = indices.get_mut(index) {
            if state.reindex_lock.as_ref().map(|l| l.holder.as_str()) == Some(owner) {
                state.reindex_lock = None;
            }
        }
        Ok(())
    }

    async fn read_reindex_lock(&self, index: &str) -> Result<Option<ReindexLock>> {
        let indices = self.indices.lock().unwrap();
        Ok(indices
            .get(index)
            .and_then(|s| s.reindex_lock.clone()))
    }

    async fn swap_alias(&self, alias: &str, to_index: &str) -> Result<()> {
        let mut indices = self.indices.lock().unwrap();
        for (name, state) in indices.iter_mut() {
            if name != to_index {
                state.aliases.remove(alias);
            }
        }
        indices.entry(to_index.to_string()).or_default().aliases.insert(alias.to_string());
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.indices.lock().unwrap().remove(index);
        Ok(())
    }
}

fn current_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkDocument, LocationDocument};

    fn chunk(id: &str, content: &str) -> ChunkDocument {
        ChunkDocument {
            chunk_id: id.to_string(),
            language: "typescript".to_string(),
            kind: "function_declaration".to_string(),
            container_path: String::new(),
            imports: vec![],
            exports: vec![],
            symbols: vec![],
            content: content.to_string(),
            semantic_text: ChunkDocument::build_semantic_text("typescript", "function_declaration", "", content),
        }
    }

    fn location(chunk_id: &str, loc_id: &str, file_path: &str) -> LocationDocument {
        LocationDocument {
            location_id: loc_id.to_string(),
            chunk_id: chunk_id.to_string(),
            file_path: file_path.to_string(),
            directory_path: String::new(),
            directory_name: String::new(),
            directory_depth: 0,
            start_line: 1,
            end_line: 1,
            git_branch: "main".to_string(),
            git_file_hash: "h".to_string(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn identical_content_collapses_to_one_chunk_two_locations() {
        let backend = FakeSearchBackend::new();
        backend.ensure_indices("idx").await.unwrap();

        let body = "function hello(){ console.log(\"world\"); }";
        let inputs = vec![
            UpsertInput { chunk: chunk("c1", body), location: location("c1", "l-a", "a.ts") },
            UpsertInput { chunk: chunk("c1", body), location: location("c1", "l-b", "b.ts") },
        ];
        let outcomes = backend.bulk_upsert(&inputs, "idx").await.unwrap();
        assert_eq!(outcomes, vec![UpsertOutcome::Success, UpsertOutcome::Success]);
        assert_eq!(backend.chunk_count("idx"), 1);
        assert_eq!(backend.location_count_for_file("idx", "a.ts"), 1);
        assert_eq!(backend.location_count_for_file("idx", "b.ts"), 1);

        backend.delete_by_file_path("a.ts", "idx").await.unwrap();
        assert!(backend.has_chunk("idx", "c1"));
        backend.delete_by_file_path("b.ts", "idx").await.unwrap();
        assert!(!backend.has_chunk("idx", "c1"));
    }

    #[tokio::test]
    async fn reindex_lock_respects_ttl_and_owner() {
        let backend = FakeSearchBackend::new();
        assert!(backend.acquire_reindex_lock("idx", "owner-a", 3600).await.unwrap());
        assert!(!backend.acquire_reindex_lock("idx", "owner-b", 3600).await.unwrap());
        backend.release_reindex_lock("idx", "owner-a").await.unwrap();
        assert!(backend.acquire_reindex_lock("idx", "owner-b", 3600).await.unwrap());
    }

    #[tokio::test]
    async fn swap_alias_moves_atomically_and_delete_index_drops_state() {
        let backend = FakeSearchBackend::new();
        backend.ensure_indices("idx-v1").await.unwrap();
        backend.ensure_indices("idx-v2").await.unwrap();
        backend.swap_alias("idx-repo", "idx-v2").await.unwrap();

        assert_eq!(backend.resolve_alias_to_write_index("idx-repo").await.unwrap(), "idx-v2");
        backend.delete_index("idx-v1").await.unwrap();
        assert_eq!(backend.chunk_count("idx-v1"), 0);
    }

    #[tokio::test]
    async fn commit_watermark_round_trips() {
        let backend = FakeSearchBackend::new();
        assert_eq!(backend.get_commit_watermark("main", "idx").await.unwrap(), None);
        backend.update_commit_watermark("main", "idx", "abc123").await.unwrap();
        assert_eq!(
            backend.get_commit_watermark("main", "idx").await.unwrap(),
            Some("abc123".to_string())
        );
    }
}
