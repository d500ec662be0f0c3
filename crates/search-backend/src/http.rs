use crate::backend::SearchBackend;
use crate::config::BackendConfig;
use crate::error::{is_conflict_class, BackendError, Result};
use crate::paths::{locations_index_name, normalize_alias, settings_index_name, REINDEX_LOCK_DOC_ID};
use crate::types::{ReindexLock, SymbolAggregate, UpsertInput, UpsertOutcome};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// `SearchBackend` over an HTTP/JSON REST search service. The bulk/index
/// semantics (409-as-success, create-not-index for chunks) match an
/// Elasticsearch-class API, consistent with the error classes the adapter is
/// asked to tolerate.
pub struct HttpSearchBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpSearchBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(BackendError::Configuration(
                "search backend endpoint is not configured".to_string(),
            ));
        }
        let mut builder = Client::builder().timeout(Duration::from_secs(config.request_timeout_secs));
        if let Some(api_key) = &config.api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = format!("ApiKey {api_key}");
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&value)
                    .map_err(|e| BackendError::Configuration(e.to_string()))?,
            );
            builder = builder.default_headers(headers);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, self.url(path));
        match (&self.config.username, &self.config.password) {
            (Some(u), Some(p)) => req.basic_auth(u, Some(p)),
            _ => req,
        }
    }

    async fn put_index_if_absent(&self, index: &str, mapping: Value) -> Result<()> {
        let resp = self
            .request(reqwest::Method::PUT, index)
            .json(&mapping)
            .send()
            .await?;
        self.tolerate_conflict(resp).await
    }

    async fn tolerate_conflict(&self, resp: reqwest::Response) -> Result<()> {
        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let error_type = body
            .get("error")
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str);
        if is_conflict_class(status, error_type) {
            return Ok(());
        }
        Err(BackendError::Response(format!(
            "status={status} body={body}"
        )))
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn ensure_indices(&self, index: &str) -> Result<()> {
        let locations = locations_index_name(index);
        let settings = settings_index_name(index);
        let alias = normalize_alias(index);

        self.put_index_if_absent(
            index,
            json!({ "mappings": { "properties": {
                "chunk_id": { "type": "keyword" },
                "language": { "type": "keyword" },
                "kind": { "type": "keyword" },
                "container_path": { "type": "keyword" },
                "content": { "type": "text" },
                "semantic_text": { "type": "text" }
            }}}),
        )
        .await?;

        self.put_index_if_absent(
            &locations,
            json!({ "mappings": { "properties": {
                "location_id": { "type": "keyword" },
                "chunk_id": { "type": "keyword" },
                "file_path": { "type": "keyword" },
                "directory_path": { "type": "keyword" },
                "git_branch": { "type": "keyword" }
            }}}),
        )
        .await?;

        self.put_index_if_absent(&settings, json!({})).await?;

        let resp = self
            .request(reqwest::Method::PUT, &format!("{index}/_alias/{alias}"))
            .send()
            .await?;
        self.tolerate_conflict(resp).await
    }

    async fn resolve_alias_to_write_index(&self, alias: &str) -> Result<String> {
        let resp = self
            .request(reqwest::Method::GET, &format!("_alias/{alias}"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BackendError::Response(format!(
                "resolve alias {alias}: status={}",
                resp.status()
            )));
        }
        let body: Value = resp.json().await?;
        let object = body
            .as_object()
            .ok_or_else(|| BackendError::Response("alias response is not an object".to_string()))?;
        if object.is_empty() {
            return Err(BackendError::Response(format!("alias {alias} has no backing index")));
        }
        if object.len() == 1 {
            return Ok(object.keys().next().unwrap().clone());
        }
        for (name, body) in object {
            let is_write = body
                .get("aliases")
                .and_then(|a| a.get(alias))
                .and_then(|a| a.get("is_write_index"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if is_write {
                return Ok(name.clone());
            }
        }
        Err(BackendError::AmbiguousAlias(alias.to_string()))
    }

    async fn bulk_upsert(&self, inputs: &[UpsertInput], index: &str) -> Result<Vec<UpsertOutcome>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let locations = locations_index_name(index);

        #[derive(Clone, Copy)]
        enum ActionRef {
            ChunkCreate(usize),
            Location(usize),
        }

        let mut body = String::new();
        let mut actions: Vec<ActionRef> = Vec::new();
        let mut seen_chunks: HashMap<&str, usize> = HashMap::new();

        for (i, input) in inputs.iter().enumerate() {
            if !seen_chunks.contains_key(input.chunk.chunk_id.as_str()) {
                seen_chunks.insert(input.chunk.chunk_id.as_str(), i);
                body.push_str(
                    &json!({ "create": { "_index": index, "_id": input.chunk.chunk_id } })
                        .to_string(),
                );
                body.push('\n');
                body.push_str(&serde_json::to_string(&input.chunk)?);
                body.push('\n');
                actions.push(ActionRef::ChunkCreate(i));
            }

            body.push_str(
                &json!({ "index": { "_index": locations, "_id": input.location.location_id } })
                    .to_string(),
            );
            body.push('\n');
            body.push_str(&serde_json::to_string(&input.location)?);
            body.push('\n');
            actions.push(ActionRef::Location(i));
        }

        let resp = self
            .client
            .post(self.url("_bulk"))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(_) => {
                return Ok(vec![UpsertOutcome::Failure("transport failure".to_string()); inputs.len()])
            }
        };

        let parsed: Value = match resp.json().await {
            Ok(v) => v,
            Err(_) => {
                return Ok(vec![UpsertOutcome::Failure("unreadable bulk response".to_string()); inputs.len()])
            }
        };

        let items = parsed.get("items").and_then(Value::as_array);
        let Some(items) = items else {
            return Ok(vec![UpsertOutcome::Failure("bulk response had no items".to_string()); inputs.len()]);
        };
        if items.len() != actions.len() {
            return Ok(vec![UpsertOutcome::Failure("bulk response item count mismatch".to_string()); inputs.len()]);
        }

        let mut chunk_create_ok: HashMap<usize, bool> = HashMap::new();
        let mut location_ok: HashMap<usize, bool> = HashMap::new();
        let mut location_err: HashMap<usize, String> = HashMap::new();

        for (action, item) in actions.iter().zip(items.iter()) {
            let (op_key, input_index) = match action {
                ActionRef::ChunkCreate(i) => ("create", *i),
                ActionRef::Location(i) => ("index", *i),
            };
            let op = item.get(op_key).cloned().unwrap_or(Value::Null);
            let status = op.get("status").and_then(Value::as_u64).unwrap_or(500) as u16;
            let error_type = op
                .get("error")
                .and_then(|e| e.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let ok = StatusCode::from_u16(status)
                .map(|s| s.is_success())
                .unwrap_or(false)
                || is_conflict_class(status, error_type.as_deref());

            match action {
                ActionRef::ChunkCreate(i) => {
                    chunk_create_ok.insert(*i, ok);
                }
                ActionRef::Location(i) => {
                    location_ok.insert(*i, ok);
                    if !ok {
                        location_err.insert(
                            *i,
                            op.get("error")
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| format!("status={status}")),
                        );
                    }
                }
            }
        }

        let mut outcomes = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            let owner = *seen_chunks.get(input.chunk.chunk_id.as_str()).unwrap();
            let chunk_ok = chunk_create_ok.get(&owner).copied().unwrap_or(false);
            let loc_ok = location_ok.get(&i).copied().unwrap_or(false);
            if chunk_ok && loc_ok {
                outcomes.push(UpsertOutcome::Success);
            } else {
                let reason = location_err
                    .get(&i)
                    .cloned()
                    .unwrap_or_else(|| "chunk create failed".to_string());
                outcomes.push(UpsertOutcome::Failure(reason));
            }
        }

        Ok(outcomes)
    }

    async fn delete_by_file_path(&self, file_path: &str, index: &str) -> Result<()> {
        let locations = locations_index_name(index);
        let page_size = self.config.delete_documents_page_size;
        let mut from = 0usize;
        let mut affected_chunk_ids: Vec<String> = Vec::new();

        loop {
            let resp = self
                .request(reqwest::Method::POST, &format!("{locations}/_search"))
                .json(&json!({
                    "from": from,
                    "size": page_size,
                    "query": { "term": { "file_path": file_path } },
                    "_source": ["chunk_id"]
                }))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(BackendError::Response(format!(
                    "search locations for {file_path}: status={}",
                    resp.status()
                )));
            }
            let body: Value = resp.json().await?;
            let hits = body
                .get("hits")
                .and_then(|h| h.get("hits"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if hits.is_empty() {
                break;
            }
            let mut delete_body = String::new();
            for hit in &hits {
                let id = hit.get("_id").and_then(Value::as_str).unwrap_or_default();
                delete_body.push_str(
                    &json!({ "delete": { "_index": locations, "_id": id } }).to_string(),
                );
                delete_body.push('\n');
                if let Some(chunk_id) = hit
                    .get("_source")
                    .and_then(|s| s.get("chunk_id"))
                    .and_then(Value::as_str)
                {
                    affected_chunk_ids.push(chunk_id.to_string());
                }
            }
            let _ = self
                .client
                .post(self.url("_bulk"))
                .header("content-type", "application/x-ndjson")
                .body(delete_body)
                .send()
                .await?;

            if hits.len() < page_size {
                break;
            }
            from += page_size;
        }

        for chunk_id in affected_chunk_ids {
            let resp = self
                .request(reqwest::Method::POST, &format!("{locations}/_count"))
                .json(&json!({ "query": { "term": { "chunk_id": chunk_id } } }))
                .send()
                .await?;
            let remaining = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|b| b.get("count").and_then(Value::as_u64).map(|n| n as usize))
                .unwrap_or(1);
            if remaining == 0 {
                let _ = self
                    .request(reqwest::Method::DELETE, &format!("{index}/_doc/{chunk_id}"))
                    .send()
                    .await?;
            }
        }

        Ok(())
    }

    async fn aggregate_by_symbols(&self, query: &str, index: &str) -> Result<Vec<SymbolAggregate>> {
        let locations = locations_index_name(index);
        let resp = self
            .request(reqwest::Method::POST, &format!("{index}/_search"))
            .json(&json!({
                "query": { "query_string": { "query": query } },
                "_source": ["chunk_id", "symbols"]
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BackendError::Response(format!(
                "aggregate_by_symbols chunk search: status={}",
                resp.status()
            )));
        }
        let body: Value = resp.json().await?;
        let chunk_hits = body
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut symbols_by_chunk: HashMap<String, Vec<String>> = HashMap::new();
        let mut chunk_ids = Vec::new();
        for hit in &chunk_hits {
            let chunk_id = hit
                .get("_source")
                .and_then(|s| s.get("chunk_id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let symbols: Vec<String> = hit
                .get("_source")
                .and_then(|s| s.get("symbols"))
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|s| s.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            symbols_by_chunk.insert(chunk_id.clone(), symbols);
            chunk_ids.push(chunk_id);
        }
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .request(reqwest::Method::POST, &format!("{locations}/_search"))
            .json(&json!({
                "query": { "terms": { "chunk_id": chunk_ids } },
                "_source": ["file_path", "chunk_id"],
                "size": 10_000
            }))
            .send()
            .await?;
        let body: Value = resp.json().await?;
        let location_hits = body
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut by_file: HashMap<String, Vec<String>> = HashMap::new();
        for hit in &location_hits {
            let file_path = hit
                .get("_source")
                .and_then(|s| s.get("file_path"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let chunk_id = hit
                .get("_source")
                .and_then(|s| s.get("chunk_id"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if let Some(symbols) = symbols_by_chunk.get(chunk_id) {
                by_file.entry(file_path).or_default().extend(symbols.clone());
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
        let settings = settings_index_name(index);
        let resp = self
            .request(reqwest::Method::GET, &format!("{settings}/_doc/{branch}"))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(BackendError::Response(format!(
                "get commit watermark: status={}",
                resp.status()
            )));
        }
        let body: Value = resp.json().await?;
        Ok(body
            .get("_source")
            .and_then(|s| s.get("commit_hash"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn update_commit_watermark(&self, branch: &str, index: &str, commit_hash: &str) -> Result<()> {
        let settings = settings_index_name(index);
        let resp = self
            .request(reqwest::Method::PUT, &format!("{settings}/_doc/{branch}"))
            .json(&json!({ "commit_hash": commit_hash }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BackendError::Response(format!(
                "update commit watermark: status={}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn acquire_reindex_lock(&self, index: &str, owner: &str, ttl_secs: i64) -> Result<bool> {
        let settings = settings_index_name(index);
        let now = current_unix_secs();
        let doc = json!({
            "holder": owner,
            "acquired_at": now,
            "expires_at": now + ttl_secs,
        });

        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("{settings}/_create/{REINDEX_LOCK_DOC_ID}"),
            )
            .json(&doc)
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(true);
        }

        if let Some(existing) = self.read_reindex_lock(index).await? {
            if existing.expires_at <= now {
                self.release_reindex_lock(index, &existing.holder).await?;
                let resp = self
                    .request(
                        reqwest::Method::PUT,
                        &format!("{settings}/_create/{REINDEX_LOCK_DOC_ID}"),
                    )
                    .json(&doc)
                    .send()
                    .await?;
                return Ok(resp.status().is_success());
            }
        }
        Ok(false)
    }

    async fn release_reindex_lock(&self, index: &str, _owner: &str) -> Result<()> {
        let settings = settings_index_name(index);
        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!("{settings}/_doc/{REINDEX_LOCK_DOC_ID}"),
            )
            .send()
            .await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(BackendError::Response(format!(
            "release reindex lock: status={}",
            resp.status()
        )))
    }

    async fn read_reindex_lock(&self, index: &str) -> Result<Option<ReindexLock>> {
        let settings = settings_index_name(index);
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("{settings}/_doc/{REINDEX_LOCK_DOC_ID}"),
            )
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(BackendError::Response(format!(
                "read reindex lock: status={}",
                resp.status()
            )));
        }
        let body: Value = resp.json().await?;
        let Some(source) = body.get("_source") else {
            return Ok(None);
        };
        Ok(Some(ReindexLock {
            holder: source.get("holder").and_then(Value::as_str).unwrap_or_default().to_string(),
            acquired_at: source.get("acquired_at").and_then(Value::as_i64).unwrap_or_default(),
            expires_at: source.get("expires_at").and_then(Value::as_i64).unwrap_or_default(),
        }))
    }

    async fn swap_alias(&self, alias: &str, to_index: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url("_aliases"))
            .json(&json!({ "actions": [
                { "remove": { "index": "*", "alias": alias } },
                { "add": { "index": to_index, "alias": alias } }
            ]}))
            .send()
            .await?;
        self.tolerate_conflict(resp).await
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let resp = self.request(reqwest::Method::DELETE, index).send().await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(BackendError::Response(format!(
            "delete index {index}: status={}",
            resp.status()
        )))
    }
}

fn current_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
