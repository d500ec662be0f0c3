use crate::types::{Chunk, ImportKind, ImportRef};
use regex::Regex;

const BUILTIN_JINJA_CALLS: &[&str] = &[
    "config",
    "ref",
    "source",
    "this",
    "var",
    "env_var",
    "is_incremental",
    "log",
    "return",
    "adapter",
    "target",
];

/// Regex-driven structured parser for SQL and dbt model files. Recognizes
/// `WITH … AS (…)` CTEs, top-level DML/DDL statements, `{{ config(…) }}`
/// blocks and `{% macro %} … {% endmacro %}` blocks. Best-effort: nested
/// `WITH` clauses and quoted identifiers are not modeled precisely.
pub fn chunk_sql(content: &str, language: &str) -> Vec<Chunk> {
    let mut spans: Vec<(usize, usize, &'static str)> = Vec::new();

    spans.extend(find_config_blocks(content));
    spans.extend(find_macro_blocks(content));
    spans.extend(find_ctes(content));
    spans.extend(find_statements(content));

    if spans.is_empty() {
        return crate::strategy::chunk_whole_file(content, language);
    }

    spans
        .into_iter()
        .filter_map(|(start, end, kind)| build_chunk(content, start, end, kind, language))
        .collect()
}

fn build_chunk(content: &str, start: usize, end: usize, kind: &str, language: &str) -> Option<Chunk> {
    if start >= end || end > content.len() {
        return None;
    }
    let text = &content[start..end];
    if text.trim().is_empty() {
        return None;
    }

    let start_line = content[..start].matches('\n').count() + 1;
    let end_line = content[..end].matches('\n').count() + 1;

    Some(Chunk {
        content: text.to_string(),
        language: language.to_string(),
        kind: kind.to_string(),
        container_path: String::new(),
        imports: extract_dependencies(text),
        exports: vec![],
        symbols: vec![],
        start_line,
        end_line,
    })
}

fn find_config_blocks(content: &str) -> Vec<(usize, usize, &'static str)> {
    let re = Regex::new(r"(?s)\{\{-?\s*config\(.*?\)\s*-?\}\}").expect("static regex");
    re.find_iter(content)
        .map(|m| (m.start(), m.end(), "config_block"))
        .collect()
}

fn find_macro_blocks(content: &str) -> Vec<(usize, usize, &'static str)> {
    let start_re = Regex::new(r"\{%-?\s*macro\s+\w+\s*\([^)]*\)\s*-?%\}").expect("static regex");
    let end_re = Regex::new(r"\{%-?\s*endmacro\s*-?%\}").expect("static regex");

    let mut spans = Vec::new();
    for start_match in start_re.find_iter(content) {
        if let Some(end_match) = end_re.find(&content[start_match.end()..]) {
            let end = start_match.end() + end_match.end();
            spans.push((start_match.start(), end, "macro"));
        }
    }
    spans
}

fn find_ctes(content: &str) -> Vec<(usize, usize, &'static str)> {
    let cte_re = Regex::new(r"(?i)\b(\w+)\s+as\s*\(").expect("static regex");
    let mut spans = Vec::new();

    for m in cte_re.find_iter(content) {
        let paren_open = m.end() - 1;
        if let Some(close) = matching_paren(content, paren_open) {
            spans.push((m.start(), close + 1, "cte"));
        }
    }
    spans
}

fn find_statements(content: &str) -> Vec<(usize, usize, &'static str)> {
    let start_re =
        Regex::new(r"(?im)^[ \t]*(select|insert|update|delete|merge|create)\b").expect("static regex");
    let mut spans = Vec::new();

    for m in start_re.find_iter(content) {
        let start = m.start();
        let bytes = content.as_bytes();
        let mut depth = 0i32;
        let mut idx = start;
        let mut end = content.len();

        while idx < bytes.len() {
            match bytes[idx] {
                b'(' => depth += 1,
                b')' => depth -= 1,
                b';' if depth <= 0 => {
                    end = idx + 1;
                    break;
                }
                _ => {}
            }
            idx += 1;
        }

        spans.push((start, end, "statement"));
    }
    spans
}

fn matching_paren(content: &str, open_idx: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    if bytes.get(open_idx) != Some(&b'(') {
        return None;
    }
    let mut depth = 0i32;
    for (offset, &byte) in bytes[open_idx..].iter().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open_idx + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// `{{ ref('x') }}`, `{{ source('s','t') }}`, unrecognized `{{ macro(...) }}`
/// calls, and `FROM|JOIN table` references (skipping lines that are
/// themselves Jinja expressions).
fn extract_dependencies(text: &str) -> Vec<ImportRef> {
    let mut deps = Vec::new();

    let ref_re = Regex::new(r#"\{\{\s*ref\(\s*['"]([^'"]+)['"]\s*\)\s*\}\}"#).expect("static regex");
    for cap in ref_re.captures_iter(text) {
        deps.push(ImportRef {
            path: cap[1].to_string(),
            kind: ImportKind::Module,
            symbols: vec![],
        });
    }

    let source_re = Regex::new(
        r#"\{\{\s*source\(\s*['"]([^'"]+)['"]\s*,\s*['"]([^'"]+)['"]\s*\)\s*\}\}"#,
    )
    .expect("static regex");
    for cap in source_re.captures_iter(text) {
        deps.push(ImportRef {
            path: format!("{}.{}", &cap[1], &cap[2]),
            kind: ImportKind::Module,
            symbols: vec![],
        });
    }

    let macro_re = Regex::new(r"\{\{\s*(\w+)\(").expect("static regex");
    for cap in macro_re.captures_iter(text) {
        let name = &cap[1];
        if !BUILTIN_JINJA_CALLS.contains(&name) {
            deps.push(ImportRef {
                path: name.to_string(),
                kind: ImportKind::Module,
                symbols: vec![],
            });
        }
    }

    let table_re = Regex::new(r"(?i)\b(?:from|join)\s+([a-zA-Z_][\w.\"`]*)").expect("static regex");
    for line in text.lines() {
        if line.contains("{{") || line.contains("{%") {
            continue;
        }
        for cap in table_re.captures_iter(line) {
            deps.push(ImportRef {
                path: cap[1].trim_matches(|c| c == '"' || c == '`').to_string(),
                kind: ImportKind::Module,
                symbols: vec![],
            });
        }
    }

    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_block_is_extracted() {
        let sql = "{{ config(materialized='table') }}\n\nselect 1;\n";
        let chunks = chunk_sql(sql, "dbt");
        assert!(chunks.iter().any(|c| c.kind == "config_block"));
        assert!(chunks.iter().any(|c| c.kind == "statement"));
    }

    #[test]
    fn macro_block_spans_to_endmacro() {
        let sql = "{% macro cents_to_dollars(col) %}\n  {{ col }} / 100\n{% endmacro %}\n";
        let chunks = chunk_sql(sql, "dbt");
        let macro_chunk = chunks.iter().find(|c| c.kind == "macro").unwrap();
        assert!(macro_chunk.content.contains("endmacro"));
    }

    #[test]
    fn cte_is_extracted_with_paren_balance() {
        let sql = "with ranked as (\n  select 1 as id, (2 + 3) as val\n)\nselect * from ranked;\n";
        let chunks = chunk_sql(sql, "sql");
        assert!(chunks.iter().any(|c| c.kind == "cte"));
    }

    #[test]
    fn ref_and_source_calls_become_dependencies() {
        let sql = "select * from {{ ref('orders') }} join {{ source('raw', 'customers') }} on true;\n";
        let chunks = chunk_sql(sql, "dbt");
        let stmt = chunks.iter().find(|c| c.kind == "statement").unwrap();
        assert!(stmt.imports.iter().any(|i| i.path == "orders"));
        assert!(stmt.imports.iter().any(|i| i.path == "raw.customers"));
    }

    #[test]
    fn plain_table_reference_outside_jinja_is_captured() {
        let sql = "select * from orders o join customers c on o.customer_id = c.id;\n";
        let chunks = chunk_sql(sql, "sql");
        let stmt = chunks.iter().find(|c| c.kind == "statement").unwrap();
        assert!(stmt.imports.iter().any(|i| i.path == "orders"));
        assert!(stmt.imports.iter().any(|i| i.path == "customers"));
    }

    #[test]
    fn no_structures_falls_back_to_whole_file() {
        let text = "-- just a comment, no statements here\n";
        let chunks = chunk_sql(text, "sql");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, "whole_file");
    }
}
