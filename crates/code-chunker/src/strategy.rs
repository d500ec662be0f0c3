use crate::config::ChunkerConfig;
use crate::types::Chunk;

/// Split `content` into paragraphs using the configured delimiter, dropping
/// any paragraph with no alphanumeric character (pure whitespace, fence
/// lines, etc).
pub fn chunk_by_paragraph(config: &ChunkerConfig, content: &str, language: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut line_cursor = 1usize;

    for piece in config.paragraph_delimiter.split(content) {
        let piece_lines = piece.lines().count().max(1);
        let start_line = line_cursor;
        let end_line = start_line + piece_lines.saturating_sub(1);
        line_cursor = end_line + 2;

        let trimmed = piece.trim();
        if trimmed.is_empty() || !trimmed.chars().any(|c| c.is_alphanumeric()) {
            continue;
        }

        chunks.push(Chunk {
            content: trimmed.to_string(),
            language: language.to_string(),
            kind: "paragraph".to_string(),
            container_path: String::new(),
            imports: vec![],
            exports: vec![],
            symbols: vec![],
            start_line,
            end_line,
        });
    }

    chunks
}

/// Sliding window of `default_chunk_lines` lines, advancing by
/// [`ChunkerConfig::line_window_step`] so consecutive windows overlap by
/// `chunk_overlap_lines`.
pub fn chunk_by_line_window(config: &ChunkerConfig, content: &str, language: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return vec![];
    }

    let window = config.default_chunk_lines.max(1);
    let step = config.line_window_step();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + window).min(lines.len());
        let text = lines[start..end].join("\n");
        if !text.trim().is_empty() {
            chunks.push(Chunk {
                content: text,
                language: language.to_string(),
                kind: "line_window".to_string(),
                container_path: String::new(),
                imports: vec![],
                exports: vec![],
                symbols: vec![],
                start_line: start + 1,
                end_line: end,
            });
        }

        if end >= lines.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Emit the whole file as a single chunk. Used both as a strategy in its
/// own right and as the universal fallback when a structured strategy
/// finds nothing.
pub fn chunk_whole_file(content: &str, language: &str) -> Vec<Chunk> {
    if content.trim().is_empty() {
        return vec![];
    }
    let end_line = content.lines().count().max(1);
    vec![Chunk {
        content: content.to_string(),
        language: language.to_string(),
        kind: "whole_file".to_string(),
        container_path: String::new(),
        imports: vec![],
        exports: vec![],
        symbols: vec![],
        start_line: 1,
        end_line,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_with_paragraphs() -> String {
        "first paragraph\nmore text\n\n\nsecond paragraph\n\n---\n\nthird one here".to_string()
    }

    #[test]
    fn paragraph_strategy_drops_non_alphanumeric_pieces() {
        let config = ChunkerConfig::default();
        let chunks = chunk_by_paragraph(&config, &content_with_paragraphs(), "markdown");
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.kind == "paragraph"));
    }

    #[test]
    fn line_window_overlaps_by_configured_amount() {
        let config = ChunkerConfig {
            default_chunk_lines: 4,
            chunk_overlap_lines: 2,
            ..ChunkerConfig::default()
        };
        let content = (1..=10)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_by_line_window(&config, &content, "plaintext");
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 4);
        assert_eq!(chunks[1].start_line, 3);
    }

    #[test]
    fn line_window_covers_short_files_in_one_chunk() {
        let config = ChunkerConfig::default();
        let chunks = chunk_by_line_window(&config, "one\ntwo\nthree", "shell");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn whole_file_strategy_yields_single_chunk() {
        let chunks = chunk_whole_file("fn main() {}\n", "rust");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, "whole_file");
    }

    #[test]
    fn whole_file_strategy_skips_empty_content() {
        assert!(chunk_whole_file("   \n  \n", "rust").is_empty());
    }
}
