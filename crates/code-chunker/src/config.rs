use regex::Regex;
use std::path::PathBuf;

/// Chunker behavior, driven by the recognized environment variables
/// (`MAX_CHUNK_SIZE_BYTES`, `DEFAULT_CHUNK_LINES`, `CHUNK_OVERLAP_LINES`,
/// markdown delimiter, `SEMANTIC_CODE_INDEXER_LANGUAGES`). Read once at
/// startup by the CLI's `Config` and handed down to every `Chunker`.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Chunks whose `content` exceeds this many bytes are dropped rather
    /// than emitted; `chunks_skipped` is incremented instead.
    pub max_chunk_size_bytes: usize,

    /// Sliding line-window size for the line-window strategy.
    pub default_chunk_lines: usize,

    /// Overlap between consecutive line-window chunks; step is
    /// `max(1, default_chunk_lines - chunk_overlap_lines)`.
    pub chunk_overlap_lines: usize,

    /// Delimiter regex for the paragraph strategy. Defaults to one-or-more
    /// blank lines.
    pub paragraph_delimiter: Regex,

    /// Repository root used to re-express relative imports against. `None`
    /// when it could not be discovered; import normalization is then
    /// skipped and the raw import spec is kept.
    pub repo_root: Option<PathBuf>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size_bytes: 1_000_000,
            default_chunk_lines: 15,
            chunk_overlap_lines: 3,
            paragraph_delimiter: default_paragraph_delimiter(),
            repo_root: None,
        }
    }
}

fn default_paragraph_delimiter() -> Regex {
    Regex::new(r"\n\s*\n").expect("static paragraph delimiter regex is valid")
}

impl ChunkerConfig {
    /// Build a config from the recognized environment variables, falling
    /// back to the documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("MAX_CHUNK_SIZE_BYTES") {
            if let Ok(value) = raw.parse() {
                config.max_chunk_size_bytes = value;
            }
        }
        if let Ok(raw) = std::env::var("DEFAULT_CHUNK_LINES") {
            if let Ok(value) = raw.parse() {
                config.default_chunk_lines = value;
            }
        }
        if let Ok(raw) = std::env::var("CHUNK_OVERLAP_LINES") {
            if let Ok(value) = raw.parse() {
                config.chunk_overlap_lines = value;
            }
        }
        if let Ok(raw) = std::env::var("MARKDOWN_CHUNK_DELIMITER") {
            if let Ok(re) = Regex::new(&raw) {
                config.paragraph_delimiter = re;
            } else {
                log::warn!("invalid MARKDOWN_CHUNK_DELIMITER regex '{raw}', keeping default");
            }
        }

        config
    }

    pub fn with_repo_root(mut self, repo_root: PathBuf) -> Self {
        self.repo_root = Some(repo_root);
        self
    }

    /// The line-window step size: always at least 1, even when overlap is
    /// misconfigured to be >= the window size.
    pub fn line_window_step(&self) -> usize {
        self.default_chunk_lines
            .saturating_sub(self.chunk_overlap_lines)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size_bytes == 0 {
            return Err("max_chunk_size_bytes must be > 0".to_string());
        }
        if self.default_chunk_lines == 0 {
            return Err("default_chunk_lines must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ChunkerConfig::default().validate().is_ok());
    }

    #[test]
    fn line_window_step_never_reaches_zero() {
        let config = ChunkerConfig {
            default_chunk_lines: 5,
            chunk_overlap_lines: 10,
            ..ChunkerConfig::default()
        };
        assert_eq!(config.line_window_step(), 1);
    }

    #[test]
    fn env_overrides_are_applied() {
        std::env::set_var("DEFAULT_CHUNK_LINES", "42");
        let config = ChunkerConfig::from_env();
        assert_eq!(config.default_chunk_lines, 42);
        std::env::remove_var("DEFAULT_CHUNK_LINES");
    }
}
