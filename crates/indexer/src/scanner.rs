use crate::error::Result;
use code_chunker::{Language, LanguageRegistry};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// The Producer's "Full" file selection mode: a `.gitignore`-aware recursive
/// walk of the repository, filtered to the enabled-language extension set.
pub struct FileScanner {
    root: PathBuf,
    registry: LanguageRegistry,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            registry: LanguageRegistry::default(),
        }
    }

    pub fn with_registry(mut self, registry: LanguageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Scan the repository for files whose extension maps to an enabled
    /// language, honoring `.gitignore`.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for result in WalkBuilder::new(&self.root).hidden(false).build() {
            match result {
                Ok(entry) => {
                    if !entry.file_type().map_or(false, |ft| ft.is_file()) {
                        continue;
                    }
                    let path = entry.path();
                    if self.registry.language_for_path(path) == Language::Unknown {
                        continue;
                    }
                    files.push(path.to_path_buf());
                }
                Err(e) => log::warn!("failed to read directory entry: {e}"),
            }
        }

        log::info!("found {} source files under {:?}", files.len(), self.root);
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_finds_enabled_language_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("notes.bin"), "binary").unwrap();

        let files = FileScanner::new(dir.path()).scan().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.rs"));
    }

    #[test]
    fn scan_ignores_gitignored_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "ignored.rs\n").unwrap();
        fs::write(dir.path().join("ignored.rs"), "fn x() {}").unwrap();
        fs::write(dir.path().join("kept.rs"), "fn y() {}").unwrap();

        let files = FileScanner::new(dir.path()).scan().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("kept.rs"));
    }
}
