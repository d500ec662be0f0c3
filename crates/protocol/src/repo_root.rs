use std::path::{Path, PathBuf};

/// Walk upward from `start` looking for a `.git` entry that marks the
/// repository boundary. Falls back to `start` itself when none is found, so
/// callers outside a git checkout still get a stable root to normalize
/// against.
pub fn discover_repository_root(start: &Path) -> PathBuf {
    let mut current = if start.is_file() {
        start.parent().unwrap_or(start)
    } else {
        start
    };

    loop {
        if current.join(".git").exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return start.to_path_buf(),
        }
    }
}

/// Resolve a relative import path against the file that imports it, then
/// re-express the result relative to the repository root.
///
/// `file_path` and `repo_root` are both expected to be absolute (or at least
/// to share a common base); the returned string always uses `/` separators.
pub fn normalize_relative_import(
    repo_root: &Path,
    file_path: &Path,
    import_spec: &str,
) -> Option<String> {
    if !(import_spec.starts_with("./") || import_spec.starts_with("../")) {
        return None;
    }

    let file_dir = file_path.parent()?;
    let resolved = normalize_path(&file_dir.join(import_spec));
    let rel = resolved.strip_prefix(repo_root).unwrap_or(&resolved);
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// Lexically collapse `.`/`..` components without touching the filesystem
/// (the file may not exist yet, or may have a stripped extension).
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_sibling_import() {
        let root = Path::new("/repo");
        let file = Path::new("/repo/src/a/file.ts");
        let got = normalize_relative_import(root, file, "../b/helper").unwrap();
        assert_eq!(got, "src/b/helper");
    }

    #[test]
    fn ignores_non_relative_imports() {
        let root = Path::new("/repo");
        let file = Path::new("/repo/src/a/file.ts");
        assert_eq!(normalize_relative_import(root, file, "react"), None);
        assert_eq!(normalize_relative_import(root, file, "@scope/pkg"), None);
    }

    #[test]
    fn discovers_git_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        let found = discover_repository_root(&dir.path().join("src/nested"));
        assert_eq!(found, dir.path());
    }

    #[test]
    fn falls_back_when_no_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        let start = dir.path().join("src");
        std::fs::create_dir_all(&start).unwrap();
        assert_eq!(discover_repository_root(&start), start);
    }
}
