//! Repository acquisition and `repo_arg` parsing for the `setup` and
//! `index` commands. Grounded on `indexer_core::git`'s subprocess-with-
//! timeout idiom; this module only decides *where* a repository lives and
//! *what* its index should be called, not how it gets scanned or chunked.

use std::path::{Path, PathBuf};

/// One `path-or-url[:index_name]` argument to `index`. A bare URL or local
/// path derives its index name from the final path segment; an explicit
/// `:index_name` suffix overrides that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoArg {
    pub source: String,
    pub index_name: String,
}

pub fn parse_repo_arg(raw: &str) -> RepoArg {
    // A Windows-style drive letter ("C:\repo") or an scp-like SSH remote
    // ("git@host:path") both contain a colon that is not an index-name
    // separator; only split on the *last* colon, and only when what
    // follows looks like a plain identifier (no path separators).
    if let Some(idx) = raw.rfind(':') {
        let (source, suffix) = (&raw[..idx], &raw[idx + 1..]);
        let looks_like_index_name = !suffix.is_empty() && !suffix.contains('/') && !suffix.contains('\\');
        if looks_like_index_name && !source.is_empty() {
            return RepoArg {
                source: source.to_string(),
                index_name: suffix.to_string(),
            };
        }
    }
    RepoArg {
        source: raw.to_string(),
        index_name: default_index_name(raw),
    }
}

fn default_index_name(source: &str) -> String {
    let trimmed = source.trim_end_matches('/').trim_end_matches(".git");
    let last_segment = trimmed.rsplit(['/', '\\', ':']).find(|s| !s.is_empty()).unwrap_or(trimmed);
    sanitize_index_name(last_segment)
}

fn sanitize_index_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let sanitized: String = lowered
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if sanitized.is_empty() {
        "repo".to_string()
    } else {
        sanitized
    }
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://") || source.starts_with("git@") || source.starts_with("ssh://")
}

/// The on-disk checkout path for a URL-form `repo_arg`, under
/// `<queue_base>/.repos/<index_name>`. Local-path `repo_arg`s are used
/// as-is and never routed through this function.
pub fn checkout_path(queue_base: &Path, index_name: &str) -> PathBuf {
    queue_base.join(".repos").join(index_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_https_url_derives_index_name_from_last_segment() {
        let arg = parse_repo_arg("https://github.com/acme/widgets.git");
        assert_eq!(arg.source, "https://github.com/acme/widgets.git");
        assert_eq!(arg.index_name, "widgets");
    }

    #[test]
    fn explicit_index_name_suffix_overrides_default() {
        let arg = parse_repo_arg("https://github.com/acme/widgets.git:custom-name");
        assert_eq!(arg.source, "https://github.com/acme/widgets.git");
        assert_eq!(arg.index_name, "custom-name");
    }

    #[test]
    fn local_path_with_index_name_suffix() {
        let arg = parse_repo_arg("/repos/widgets:widgets-idx");
        assert_eq!(arg.source, "/repos/widgets");
        assert_eq!(arg.index_name, "widgets-idx");
    }

    #[test]
    fn bare_local_path_derives_index_name() {
        let arg = parse_repo_arg("/repos/My Widgets");
        assert_eq!(arg.source, "/repos/My Widgets");
        assert_eq!(arg.index_name, "my-widgets");
    }

    #[test]
    fn ssh_remote_with_colon_path_is_not_mistaken_for_index_name() {
        let arg = parse_repo_arg("git@github.com:acme/widgets.git");
        assert_eq!(arg.source, "git@github.com:acme/widgets.git");
        assert_eq!(arg.index_name, "widgets");
    }

    #[test]
    fn is_url_recognizes_common_schemes() {
        assert!(is_url("https://github.com/acme/widgets.git"));
        assert!(is_url("git@github.com:acme/widgets.git"));
        assert!(!is_url("/repos/widgets"));
    }
}
