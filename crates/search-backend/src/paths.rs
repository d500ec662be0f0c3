/// Strip ALL trailing `-repo` segments from a configured index name, then
/// always append exactly one `-repo` back on for the alias. This is the only
/// contract exposing operator naming conventions into the storage layer.
pub fn normalize_alias(index_name: &str) -> String {
    let mut stripped = index_name;
    while let Some(base) = stripped.strip_suffix("-repo") {
        stripped = base;
    }
    format!("{stripped}-repo")
}

pub fn locations_index_name(index_name: &str) -> String {
    format!("{index_name}_locations")
}

pub fn settings_index_name(index_name: &str) -> String {
    format!("{index_name}_settings")
}

pub const REINDEX_LOCK_DOC_ID: &str = "_reindex_lock";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_all_trailing_repo_segments() {
        assert_eq!(normalize_alias("my-index"), "my-index-repo");
        assert_eq!(normalize_alias("my-index-repo"), "my-index-repo");
        assert_eq!(normalize_alias("my-index-repo-repo-repo"), "my-index-repo");
    }

    #[test]
    fn derived_index_names() {
        assert_eq!(locations_index_name("my-index"), "my-index_locations");
        assert_eq!(settings_index_name("my-index"), "my-index_settings");
    }
}
