use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-run counters the Producer and Consumer accumulate and report through
/// [`crate::health`]'s run summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub files_seen: usize,
    pub files_failed: usize,
    pub chunks_enqueued: usize,
    pub chunks_skipped: usize,
    pub rows_committed: usize,
    pub rows_requeued: usize,
    pub rows_failed: usize,
    pub languages: HashMap<String, usize>,
    pub errors: Vec<String>,
    pub time_ms: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, language: &str) {
        self.files_seen += 1;
        *self.languages.entry(language.to_string()).or_insert(0) += 1;
    }

    pub fn add_file_failure(&mut self, error: impl Into<String>) {
        self.files_failed += 1;
        self.errors.push(error.into());
    }

    pub fn add_chunks(&mut self, produced: usize, skipped: usize) {
        self.chunks_enqueued += produced;
        self.chunks_skipped += skipped;
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.files_seen += other.files_seen;
        self.files_failed += other.files_failed;
        self.chunks_enqueued += other.chunks_enqueued;
        self.chunks_skipped += other.chunks_skipped;
        self.rows_committed += other.rows_committed;
        self.rows_requeued += other.rows_requeued;
        self.rows_failed += other.rows_failed;
        for (lang, count) in &other.languages {
            *self.languages.entry(lang.clone()).or_insert(0) += count;
        }
        self.errors.extend(other.errors.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_counters_and_languages() {
        let mut a = RunStats::new();
        a.add_file("rust");
        a.add_chunks(3, 1);

        let mut b = RunStats::new();
        b.add_file("rust");
        b.add_file_failure("boom");

        a.merge(&b);
        assert_eq!(a.files_seen, 2);
        assert_eq!(a.files_failed, 1);
        assert_eq!(a.languages["rust"], 2);
        assert_eq!(a.errors, vec!["boom".to_string()]);
    }
}
