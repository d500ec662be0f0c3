//! Concurrency sizing shared by the Producer's worker pool
//! (`PRODUCER_WORKER_POOL_SIZE`) and the Consumer's `--concurrency`. Grounded
//! on the teacher's `index_concurrency_from_env`/clamping idiom in the
//! original `limits.rs`; the teacher's RAII permit itself is generalized
//! into [`crate::worker_pool::WorkerLease`], which returns a worker to the
//! pool's idle stack on `Drop` the same way the teacher's `IndexingPermit`
//! decremented its counter on `Drop`.

const MAX_CONCURRENCY: usize = 256;

/// CPU-count heuristic used as the default pool/concurrency size when no
/// explicit override is configured.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub fn parse_pool_size(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_CONCURRENCY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pool_size_defaults_and_clamps() {
        let default_value = 4;
        assert_eq!(parse_pool_size(None, default_value), default_value);
        assert_eq!(parse_pool_size(Some(""), default_value), default_value);
        assert_eq!(parse_pool_size(Some("8"), default_value), 8);
        assert_eq!(parse_pool_size(Some("0"), default_value), 1);
        assert_eq!(parse_pool_size(Some("9999"), default_value), MAX_CONCURRENCY);
        assert_eq!(parse_pool_size(Some("abc"), default_value), default_value);
    }
}
