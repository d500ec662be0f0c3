//! Process-wide configuration, parsed once in `main` from the environment
//! variables spec.md documents as the recognized surface. Mirrors
//! `code_chunker::ChunkerConfig::from_env`'s "read, parse, fall back to the
//! documented default" shape, generalized to the indexer/queue/backend
//! concerns that config doesn't already own.

use anyhow::Context;
use code_chunker::{ChunkerConfig, LanguageRegistry};
use indexer_search_backend::BackendConfig;
use std::time::Duration;

/// Everything read from the environment at startup. Subcommand handlers
/// borrow from this rather than re-reading `std::env` themselves.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub index_name: Option<String>,

    pub batch_size: usize,
    pub max_queue_size: Option<usize>,
    pub cpu_cores: Option<usize>,
    pub producer_worker_pool_size: Option<usize>,
    pub queue_base_dir: String,

    /// Bind address for the local Prometheus scrape endpoint. Named
    /// `TELEMETRY_ENDPOINT` in the recognized environment surface; shipping
    /// metrics to a remote collector is explicitly out of scope, so this
    /// process only ever serves them for a scraper to pull.
    pub telemetry_endpoint: Option<String>,
    /// How often `worker` refreshes the queue-depth gauges while draining,
    /// so a long `--watch` run's `/metrics` stays current between batches.
    pub telemetry_interval: Duration,

    pub chunker: ChunkerConfig,
    pub languages: Option<Vec<String>>,
}

const DEFAULT_BATCH_SIZE: usize = 500;
const DEFAULT_QUEUE_BASE_DIR: &str = ".queues";
const DEFAULT_TELEMETRY_INTERVAL_SECS: u64 = 60;

impl Config {
    /// Read the recognized environment variables, falling back to the
    /// documented defaults for anything unset or unparsable.
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = env_nonempty("ELASTICSEARCH_ENDPOINT")
            .or_else(|| env_nonempty("SEARCH_BACKEND_ENDPOINT"))
            .unwrap_or_default();
        let mut backend = BackendConfig::new(endpoint);
        backend.cloud_id = env_nonempty("ELASTICSEARCH_CLOUD_ID");
        backend.api_key = env_nonempty("ELASTICSEARCH_API_KEY");
        backend.username = env_nonempty("ELASTICSEARCH_USERNAME");
        backend.password = env_nonempty("ELASTICSEARCH_PASSWORD");
        backend.inference_id = env_nonempty("ELASTICSEARCH_INFERENCE_ID");
        if let Some(n) = env_parsed::<usize>("DELETE_DOCUMENTS_PAGE_SIZE") {
            backend.delete_documents_page_size = n;
        }

        let chunker = ChunkerConfig::from_env();
        chunker.validate().map_err(|e| anyhow::anyhow!(e)).context("validating chunker configuration")?;

        let languages = std::env::var("SEMANTIC_CODE_INDEXER_LANGUAGES")
            .ok()
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect());

        Ok(Self {
            backend,
            index_name: env_nonempty("ELASTICSEARCH_INDEX_NAME"),
            batch_size: env_parsed("BATCH_SIZE").unwrap_or(DEFAULT_BATCH_SIZE),
            max_queue_size: env_parsed("MAX_QUEUE_SIZE"),
            cpu_cores: env_parsed("CPU_CORES"),
            producer_worker_pool_size: env_parsed("PRODUCER_WORKER_POOL_SIZE"),
            queue_base_dir: std::env::var("QUEUE_BASE_DIR").unwrap_or_else(|_| DEFAULT_QUEUE_BASE_DIR.to_string()),
            telemetry_endpoint: env_nonempty("TELEMETRY_ENDPOINT"),
            telemetry_interval: env_parsed("TELEMETRY_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(DEFAULT_TELEMETRY_INTERVAL_SECS)),
            chunker,
            languages,
        })
    }

    /// The language registry this process should chunk with: the full
    /// default registry, or the subset named by
    /// `SEMANTIC_CODE_INDEXER_LANGUAGES` when set.
    pub fn language_registry(&self) -> LanguageRegistry {
        let registry = LanguageRegistry::default();
        match &self.languages {
            None => registry,
            Some(tags) => {
                let allowed: Vec<code_chunker::Language> =
                    tags.iter().map(|tag| code_chunker::Language::from_tag(tag)).collect();
                registry.restrict_to(&allowed)
            }
        }
    }

    /// `min(cpu_cores, configured_pool_size)`, mirroring the clamp order
    /// documented for the Producer's worker pool. The caller (Run
    /// Controller) applies the further `.min(file_count)` clamp once the
    /// file list is known.
    pub fn worker_pool_size(&self) -> usize {
        let cpu_cap = self.cpu_cores.unwrap_or_else(indexer_core::default_pool_size);
        let raw = self.producer_worker_pool_size.map(|n| n.to_string());
        indexer_core::parse_pool_size(raw.as_deref(), cpu_cap).min(cpu_cap)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_rejects_an_invalid_chunker_configuration() {
        std::env::set_var("MAX_CHUNK_SIZE_BYTES", "0");
        let result = Config::from_env();
        std::env::remove_var("MAX_CHUNK_SIZE_BYTES");
        assert!(result.is_err());
    }

    #[test]
    fn env_parsed_falls_back_on_bad_value() {
        std::env::set_var("CONFIG_TEST_BATCH_SIZE", "not-a-number");
        assert_eq!(env_parsed::<usize>("CONFIG_TEST_BATCH_SIZE"), None);
        std::env::remove_var("CONFIG_TEST_BATCH_SIZE");
    }

    #[test]
    fn language_registry_is_unrestricted_by_default() {
        let config = Config {
            languages: None,
            ..default_test_config()
        };
        assert_eq!(
            config.language_registry().language_for_extension("py"),
            code_chunker::Language::Python
        );
    }

    #[test]
    fn language_registry_narrows_to_configured_languages() {
        let config = Config {
            languages: Some(vec!["rust".to_string()]),
            ..default_test_config()
        };
        let registry = config.language_registry();
        assert_eq!(registry.language_for_extension("rs"), code_chunker::Language::Rust);
        assert_eq!(registry.language_for_extension("py"), code_chunker::Language::Unknown);
    }

    #[test]
    fn worker_pool_size_is_clamped_by_cpu_cores_even_when_more_is_configured() {
        let config = Config {
            cpu_cores: Some(2),
            producer_worker_pool_size: Some(16),
            ..default_test_config()
        };
        assert_eq!(config.worker_pool_size(), 2);
    }

    #[test]
    fn worker_pool_size_defaults_to_cpu_cores_when_unconfigured() {
        let config = Config {
            cpu_cores: Some(3),
            producer_worker_pool_size: None,
            ..default_test_config()
        };
        assert_eq!(config.worker_pool_size(), 3);
    }

    fn default_test_config() -> Config {
        Config {
            backend: BackendConfig::new(String::new()),
            index_name: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_queue_size: None,
            cpu_cores: None,
            producer_worker_pool_size: None,
            queue_base_dir: DEFAULT_QUEUE_BASE_DIR.to_string(),
            telemetry_endpoint: None,
            telemetry_interval: Duration::from_secs(DEFAULT_TELEMETRY_INTERVAL_SECS),
            chunker: ChunkerConfig::default(),
            languages: None,
        }
    }
}
