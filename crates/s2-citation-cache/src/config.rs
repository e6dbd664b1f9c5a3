//! Configuration for the citation cache.

use std::path::PathBuf;
use std::time::Duration;

/// API configuration constants.
pub mod api {
    use std::time::Duration;

    /// Graph API endpoint.
    pub const GRAPH_API: &str = "https://api.semanticscholar.org/graph/v1";

    /// Request timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Rate limit delay between requests without API key (200ms = 5 req/s).
    pub const RATE_LIMIT_DELAY: Duration = Duration::from_millis(200);

    /// Rate limit delay between requests with API key (10ms = 100 req/s).
    pub const RATE_LIMIT_DELAY_WITH_KEY: Duration = Duration::from_millis(10);

    /// Rate limit delay for batch requests without API key (1s = 1 req/s).
    pub const BATCH_RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);

    /// Rate limit delay for batch requests with API key (100ms = 10 req/s).
    pub const BATCH_RATE_LIMIT_DELAY_WITH_KEY: Duration = Duration::from_millis(100);

    /// Largest page the citations/references endpoints return.
    pub const PAGE_SIZE: u64 = 1000;

    /// Exclusive bound on `offset + limit` for the citations/references
    /// endpoints, so at most `PAGINATION_CAP - 1` edges are retrievable.
    pub const PAGINATION_CAP: u64 = 10_000;

    /// Pages in flight per direction with an API key.
    pub const FETCH_CONCURRENCY: usize = 4;

    /// Pages in flight per direction without an API key, so the request delay
    /// actually bounds the rate.
    pub const FETCH_CONCURRENCY_WITHOUT_KEY: usize = 1;

    /// Transport-level retries for timeouts, connection failures, 408, 429 and 5xx.
    pub const MAX_RETRIES: u32 = 3;

    /// Largest id list accepted by the paper batch endpoint.
    pub const BATCH_SIZE: usize = 500;

    /// Maximum keepalive connections.
    pub const MAX_KEEPALIVE: usize = 10;

    /// Keepalive expiry.
    pub const KEEPALIVE_EXPIRY: Duration = Duration::from_secs(30);
}

/// Local cache constants.
pub mod cache {
    use std::time::Duration;

    /// How long a stored record is served without refetching (7 days).
    pub const RECORD_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    /// Records kept in the in-memory layer.
    pub const MEMORY_CAPACITY: u64 = 1000;

    /// Citation edges allowed beyond the claimed count before a record is flagged.
    pub const CONSISTENCY_SLACK: u64 = 0;

    /// Directory name under the user's config dir.
    pub const DIR_NAME: &str = "s2cache";
}

/// Paper field sets for API requests.
pub mod fields {
    /// Fields stored on every record.
    pub const DETAILS: &[&str] = &[
        "paperId",
        "corpusId",
        "title",
        "year",
        "venue",
        "authors",
        "citationCount",
        "influentialCitationCount",
        "referenceCount",
        "externalIds",
    ];

    /// Fields requested for each neighbor on citation/reference pages.
    pub const EDGE: &[&str] = &[
        "paperId",
        "corpusId",
        "title",
        "year",
        "venue",
        "authors",
        "citationCount",
        "influentialCitationCount",
    ];
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Semantic Scholar API key (optional).
    pub api_key: Option<String>,

    /// Base URL for Graph API (for testing with mock servers).
    pub graph_api_url: String,

    /// Directory holding the record store and the dump index.
    pub cache_dir: PathBuf,

    /// Directory holding citation dump shards (optional).
    pub dump_dir: Option<PathBuf>,

    /// Request timeout.
    pub request_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Delay before each request. Pages fetched concurrently each wait it
    /// independently.
    pub rate_limit_delay: Duration,

    /// Delay before each batch request.
    pub batch_rate_limit_delay: Duration,

    /// Transport retries per request.
    pub max_retries: u32,

    /// Edges requested per page.
    pub page_size: u64,

    /// Exclusive bound on `offset + limit` per direction.
    pub pagination_cap: u64,

    /// Pages in flight per direction.
    pub fetch_concurrency: usize,

    /// Freshness window for stored records.
    pub record_ttl: Duration,

    /// Records kept in memory.
    pub memory_capacity: u64,

    /// Tolerated excess of citation edges over the claimed count.
    pub consistency_slack: u64,
}

impl Config {
    /// Create a new configuration with optional API key.
    ///
    /// The rate limit delay is adjusted based on API key presence.
    #[must_use]
    pub fn new(api_key: Option<String>, cache_dir: Option<PathBuf>) -> Self {
        let has_key = api_key.is_some();
        Self {
            api_key,
            graph_api_url: api::GRAPH_API.to_string(),
            cache_dir: cache_dir.unwrap_or_else(default_cache_dir),
            dump_dir: None,
            request_timeout: api::REQUEST_TIMEOUT,
            connect_timeout: api::CONNECT_TIMEOUT,
            rate_limit_delay: if has_key {
                api::RATE_LIMIT_DELAY_WITH_KEY
            } else {
                api::RATE_LIMIT_DELAY
            },
            batch_rate_limit_delay: if has_key {
                api::BATCH_RATE_LIMIT_DELAY_WITH_KEY
            } else {
                api::BATCH_RATE_LIMIT_DELAY
            },
            max_retries: api::MAX_RETRIES,
            page_size: api::PAGE_SIZE,
            pagination_cap: api::PAGINATION_CAP,
            fetch_concurrency: if has_key {
                api::FETCH_CONCURRENCY
            } else {
                api::FETCH_CONCURRENCY_WITHOUT_KEY
            },
            record_ttl: cache::RECORD_TTL,
            memory_capacity: cache::MEMORY_CAPACITY,
            consistency_slack: cache::CONSISTENCY_SLACK,
        }
    }

    /// Create a test configuration pointing at a mock server and a scratch directory.
    #[must_use]
    pub fn for_testing(base_url: &str, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_key: None,
            graph_api_url: format!("{}/graph/v1", base_url),
            cache_dir: cache_dir.into(),
            dump_dir: None,
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            rate_limit_delay: Duration::from_millis(0), // No delay in tests
            batch_rate_limit_delay: Duration::from_millis(0),
            max_retries: 0, // Transport retries only slow tests down
            page_size: api::PAGE_SIZE,
            pagination_cap: api::PAGINATION_CAP,
            fetch_concurrency: api::FETCH_CONCURRENCY,
            record_ttl: cache::RECORD_TTL,
            memory_capacity: 100,
            consistency_slack: cache::CONSISTENCY_SLACK,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Reads `SEMANTIC_SCHOLAR_API_KEY`, `S2CACHE_DIR` and `S2CACHE_DUMP_DIR`.
    ///
    /// # Errors
    ///
    /// Returns error if environment variables are invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok().filter(|k| !k.is_empty());
        let cache_dir = std::env::var_os("S2CACHE_DIR").map(PathBuf::from);
        let mut config = Self::new(api_key, cache_dir);
        config.dump_dir = std::env::var_os("S2CACHE_DUMP_DIR").map(PathBuf::from);

        if let Ok(page_size) = std::env::var("S2CACHE_PAGE_SIZE") {
            config.page_size = page_size.parse()?;
            anyhow::ensure!(config.page_size > 0, "S2CACHE_PAGE_SIZE must be positive");
        }

        Ok(config)
    }

    /// Check if an API key is configured.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Path of the record store database.
    #[must_use]
    pub fn records_path(&self) -> PathBuf {
        self.cache_dir.join("records.redb")
    }

    /// Directory holding dump index versions.
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.cache_dir.join("dump-index")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(None, None)
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(cache::DIR_NAME)
}
