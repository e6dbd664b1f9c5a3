//! Error types for the citation cache.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! [`ClientError`] covers the HTTP transport; [`CacheError`] is the taxonomy surfaced by
//! the store, the dump index and the graph assembler.

use std::path::PathBuf;
use std::time::Duration;

use reqwest_retry::RetryError;

use crate::models::Direction;

/// Errors from the HTTP client layer.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// HTTP transport error (DNS, TLS, body decoding, etc.)
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// Middleware error
    #[error("Middleware error: {0}")]
    Middleware(reqwest_middleware::Error),

    /// Request timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The server could not be reached
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Rate limited by Semantic Scholar API (429 response)
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested wait time before retry
        retry_after: Duration,
    },

    /// Resource not found (404 response)
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Description of the missing resource
        resource: String,
    },

    /// Invalid request parameters (400 response)
    #[error("Bad request: {message}")]
    BadRequest {
        /// Error message from API
        message: String,
    },

    /// JSON parsing error
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Server error (5xx response)
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Unexpected HTTP status
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },
}

impl ClientError {
    /// Create a rate limited error with retry-after duration.
    #[must_use]
    pub fn rate_limited(seconds: u64) -> Self {
        Self::RateLimited { retry_after: Duration::from_secs(seconds) }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    /// Create a server error.
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server { status, message: message.into() }
    }

    /// Returns true if the remote service reported the resource as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this error is transient.
    ///
    /// The cache never retries on its own; callers use this to decide whether
    /// resuming from the reported page offset is worthwhile.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Connect(_) | Self::Server { .. }
        )
    }

    /// Get the retry-after duration if this is a rate limit error.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Http(err)
        }
    }
}

impl From<reqwest_middleware::Error> for ClientError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match transport_cause(&err) {
            Some(cause) if cause.is_timeout() => Self::Timeout(err.to_string()),
            Some(cause) if cause.is_connect() => Self::Connect(err.to_string()),
            _ => Self::Middleware(err),
        }
    }
}

/// The reqwest error underneath any layers of retry wrapping.
fn transport_cause(err: &reqwest_middleware::Error) -> Option<&reqwest::Error> {
    match err {
        reqwest_middleware::Error::Reqwest(cause) => Some(cause),
        reqwest_middleware::Error::Middleware(inner) => match inner.downcast_ref::<RetryError>()? {
            RetryError::WithRetries { err, .. } | RetryError::Error(err) => transport_cause(err),
        },
    }
}

/// A dump line that could not be parsed into a citation edge.
///
/// Counted and skipped during an index build. At lookup time it means the
/// dump changed under the index.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed dump record in {} at byte {offset}: {reason}", shard.display())]
pub struct MalformedDumpRecord {
    /// Shard file the line came from.
    pub shard: PathBuf,
    /// Byte offset of the line within the shard.
    pub offset: u64,
    /// One-based line number, when the shard was read sequentially.
    pub line: Option<u64>,
    /// What was wrong with it.
    pub reason: String,
}

/// A merged record holds more citation edges than the source claims exist.
///
/// Reported on merge outcomes and logged; the record is kept and flagged dirty.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Consistency violation for {paper_id}: {edges} citation edges exceed claimed {claimed} (slack {slack})"
)]
pub struct ConsistencyViolation {
    /// Paper whose record is inconsistent.
    pub paper_id: String,
    /// Number of citation edges after the merge.
    pub edges: u64,
    /// Citation count claimed by the source.
    pub claimed: u64,
    /// Configured tolerance.
    pub slack: u64,
}

/// Errors surfaced by the cache core.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The API collaborator failed while fetching a page (not retried internally).
    #[error("Fetch failed for {} at offset {offset}: {source}", describe_target(*direction))]
    FetchFailed {
        /// Edge direction being paged, or `None` for the metadata request.
        direction: Option<Direction>,
        /// Offset of the page that failed; a retry may resume here.
        offset: u64,
        /// Underlying transport error.
        #[source]
        source: ClientError,
    },

    /// The HTTP client could not be set up.
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// A dump lookup was issued against a superseded index version.
    #[error("Stale dump index: requested version {requested}, active version {active}")]
    StaleIndex {
        /// Version the caller's handle refers to.
        requested: String,
        /// Version currently active.
        active: String,
    },

    /// No dump index has been built yet.
    #[error("No dump index is available")]
    NoIndex,

    /// A located dump line no longer parses; the dump changed under the index.
    #[error(transparent)]
    MalformedDumpRecord(#[from] MalformedDumpRecord),

    /// An on-disk store was written by an incompatible schema.
    #[error("Schema mismatch in {}: found {found}, expected {expected}", path.display())]
    SchemaMismatch {
        /// Store file.
        path: PathBuf,
        /// Schema tag found on disk.
        found: String,
        /// Schema tag this build understands.
        expected: String,
    },

    /// A filter document could not be compiled.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The store has been closed.
    #[error("Record store is closed")]
    Closed,

    /// Embedded database error.
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn describe_target(direction: Option<Direction>) -> &'static str {
    match direction {
        Some(Direction::Citations) => "citations",
        Some(Direction::References) => "references",
        None => "paper details",
    }
}

macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for CacheError {
                fn from(err: $ty) -> Self {
                    Self::Storage(err.into())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl CacheError {
    /// Create a fetch failure for a page of edges.
    #[must_use]
    pub fn fetch_failed(direction: Direction, offset: u64, source: ClientError) -> Self {
        Self::FetchFailed { direction: Some(direction), offset, source }
    }

    /// Create a fetch failure for the metadata request.
    #[must_use]
    pub fn metadata_failed(source: ClientError) -> Self {
        Self::FetchFailed { direction: None, offset: 0, source }
    }

    /// Create an invalid filter error.
    #[must_use]
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter(message.into())
    }

    /// Returns true if the caller may retry or resume the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::FetchFailed { source, .. } => source.is_retryable(),
            Self::StaleIndex { .. } => true,
            _ => false,
        }
    }

    /// Page offset a resumed fetch should start from, if this is a fetch failure.
    #[must_use]
    pub const fn resume_offset(&self) -> Option<u64> {
        match self {
            Self::FetchFailed { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
