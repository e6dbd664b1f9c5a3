//! Semantic Scholar API client.
//!
//! Provides async HTTP client with:
//! - Connection pooling via reqwest
//! - Retry middleware with exponential backoff for transient transport failures
//! - A fixed delay before each request (200ms without a key, 1s for batches)
//!
//! The delay is per request, not global: concurrent pages each wait it, so the
//! aggregate rate scales with the configured fetch concurrency.
//!
//! Responses are not cached here; the record store is the cache.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tracing::debug;

use crate::config::{Config, api, fields};
use crate::error::{ClientError, ClientResult};
use crate::fetch::{EdgePage, PaperSource};
use crate::models::{CitationResult, Direction, Paper};

/// Semantic Scholar API client.
#[derive(Clone)]
pub struct SemanticScholarClient {
    /// HTTP client with middleware.
    client: ClientWithMiddleware,

    /// API key (optional).
    api_key: Option<String>,

    /// Graph API base URL.
    graph_api_url: String,

    /// Rate limit delay.
    rate_limit_delay: Duration,

    /// Batch rate limit delay.
    batch_rate_limit_delay: Duration,
}

impl SemanticScholarClient {
    /// Create a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(config: &Config) -> ClientResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(ref key) = config.api_key {
            let value = key
                .parse()
                .map_err(|_| ClientError::bad_request("API key is not a valid header value"))?;
            headers.insert("x-api-key", value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(api::MAX_KEEPALIVE)
            .pool_idle_timeout(api::KEEPALIVE_EXPIRY)
            .gzip(true)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_secs(1), Duration::from_secs(30))
            .build_with_max_retries(config.max_retries);

        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            graph_api_url: config.graph_api_url.clone(),
            rate_limit_delay: config.rate_limit_delay,
            batch_rate_limit_delay: config.batch_rate_limit_delay,
        })
    }

    /// Check if an API key is configured.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Get a single paper by ID.
    ///
    /// # Errors
    ///
    /// Returns error on API failure.
    pub async fn get_paper(&self, paper_id: &str, fields: &[&str]) -> ClientResult<Paper> {
        let url = format!("{}/paper/{}", self.graph_api_url, paper_id);
        let params = vec![("fields".to_string(), fields.join(","))];

        self.get(&url, &params).await
    }

    /// Get multiple papers by ID (batch API).
    ///
    /// The result is positional: ids the API does not know come back as `None`.
    ///
    /// # Errors
    ///
    /// Returns error on API failure.
    pub async fn get_papers_batch(
        &self,
        paper_ids: &[String],
        fields: &[&str],
    ) -> ClientResult<Vec<Option<Paper>>> {
        let url = format!("{}/paper/batch", self.graph_api_url);
        let params = vec![("fields".to_string(), fields.join(","))];

        let body = serde_json::json!({
            "ids": paper_ids
        });

        self.post(&url, &params, &body).await
    }

    async fn get_edges(
        &self,
        paper_id: &str,
        direction: Direction,
        offset: u64,
        limit: u64,
        fields: &[&str],
    ) -> ClientResult<CitationResult> {
        let url = format!("{}/paper/{}/{}", self.graph_api_url, paper_id, direction.as_str());
        let nested = match direction {
            Direction::Citations => "citingPaper.",
            Direction::References => "citedPaper.",
        };
        let fields: Vec<String> = fields.iter().map(|f| format!("{nested}{f}")).collect();

        let params = vec![
            ("offset".to_string(), offset.to_string()),
            ("limit".to_string(), limit.to_string()),
            ("fields".to_string(), fields.join(",")),
        ];

        self.get(&url, &params).await
    }

    /// Make a GET request.
    async fn get<T>(&self, url: &str, params: &[(String, String)]) -> ClientResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        // Rate limit
        tokio::time::sleep(self.rate_limit_delay).await;

        debug!(url, "GET");
        let response = self.client.get(url).query(params).send().await?;

        let response = self.handle_response(response).await?;
        let value: serde_json::Value = response.json().await?;

        serde_json::from_value(value).map_err(ClientError::from)
    }

    /// Make a POST request.
    async fn post<T>(
        &self,
        url: &str,
        params: &[(String, String)],
        body: &serde_json::Value,
    ) -> ClientResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        // Rate limit (slower for batch)
        tokio::time::sleep(self.batch_rate_limit_delay).await;

        let body_str = serde_json::to_string(body)?;

        debug!(url, "POST");
        let response = self.client.post(url).query(params).body(body_str).send().await?;

        let response = self.handle_response(response).await?;
        let value: serde_json::Value = response.json().await?;

        serde_json::from_value(value).map_err(ClientError::from)
    }

    /// Handle API response status codes.
    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> ClientResult<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);

                Err(ClientError::rate_limited(retry_after))
            }
            404 => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::not_found(text))
            }
            400 => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::bad_request(text))
            }
            500..=599 => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::server(status.as_u16(), text))
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::UnexpectedStatus { status: status.as_u16(), message: text })
            }
        }
    }
}

#[async_trait]
impl PaperSource for SemanticScholarClient {
    async fn fetch_paper(&self, paper_id: &str) -> ClientResult<Paper> {
        self.get_paper(paper_id, fields::DETAILS).await
    }

    async fn fetch_edges(
        &self,
        paper_id: &str,
        direction: Direction,
        offset: u64,
        limit: u64,
    ) -> ClientResult<EdgePage> {
        let result = self.get_edges(paper_id, direction, offset, limit, fields::EDGE).await?;
        Ok(EdgePage {
            offset: result.offset,
            next: result.next,
            neighbors: result.data.into_iter().filter_map(|ctx| ctx.paper).collect(),
        })
    }

    async fn fetch_papers(&self, paper_ids: &[String]) -> ClientResult<Vec<Option<Paper>>> {
        let mut papers = Vec::with_capacity(paper_ids.len());
        for chunk in paper_ids.chunks(api::BATCH_SIZE) {
            let batch = self.get_papers_batch(chunk, fields::EDGE).await?;
            papers.extend(batch);
        }
        Ok(papers)
    }
}

impl std::fmt::Debug for SemanticScholarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticScholarClient").field("has_api_key", &self.has_api_key()).finish()
    }
}
