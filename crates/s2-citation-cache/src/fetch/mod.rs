//! Paginated fetching of citation and reference edges.
//!
//! The first page of a direction is requested alone so its failure can be
//! reported precisely. Remaining pages are requested concurrently up to a
//! bound and consumed in offset order, so the edge order matches the source.
//!
//! The API rejects any request with `offset + limit >= cap`, so the last
//! page before the cap is shortened and one edge below the cap is the most
//! a direction can yield.

mod source;

pub use source::{EdgePage, PaperSource};

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{CacheError, CacheResult, ClientError};
use crate::models::{Direction, Edge, Paper};

/// Pagination state for one paper and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCursor {
    /// Offset of the next page to request.
    pub offset: u64,
    /// Edges per page.
    pub page_size: u64,
    /// Total the source claims exists, if known.
    pub total_claimed: Option<u64>,
}

impl FetchCursor {
    /// Cursor at the first page.
    #[must_use]
    pub const fn start(page_size: u64, total_claimed: Option<u64>) -> Self {
        Self { offset: 0, page_size, total_claimed }
    }
}

/// A page that failed after earlier pages succeeded.
#[derive(Debug)]
pub struct Interruption {
    /// Offset of the failed page.
    pub offset: u64,
    /// Transport error.
    pub error: ClientError,
}

/// Edges gathered for one direction.
#[derive(Debug)]
pub struct EdgeBatch {
    /// Direction that was paged.
    pub direction: Direction,
    /// Edges in source order, possibly with duplicates across pages.
    pub edges: Vec<Edge>,
    /// Neighbor metadata, parallel to `edges`.
    pub neighbors: Vec<Paper>,
    /// Neighbors the source returned without any identifier.
    pub unresolved: usize,
    /// Total the source claims exists.
    pub total_claimed: Option<u64>,
    /// Pages successfully fetched.
    pub pages: usize,
    /// True if the source holds more edges than the API can page through.
    pub capped: bool,
    /// Set when a later page failed; `edges` holds the pages before it.
    pub interrupted: Option<Interruption>,
    /// Where a resumed fetch should start, if there is more to fetch.
    pub cursor: Option<FetchCursor>,
}

impl EdgeBatch {
    fn empty(direction: Direction, total_claimed: Option<u64>) -> Self {
        Self {
            direction,
            edges: Vec::new(),
            neighbors: Vec::new(),
            unresolved: 0,
            total_claimed,
            pages: 0,
            capped: false,
            interrupted: None,
            cursor: None,
        }
    }

    /// True if every edge the source claims was retrieved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none() && !self.capped
    }

    fn absorb(&mut self, page: EdgePage) {
        self.pages += 1;
        for paper in page.neighbors {
            match Edge::from_api(&paper) {
                Some(edge) => {
                    self.edges.push(edge);
                    self.neighbors.push(paper);
                }
                None => self.unresolved += 1,
            }
        }
    }
}

/// Issues paginated requests against a [`PaperSource`].
#[derive(Clone)]
pub struct FetchCoordinator {
    source: Arc<dyn PaperSource>,
    page_size: u64,
    api_cap: u64,
    concurrency: usize,
}

impl FetchCoordinator {
    /// Coordinator with the configured page size, API cap and concurrency.
    #[must_use]
    pub fn new(source: Arc<dyn PaperSource>, config: &Config) -> Self {
        Self::with_limits(source, config.page_size, config.pagination_cap, config.fetch_concurrency)
    }

    /// Coordinator with explicit limits.
    #[must_use]
    pub fn with_limits(
        source: Arc<dyn PaperSource>,
        page_size: u64,
        api_cap: u64,
        concurrency: usize,
    ) -> Self {
        Self { source, page_size: page_size.max(1), api_cap, concurrency: concurrency.max(1) }
    }

    /// The underlying source.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn PaperSource> {
        &self.source
    }

    /// Exclusive bound on `offset + limit`.
    #[must_use]
    pub const fn api_cap(&self) -> u64 {
        self.api_cap
    }

    /// Most edges retrievable through the API per direction.
    #[must_use]
    pub const fn retrievable(&self) -> u64 {
        self.api_cap.saturating_sub(1)
    }

    /// Edges requested per page.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Fetch paper metadata. A paper the source does not know is `Ok(None)`.
    pub async fn fetch_metadata(&self, paper_id: &str) -> CacheResult<Option<Paper>> {
        match self.source.fetch_paper(paper_id).await {
            Ok(paper) => Ok(Some(paper)),
            Err(err) if err.is_not_found() => {
                debug!(paper_id, "Paper not found at source");
                Ok(None)
            }
            Err(err) => Err(CacheError::metadata_failed(err)),
        }
    }

    /// Fetch metadata for many papers; positional, `None` for unknown ids.
    pub async fn fetch_papers(&self, paper_ids: &[String]) -> CacheResult<Vec<Option<Paper>>> {
        if paper_ids.is_empty() {
            return Ok(Vec::new());
        }
        let papers = self.source.fetch_papers(paper_ids).await.map_err(CacheError::metadata_failed)?;
        debug!(
            requested = paper_ids.len(),
            found = papers.iter().filter(|p| p.is_some()).count(),
            "Fetched paper batch"
        );
        Ok(papers)
    }

    /// Fetch up to `count` edges (all retrievable if `None`) from the first page.
    pub async fn fetch_edges(
        &self,
        paper_id: &str,
        direction: Direction,
        count: Option<u64>,
        total_claimed: Option<u64>,
    ) -> CacheResult<EdgeBatch> {
        let cursor = FetchCursor::start(self.page_size, total_claimed);
        self.fetch_edges_from(paper_id, direction, cursor, count).await
    }

    /// Resume fetching at `cursor`. `count` is an absolute end offset.
    ///
    /// A failure on the first requested page is an error; a failure on any
    /// later page ends the batch with an [`Interruption`].
    pub async fn fetch_edges_from(
        &self,
        paper_id: &str,
        direction: Direction,
        cursor: FetchCursor,
        count: Option<u64>,
    ) -> CacheResult<EdgeBatch> {
        let page_size = cursor.page_size.max(1);
        let retrievable = self.retrievable();
        let target = count.map_or(retrievable, |c| c.min(retrievable));
        let claimed = cursor.total_claimed;
        let mut batch = EdgeBatch::empty(direction, claimed);
        batch.capped = claimed.is_some_and(|c| c > retrievable);

        if cursor.offset >= target {
            return Ok(batch);
        }

        let first_limit = page_size.min(target - cursor.offset);
        let first = self
            .source
            .fetch_edges(paper_id, direction, cursor.offset, first_limit)
            .await
            .map_err(|err| CacheError::fetch_failed(direction, cursor.offset, err))?;
        debug!(
            paper_id,
            %direction,
            offset = cursor.offset,
            neighbors = first.neighbors.len(),
            "Fetched first page"
        );

        let mut next_offset = first.next;
        batch.absorb(first);

        // Pages expected from the claimed total; planning past it is harmless
        // since the stream stops at the first page without a successor.
        let expected_end = claimed.map_or(target, |c| c.min(target));

        while let Some(start) = next_offset.filter(|&o| o < target) {
            let wave_end = expected_end.max(start + page_size * self.concurrency as u64).min(target);
            let offsets = std::iter::successors(Some(start), |o| Some(o + page_size))
                .take_while(|&o| o < wave_end);

            let source = &self.source;
            let mut pages = stream::iter(offsets)
                .map(|offset| {
                    let limit = page_size.min(target - offset);
                    async move { (offset, source.fetch_edges(paper_id, direction, offset, limit).await) }
                })
                .buffered(self.concurrency);

            next_offset = None;
            while let Some((offset, result)) = pages.next().await {
                match result {
                    Ok(page) => {
                        debug!(paper_id, %direction, offset, neighbors = page.neighbors.len(), "Fetched page");
                        next_offset = page.next;
                        batch.absorb(page);
                        if next_offset.is_none() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(paper_id, %direction, offset, error = %error, "Page fetch interrupted");
                        batch.cursor = Some(FetchCursor { offset, page_size, total_claimed: claimed });
                        batch.interrupted = Some(Interruption { offset, error });
                        return Ok(batch);
                    }
                }
            }
        }

        if let Some(offset) = next_offset {
            if offset >= retrievable {
                batch.capped = true;
            } else {
                batch.cursor = Some(FetchCursor { offset, page_size, total_claimed: claimed });
            }
        }

        debug!(
            paper_id,
            %direction,
            edges = batch.edges.len(),
            pages = batch.pages,
            capped = batch.capped,
            "Finished paging"
        );
        Ok(batch)
    }
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("page_size", &self.page_size)
            .field("api_cap", &self.api_cap)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ClientResult;

    /// Serves `total` neighbors per direction; fails at the listed offsets.
    struct Fake {
        total: u64,
        fail_at: HashSet<u64>,
        requests: Mutex<Vec<(u64, u64)>>,
    }

    impl Fake {
        fn new(total: u64) -> Self {
            Self { total, fail_at: HashSet::new(), requests: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl PaperSource for Fake {
        async fn fetch_paper(&self, paper_id: &str) -> ClientResult<Paper> {
            Err(ClientError::not_found(paper_id))
        }

        async fn fetch_edges(
            &self,
            _paper_id: &str,
            _direction: Direction,
            offset: u64,
            limit: u64,
        ) -> ClientResult<EdgePage> {
            self.requests.lock().unwrap().push((offset, limit));
            if self.fail_at.contains(&offset) {
                return Err(ClientError::server(503, "unavailable"));
            }
            let end = (offset + limit).min(self.total);
            let neighbors = (offset..end)
                .map(|i| Paper { paper_id: Some(format!("n{i}")), ..Paper::default() })
                .collect();
            Ok(EdgePage { offset, next: (end < self.total).then_some(end), neighbors })
        }
    }

    fn coordinator(source: Fake, page: u64, cap: u64) -> (Arc<Fake>, FetchCoordinator) {
        let source = Arc::new(source);
        let dynamic: Arc<dyn PaperSource> = Arc::clone(&source) as Arc<dyn PaperSource>;
        (source, FetchCoordinator::with_limits(dynamic, page, cap, 3))
    }

    #[tokio::test]
    async fn test_fetches_all_pages_in_order() {
        let (_, fetcher) = coordinator(Fake::new(25), 10, 100);
        let batch = fetcher.fetch_edges("p", Direction::Citations, None, Some(25)).await.unwrap();

        let ids: Vec<_> = batch.edges.iter().map(|e| e.paper_id.clone()).collect();
        let expected: Vec<_> = (0..25).map(|i| format!("n{i}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(batch.pages, 3);
        assert!(batch.is_complete());
        assert!(batch.cursor.is_none());
    }

    #[tokio::test]
    async fn test_unknown_total_keeps_paging_until_last_page() {
        let (_, fetcher) = coordinator(Fake::new(95), 10, 1000);
        let batch = fetcher.fetch_edges("p", Direction::References, None, None).await.unwrap();
        assert_eq!(batch.edges.len(), 95);
        assert!(batch.is_complete());
    }

    #[tokio::test]
    async fn test_stops_at_cap() {
        let (source, fetcher) = coordinator(Fake::new(150), 10, 100);
        let batch = fetcher.fetch_edges("p", Direction::Citations, None, Some(150)).await.unwrap();

        assert_eq!(batch.edges.len(), 99);
        assert!(batch.capped);
        let requests = source.requests.lock().unwrap();
        assert!(requests.iter().all(|(offset, limit)| offset + limit < 100));
        assert_eq!(requests.iter().map(|(offset, limit)| offset + limit).max(), Some(99));
    }

    #[tokio::test]
    async fn test_claimed_total_at_cap_is_capped() {
        let (_, fetcher) = coordinator(Fake::new(100), 10, 100);
        let batch = fetcher.fetch_edges("p", Direction::Citations, None, Some(100)).await.unwrap();
        assert_eq!(batch.edges.len(), 99);
        assert!(batch.capped);
        assert!(batch.interrupted.is_none());
    }

    #[tokio::test]
    async fn test_stops_at_count() {
        let (_, fetcher) = coordinator(Fake::new(50), 10, 100);
        let batch = fetcher.fetch_edges("p", Direction::Citations, Some(15), Some(50)).await.unwrap();
        assert_eq!(batch.edges.len(), 15);
        assert!(!batch.capped);
        assert_eq!(batch.cursor.map(|c| c.offset), Some(15));
    }

    #[tokio::test]
    async fn test_first_page_failure_is_an_error() {
        let mut fake = Fake::new(50);
        fake.fail_at.insert(0);
        let (_, fetcher) = coordinator(fake, 10, 100);

        let err = fetcher.fetch_edges("p", Direction::Citations, None, Some(50)).await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::FetchFailed { direction: Some(Direction::Citations), offset: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_later_page_failure_is_absorbed_and_resumable() {
        let mut fake = Fake::new(50);
        fake.fail_at.insert(30);
        let (source, fetcher) = coordinator(fake, 10, 100);

        let batch = fetcher.fetch_edges("p", Direction::Citations, None, Some(50)).await.unwrap();
        assert_eq!(batch.edges.len(), 30);
        let interruption = batch.interrupted.as_ref().unwrap();
        assert_eq!(interruption.offset, 30);
        let cursor = batch.cursor.unwrap();
        assert_eq!(cursor.offset, 30);

        // Offsets are stable, so resuming picks up exactly where the failure was.
        let resumed = {
            let source = Fake::new(50);
            let (_, fetcher) = coordinator(source, 10, 100);
            fetcher.fetch_edges_from("p", Direction::Citations, cursor, None).await.unwrap()
        };
        assert_eq!(resumed.edges.first().map(|e| e.paper_id.as_str()), Some("n30"));
        assert_eq!(resumed.edges.len(), 20);
        assert!(source.requests.lock().unwrap().iter().any(|(o, _)| *o == 30));
    }

    #[tokio::test]
    async fn test_default_batch_maps_unknown_papers_to_none() {
        let (_, fetcher) = coordinator(Fake::new(0), 10, 100);
        let papers = fetcher.fetch_papers(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert_eq!(papers.len(), 2);
        assert!(papers.iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn test_metadata_not_found_is_none() {
        let (_, fetcher) = coordinator(Fake::new(0), 10, 100);
        assert!(fetcher.fetch_metadata("missing").await.unwrap().is_none());
    }
}
