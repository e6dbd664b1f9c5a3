//! The remote paper source the fetch layer pages through.

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::models::{Direction, Paper};

/// One page of citation or reference neighbors.
#[derive(Debug, Clone, Default)]
pub struct EdgePage {
    /// Offset this page starts at.
    pub offset: u64,
    /// Offset of the following page, `None` on the last page.
    pub next: Option<u64>,
    /// Neighbor papers in source order.
    pub neighbors: Vec<Paper>,
}

/// Remote bibliographic API.
///
/// Implementations must not retry on their own behalf beyond transport-level
/// policy; the fetch layer reports failures with the offset to resume from.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Fetch paper metadata, including the claimed citation and reference counts.
    async fn fetch_paper(&self, paper_id: &str) -> ClientResult<Paper>;

    /// Fetch one page of neighbors in `direction`.
    async fn fetch_edges(
        &self,
        paper_id: &str,
        direction: Direction,
        offset: u64,
        limit: u64,
    ) -> ClientResult<EdgePage>;

    /// Fetch metadata for many papers, accepting the same id forms as
    /// [`fetch_paper`](Self::fetch_paper).
    ///
    /// The result is positional; papers the source does not know are `None`.
    /// The default issues one request per id.
    async fn fetch_papers(&self, paper_ids: &[String]) -> ClientResult<Vec<Option<Paper>>> {
        let mut papers = Vec::with_capacity(paper_ids.len());
        for paper_id in paper_ids {
            match self.fetch_paper(paper_id).await {
                Ok(paper) => papers.push(Some(paper)),
                Err(err) if err.is_not_found() => papers.push(None),
                Err(err) => return Err(err),
            }
        }
        Ok(papers)
    }
}
