//! Shared fixtures: an in-memory paper source and dump shard helpers.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;
use s2_citation_cache::error::ClientResult;
use s2_citation_cache::models::{Direction, Paper};
use s2_citation_cache::{ClientError, EdgePage, PaperSource};

/// Hard cap the fake API enforces, like the real one.
pub const API_CAP: u64 = 10_000;

/// Metadata-only paper.
pub fn paper(paper_id: &str, corpus_id: u64) -> Paper {
    Paper {
        paper_id: Some(paper_id.to_string()),
        corpus_id: Some(corpus_id),
        title: Some(format!("Paper {paper_id}")),
        ..Paper::default()
    }
}

/// Neighbor generated for synthetic edge lists.
pub fn synthetic_neighbor(prefix: &str, i: u64, corpus_base: u64) -> Paper {
    paper(&format!("{prefix}{i}"), corpus_base + i)
}

enum EdgeSet {
    Listed(Vec<Paper>),
    Synthetic { prefix: String, corpus_base: u64, total: u64 },
}

impl EdgeSet {
    fn total(&self) -> u64 {
        match self {
            Self::Listed(papers) => papers.len() as u64,
            Self::Synthetic { total, .. } => *total,
        }
    }

    fn page(&self, offset: u64, end: u64) -> Vec<Paper> {
        match self {
            Self::Listed(papers) => papers[offset as usize..end as usize].to_vec(),
            Self::Synthetic { prefix, corpus_base, .. } => {
                (offset..end).map(|i| synthetic_neighbor(prefix, i, *corpus_base)).collect()
            }
        }
    }
}

/// In-memory [`PaperSource`] with call counting and injectable failures.
#[derive(Default)]
pub struct FakeSource {
    papers: Mutex<HashMap<String, Paper>>,
    aliases: Mutex<HashMap<String, String>>,
    edges: Mutex<HashMap<(String, Direction), EdgeSet>>,
    failing_pages: Mutex<HashSet<(String, Direction, u64)>>,
    failing_papers: Mutex<HashSet<String>>,
    paused_pages: Mutex<HashSet<(String, Direction, u64)>>,
    pause_reached: Notify,
    pub paper_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    max_request_end: AtomicU64,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_paper(&self, paper: Paper) -> &Self {
        let id = paper.paper_id.clone().unwrap_or_default();
        self.papers.lock().unwrap().insert(id, paper);
        self
    }

    /// Make `alias` resolve to the paper stored under `paper_id`.
    pub fn add_alias(&self, alias: &str, paper_id: &str) -> &Self {
        self.aliases.lock().unwrap().insert(alias.to_string(), paper_id.to_string());
        self
    }

    pub fn set_edges(&self, paper_id: &str, direction: Direction, neighbors: Vec<Paper>) -> &Self {
        self.edges
            .lock()
            .unwrap()
            .insert((paper_id.to_string(), direction), EdgeSet::Listed(neighbors));
        self
    }

    /// `total` generated neighbors `<prefix><i>` with corpus ids `corpus_base + i`.
    pub fn set_synthetic_edges(
        &self,
        paper_id: &str,
        direction: Direction,
        prefix: &str,
        corpus_base: u64,
        total: u64,
    ) -> &Self {
        self.edges.lock().unwrap().insert(
            (paper_id.to_string(), direction),
            EdgeSet::Synthetic { prefix: prefix.to_string(), corpus_base, total },
        );
        self
    }

    pub fn fail_page(&self, paper_id: &str, direction: Direction, offset: u64) -> &Self {
        self.failing_pages.lock().unwrap().insert((paper_id.to_string(), direction, offset));
        self
    }

    pub fn heal_page(&self, paper_id: &str, direction: Direction, offset: u64) -> &Self {
        self.failing_pages.lock().unwrap().remove(&(paper_id.to_string(), direction, offset));
        self
    }

    /// Make the page at `offset` hang until the request is dropped.
    pub fn pause_page(&self, paper_id: &str, direction: Direction, offset: u64) -> &Self {
        self.paused_pages.lock().unwrap().insert((paper_id.to_string(), direction, offset));
        self
    }

    pub fn resume_page(&self, paper_id: &str, direction: Direction, offset: u64) -> &Self {
        self.paused_pages.lock().unwrap().remove(&(paper_id.to_string(), direction, offset));
        self
    }

    /// Wait until a request reaches a paused page.
    pub async fn wait_for_pause(&self) {
        self.pause_reached.notified().await;
    }

    pub fn fail_paper(&self, paper_id: &str) -> &Self {
        self.failing_papers.lock().unwrap().insert(paper_id.to_string());
        self
    }

    pub fn paper_calls(&self) -> usize {
        self.paper_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Largest `offset + limit` any page request asked for.
    pub fn max_request_end(&self) -> u64 {
        self.max_request_end.load(Ordering::SeqCst)
    }

    fn canonical(&self, paper_id: &str) -> String {
        self.aliases.lock().unwrap().get(paper_id).cloned().unwrap_or_else(|| paper_id.to_string())
    }

    /// Paper for an id, an alias or a `CorpusId:<n>`.
    fn lookup(&self, paper_id: &str) -> Option<Paper> {
        let papers = self.papers.lock().unwrap();
        if let Some(cid) = paper_id.strip_prefix("CorpusId:").and_then(|n| n.parse::<u64>().ok()) {
            return papers.values().find(|p| p.corpus_id == Some(cid)).cloned();
        }
        papers.get(&self.canonical(paper_id)).cloned()
    }
}

#[async_trait]
impl PaperSource for FakeSource {
    async fn fetch_paper(&self, paper_id: &str) -> ClientResult<Paper> {
        self.paper_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_papers.lock().unwrap().contains(paper_id) {
            return Err(ClientError::server(503, "unavailable"));
        }
        self.lookup(paper_id).ok_or_else(|| ClientError::not_found(format!("paper {paper_id}")))
    }

    async fn fetch_papers(&self, paper_ids: &[String]) -> ClientResult<Vec<Option<Paper>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(paper_ids.iter().map(|id| self.lookup(id)).collect())
    }

    async fn fetch_edges(
        &self,
        paper_id: &str,
        direction: Direction,
        offset: u64,
        limit: u64,
    ) -> ClientResult<EdgePage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.max_request_end.fetch_max(offset + limit, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let key = (paper_id.to_string(), direction, offset);
        let paused = self.paused_pages.lock().unwrap().contains(&key);
        if paused {
            self.pause_reached.notify_one();
            std::future::pending::<()>().await;
        }
        if self.failing_pages.lock().unwrap().contains(&key) {
            return Err(ClientError::server(500, format!("page {offset} failed")));
        }
        if offset + limit >= API_CAP {
            return Err(ClientError::bad_request("offset + limit must be < 10000"));
        }

        let edges = self.edges.lock().unwrap();
        let Some(set) = edges.get(&(paper_id.to_string(), direction)) else {
            return Ok(EdgePage { offset, next: None, neighbors: Vec::new() });
        };
        let total = set.total();
        let end = (offset + limit).min(total);
        let neighbors = if offset < end { set.page(offset, end) } else { Vec::new() };
        let next = (end < total).then_some(end);
        Ok(EdgePage { offset, next, neighbors })
    }
}

/// Write a dump shard of whitespace-separated `citing cited` pairs.
pub fn write_pairs(dir: &Path, name: &str, pairs: &[(&str, &str)]) -> PathBuf {
    let body: String = pairs.iter().map(|(citing, cited)| format!("{citing} {cited}\n")).collect();
    write_shard(dir, name, &body)
}

/// Write a raw dump shard.
pub fn write_shard(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}
