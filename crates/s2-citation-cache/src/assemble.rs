//! Graph assembly: turns API pages and dump lookups into one stored record.
//!
//! The assembler holds no persistent state. For a requested paper it serves a
//! fresh stored record as-is, otherwise it fetches metadata and both edge
//! directions, consults the dump index for any direction the API cannot page
//! through completely, and merges everything into the store in one write.
//! Dump edges arrive as `CorpusId:` placeholders; they are swapped for real
//! paper ids through a batch lookup before the write.
//!
//! API presence decides inclusion; a dump that omits an edge never removes it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dump::DumpIndexer;
use crate::error::{CacheError, CacheResult, ConsistencyViolation};
use crate::fetch::{EdgeBatch, FetchCoordinator, Interruption};
use crate::models::{CORPUS_PREFIX, Direction, Edge, Paper, PaperRecord};
use crate::store::{KeyGuard, MergeStats, RecordStore};

/// Options for a single resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Refetch even if the stored record is fresh.
    pub force: bool,
    /// Consult the dump index when the API is capped.
    pub use_dump: bool,
    /// Store metadata stubs for neighbors returned by the API.
    pub store_neighbors: bool,
    /// Citations to include in returned details (all if `None`).
    pub max_citations: Option<usize>,
    /// References to include in returned details (all if `None`).
    pub max_references: Option<usize>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            force: false,
            use_dump: true,
            store_neighbors: true,
            max_citations: None,
            max_references: None,
        }
    }
}

impl ResolveOptions {
    /// Options that bypass the freshness check.
    #[must_use]
    pub fn forced() -> Self {
        Self { force: true, ..Self::default() }
    }
}

/// What a resolve did.
#[derive(Debug, Default)]
pub struct ResolveReport {
    /// The stored record was fresh and returned without fetching.
    pub cached: bool,
    /// The source did not know the paper; edges came from the dump only.
    pub dump_only: bool,
    /// Pages fetched across both directions.
    pub pages: usize,
    /// Directions the API could not page through completely.
    pub capped: Vec<Direction>,
    /// Directions whose paging stopped early on a failed page.
    pub interrupted: Vec<(Direction, Interruption)>,
    /// Edges the dump contributed beyond what the API returned.
    pub dump_edges_added: usize,
    /// Dump placeholders swapped for real paper ids.
    pub placeholders_resolved: usize,
    /// Neighbor stubs written to the store.
    pub neighbors_stored: usize,
    /// Edges appended to the stored record by this resolve.
    pub merged: MergeStats,
    /// Set when the merged record exceeds its claimed citation count.
    pub violation: Option<ConsistencyViolation>,
    /// A dump lookup failed; API edges were still stored.
    pub dump_error: Option<CacheError>,
    /// The placeholder batch lookup failed; placeholders were stored as-is.
    pub hydrate_error: Option<CacheError>,
}

impl ResolveReport {
    fn cached() -> Self {
        Self { cached: true, ..Self::default() }
    }

    /// True if every edge direction was retrieved completely.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_empty() && self.dump_error.is_none() && self.hydrate_error.is_none()
    }
}

/// Papers found for dump placeholders.
#[derive(Debug, Default)]
struct Hydrated {
    papers: Vec<Paper>,
    aliases: Vec<(String, String)>,
}

/// A resolved paper.
#[derive(Debug)]
pub struct Resolved {
    /// The record as stored.
    pub record: PaperRecord,
    /// What the resolve did.
    pub report: ResolveReport,
}

/// Merges API and dump edges into stored records.
pub struct GraphAssembler {
    store: Arc<RecordStore>,
    fetcher: FetchCoordinator,
    indexer: Option<Arc<DumpIndexer>>,
    record_ttl: Duration,
}

impl GraphAssembler {
    /// Create an assembler. Without an indexer, capped directions stay capped.
    #[must_use]
    pub fn new(
        store: Arc<RecordStore>,
        fetcher: FetchCoordinator,
        indexer: Option<Arc<DumpIndexer>>,
        record_ttl: Duration,
    ) -> Self {
        Self { store, fetcher, indexer, record_ttl }
    }

    /// Resolve a paper's full details.
    ///
    /// Returns `Ok(None)` if neither the store, the source nor the dump knows
    /// the paper. Resolves of the same id are serialized through the store's
    /// lock map, so a plain merge of that id also waits for the resolve.
    pub async fn resolve(&self, paper_id: &str, options: &ResolveOptions) -> CacheResult<Option<Resolved>> {
        let requested = self.store.canonical_id(paper_id).await?.unwrap_or_else(|| paper_id.to_string());
        let guard = self.store.lock(&requested).await;

        let existing = self.store.get(&requested).await?;
        if let Some(record) = existing.as_ref().filter(|r| self.is_servable(r, options)) {
            debug!(paper_id = %requested, "Serving fresh record");
            return Ok(Some(Resolved { record: record.clone(), report: ResolveReport::cached() }));
        }

        let metadata = self.fetcher.fetch_metadata(&requested).await?;
        let Some(mut partial) = metadata.and_then(PaperRecord::from_paper) else {
            return self.resolve_from_dump(guard, existing, options).await;
        };

        let paper_id = partial.paper_id.clone();
        let alias_guard = if paper_id == requested {
            None
        } else {
            self.store.record_alias(&requested, &paper_id).await?;
            let guard = self.store.lock(&paper_id).await;
            if let Some(record) = self.store.get(&paper_id).await?.filter(|r| self.is_servable(r, options)) {
                debug!(paper_id = %paper_id, alias = %requested, "Serving fresh record");
                return Ok(Some(Resolved { record, report: ResolveReport::cached() }));
            }
            Some(guard)
        };

        let (citations, references) = tokio::join!(
            self.fetcher.fetch_edges(&paper_id, Direction::Citations, None, partial.citation_count),
            self.fetcher.fetch_edges(&paper_id, Direction::References, None, partial.reference_count),
        );
        let (citations, references) = (citations?, references?);

        let mut report = ResolveReport::default();
        let mut neighbors = Vec::new();
        for batch in [citations, references] {
            self.absorb_batch(&mut partial, &mut report, &mut neighbors, batch, options).await;
        }
        let hydrated = self.hydrate_placeholders(&mut partial, &mut report).await?;
        // An incomplete resolve stays stale so the next call fetches again.
        partial.fetched_at = report.is_complete().then(Utc::now);

        let outcome = self.store.merge_held(alias_guard.as_ref().unwrap_or(&guard), partial).await?;
        report.merged = outcome.stats;
        report.violation = outcome.violation;

        // Neighbor writes lock other ids; two papers citing each other must not wait on one another.
        drop(alias_guard);
        drop(guard);
        self.store_neighbors(&paper_id, neighbors, hydrated, &mut report, options).await?;

        info!(
            paper_id = %paper_id,
            citations = outcome.record.citations.len(),
            references = outcome.record.references.len(),
            pages = report.pages,
            dump_edges = report.dump_edges_added,
            placeholders_resolved = report.placeholders_resolved,
            "Resolved paper"
        );
        Ok(Some(Resolved { record: outcome.record, report }))
    }

    fn is_servable(&self, record: &PaperRecord, options: &ResolveOptions) -> bool {
        !options.force && !record.dirty && record.is_fresh(self.record_ttl)
    }

    /// Fold one fetched direction (plus any dump edges) into `partial`.
    async fn absorb_batch(
        &self,
        partial: &mut PaperRecord,
        report: &mut ResolveReport,
        neighbors: &mut Vec<PaperRecord>,
        batch: EdgeBatch,
        options: &ResolveOptions,
    ) {
        let direction = batch.direction;
        report.pages += batch.pages;
        if batch.capped {
            report.capped.push(direction);
        }

        let needs_dump = batch.capped && options.use_dump;
        partial.edges_mut(direction).union(batch.edges);
        if options.store_neighbors {
            neighbors.extend(batch.neighbors.into_iter().filter_map(PaperRecord::from_paper));
        }
        if let Some(interruption) = batch.interrupted {
            report.interrupted.push((direction, interruption));
        }

        if needs_dump {
            match self.dump_neighbors(partial.dump_key(), direction).await {
                Ok(Some(ids)) => {
                    let added = partial.edges_mut(direction).union(ids.iter().map(|id| Edge::from_dump(id)));
                    debug!(paper_id = %partial.paper_id, %direction, dump = ids.len(), added, "Merged dump edges");
                    report.dump_edges_added += added;
                }
                Ok(None) => {
                    debug!(paper_id = %partial.paper_id, %direction, "API capped and no dump index available");
                }
                Err(err) => {
                    warn!(paper_id = %partial.paper_id, %direction, error = %err, "Dump lookup failed");
                    report.dump_error = Some(err);
                }
            }
        }
    }

    /// Build a record from the dump for a paper the source does not know.
    async fn resolve_from_dump(
        &self,
        guard: KeyGuard,
        existing: Option<PaperRecord>,
        options: &ResolveOptions,
    ) -> CacheResult<Option<Resolved>> {
        let paper_id = guard.key().to_string();
        let mut partial = PaperRecord::new(&paper_id);
        partial.corpus_id = existing.as_ref().and_then(|r| r.corpus_id).or_else(|| corpus_id_of(&paper_id));

        let mut found = false;
        let mut report = ResolveReport { dump_only: true, ..ResolveReport::default() };
        if options.use_dump {
            for direction in Direction::ALL {
                if let Some(ids) = self.dump_neighbors(partial.dump_key(), direction).await? {
                    found |= !ids.is_empty();
                    report.dump_edges_added +=
                        partial.edges_mut(direction).union(ids.iter().map(|id| Edge::from_dump(id)));
                }
            }
        }

        if !found {
            return Ok(existing.map(|record| Resolved { record, report }));
        }

        let hydrated = self.hydrate_placeholders(&mut partial, &mut report).await?;
        partial.fetched_at = report.is_complete().then(Utc::now);
        let outcome = self.store.merge_held(&guard, partial).await?;
        report.merged = outcome.stats;
        report.violation = outcome.violation;
        drop(guard);
        self.store_neighbors(&paper_id, Vec::new(), hydrated, &mut report, options).await?;

        info!(paper_id, dump_edges = report.dump_edges_added, "Resolved paper from dump only");
        Ok(Some(Resolved { record: outcome.record, report }))
    }

    /// Swap `CorpusId:` placeholders in `partial` for real paper ids.
    ///
    /// Placeholders with a stored alias are swapped without a request; the
    /// rest go to the source in one batch. A failed batch leaves them in place
    /// and sets `hydrate_error`.
    async fn hydrate_placeholders(
        &self,
        partial: &mut PaperRecord,
        report: &mut ResolveReport,
    ) -> CacheResult<Hydrated> {
        let mut pending: Vec<String> = Direction::ALL
            .into_iter()
            .flat_map(|d| partial.edges(d).placeholders().map(str::to_string).collect::<Vec<_>>())
            .collect();
        pending.sort_unstable();
        pending.dedup();
        if pending.is_empty() {
            return Ok(Hydrated::default());
        }

        let mut resolved: HashMap<String, String> = HashMap::with_capacity(pending.len());
        let mut missing = Vec::new();
        let known = self.store.canonical_ids(pending.clone()).await?;
        for (placeholder, canonical) in pending.into_iter().zip(known) {
            match canonical {
                Some(id) => {
                    resolved.insert(placeholder, id);
                }
                None => missing.push(placeholder),
            }
        }

        let mut hydrated = Hydrated::default();
        match self.fetcher.fetch_papers(&missing).await {
            Ok(papers) => {
                for (placeholder, paper) in missing.into_iter().zip(papers) {
                    let Some(paper) = paper else { continue };
                    let Some(id) = paper.paper_id.clone().filter(|id| !id.is_empty()) else {
                        continue;
                    };
                    hydrated.aliases.push((placeholder.clone(), id.clone()));
                    resolved.insert(placeholder, id);
                    hydrated.papers.push(paper);
                }
            }
            Err(err) => {
                warn!(
                    paper_id = %partial.paper_id,
                    placeholders = missing.len(),
                    error = %err,
                    "Placeholder lookup failed"
                );
                report.hydrate_error = Some(err);
            }
        }

        for direction in Direction::ALL {
            report.placeholders_resolved += partial.edges_mut(direction).resolve_placeholders(&resolved);
        }
        debug!(paper_id = %partial.paper_id, resolved = report.placeholders_resolved, "Hydrated dump placeholders");
        Ok(hydrated)
    }

    /// Write aliases and neighbor stubs. The caller must not hold any record lock.
    async fn store_neighbors(
        &self,
        paper_id: &str,
        mut neighbors: Vec<PaperRecord>,
        hydrated: Hydrated,
        report: &mut ResolveReport,
        options: &ResolveOptions,
    ) -> CacheResult<()> {
        self.store.record_aliases(hydrated.aliases).await?;
        if !options.store_neighbors {
            return Ok(());
        }
        neighbors.extend(hydrated.papers.into_iter().filter_map(PaperRecord::from_paper));
        neighbors.retain(|n| n.paper_id != paper_id);
        if !neighbors.is_empty() {
            report.neighbors_stored = self.store.merge_many(neighbors).await?.len();
        }
        Ok(())
    }

    /// Neighbor ids from the active dump index, or `None` without one.
    ///
    /// A lookup that races a rebuild is retried once against the new version.
    async fn dump_neighbors(&self, key: String, direction: Direction) -> CacheResult<Option<Vec<String>>> {
        let Some(indexer) = self.indexer.clone() else {
            return Ok(None);
        };
        tokio::task::spawn_blocking(move || {
            let mut retried = false;
            loop {
                let Some(handle) = indexer.current() else {
                    return Ok(None);
                };
                match indexer.lookup_edges(&handle, &key, direction).and_then(|l| l.neighbors()) {
                    Err(CacheError::StaleIndex { .. }) if !retried => retried = true,
                    result => return result.map(Some),
                }
            }
        })
        .await?
    }
}

impl std::fmt::Debug for GraphAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphAssembler")
            .field("fetcher", &self.fetcher)
            .field("has_dump_index", &self.indexer.is_some())
            .field("record_ttl", &self.record_ttl)
            .finish()
    }
}

/// Corpus id encoded in a request id (`CorpusId:123` or a bare number).
fn corpus_id_of(paper_id: &str) -> Option<u64> {
    paper_id.strip_prefix(CORPUS_PREFIX).unwrap_or(paper_id).parse().ok()
}
