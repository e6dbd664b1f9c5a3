//! The cache facade.
//!
//! [`CitationCache`] owns one record store, one dump indexer and one graph
//! assembler, opened together from a [`Config`] and closed together.

use std::path::PathBuf;
use std::sync::Arc;

use futures::Stream;
use tracing::info;

use crate::assemble::{GraphAssembler, ResolveOptions, Resolved};
use crate::client::SemanticScholarClient;
use crate::config::Config;
use crate::dump::{BuildReport, DumpIndexer, IndexHandle};
use crate::error::CacheResult;
use crate::fetch::{FetchCoordinator, PaperSource};
use crate::filter::Filter;
use crate::models::{Direction, PaperRecord};
use crate::store::RecordStore;

/// Local citation cache in front of the Semantic Scholar Graph API.
pub struct CitationCache {
    config: Config,
    store: Arc<RecordStore>,
    indexer: Arc<DumpIndexer>,
    assembler: GraphAssembler,
}

impl CitationCache {
    /// Open the cache with the default HTTP source.
    pub async fn open(config: Config) -> CacheResult<Self> {
        let client = SemanticScholarClient::new(&config)?;
        Self::open_with_source(config, Arc::new(client)).await
    }

    /// Open the cache with a custom paper source.
    pub async fn open_with_source(config: Config, source: Arc<dyn PaperSource>) -> CacheResult<Self> {
        let store =
            Arc::new(RecordStore::open(config.records_path(), config.memory_capacity, config.consistency_slack).await?);
        let indexer = Arc::new(DumpIndexer::open(config.index_dir()).await?);
        let fetcher = FetchCoordinator::new(source, &config);
        let assembler =
            GraphAssembler::new(Arc::clone(&store), fetcher, Some(Arc::clone(&indexer)), config.record_ttl);

        info!(
            cache_dir = %config.cache_dir.display(),
            dump_index = ?indexer.current().map(|h| h.version().to_string()),
            "Opened citation cache"
        );
        Ok(Self { config, store, indexer, assembler })
    }

    /// Configuration the cache was opened with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The record store.
    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// The dump indexer.
    #[must_use]
    pub fn indexer(&self) -> &DumpIndexer {
        &self.indexer
    }

    /// Resolve a paper and report what was done.
    pub async fn resolve(&self, paper_id: &str, options: &ResolveOptions) -> CacheResult<Option<Resolved>> {
        self.assembler.resolve(paper_id, options).await
    }

    /// Full details of a paper, with edge lists cut to the requested limits.
    ///
    /// `Ok(None)` means the paper is unknown to the cache, the API and the dump.
    pub async fn get_paper_details(
        &self,
        paper_id: &str,
        options: &ResolveOptions,
    ) -> CacheResult<Option<PaperRecord>> {
        let resolved = self.assembler.resolve(paper_id, options).await?;
        Ok(resolved.map(|r| r.record.limited(options.max_citations, options.max_references)))
    }

    /// Stream the stored records among `ids` that match `filter`.
    ///
    /// Reads the store only; ids without a stored record are skipped.
    pub fn filter_papers<'a>(
        &'a self,
        ids: Vec<String>,
        filter: &'a Filter,
    ) -> impl Stream<Item = CacheResult<PaperRecord>> + 'a {
        async_stream::try_stream! {
            for id in ids {
                if let Some(record) = self.store.get(&id).await? {
                    if filter.matches(&record) {
                        yield record;
                    }
                }
            }
        }
    }

    /// Stored papers citing `paper_id` that match `filter`, at most `limit`.
    ///
    /// Dump citations count once the batch lookup has found them; a
    /// `CorpusId:` placeholder it could not resolve has no stored record and
    /// is skipped.
    pub async fn filter_citations(
        &self,
        paper_id: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> CacheResult<Option<Vec<PaperRecord>>> {
        self.filter_neighbors(paper_id, Direction::Citations, filter, limit).await
    }

    /// Stored papers referenced by `paper_id` that match `filter`, at most `limit`.
    pub async fn filter_references(
        &self,
        paper_id: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> CacheResult<Option<Vec<PaperRecord>>> {
        self.filter_neighbors(paper_id, Direction::References, filter, limit).await
    }

    async fn filter_neighbors(
        &self,
        paper_id: &str,
        direction: Direction,
        filter: &Filter,
        limit: Option<usize>,
    ) -> CacheResult<Option<Vec<PaperRecord>>> {
        let Some(resolved) = self.assembler.resolve(paper_id, &ResolveOptions::default()).await? else {
            return Ok(None);
        };

        let limit = limit.unwrap_or(usize::MAX);
        let mut matches = Vec::new();
        for id in resolved.record.edges(direction).ids() {
            if matches.len() >= limit {
                break;
            }
            if let Some(neighbor) = self.store.get(id).await? {
                if filter.matches(&neighbor) {
                    matches.push(neighbor);
                }
            }
        }
        Ok(Some(matches))
    }

    /// Build a new dump index from shard files or directories and make it active.
    pub async fn rebuild_dump_index(&self, dump_paths: &[PathBuf]) -> CacheResult<(IndexHandle, BuildReport)> {
        self.indexer.build_with_report(dump_paths).await
    }

    /// Close the cache. Every write is already committed.
    pub fn close(self) {
        self.store.close();
        info!(cache_dir = %self.config.cache_dir.display(), "Closed citation cache");
    }
}

impl std::fmt::Debug for CitationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CitationCache")
            .field("cache_dir", &self.config.cache_dir)
            .field("store", &self.store)
            .field("indexer", &self.indexer)
            .finish()
    }
}
