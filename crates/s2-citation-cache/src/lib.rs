//! Semantic Scholar Citation Cache
//!
//! A local caching layer in front of the Semantic Scholar Graph API. The API
//! pages at most 10,000 citations or references per paper; full citation sets
//! of highly cited papers are recovered from a locally indexed citation dump.
//!
//! # Components
//!
//! - **RecordStore** (`store`): one merged record per paper in `redb`, fronted by `moka`
//! - **DumpIndexer** (`dump`): versioned on-disk index over citation dump shards
//! - **FetchCoordinator** (`fetch`): concurrent, order-preserving pagination
//! - **GraphAssembler** (`assemble`): merges API and dump edges into the store
//! - **FilterEngine** (`filter`): compound predicates over cached records
//!
//! # Example
//!
//! ```no_run
//! use s2_citation_cache::{CitationCache, Config, ResolveOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CitationCache::open(Config::from_env()?).await?;
//!     let options = ResolveOptions { max_citations: Some(100), ..ResolveOptions::default() };
//!
//!     if let Some(paper) = cache.get_paper_details("CorpusId:215416146", &options).await? {
//!         println!("{}: {} citations", paper.title.as_deref().unwrap_or("Untitled"), paper.citations.len());
//!     }
//!     cache.close();
//!     Ok(())
//! }
//! ```

pub mod assemble;
pub mod cache;
pub mod client;
pub mod config;
pub mod dump;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod models;
pub mod store;

pub use assemble::{GraphAssembler, ResolveOptions, ResolveReport, Resolved};
pub use cache::CitationCache;
pub use client::SemanticScholarClient;
pub use config::Config;
pub use dump::{BuildReport, DumpIndexer, EdgeLookup, IndexHandle};
pub use error::{CacheError, CacheResult, ClientError, ConsistencyViolation, MalformedDumpRecord};
pub use fetch::{EdgeBatch, EdgePage, FetchCoordinator, FetchCursor, PaperSource};
pub use filter::{Comparison, Filter, Predicate, TextMatch};
pub use models::{Direction, Edge, EdgeList, ListProvenance, PaperRecord, Provenance};
pub use store::{MergeOutcome, RecordStore};
