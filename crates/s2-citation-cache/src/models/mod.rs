//! Data models.
//!
//! `paper` and `author` mirror the Semantic Scholar wire schema (`#[serde(default)]`
//! for optional fields, camelCase names). `record` is the locally stored shape that
//! the cache merges into.

mod author;
mod paper;
mod record;

pub use author::AuthorRef;
pub use paper::{CitationContext, CitationResult, Paper};
pub use record::{Direction, Edge, EdgeList, ListProvenance, PaperRecord, Provenance};

pub(crate) use record::CORPUS_PREFIX;
