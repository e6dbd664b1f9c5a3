//! Locally stored paper record.
//!
//! One [`PaperRecord`] exists per canonical paper id. Records are only ever
//! changed through the field-merge rules in `store::merge`; nothing in here
//! removes an edge.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AuthorRef, Paper};

/// Prefix the API accepts for corpus-id lookups (`CorpusId:215416146`).
pub(crate) const CORPUS_PREFIX: &str = "CorpusId:";

/// Edge direction relative to a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Papers that cite this paper.
    Citations,
    /// Papers that this paper cites.
    References,
}

impl Direction {
    /// Both directions, citations first.
    pub const ALL: [Self; 2] = [Self::Citations, Self::References];

    /// Lowercase name used in URLs and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Citations => "citations",
            Self::References => "references",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an edge was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Seen in an API response only.
    Api,
    /// Seen in the citation dump only.
    Dump,
    /// Confirmed by both.
    Merged,
}

impl Provenance {
    /// Provenance of an edge seen from both `self` and `other`.
    #[must_use]
    pub const fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Api, Self::Api) => Self::Api,
            (Self::Dump, Self::Dump) => Self::Dump,
            _ => Self::Merged,
        }
    }
}

/// Summary provenance of a whole edge list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListProvenance {
    /// Every edge came from the API.
    ApiOnly,
    /// Every edge came from the dump.
    DumpOnly,
    /// Edges from both sources, or edges confirmed by both.
    Merged,
}

/// A neighbor in a citation or reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Neighbor paper id, or `CorpusId:<n>` when only the corpus id is known.
    pub paper_id: String,

    /// Neighbor corpus id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_id: Option<u64>,

    /// Where this edge was learned from.
    pub provenance: Provenance,
}

impl Edge {
    /// Edge reported by the API.
    #[must_use]
    pub fn api(paper_id: impl Into<String>, corpus_id: Option<u64>) -> Self {
        Self { paper_id: paper_id.into(), corpus_id, provenance: Provenance::Api }
    }

    /// Edge to a neighbor reported by the API, if it carries any identifier.
    #[must_use]
    pub fn from_api(paper: &Paper) -> Option<Self> {
        let corpus_id = paper.corpus_id();
        match paper.paper_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => Some(Self::api(id, corpus_id)),
            None => corpus_id.map(|cid| Self::api(format!("{CORPUS_PREFIX}{cid}"), Some(cid))),
        }
    }

    /// Edge to a neighbor read from the dump.
    ///
    /// Numeric dump identifiers are corpus ids and become `CorpusId:<n>` ids.
    #[must_use]
    pub fn from_dump(neighbor: &str) -> Self {
        match neighbor.parse::<u64>() {
            Ok(cid) => Self {
                paper_id: format!("{CORPUS_PREFIX}{cid}"),
                corpus_id: Some(cid),
                provenance: Provenance::Dump,
            },
            Err(_) => Self {
                paper_id: neighbor.to_string(),
                corpus_id: None,
                provenance: Provenance::Dump,
            },
        }
    }

    /// True if the paper id is a `CorpusId:` stand-in rather than an S2 paper id.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.paper_id.starts_with(CORPUS_PREFIX)
    }
}

/// Ordered, deduplicated list of edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeList {
    pub(crate) edges: Vec<Edge>,
}

impl EdgeList {
    /// Build a list from edges, dropping duplicates.
    #[must_use]
    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Self {
        let mut list = Self::default();
        list.union(edges);
        list
    }

    /// Number of edges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// True if there are no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Iterate edges in stored order.
    pub fn iter(&self) -> std::slice::Iter<'_, Edge> {
        self.edges.iter()
    }

    /// Edges as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Edge] {
        &self.edges
    }

    /// Neighbor ids in stored order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().map(|e| e.paper_id.as_str())
    }

    /// True if a neighbor with this paper id is present.
    #[must_use]
    pub fn contains(&self, paper_id: &str) -> bool {
        self.edges.iter().any(|e| e.paper_id == paper_id)
    }

    /// Number of edges with exactly this provenance.
    #[must_use]
    pub fn count(&self, provenance: Provenance) -> usize {
        self.edges.iter().filter(|e| e.provenance == provenance).count()
    }

    /// Ids of edges still carrying a `CorpusId:` placeholder.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().filter(|e| e.is_placeholder()).map(|e| e.paper_id.as_str())
    }

    /// Summary provenance, `None` for an empty list.
    #[must_use]
    pub fn provenance(&self) -> Option<ListProvenance> {
        let first = self.edges.first()?.provenance;
        if first == Provenance::Merged || self.edges.iter().any(|e| e.provenance != first) {
            return Some(ListProvenance::Merged);
        }
        Some(match first {
            Provenance::Api => ListProvenance::ApiOnly,
            Provenance::Dump => ListProvenance::DumpOnly,
            Provenance::Merged => ListProvenance::Merged,
        })
    }

    /// Keep only the first `limit` edges (for presentation copies).
    pub fn truncate(&mut self, limit: usize) {
        self.edges.truncate(limit);
    }
}

impl<'a> IntoIterator for &'a EdgeList {
    type Item = &'a Edge;
    type IntoIter = std::slice::Iter<'a, Edge>;

    fn into_iter(self) -> Self::IntoIter {
        self.edges.iter()
    }
}

/// A cached paper with its citation and reference edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperRecord {
    /// Canonical Semantic Scholar paper id.
    pub paper_id: String,

    /// S2 corpus id, used as the dump key when known.
    #[serde(default)]
    pub corpus_id: Option<u64>,

    /// Paper title.
    #[serde(default)]
    pub title: Option<String>,

    /// Publication year.
    #[serde(default)]
    pub year: Option<i32>,

    /// Publication venue.
    #[serde(default)]
    pub venue: Option<String>,

    /// Authors in publication order.
    #[serde(default)]
    pub authors: Vec<AuthorRef>,

    /// Authoritative citation total reported by the API.
    #[serde(default)]
    pub citation_count: Option<u64>,

    /// Influential citation count reported by the API.
    #[serde(default)]
    pub influential_citation_count: Option<u64>,

    /// Reference total reported by the API.
    #[serde(default)]
    pub reference_count: Option<u64>,

    /// External identifiers (DOI, ArXiv, ...).
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,

    /// Papers citing this one.
    #[serde(default)]
    pub citations: EdgeList,

    /// Papers this one cites.
    #[serde(default)]
    pub references: EdgeList,

    /// When this record was last filled from a source.
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,

    /// Set when the last merge left the record inconsistent.
    #[serde(default)]
    pub dirty: bool,

    /// Optional metadata without a typed field.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PaperRecord {
    /// Empty record for a paper id.
    #[must_use]
    pub fn new(paper_id: impl Into<String>) -> Self {
        Self { paper_id: paper_id.into(), ..Self::default() }
    }

    /// Metadata-only partial record from an API paper.
    ///
    /// Returns `None` when the paper has no usable identifier.
    #[must_use]
    pub fn from_paper(paper: Paper) -> Option<Self> {
        let corpus_id = paper.corpus_id();
        let external_ids = paper.external_id_strings();
        let paper_id = match paper.paper_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => format!("{CORPUS_PREFIX}{}", corpus_id?),
        };
        Some(Self {
            paper_id,
            corpus_id,
            title: paper.title,
            year: paper.year,
            venue: paper.venue,
            authors: paper.authors,
            citation_count: paper.citation_count,
            influential_citation_count: paper.influential_citation_count,
            reference_count: paper.reference_count,
            external_ids,
            ..Self::default()
        })
    }

    /// Edge list for a direction.
    #[must_use]
    pub const fn edges(&self, direction: Direction) -> &EdgeList {
        match direction {
            Direction::Citations => &self.citations,
            Direction::References => &self.references,
        }
    }

    /// Mutable edge list for a direction.
    pub fn edges_mut(&mut self, direction: Direction) -> &mut EdgeList {
        match direction {
            Direction::Citations => &mut self.citations,
            Direction::References => &mut self.references,
        }
    }

    /// Total the API claims for a direction.
    #[must_use]
    pub const fn claimed(&self, direction: Direction) -> Option<u64> {
        match direction {
            Direction::Citations => self.citation_count,
            Direction::References => self.reference_count,
        }
    }

    /// Key under which this paper appears in the citation dump.
    #[must_use]
    pub fn dump_key(&self) -> String {
        self.corpus_id.map_or_else(|| self.paper_id.clone(), |cid| cid.to_string())
    }

    /// True if the record was filled within `ttl`.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| {
            // A timestamp in the future (clock skew) counts as fresh.
            Utc::now().signed_duration_since(at).to_std().map_or(true, |age| age < ttl)
        })
    }

    /// Author names as a comma-separated string.
    #[must_use]
    pub fn author_names(&self) -> String {
        self.authors
            .iter()
            .filter_map(|a| a.name.as_deref())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Copy with each edge list cut to at most the given number of edges.
    #[must_use]
    pub fn limited(&self, citations: Option<usize>, references: Option<usize>) -> Self {
        let mut copy = self.clone();
        if let Some(limit) = citations {
            copy.citations.truncate(limit);
        }
        if let Some(limit) = references {
            copy.references.truncate(limit);
        }
        copy
    }
}
