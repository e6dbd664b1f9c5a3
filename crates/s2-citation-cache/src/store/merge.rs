//! Field-level merge rules for stored records.
//!
//! Scalars take the most recently fetched non-empty value. Edge lists are
//! unioned by identity: existing order is kept, new neighbors are appended,
//! and an edge seen from a second source has its provenance upgraded. No rule
//! ever removes an edge.

use std::collections::HashMap;

use crate::error::ConsistencyViolation;
use crate::models::{Edge, EdgeList, PaperRecord};

/// Edges appended by a merge, per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// New citation edges.
    pub citations_added: usize,
    /// New reference edges.
    pub references_added: usize,
}

impl EdgeList {
    /// Union `incoming` into this list and return how many edges were appended.
    ///
    /// Identity is the corpus id when either side knows it, otherwise the paper
    /// id. A `CorpusId:` placeholder is replaced by the real paper id once one
    /// arrives.
    pub fn union(&mut self, incoming: impl IntoIterator<Item = Edge>) -> usize {
        let mut by_corpus: HashMap<u64, usize> = HashMap::new();
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(self.edges.len());
        for (pos, edge) in self.edges.iter().enumerate() {
            if let Some(cid) = edge.corpus_id {
                by_corpus.entry(cid).or_insert(pos);
            }
            by_id.entry(edge.paper_id.clone()).or_insert(pos);
        }

        let mut added = 0;
        for edge in incoming {
            let hit = edge
                .corpus_id
                .and_then(|cid| by_corpus.get(&cid).copied())
                .or_else(|| by_id.get(edge.paper_id.as_str()).copied());

            match hit {
                Some(pos) => {
                    let existing = &mut self.edges[pos];
                    existing.provenance = existing.provenance.combine(edge.provenance);
                    if existing.corpus_id.is_none() {
                        if let Some(cid) = edge.corpus_id {
                            existing.corpus_id = Some(cid);
                            by_corpus.insert(cid, pos);
                        }
                    }
                    if existing.is_placeholder() && !edge.is_placeholder() {
                        by_id.insert(edge.paper_id.clone(), pos);
                        existing.paper_id = edge.paper_id;
                    }
                }
                None => {
                    let pos = self.edges.len();
                    if let Some(cid) = edge.corpus_id {
                        by_corpus.insert(cid, pos);
                    }
                    by_id.insert(edge.paper_id.clone(), pos);
                    self.edges.push(edge);
                    added += 1;
                }
            }
        }
        added
    }
}

impl EdgeList {
    /// Swap `CorpusId:` placeholders for the paper ids in `resolved`.
    ///
    /// A placeholder whose paper id is already listed is folded into that edge.
    /// Returns how many placeholders were swapped.
    pub fn resolve_placeholders(&mut self, resolved: &HashMap<String, String>) -> usize {
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(self.edges.len());
        let mut kept: Vec<Edge> = Vec::with_capacity(self.edges.len());
        let mut swapped = 0;
        for mut edge in std::mem::take(&mut self.edges) {
            if edge.is_placeholder() {
                if let Some(real) = resolved.get(&edge.paper_id) {
                    edge.paper_id.clone_from(real);
                    swapped += 1;
                }
            }
            match by_id.get(edge.paper_id.as_str()) {
                Some(&pos) => {
                    let existing = &mut kept[pos];
                    existing.provenance = existing.provenance.combine(edge.provenance);
                    existing.corpus_id = existing.corpus_id.or(edge.corpus_id);
                }
                None => {
                    by_id.insert(edge.paper_id.clone(), kept.len());
                    kept.push(edge);
                }
            }
        }
        self.edges = kept;
        swapped
    }
}

impl PaperRecord {
    /// Merge a partial record into this one.
    ///
    /// The paper id of `self` is kept. `dirty` is left alone; the store
    /// recomputes it after the merge.
    pub fn merge_from(&mut self, partial: Self) -> MergeStats {
        if partial.corpus_id.is_some() {
            self.corpus_id = partial.corpus_id;
        }
        if let Some(title) = partial.title.filter(|t| !t.trim().is_empty()) {
            self.title = Some(title);
        }
        if partial.year.is_some() {
            self.year = partial.year;
        }
        if let Some(venue) = partial.venue.filter(|v| !v.trim().is_empty()) {
            self.venue = Some(venue);
        }
        if !partial.authors.is_empty() {
            self.authors = partial.authors;
        }
        if partial.citation_count.is_some() {
            self.citation_count = partial.citation_count;
        }
        if partial.influential_citation_count.is_some() {
            self.influential_citation_count = partial.influential_citation_count;
        }
        if partial.reference_count.is_some() {
            self.reference_count = partial.reference_count;
        }
        self.external_ids.extend(partial.external_ids);
        self.extra.extend(partial.extra);

        let stats = MergeStats {
            citations_added: self.citations.union(partial.citations.edges),
            references_added: self.references.union(partial.references.edges),
        };

        self.fetched_at = match (self.fetched_at, partial.fetched_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        stats
    }
}

/// Check the citation edge count against the claimed total.
#[must_use]
pub fn check_consistency(record: &PaperRecord, slack: u64) -> Option<ConsistencyViolation> {
    let claimed = record.citation_count?;
    let edges = record.citations.len() as u64;
    (edges > claimed.saturating_add(slack)).then(|| ConsistencyViolation {
        paper_id: record.paper_id.clone(),
        edges,
        claimed,
        slack,
    })
}
