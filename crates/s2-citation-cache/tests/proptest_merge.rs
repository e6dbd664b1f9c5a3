//! Property-based tests for edge-list merging.

use std::collections::HashSet;

use proptest::prelude::*;
use s2_citation_cache::models::{Edge, EdgeList, PaperRecord, Provenance};

/// Edges over a small id space so merges collide often.
///
/// Papers below 20 have corpus ids and appear in both sources; the rest are
/// API-only papers without one.
fn arb_edge() -> impl Strategy<Value = Edge> {
    (0u64..40, any::<bool>()).prop_map(|(n, from_dump)| match (n < 20, from_dump) {
        (true, true) => Edge::from_dump(&n.to_string()),
        (true, false) => Edge::api(format!("p{n}"), Some(n)),
        (false, _) => Edge::api(format!("p{n}"), None),
    })
}

fn arb_lists() -> impl Strategy<Value = Vec<Vec<Edge>>> {
    proptest::collection::vec(proptest::collection::vec(arb_edge(), 0..30), 1..5)
}

/// Identity of an edge: its corpus id when known, otherwise its paper id.
fn identity(edge: &Edge) -> String {
    edge.corpus_id.map_or_else(|| edge.paper_id.clone(), |cid| format!("#{cid}"))
}

proptest! {
    /// Every merged edge's identity survives in the result.
    #[test]
    fn union_is_monotone(lists in arb_lists()) {
        let mut merged = EdgeList::default();
        let mut seen_before = 0;
        for list in &lists {
            merged.union(list.clone());
            prop_assert!(merged.len() >= seen_before);
            seen_before = merged.len();

            for edge in list {
                let present = merged.iter().any(|e| {
                    e.paper_id == edge.paper_id || (edge.corpus_id.is_some() && e.corpus_id == edge.corpus_id)
                });
                prop_assert!(present, "lost {:?}", edge);
            }
        }
    }

    /// No two edges share an identity after any sequence of merges.
    #[test]
    fn union_has_no_duplicates(lists in arb_lists()) {
        let mut merged = EdgeList::default();
        for list in lists {
            merged.union(list);
        }
        let paper_ids: HashSet<_> = merged.iter().map(|e| e.paper_id.clone()).collect();
        prop_assert_eq!(paper_ids.len(), merged.len());
        let corpus_ids: Vec<_> = merged.iter().filter_map(|e| e.corpus_id).collect();
        let unique: HashSet<_> = corpus_ids.iter().collect();
        prop_assert_eq!(unique.len(), corpus_ids.len());
    }

    /// Existing edges keep their positions; new ones are appended.
    #[test]
    fn union_preserves_existing_order(
        first in proptest::collection::vec(arb_edge(), 0..30),
        second in proptest::collection::vec(arb_edge(), 0..30),
    ) {
        let mut merged = EdgeList::from_edges(first);
        let before: Vec<String> = merged.iter().map(identity).collect();
        merged.union(second);

        prop_assert!(merged.len() >= before.len());
        for (pos, id) in before.iter().enumerate() {
            prop_assert_eq!(&identity(&merged.as_slice()[pos]), id);
        }
    }

    /// Merging the same partial twice changes nothing the second time.
    #[test]
    fn record_merge_is_idempotent(citations in proptest::collection::vec(arb_edge(), 0..30)) {
        let mut partial = PaperRecord::new("P");
        partial.citations = EdgeList::from_edges(citations);

        let mut record = PaperRecord::new("P");
        record.merge_from(partial.clone());
        let once = record.clone();
        let stats = record.merge_from(partial);

        prop_assert_eq!(stats.citations_added, 0);
        prop_assert_eq!(record, once);
    }

    /// Provenance only ever moves towards `Merged`.
    #[test]
    fn provenance_never_downgrades(lists in arb_lists()) {
        let mut merged = EdgeList::default();
        for list in lists {
            let before: Vec<Provenance> = merged.iter().map(|e| e.provenance).collect();
            merged.union(list);
            for (pos, old) in before.into_iter().enumerate() {
                let new = merged.as_slice()[pos].provenance;
                prop_assert!(new == old || new == Provenance::Merged);
            }
        }
    }
}
