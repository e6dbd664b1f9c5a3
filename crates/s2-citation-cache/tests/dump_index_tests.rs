//! Dump index build, lookup and versioning.

mod common;

use std::collections::BTreeSet;

use common::{write_pairs, write_shard};
use s2_citation_cache::models::Direction;
use s2_citation_cache::{CacheError, DumpIndexer};

fn neighbor_set(indexer: &DumpIndexer, paper_id: &str, direction: Direction) -> BTreeSet<String> {
    let handle = indexer.current().expect("active index");
    indexer.lookup_edges(&handle, paper_id, direction).unwrap().neighbors().unwrap().into_iter().collect()
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| (*s).to_string()).collect()
}

#[tokio::test]
async fn test_lookup_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let shard = write_pairs(dir.path(), "part-0", &[("A", "B"), ("A", "C"), ("D", "A")]);
    let indexer = DumpIndexer::open(dir.path().join("index")).await.unwrap();
    indexer.build(&[shard]).await.unwrap();

    assert_eq!(neighbor_set(&indexer, "A", Direction::Citations), set(&["D"]));
    assert_eq!(neighbor_set(&indexer, "A", Direction::References), set(&["B", "C"]));
    assert_eq!(neighbor_set(&indexer, "B", Direction::Citations), set(&["A"]));
    assert!(neighbor_set(&indexer, "Z", Direction::Citations).is_empty());
}

#[tokio::test]
async fn test_edges_span_shards_and_formats() {
    let dir = tempfile::tempdir().unwrap();
    let shards = dir.path().join("shards");
    std::fs::create_dir(&shards).unwrap();
    write_shard(
        &shards,
        "part-0.jsonl",
        "{\"citingcorpusid\": 10, \"citedcorpusid\": \"20\"}\n{\"citingcorpusid\": \"30\", \"citedcorpusid\": 20}\n",
    );
    write_pairs(&shards, "part-1.txt", &[("40", "20"), ("20", "10")]);

    let indexer = DumpIndexer::open(dir.path().join("index")).await.unwrap();
    let (_, report) = indexer.build_with_report(&[shards]).await.unwrap();
    assert_eq!(report.shards, 2);
    assert_eq!(report.edges, 4);

    assert_eq!(neighbor_set(&indexer, "20", Direction::Citations), set(&["10", "30", "40"]));
    assert_eq!(neighbor_set(&indexer, "20", Direction::References), set(&["10"]));
}

#[tokio::test]
async fn test_malformed_lines_are_counted_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let shard = write_shard(
        dir.path(),
        "part-0",
        "1 2\n{\"citingcorpusid\": 3\nnot an edge at all\n{\"citingcorpusid\": null, \"citedcorpusid\": 1}\n4 1\n",
    );
    let indexer = DumpIndexer::open(dir.path().join("index")).await.unwrap();
    let (_, report) = indexer.build_with_report(&[shard]).await.unwrap();

    assert_eq!(report.edges, 2);
    assert_eq!(report.malformed, 2);
    assert_eq!(report.missing_endpoints, 1);
    assert_eq!(report.samples.len(), 2);
    assert_eq!(neighbor_set(&indexer, "1", Direction::Citations), set(&["4"]));
}

#[tokio::test]
async fn test_superseded_handle_is_stale() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_pairs(dir.path(), "part-0", &[("A", "B")]);
    let indexer = DumpIndexer::open(dir.path().join("index")).await.unwrap();
    let old = indexer.build(&[first.clone()]).await.unwrap();

    let second = write_pairs(dir.path(), "part-1", &[("C", "B")]);
    let new = indexer.build(&[first, second]).await.unwrap();
    assert_ne!(old, new);

    match indexer.lookup_edges(&old, "B", Direction::Citations) {
        Err(CacheError::StaleIndex { requested, active }) => {
            assert_eq!(requested, old.version());
            assert_eq!(active, new.version());
        }
        other => panic!("expected StaleIndex, got {other:?}"),
    }
    assert_eq!(neighbor_set(&indexer, "B", Direction::Citations), set(&["A", "C"]));
}

#[tokio::test]
async fn test_lookup_in_flight_during_rebuild_is_stale() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_pairs(dir.path(), "part-0", &[("A", "B"), ("C", "B")]);
    let indexer = DumpIndexer::open(dir.path().join("index")).await.unwrap();
    let handle = indexer.build(&[first.clone()]).await.unwrap();
    let lookup = indexer.lookup_edges(&handle, "B", Direction::Citations).unwrap();
    assert_eq!(lookup.len(), 2);

    let second = write_pairs(dir.path(), "part-1", &[("D", "B")]);
    indexer.build(&[first, second]).await.unwrap();

    let err = lookup.neighbors().unwrap_err();
    assert!(matches!(err, CacheError::StaleIndex { .. }), "got {err}");
}

#[tokio::test]
async fn test_active_index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let shard = write_pairs(dir.path(), "part-0", &[("A", "B"), ("D", "A")]);
    let handle = {
        let indexer = DumpIndexer::open(dir.path().join("index")).await.unwrap();
        indexer.build(&[shard.clone()]).await.unwrap()
    };

    let indexer = DumpIndexer::open(dir.path().join("index")).await.unwrap();
    assert_eq!(indexer.current(), Some(handle));
    assert_eq!(neighbor_set(&indexer, "A", Direction::Citations), set(&["D"]));

    let (_, report) = indexer.build_with_report(&[shard]).await.unwrap();
    assert!(report.reused);
}

#[tokio::test]
async fn test_lookup_is_restartable() {
    let dir = tempfile::tempdir().unwrap();
    let shard = write_pairs(dir.path(), "part-0", &[("X", "A"), ("Y", "A"), ("Z", "A")]);
    let indexer = DumpIndexer::open(dir.path().join("index")).await.unwrap();
    let handle = indexer.build(&[shard]).await.unwrap();

    let lookup = indexer.lookup_edges(&handle, "A", Direction::Citations).unwrap();
    let first: Vec<String> = lookup.iter().take(2).collect::<Result<_, _>>().unwrap();
    let all: Vec<String> = lookup.iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(all.len(), 3);
    assert_eq!(&all[..2], &first[..]);
}
