//! Graph assembly over archived posts: per-relation graphs, the influence
//! union, range filtering, and edge post-ID tracking.

mod helpers;

use helpers::{mention, post, reply, retweet};
use serde_json::Value;
use sway_analytics::archive::Archive;
use sway_analytics::graph::GraphType;
use sway_analytics::query::Query;

fn seeded_archive(dir: &std::path::Path) -> Archive {
    let query = Query::parse("graph topic").unwrap();
    let mut archive = Archive::open(dir, &query, None, None).unwrap();
    // Newest first: mention(5), reply(4), retweets(3, 2), original(1).
    let posts = vec![
        mention(5, "4", &["1", "2"]),
        reply(4, "3", "1"),
        retweet(3, "2", "1"),
        retweet(2, "2", "1"),
        post(1, "1"),
    ];
    archive.append(&posts, true).unwrap();
    archive
}

#[test]
fn test_influence_union_equals_relation_graphs() {
    let dir = tempfile::tempdir().unwrap();
    let archive = seeded_archive(dir.path());

    let influence = archive
        .build_graph(None, None, GraphType::Influence, false)
        .unwrap();
    let mut union = archive
        .build_graph(None, None, GraphType::Retweet, false)
        .unwrap();
    union.merge(
        &archive
            .build_graph(None, None, GraphType::Reply, false)
            .unwrap(),
    );
    union.merge(
        &archive
            .build_graph(None, None, GraphType::Mention, false)
            .unwrap(),
    );

    assert_eq!(influence.edge_pairs(), union.edge_pairs());
    assert!(influence.has_edge("1", "2"));
    assert!(influence.has_edge("1", "3"));
    assert!(influence.has_edge("1", "4"));
    assert!(influence.has_edge("2", "4"));
}

#[test]
fn test_relation_graphs_stay_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let archive = seeded_archive(dir.path());

    let retweets = archive
        .build_graph(None, None, GraphType::Retweet, false)
        .unwrap();
    assert_eq!(
        retweets.edge_pairs(),
        vec![("1".to_string(), "2".to_string())]
    );

    let replies = archive
        .build_graph(None, None, GraphType::Reply, false)
        .unwrap();
    assert_eq!(
        replies.edge_pairs(),
        vec![("1".to_string(), "3".to_string())]
    );
}

#[test]
fn test_range_bounds_filter_boundary_segments() {
    let dir = tempfile::tempdir().unwrap();
    let archive = seeded_archive(dir.path());

    // Only posts 2..=3 (the two retweets) fall inside the range.
    let graph = archive
        .build_graph(Some(2), Some(3), GraphType::Influence, false)
        .unwrap();
    assert_eq!(graph.edge_pairs(), vec![("1".to_string(), "2".to_string())]);
    assert!(!graph.contains_node("3"));
    assert_eq!(graph.first_post_id, Some(2));
    assert_eq!(graph.last_post_id, Some(3));
}

#[test]
fn test_save_post_ids_unions_edge_sets() {
    let dir = tempfile::tempdir().unwrap();
    let archive = seeded_archive(dir.path());

    let graph = archive
        .build_graph(None, None, GraphType::Retweet, true)
        .unwrap();
    let json = graph.to_node_link();
    let links = json["links"].as_array().unwrap();
    assert_eq!(links.len(), 1);
    // Both retweets collapse onto one edge carrying both post IDs.
    assert_eq!(links[0]["post_ids"], serde_json::json!([2, 3]));
}

#[test]
fn test_artifacts_reused_for_immutable_segments() {
    let dir = tempfile::tempdir().unwrap();
    let query = Query::parse("graph topic").unwrap();
    let mut archive = Archive::open(dir.path(), &query, None, None)
        .unwrap()
        .with_size_limit(200);

    let older: Vec<Value> = vec![retweet(3, "2", "1"), retweet(2, "2", "1"), post(1, "1")];
    archive.append(&older, true).unwrap();
    // Oversized first segment seals on this append.
    let newer: Vec<Value> = vec![reply(10, "3", "1"), post(9, "5")];
    archive.append(&newer, true).unwrap();
    assert_eq!(archive.index().finished.len(), 2);

    let sealed = archive.index().finished[0].file.clone();
    let artifact = dir
        .path()
        .join("graph topic")
        .join("graphs")
        .join(sealed.strip_suffix(".taj").unwrap())
        .join("influence_graph.jnld");
    assert!(artifact.exists());

    // Full-range build must still see edges from both segments.
    let graph = archive
        .build_graph(None, None, GraphType::Influence, false)
        .unwrap();
    assert!(graph.has_edge("1", "2"));
    assert!(graph.has_edge("1", "3"));
}
