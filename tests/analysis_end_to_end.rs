//! Full analysis pipeline over the in-memory upstream: collection,
//! ranking, user resolution, and the reduced subgraph.

mod helpers;

use std::sync::Arc;

use helpers::{post, reply, retweet, user};
use serde_json::Value;
use sway_analytics::analysis::{CollectiveInfluenceRanker, OnDemandAnalysis};
use sway_analytics::archive::Archive;
use sway_analytics::query::Query;
use sway_analytics::upstream::{MemorySearchBackend, UpstreamClient};

fn seeded_backend() -> Arc<MemorySearchBackend> {
    // Author 1 is retweeted by 2 and 3 and replied to by 4.
    let backend = Arc::new(MemorySearchBackend::new());
    backend.seed_posts(vec![
        post(10, "1"),
        retweet(11, "2", "1"),
        retweet(12, "3", "1"),
        reply(13, "4", "1"),
    ]);
    backend.seed_users(vec![
        user("1", "origin", 5000),
        user("2", "echo_one", 10),
        user("3", "echo_two", 20),
        user("4", "asker", 30),
    ]);
    backend
}

#[tokio::test]
async fn test_top_influencer_takes_all_influence() {
    // S4: the seeded star makes author 1 the sole influencer.
    let dir = tempfile::tempdir().unwrap();
    let client = UpstreamClient::new(seeded_backend());
    let analysis = OnDemandAnalysis::new(dir.path().to_path_buf());
    let query = Query::parse("anything").unwrap();

    let (stats, graph) = analysis
        .run(&query, &client, &CollectiveInfluenceRanker)
        .await
        .unwrap();

    let top = &stats["origin"];
    assert_eq!(top.rank, 1);
    assert_eq!(top.connections, 3);
    assert_eq!(top.influence, "100.00");
    assert_eq!(top.followers, 5000);

    // The subgraph is relabeled to screen names and annotated.
    let nodes = graph["nodes"].as_array().unwrap();
    let origin = nodes
        .iter()
        .find(|n| n["id"] == "origin")
        .expect("origin node present");
    assert_eq!(origin["group"], 2);
    assert!(origin["CI"].as_f64().unwrap() > 0.99);

    let links = graph["links"].as_array().unwrap();
    assert!(links
        .iter()
        .all(|l| l["source"] == "origin" || l["target"] == "origin"));
}

#[tokio::test]
async fn test_all_ranked_users_get_stats_entries() {
    let dir = tempfile::tempdir().unwrap();
    let client = UpstreamClient::new(seeded_backend());
    let analysis = OnDemandAnalysis::new(dir.path().to_path_buf());
    let query = Query::parse("anything").unwrap();

    let (stats, _) = analysis
        .run(&query, &client, &CollectiveInfluenceRanker)
        .await
        .unwrap();

    assert_eq!(stats.len(), 4);
    for (rank, name) in stats.values().map(|s| s.rank).zip(stats.keys()) {
        assert!(rank >= 1 && rank <= 4, "rank {rank} for {name}");
    }
    // Leaves carry no influence share.
    assert_eq!(stats["echo_one"].influence, "0.00");
}

#[tokio::test]
async fn test_empty_corpus_yields_empty_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let client = UpstreamClient::new(Arc::new(MemorySearchBackend::new()));
    let analysis = OnDemandAnalysis::new(dir.path().to_path_buf());
    let query = Query::parse("nothing here").unwrap();

    let (stats, graph) = analysis
        .run(&query, &client, &CollectiveInfluenceRanker)
        .await
        .unwrap();
    assert!(stats.is_empty());
    assert_eq!(graph["nodes"], Value::Array(vec![]));
}

#[tokio::test]
async fn test_exhausted_gap_advances_bounds() {
    // S5: a page of posts followed by an empty page exhausts the gap and
    // the next bounds start past the newest ID seen.
    let dir = tempfile::tempdir().unwrap();
    let backend = seeded_backend();
    let client = UpstreamClient::new(backend.clone());
    let query = Query::parse("anything").unwrap();
    let mut archive = Archive::open(dir.path(), &query, None, None).unwrap();

    let (exhausted, rate_limited) = client
        .archive_search(&mut archive, 10, false, false, false, "en")
        .await
        .unwrap();
    assert!(exhausted);
    assert!(!rate_limited);

    let bounds = archive.bounds();
    assert_eq!(bounds.min_id, Some(13));
    assert!(bounds.is_recent());

    // A later pass finds nothing new and leaves the chain untouched.
    let calls_before = backend.search_calls();
    let (exhausted, _) = client
        .archive_search(&mut archive, 10, false, false, false, "en")
        .await
        .unwrap();
    assert!(exhausted);
    assert!(backend.search_calls() > calls_before);
    assert_eq!(archive.index().finished.len(), 1);
    assert_eq!(archive.index().finished[0].count, 4);
}

#[tokio::test]
async fn test_rate_limited_gap_stays_open() {
    let dir = tempfile::tempdir().unwrap();
    let backend = seeded_backend();
    backend.set_rate_limited(true);
    let client = UpstreamClient::new(backend.clone());
    let query = Query::parse("anything").unwrap();
    let mut archive = Archive::open(dir.path(), &query, None, None).unwrap();

    let (exhausted, rate_limited) = client
        .archive_search(&mut archive, 10, false, false, false, "en")
        .await
        .unwrap();
    assert!(!exhausted);
    assert!(rate_limited);
    // Nothing committed: the gap is still wide open for the next pass.
    assert!(archive.index().finished.is_empty());
    assert!(archive.bounds().is_recent());

    backend.set_rate_limited(false);
    let (exhausted, _) = client
        .archive_search(&mut archive, 10, false, false, false, "en")
        .await
        .unwrap();
    assert!(exhausted);
    assert_eq!(archive.bounds().min_id, Some(13));
}
