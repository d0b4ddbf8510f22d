//! Dispatcher behavior: request coalescing, shared resolution, and worker
//! failure containment.

use std::sync::Arc;

use sway_analytics::analysis::{CollectiveInfluenceRanker, OnDemandAnalysis};
use sway_analytics::dispatcher::{Dispatcher, DispatcherConfig};
use sway_analytics::query::Query;
use sway_analytics::upstream::{MemorySearchBackend, UpstreamClient};

fn spawn_dispatcher(
    archive_root: std::path::PathBuf,
    backend: Arc<MemorySearchBackend>,
) -> Arc<Dispatcher> {
    let client = UpstreamClient::new(backend);
    let config = DispatcherConfig::new(OnDemandAnalysis::new(archive_root));
    Dispatcher::spawn(config, client, Arc::new(CollectiveInfluenceRanker))
}

#[tokio::test]
async fn test_identical_queries_coalesce_into_one_worker() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemorySearchBackend::new());
    // Hold the single page in flight long enough for all waiters to pile
    // on the same pending entry.
    backend.set_search_delay_ms(300);
    let dispatcher = spawn_dispatcher(dir.path().to_path_buf(), backend.clone());

    // Case and OR-order variants of the same query share one bucket.
    let variants = [
        "Hillary OR clinton",
        "CLINTON OR hillary",
        "clinton OR hillary",
        "hillary OR CLINTON",
        "clinton OR Hillary",
    ];
    let receivers: Vec<_> = variants
        .iter()
        .map(|raw| dispatcher.submit(Query::parse(raw).unwrap()))
        .collect();

    let mut outcomes = Vec::new();
    for rx in receivers {
        outcomes.push(rx.await.expect("waiter resolved"));
    }

    // Exactly one analysis ran: one (empty) search page was served.
    assert_eq!(backend.search_calls(), 1);
    // Every waiter observed the very same resolution value.
    for outcome in &outcomes[1..] {
        assert!(Arc::ptr_eq(&outcomes[0], outcome));
    }
    assert!(!outcomes[0].failure);
    assert_eq!(dispatcher.pending_queries(), 0);
}

#[tokio::test]
async fn test_distinct_queries_run_separately() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemorySearchBackend::new());
    let dispatcher = spawn_dispatcher(dir.path().to_path_buf(), backend.clone());

    let a = dispatcher.submit(Query::parse("alpha").unwrap());
    let b = dispatcher.submit(Query::parse("beta").unwrap());
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert!(!a.failure);
    assert!(!b.failure);
    assert_eq!(backend.search_calls(), 2);
}

#[tokio::test]
async fn test_worker_failure_resolves_waiters_with_failure_marker() {
    // An archive root that is a file makes every analysis fail on open.
    let dir = tempfile::tempdir().unwrap();
    let bogus_root = dir.path().join("not_a_directory");
    std::fs::write(&bogus_root, b"occupied").unwrap();

    let backend = Arc::new(MemorySearchBackend::new());
    let dispatcher = spawn_dispatcher(bogus_root, backend);

    let outcome = dispatcher
        .submit(Query::parse("doomed").unwrap())
        .await
        .expect("waiter resolved despite failure");
    assert!(outcome.failure);
    assert!(outcome.influencers.is_none());
    assert!(outcome.graph.is_none());
}

#[tokio::test]
async fn test_requery_after_resolution_runs_again() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemorySearchBackend::new());
    let dispatcher = spawn_dispatcher(dir.path().to_path_buf(), backend.clone());

    let query = Query::parse("repeat").unwrap();
    let first = dispatcher.submit(query.clone()).await.unwrap();
    let second = dispatcher.submit(query).await.unwrap();

    assert!(!first.failure);
    assert!(!second.failure);
    // The pending entry was popped between requests, so a second worker ran.
    assert_eq!(backend.search_calls(), 2);
}
