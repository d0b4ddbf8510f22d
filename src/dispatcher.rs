//! Request coalescing and the analysis worker pool.
//!
//! The HTTP layer submits normalized queries and gets back one-shot
//! receivers. Identical in-flight queries share a single worker: the first
//! submission enqueues the query, later ones only add a waiter. The run
//! loop owns the ingress queue and the worker set; the waiter map is the
//! only state touched from request handlers, behind brief critical
//! sections.
//!
//! ```text
//! submit(Q) ──► pending[Q].push(waiter) ──► ingress ──► worker slot
//!                                                          │
//! waiters of Q ◄── resolve(Q, outcome) ◄── join ◄──────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::analysis::{AnalysisPayload, InfluenceRanker, InfluencerStats, OnDemandAnalysis};
use crate::error::AnalysisError;
use crate::query::Query;
use crate::upstream::{CredentialPool, UpstreamClient};

/// Hands each worker its upstream client. The credential pool rotates
/// user contexts; a bare client just clones itself.
pub trait ClientFactory: Send + 'static {
    fn next_client(&mut self) -> UpstreamClient;
}

impl ClientFactory for CredentialPool {
    fn next_client(&mut self) -> UpstreamClient {
        CredentialPool::next_client(self)
    }
}

impl ClientFactory for UpstreamClient {
    fn next_client(&mut self) -> UpstreamClient {
        self.clone()
    }
}

/// What every waiter of a query observes, exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub influencers: Option<std::collections::BTreeMap<String, InfluencerStats>>,
    pub graph: Option<Value>,
    pub failure: bool,
}

impl AnalysisOutcome {
    fn success(payload: AnalysisPayload) -> Self {
        AnalysisOutcome {
            influencers: Some(payload.0),
            graph: Some(payload.1),
            failure: false,
        }
    }

    fn failed() -> Self {
        AnalysisOutcome {
            influencers: None,
            graph: None,
            failure: true,
        }
    }
}

pub type SharedOutcome = Arc<AnalysisOutcome>;

/// Pool sizing and per-analysis settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub analysis: OnDemandAnalysis,
}

impl DispatcherConfig {
    pub fn new(analysis: OnDemandAnalysis) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        DispatcherConfig { workers, analysis }
    }
}

/// Coalescing front of the worker pool.
pub struct Dispatcher {
    pending: Mutex<HashMap<Query, Vec<oneshot::Sender<SharedOutcome>>>>,
    ingress: mpsc::UnboundedSender<Query>,
}

impl Dispatcher {
    /// Start the run loop and hand back the shared dispatcher handle.
    pub fn spawn(
        config: DispatcherConfig,
        credentials: impl ClientFactory,
        ranker: Arc<dyn InfluenceRanker>,
    ) -> Arc<Dispatcher> {
        let (ingress, ingress_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher {
            pending: Mutex::new(HashMap::new()),
            ingress,
        });
        // The loop only keeps a weak handle; dropping the last strong one
        // closes the ingress channel and winds the loop down.
        tokio::spawn(run_loop(
            Arc::downgrade(&dispatcher),
            ingress_rx,
            config,
            credentials,
            ranker,
        ));
        dispatcher
    }

    /// Register a waiter for a query. The first waiter of an idle query
    /// puts it on the work queue; at most one worker per query runs at a
    /// time.
    pub fn submit(&self, query: Query) -> oneshot::Receiver<SharedOutcome> {
        let (tx, rx) = oneshot::channel();
        let enqueue = {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            match pending.get_mut(&query) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    pending.insert(query.clone(), vec![tx]);
                    true
                }
            }
        };
        if enqueue {
            // Receiver dropping means the dispatcher is gone; the waiter
            // then sees a closed channel, which the HTTP layer reports as
            // failure.
            let _ = self.ingress.send(query);
        }
        rx
    }

    /// Number of queries with live waiters.
    pub fn pending_queries(&self) -> usize {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Deliver the outcome to every waiter of the query.
    fn resolve(&self, query: &Query, outcome: SharedOutcome) {
        let waiters = {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            pending.remove(query)
        };
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(outcome.clone());
        }
    }
}

type WorkerOutput = (Query, Result<AnalysisPayload, AnalysisError>);

async fn run_loop(
    dispatcher: std::sync::Weak<Dispatcher>,
    mut ingress: mpsc::UnboundedReceiver<Query>,
    config: DispatcherConfig,
    mut credentials: impl ClientFactory,
    ranker: Arc<dyn InfluenceRanker>,
) {
    let mut backlog: VecDeque<Query> = VecDeque::new();
    let mut active: JoinSet<WorkerOutput> = JoinSet::new();
    tracing::info!(workers = config.workers, "dispatcher started");

    loop {
        // Fill free worker slots from the backlog.
        while active.len() < config.workers {
            let Some(query) = backlog.pop_front() else {
                break;
            };
            let client = credentials.next_client();
            let analysis = config.analysis.clone();
            let ranker = ranker.clone();
            active.spawn(async move {
                let result = std::panic::AssertUnwindSafe(
                    analysis.run(&query, &client, ranker.as_ref()),
                )
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(AnalysisError::Worker("analysis worker panicked".into()))
                });
                (query, result)
            });
        }

        tokio::select! {
            submitted = ingress.recv() => {
                match submitted {
                    Some(query) => backlog.push_back(query),
                    // All senders gone: the server is shutting down.
                    None => break,
                }
            }
            Some(joined) = active.join_next(), if !active.is_empty() => {
                let resolution = match joined {
                    Ok((query, Ok(payload))) => {
                        tracing::info!(query = %query, "query analyzed");
                        Some((query, AnalysisOutcome::success(payload)))
                    }
                    Ok((query, Err(error))) => {
                        tracing::error!(query = %query, error = %error, "analysis failed");
                        Some((query, AnalysisOutcome::failed()))
                    }
                    Err(join_error) => {
                        // catch_unwind means this is only cancellation.
                        tracing::error!(error = %join_error, "analysis task aborted");
                        None
                    }
                };
                if let Some((query, outcome)) = resolution {
                    if let Some(dispatcher) = dispatcher.upgrade() {
                        dispatcher.resolve(&query, Arc::new(outcome));
                    }
                }
            }
        }
    }
    tracing::info!("dispatcher stopped");
}
