//! HTTP surface of the analytics server.
//!
//! Three routes, fixed for compatibility with existing clients:
//! - `GET /`: health string;
//! - `GET /debug`, `GET /debug/*`: request echo;
//! - `GET /influencers.json?query=<q>`: the analysis endpoint.
//!
//! Failures are always structured JSON; the health string is the only bare
//! text the server emits.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query as QueryParams, State};
use axum::http::HeaderMap;
use axum::http::{Method, Uri};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dispatcher::Dispatcher;
use crate::query::Query;

mod audit;

pub use audit::{timestamp_now, QueryLog};

/// Unresolved queries are reported to the audit log after this long.
const BLACK_BOX_TIMEOUT: Duration = Duration::from_secs(900);

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub query_log: Arc<QueryLog>,
    /// Resolutions slower than this get a SLOW audit line.
    pub slow_threshold: Duration,
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/debug", get(debug_echo))
        .route("/debug/*rest", get(debug_echo))
        .route("/influencers.json", get(influencers))
        .with_state(state)
}

async fn health() -> &'static str {
    "Analytics server is ONLINE"
}

/// Echo the request back at the caller.
async fn debug_echo(method: Method, uri: Uri, headers: HeaderMap) -> String {
    let mut lines = vec!["You requested:".to_string(), String::new()];
    lines.push(format!("{method} {uri}"));
    for (name, value) in &headers {
        lines.push(format!("{name}: {}", value.to_str().unwrap_or("<binary>")));
    }
    lines.join("\n")
}

#[derive(Debug, Deserialize)]
struct InfluencersParams {
    #[serde(default)]
    query: String,
}

fn invalid_query_response() -> Json<Value> {
    Json(json!({
        "failure": true,
        "error_code": 1,
        "error_text": "Empty or invalid query",
    }))
}

/// The analysis endpoint: normalize, coalesce, wait, respond.
async fn influencers(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<InfluencersParams>,
) -> Json<Value> {
    let issued = timestamp_now();
    let started = tokio::time::Instant::now();

    let Ok(query) = Query::parse(&params.query) else {
        return invalid_query_response();
    };

    let receiver = state.dispatcher.submit(query.clone());

    // Black-box recorder: if the query is still unresolved when the timer
    // fires, it goes on record as failed. Resolution cancels the timer.
    let black_box = tokio::spawn({
        let log = state.query_log.clone();
        let query = query.clone();
        let issued = issued.clone();
        async move {
            tokio::time::sleep(BLACK_BOX_TIMEOUT).await;
            log.failed(query.as_str(), &issued).await;
        }
    });

    let outcome = receiver.await;
    black_box.abort();

    let elapsed = started.elapsed();
    if elapsed > state.slow_threshold {
        state
            .query_log
            .slow(query.as_str(), &issued, elapsed.as_secs_f64() / 60.0)
            .await;
    }

    match outcome {
        Ok(outcome) => {
            tracing::info!(query = %query, "query answered");
            Json(json!({
                "influencers": outcome.influencers,
                "graph": outcome.graph,
                "failure": outcome.failure,
            }))
        }
        Err(_) => {
            // The dispatcher dropped our waiter without resolving it.
            tracing::error!(query = %query, "waiter dropped before resolution");
            Json(json!({
                "influencers": Value::Null,
                "graph": Value::Null,
                "failure": true,
            }))
        }
    }
}
