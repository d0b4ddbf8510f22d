//! On-demand social-media influence analytics service.
//!
//! A client issues a keyword query over HTTP; the service collects recent
//! posts matching the query from an upstream social API, persists them in a
//! size-bounded append-only archive, extracts the interaction graph from the
//! corpus, ranks influencers by collective influence, and returns JSON with
//! the top influencers plus the reduced subgraph.
//!
//! ## Architecture
//!
//! ```text
//! HTTP (axum) ──► Dispatcher ──► worker slot ──► OnDemandAnalysis
//!                 (coalesce by                    │
//!                  normalized query)              ▼
//!                                  UpstreamClient ──► Archive ──► InfluenceGraph
//!                                  (paged search)     (.taj/.arx)  (ranking kernel)
//! ```
//!
//! The `topic_tracker` binary runs the long-lived fair collector over a fixed
//! query list against the same archives.

pub mod analysis;
pub mod api;
pub mod archive;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod graph;
pub mod post;
pub mod query;
pub mod tracker;
pub mod upstream;

pub use archive::Archive;
pub use dispatcher::Dispatcher;
pub use error::{AnalysisError, ArchiveError, UpstreamError};
pub use graph::{GraphType, InfluenceGraph};
pub use query::Query;
