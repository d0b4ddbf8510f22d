//! On-demand analysis driver.
//!
//! One run serves one normalized query end to end: top up the archive with
//! a bounded collection pass, build the influence graph, rank it, then
//! dress the top of the ranking with screen names, follower counts, and
//! the induced subgraph the front end renders.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::archive::Archive;
use crate::error::AnalysisResult;
use crate::graph::{GraphType, NodeAttrs};
use crate::query::Query;
use crate::upstream::UpstreamClient;

mod ranking;

pub use ranking::{CollectiveInfluenceRanker, InfluenceRanker, RankedInfluencers};

/// Influencers reported per analysis.
const TOP_INFLUENCERS: usize = 100;
/// Influencers flagged as the leading group.
const TOP_GROUP: usize = 10;

/// Per-influencer entry in the response map.
#[derive(Debug, Clone, Serialize)]
pub struct InfluencerStats {
    pub rank: usize,
    /// Share of total influence, two-decimal percentage.
    pub influence: String,
    /// `ci / ((deg − 1) · deg)` when `deg > 1`, else the raw score.
    pub magnification: String,
    pub connections: usize,
    pub followers: i64,
}

/// Result of one analysis: influencer stats keyed by screen name, plus the
/// induced subgraph in node-link JSON.
pub type AnalysisPayload = (BTreeMap<String, InfluencerStats>, Value);

/// Configuration for the on-demand analysis path.
#[derive(Debug, Clone)]
pub struct OnDemandAnalysis {
    pub archive_root: PathBuf,
    /// Ball radius handed to the ranking kernel.
    pub radius: usize,
    /// Page budget for the collection pass.
    pub max_pages: u32,
    pub lang: String,
}

impl OnDemandAnalysis {
    pub fn new(archive_root: PathBuf) -> Self {
        OnDemandAnalysis {
            archive_root,
            radius: 2,
            max_pages: 60,
            lang: "en".to_string(),
        }
    }

    /// Run the full pipeline for one query.
    ///
    /// The collection pass never waits out rate limits and leaves a
    /// rate-limited gap open for the next request to resume.
    pub async fn run(
        &self,
        query: &Query,
        client: &UpstreamClient,
        ranker: &dyn InfluenceRanker,
    ) -> AnalysisResult<AnalysisPayload> {
        let mut archive = Archive::open(&self.archive_root, query, None, None)?;

        let collect_started = std::time::Instant::now();
        let (_, rate_limited) = client
            .archive_search(&mut archive, self.max_pages, false, false, false, &self.lang)
            .await?;
        tracing::info!(
            query = %query,
            rate_limited,
            elapsed_ms = collect_started.elapsed().as_millis() as u64,
            "collection pass finished"
        );

        let graph = archive.build_graph(None, None, GraphType::Influence, false)?;
        if graph.is_empty() {
            tracing::info!(query = %query, "no interactions collected; empty analysis");
            return Ok(empty_payload());
        }

        let ranked = ranker.site_ci(&graph, self.radius, true);
        let total_influence: f64 = ranked.ci_scores.iter().sum();
        // An all-leaf graph ranks but carries no shareable influence.
        let denominator = if total_influence < 1.0 {
            1.0
        } else {
            total_influence
        };

        let top_count = ranked.influencers.len().min(TOP_INFLUENCERS);
        let top_ids: Vec<String> = ranked.influencers[..top_count].to_vec();

        let users = client.resolve_users(&top_ids).await?;
        let mut mapping: HashMap<String, String> = HashMap::new();
        let mut screen_names: Vec<String> = Vec::with_capacity(top_count);
        for id in &top_ids {
            let name = users
                .get(id)
                .map(|u| u.screen_name.clone())
                .unwrap_or_else(|| crate::upstream::UNKNOWN_SCREEN_NAME.to_string());
            mapping.insert(id.clone(), name.clone());
            screen_names.push(name);
        }

        let mut subgraph = graph
            .relabel(&mapping)
            .induced_subgraph(&screen_names.iter().cloned().collect::<HashSet<String>>());

        let mut stats = BTreeMap::new();
        for (rank, name) in screen_names.iter().enumerate() {
            let ci = ranked.ci_scores[rank];
            let deg = ranked.degrees[rank];
            let magnification = if deg > 1 {
                ci / ((deg as f64 - 1.0) * deg as f64)
            } else {
                ci
            };
            let followers = top_ids
                .get(rank)
                .and_then(|id| users.get(id))
                .map(|u| u.followers_count)
                .unwrap_or(0);

            stats.insert(
                name.clone(),
                InfluencerStats {
                    rank: rank + 1,
                    influence: format!("{:.2}", ci * 100.0 / denominator),
                    magnification: format!("{magnification:.2}"),
                    connections: deg,
                    followers,
                },
            );

            subgraph.set_node_attrs(
                name,
                NodeAttrs {
                    ci: Some(ci / denominator),
                    group: Some(if rank < TOP_GROUP { 2 } else { 1 }),
                },
            );
        }

        Ok((stats, subgraph.to_node_link()))
    }
}

/// Payload for a query whose corpus produced no interaction edges.
fn empty_payload() -> AnalysisPayload {
    (
        BTreeMap::new(),
        crate::graph::InfluenceGraph::new(GraphType::Influence).to_node_link(),
    )
}
