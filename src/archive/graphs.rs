//! Per-segment graph artifacts and range-bounded graph assembly.
//!
//! Every sealed segment gets a `graphs/<segment>/` directory holding
//! node-link JSON for the retweet, reply, and mention graphs plus their
//! union, the influence graph. Interior segments of a range load straight
//! from these artifacts; the two boundary segments (and any segment still
//! receiving writes) are reparsed from the `.taj`.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};

use serde_json::Value;

use super::Archive;
use crate::error::{ArchiveError, ArchiveResult};
use crate::graph::{GraphType, InfluenceGraph};
use crate::post::{Attribution, PostAdapter};

/// Graph types persisted per segment; quote graphs are reparse-only.
const ARTIFACT_TYPES: [GraphType; 3] = [GraphType::Retweet, GraphType::Reply, GraphType::Mention];

fn extract(adapter: &dyn PostAdapter, post: &Value, graph_type: GraphType) -> Attribution {
    match graph_type {
        GraphType::Retweet => adapter.retweet_influencers(post),
        GraphType::Reply => adapter.reply_influencers(post),
        GraphType::Mention => adapter.mention_influencers(post),
        GraphType::Quote => adapter.quote_influencers(post),
        GraphType::Influence => adapter.influencers(post),
    }
}

fn add_post_edges(
    graph: &mut InfluenceGraph,
    adapter: &dyn PostAdapter,
    post: &Value,
    graph_type: GraphType,
    save_post_ids: bool,
) {
    let attr = extract(adapter, post, graph_type);
    let Some(author) = attr.author else { return };
    let post_id = save_post_ids.then(|| adapter.id(post)).flatten();
    for influencer in &attr.influencers {
        graph.add_edge(influencer, &author, post_id);
    }
}

impl Archive {
    /// Build and persist all artifact graphs for one segment, returning
    /// the influence union.
    pub(crate) fn generate_artifacts(&self, file: &str) -> ArchiveResult<InfluenceGraph> {
        let adapter = self.adapter();
        let mut retweet = InfluenceGraph::new(GraphType::Retweet);
        let mut reply = InfluenceGraph::new(GraphType::Reply);
        let mut mention = InfluenceGraph::new(GraphType::Mention);

        let path = self.segment_path(file);
        let reader = BufReader::new(File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(post) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            add_post_edges(&mut retweet, adapter, &post, GraphType::Retweet, false);
            add_post_edges(&mut reply, adapter, &post, GraphType::Reply, false);
            add_post_edges(&mut mention, adapter, &post, GraphType::Mention, false);
        }

        let dir = self.graphs_dir(file);
        fs::create_dir_all(&dir)?;
        for graph in [&retweet, &reply, &mention] {
            write_artifact(&dir.join(graph.graph_type.artifact_name()), graph)?;
        }

        let mut influence = retweet;
        influence.graph_type = GraphType::Influence;
        influence.merge(&reply);
        influence.merge(&mention);
        write_artifact(&dir.join(GraphType::Influence.artifact_name()), &influence)?;

        tracing::debug!(query = %self.query(), segment = file, "generated graph artifacts");
        Ok(influence)
    }

    /// Whether a segment may still receive writes, invalidating any cached
    /// artifact: the unfinished tail and the latest finished segment.
    fn is_mutable_segment(&self, file: &str) -> bool {
        let unfinished = self
            .index()
            .unfinished
            .as_ref()
            .is_some_and(|e| e.file == file);
        let tail = self.index().finished.last().is_some_and(|e| e.file == file);
        unfinished || tail
    }

    /// Load the graph of one segment, regenerating the artifact when the
    /// segment is still mutable or the artifact is missing.
    pub(crate) fn load_segment_graph(
        &self,
        file: &str,
        graph_type: GraphType,
    ) -> ArchiveResult<InfluenceGraph> {
        // Quote graphs have no artifact; always parse.
        if graph_type == GraphType::Quote {
            return self.parse_segment(file, 0, u64::MAX, graph_type, false);
        }

        let artifact = self.graphs_dir(file).join(graph_type.artifact_name());
        if self.is_mutable_segment(file) || !artifact.exists() {
            let influence = self.generate_artifacts(file)?;
            if graph_type == GraphType::Influence {
                return Ok(influence);
            }
        }
        match read_artifact(&artifact) {
            Ok(graph) => Ok(graph),
            Err(_) => {
                // Unreadable cache: rebuild from the segment itself.
                let influence = self.generate_artifacts(file)?;
                if graph_type == GraphType::Influence {
                    Ok(influence)
                } else {
                    read_artifact(&artifact)
                }
            }
        }
    }

    /// Parse a segment file, keeping only edges whose source post ID lies
    /// inside `[min_bound, max_bound]`.
    fn parse_segment(
        &self,
        file: &str,
        min_bound: u64,
        max_bound: u64,
        graph_type: GraphType,
        save_post_ids: bool,
    ) -> ArchiveResult<InfluenceGraph> {
        let adapter = self.adapter();
        let newest_first = file.starts_with(super::index::UNFINISHED_PREFIX);
        let mut graph = InfluenceGraph::new(graph_type);

        let reader = BufReader::new(File::open(self.segment_path(file))?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(post) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let Some(id) = adapter.id(&post) else {
                continue;
            };
            // Storage order decides which side of the range ends the scan.
            if newest_first {
                if id > max_bound {
                    continue;
                }
                if id < min_bound {
                    break;
                }
            } else {
                if id < min_bound {
                    continue;
                }
                if id > max_bound {
                    break;
                }
            }
            add_post_edges(&mut graph, adapter, &post, graph_type, save_post_ids);
        }
        Ok(graph)
    }

    /// Materialize the union graph over a post-ID range.
    ///
    /// Interior segments load their cached artifacts; the two boundary
    /// segments are reparsed with bound filtering. When `save_post_ids` is
    /// set every segment is reparsed, since artifacts do not carry edge ID
    /// sets.
    pub fn build_graph(
        &self,
        min_id: Option<u64>,
        max_id: Option<u64>,
        graph_type: GraphType,
        save_post_ids: bool,
    ) -> ArchiveResult<InfluenceGraph> {
        let min_bound = min_id.unwrap_or(0);
        let max_bound = max_id.unwrap_or(u64::MAX);
        if min_bound > max_bound {
            return Err(ArchiveError::InvalidRange {
                min: min_bound,
                max: max_bound,
            });
        }

        let mut graph = InfluenceGraph::new(graph_type);
        graph.first_post_id = min_id;
        graph.last_post_id = max_id;

        let entries = self.index().entries();
        let mut min_ptr = None;
        let mut max_ptr = None;
        let mut reparse_min = false;
        let mut reparse_max = false;

        for (n, entry) in entries.iter().enumerate() {
            let (Some(emin), Some(emax)) = (entry.min_id, entry.max_id) else {
                continue;
            };
            if min_ptr.is_none() {
                if min_bound < emin {
                    min_ptr = Some(n);
                } else if min_bound < emax {
                    min_ptr = Some(n);
                    reparse_min = true;
                }
            }
            if max_ptr.is_none() {
                if max_bound < emin {
                    if n == 0 {
                        return Ok(graph);
                    }
                    max_ptr = Some(n);
                } else if max_bound <= emax {
                    max_ptr = Some(n + 1);
                    reparse_max = true;
                }
            }
            if min_ptr.is_some() && max_ptr.is_some() {
                break;
            }
        }

        let lo = min_ptr.unwrap_or(0);
        let hi = max_ptr.unwrap_or(entries.len());
        let selected = &entries[lo..hi];

        for (n, entry) in selected.iter().enumerate() {
            let boundary = (n == 0 && reparse_min) || (n == selected.len() - 1 && reparse_max);
            let sub = if boundary || save_post_ids {
                self.parse_segment(&entry.file, min_bound, max_bound, graph_type, save_post_ids)?
            } else {
                self.load_segment_graph(&entry.file, graph_type)?
            };
            graph.merge(&sub);
        }
        Ok(graph)
    }

    /// [`Self::build_graph`] addressed by timestamp range.
    pub fn build_graph_by_date(
        &self,
        min_date: chrono::DateTime<chrono::Utc>,
        max_date: chrono::DateTime<chrono::Utc>,
        graph_type: GraphType,
        save_post_ids: bool,
    ) -> ArchiveResult<InfluenceGraph> {
        match self.resolve_date_range(min_date, max_date)? {
            Some((lo, hi)) => self.build_graph(Some(lo), Some(hi), graph_type, save_post_ids),
            None => Ok(InfluenceGraph::new(graph_type)),
        }
    }
}

fn write_artifact(path: &std::path::Path, graph: &InfluenceGraph) -> ArchiveResult<()> {
    let mut out = File::create(path)?;
    out.write_all(serde_json::to_string(&graph.to_node_link())?.as_bytes())?;
    Ok(())
}

fn read_artifact(path: &std::path::Path) -> ArchiveResult<InfluenceGraph> {
    let data = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&data)?;
    Ok(InfluenceGraph::from_node_link(&value)?)
}
