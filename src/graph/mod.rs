//! Directed influence graphs.
//!
//! A thin string-keyed facade over a petgraph `DiGraph`. Nodes are author
//! IDs (later relabeled to screen names), edges run influencer → author and
//! optionally carry the set of post IDs that produced them. The on-disk
//! artifact format is node-link JSON, the shape stored in per-segment
//! `.jnld` files.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which influence relation a graph was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphType {
    Retweet,
    Reply,
    Mention,
    Quote,
    Influence,
}

impl GraphType {
    /// Artifact filename inside a segment's `graphs/` directory.
    pub fn artifact_name(self) -> &'static str {
        match self {
            GraphType::Retweet => "retweet_graph.jnld",
            GraphType::Reply => "reply_graph.jnld",
            GraphType::Mention => "mention_graph.jnld",
            GraphType::Quote => "quote_graph.jnld",
            GraphType::Influence => "influence_graph.jnld",
        }
    }
}

/// Node payload: the string ID plus ranking annotations.
#[derive(Debug, Clone, Default)]
pub struct NodeAttrs {
    /// Collective-influence share, as a fraction of the total.
    pub ci: Option<f64>,
    /// 2 for top-10 influencers, 1 for top-100, 0 otherwise.
    pub group: Option<u8>,
}

#[derive(Debug, Clone)]
struct NodeData {
    id: String,
    attrs: NodeAttrs,
}

/// Edge payload: the post IDs that produced this edge, when tracked.
#[derive(Debug, Clone, Default)]
pub struct EdgeAttrs {
    pub post_ids: Option<BTreeSet<u64>>,
}

/// Directed graph of `(influencer → author)` edges.
pub struct InfluenceGraph {
    graph: DiGraph<NodeData, EdgeAttrs>,
    index: HashMap<String, NodeIndex>,
    pub graph_type: GraphType,
    /// ID bounds of the post range the graph was built over.
    pub first_post_id: Option<u64>,
    pub last_post_id: Option<u64>,
}

impl InfluenceGraph {
    pub fn new(graph_type: GraphType) -> Self {
        InfluenceGraph {
            graph: DiGraph::new(),
            index: HashMap::new(),
            graph_type,
            first_post_id: None,
            last_post_id: None,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|n| n.id.as_str())
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(id) {
            return *idx;
        }
        let idx = self.graph.add_node(NodeData {
            id: id.to_string(),
            attrs: NodeAttrs::default(),
        });
        self.index.insert(id.to_string(), idx);
        idx
    }

    /// Add (or update) the edge influencer → author. A known post ID is
    /// unioned into the edge's ID set.
    pub fn add_edge(&mut self, influencer: &str, author: &str, post_id: Option<u64>) {
        let u = self.ensure_node(influencer);
        let v = self.ensure_node(author);
        let edge = match self.graph.find_edge(u, v) {
            Some(e) => e,
            None => self.graph.add_edge(u, v, EdgeAttrs::default()),
        };
        if let Some(id) = post_id {
            self.graph[edge]
                .post_ids
                .get_or_insert_with(BTreeSet::new)
                .insert(id);
        }
    }

    pub fn has_edge(&self, influencer: &str, author: &str) -> bool {
        match (self.index.get(influencer), self.index.get(author)) {
            (Some(u), Some(v)) => self.graph.find_edge(*u, *v).is_some(),
            _ => false,
        }
    }

    /// Union another graph's nodes and edges into this one, merging edge
    /// post-ID sets.
    pub fn merge(&mut self, other: &InfluenceGraph) {
        for node in other.graph.node_weights() {
            self.ensure_node(&node.id);
        }
        for edge in other.graph.edge_indices() {
            let (u, v) = other.graph.edge_endpoints(edge).expect("edge exists");
            let src = other.graph[u].id.clone();
            let dst = other.graph[v].id.clone();
            let su = self.ensure_node(&src);
            let sv = self.ensure_node(&dst);
            let merged = match self.graph.find_edge(su, sv) {
                Some(e) => e,
                None => self.graph.add_edge(su, sv, EdgeAttrs::default()),
            };
            if let Some(ids) = &other.graph[edge].post_ids {
                self.graph[merged]
                    .post_ids
                    .get_or_insert_with(BTreeSet::new)
                    .extend(ids.iter().copied());
            }
        }
    }

    /// Total (in + out) distinct-neighbor degree of a node.
    pub fn degree(&self, id: &str) -> usize {
        match self.index.get(id) {
            Some(idx) => {
                let neighbors: HashSet<NodeIndex> =
                    self.graph.neighbors_undirected(*idx).collect();
                neighbors.len()
            }
            None => 0,
        }
    }

    /// Distinct undirected neighbor IDs of a node.
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        match self.index.get(id) {
            Some(idx) => {
                let set: HashSet<NodeIndex> = self.graph.neighbors_undirected(*idx).collect();
                set.into_iter().map(|n| self.graph[n].id.as_str()).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn set_node_attrs(&mut self, id: &str, attrs: NodeAttrs) {
        if let Some(idx) = self.index.get(id) {
            self.graph[*idx].attrs = attrs;
        }
    }

    pub fn node_attrs(&self, id: &str) -> Option<&NodeAttrs> {
        self.index.get(id).map(|idx| &self.graph[*idx].attrs)
    }

    /// Rename nodes through the mapping; unmapped nodes keep their IDs.
    /// Nodes mapped onto the same name are merged, unioning their edges.
    pub fn relabel(&self, mapping: &HashMap<String, String>) -> InfluenceGraph {
        let mut out = InfluenceGraph::new(self.graph_type);
        out.first_post_id = self.first_post_id;
        out.last_post_id = self.last_post_id;
        let name = |id: &str| -> String {
            mapping.get(id).cloned().unwrap_or_else(|| id.to_string())
        };
        for node in self.graph.node_weights() {
            let idx = out.ensure_node(&name(&node.id));
            out.graph[idx].attrs = node.attrs.clone();
        }
        for edge in self.graph.edge_indices() {
            let (u, v) = self.graph.edge_endpoints(edge).expect("edge exists");
            let src = name(&self.graph[u].id);
            let dst = name(&self.graph[v].id);
            let su = out.ensure_node(&src);
            let sv = out.ensure_node(&dst);
            let merged = match out.graph.find_edge(su, sv) {
                Some(e) => e,
                None => out.graph.add_edge(su, sv, EdgeAttrs::default()),
            };
            if let Some(ids) = &self.graph[edge].post_ids {
                out.graph[merged]
                    .post_ids
                    .get_or_insert_with(BTreeSet::new)
                    .extend(ids.iter().copied());
            }
        }
        out
    }

    /// Subgraph induced by the given node IDs, keeping isolated nodes.
    pub fn induced_subgraph(&self, keep: &HashSet<String>) -> InfluenceGraph {
        let mut out = InfluenceGraph::new(self.graph_type);
        out.first_post_id = self.first_post_id;
        out.last_post_id = self.last_post_id;
        for node in self.graph.node_weights() {
            if keep.contains(&node.id) {
                let idx = out.ensure_node(&node.id);
                out.graph[idx].attrs = node.attrs.clone();
            }
        }
        for edge in self.graph.edge_indices() {
            let (u, v) = self.graph.edge_endpoints(edge).expect("edge exists");
            let src = &self.graph[u].id;
            let dst = &self.graph[v].id;
            if keep.contains(src) && keep.contains(dst) {
                let su = out.ensure_node(src);
                let sv = out.ensure_node(dst);
                let e = out.graph.add_edge(su, sv, EdgeAttrs::default());
                out.graph[e].post_ids = self.graph[edge].post_ids.clone();
            }
        }
        out
    }

    /// Sorted `(source, target)` pairs, mainly for equality checks.
    pub fn edge_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .graph
            .edge_indices()
            .map(|e| {
                let (u, v) = self.graph.edge_endpoints(e).expect("edge exists");
                (self.graph[u].id.clone(), self.graph[v].id.clone())
            })
            .collect();
        pairs.sort();
        pairs
    }

    /// Serialize to node-link JSON.
    pub fn to_node_link(&self) -> Value {
        let nodes: Vec<Value> = self
            .graph
            .node_weights()
            .map(|n| {
                let mut obj = serde_json::Map::new();
                obj.insert("id".into(), Value::String(n.id.clone()));
                if let Some(ci) = n.attrs.ci {
                    obj.insert("CI".into(), serde_json::json!(ci));
                }
                if let Some(group) = n.attrs.group {
                    obj.insert("group".into(), serde_json::json!(group));
                }
                Value::Object(obj)
            })
            .collect();
        let links: Vec<Value> = self
            .graph
            .edge_indices()
            .map(|e| {
                let (u, v) = self.graph.edge_endpoints(e).expect("edge exists");
                let mut obj = serde_json::Map::new();
                obj.insert("source".into(), Value::String(self.graph[u].id.clone()));
                obj.insert("target".into(), Value::String(self.graph[v].id.clone()));
                if let Some(ids) = &self.graph[e].post_ids {
                    obj.insert("post_ids".into(), serde_json::json!(ids));
                }
                Value::Object(obj)
            })
            .collect();
        serde_json::json!({
            "directed": true,
            "multigraph": false,
            "graph": {
                "graph_type": self.graph_type,
                "first_post_id": self.first_post_id,
                "last_post_id": self.last_post_id,
            },
            "nodes": nodes,
            "links": links,
        })
    }

    /// Deserialize from node-link JSON produced by [`Self::to_node_link`].
    pub fn from_node_link(value: &Value) -> Result<InfluenceGraph, serde_json::Error> {
        let graph_type = value
            .pointer("/graph/graph_type")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or(GraphType::Influence);
        let mut out = InfluenceGraph::new(graph_type);
        out.first_post_id = value
            .pointer("/graph/first_post_id")
            .and_then(Value::as_u64);
        out.last_post_id = value.pointer("/graph/last_post_id").and_then(Value::as_u64);

        if let Some(nodes) = value.get("nodes").and_then(Value::as_array) {
            for node in nodes {
                if let Some(id) = node.get("id").and_then(Value::as_str) {
                    let idx = out.ensure_node(id);
                    out.graph[idx].attrs = NodeAttrs {
                        ci: node.get("CI").and_then(Value::as_f64),
                        group: node.get("group").and_then(Value::as_u64).map(|g| g as u8),
                    };
                }
            }
        }
        if let Some(links) = value.get("links").and_then(Value::as_array) {
            for link in links {
                let (Some(src), Some(dst)) = (
                    link.get("source").and_then(Value::as_str),
                    link.get("target").and_then(Value::as_str),
                ) else {
                    continue;
                };
                let u = out.ensure_node(src);
                let v = out.ensure_node(dst);
                let e = match out.graph.find_edge(u, v) {
                    Some(e) => e,
                    None => out.graph.add_edge(u, v, EdgeAttrs::default()),
                };
                if let Some(ids) = link.get("post_ids").and_then(Value::as_array) {
                    out.graph[e]
                        .post_ids
                        .get_or_insert_with(BTreeSet::new)
                        .extend(ids.iter().filter_map(Value::as_u64));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_edge_merges_post_ids() {
        let mut g = InfluenceGraph::new(GraphType::Retweet);
        g.add_edge("7", "42", Some(1));
        g.add_edge("7", "42", Some(2));
        assert_eq!(g.edge_count(), 1);
        let json = g.to_node_link();
        assert_eq!(json["links"][0]["post_ids"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_merge_unions_edges() {
        let mut a = InfluenceGraph::new(GraphType::Influence);
        a.add_edge("1", "2", Some(10));
        let mut b = InfluenceGraph::new(GraphType::Influence);
        b.add_edge("1", "2", Some(11));
        b.add_edge("3", "2", None);
        a.merge(&b);
        assert_eq!(a.edge_count(), 2);
        assert_eq!(
            a.edge_pairs(),
            vec![
                ("1".to_string(), "2".to_string()),
                ("3".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_degree_counts_distinct_neighbors() {
        let mut g = InfluenceGraph::new(GraphType::Influence);
        g.add_edge("a", "b", None);
        g.add_edge("b", "a", None);
        g.add_edge("a", "c", None);
        assert_eq!(g.degree("a"), 2);
        assert_eq!(g.degree("b"), 1);
        assert_eq!(g.degree("missing"), 0);
    }

    #[test]
    fn test_relabel_and_subgraph() {
        let mut g = InfluenceGraph::new(GraphType::Influence);
        g.add_edge("1", "2", None);
        g.add_edge("2", "3", None);
        let mapping = HashMap::from([
            ("1".to_string(), "alice".to_string()),
            ("2".to_string(), "bob".to_string()),
        ]);
        let renamed = g.relabel(&mapping);
        assert!(renamed.has_edge("alice", "bob"));
        assert!(renamed.has_edge("bob", "3"));

        let keep: HashSet<String> = ["alice".to_string(), "bob".to_string()].into();
        let sub = renamed.induced_subgraph(&keep);
        assert_eq!(sub.node_count(), 2);
        assert!(sub.has_edge("alice", "bob"));
        assert!(!sub.contains_node("3"));
    }

    #[test]
    fn test_node_link_round_trip() {
        let mut g = InfluenceGraph::new(GraphType::Mention);
        g.add_edge("1", "2", Some(5));
        g.set_node_attrs(
            "1",
            NodeAttrs {
                ci: Some(0.5),
                group: Some(2),
            },
        );
        g.first_post_id = Some(1);
        g.last_post_id = Some(5);

        let restored = InfluenceGraph::from_node_link(&g.to_node_link()).unwrap();
        assert_eq!(restored.graph_type, GraphType::Mention);
        assert_eq!(restored.edge_pairs(), g.edge_pairs());
        assert_eq!(restored.first_post_id, Some(1));
        assert_eq!(restored.node_attrs("1").unwrap().ci, Some(0.5));
    }
}
