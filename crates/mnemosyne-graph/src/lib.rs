//! Knowledge graph: a directed multigraph linking archived sessions to the
//! applications they used and the concepts they mentioned.
//!
//! Nodes are stored by index with a string-id lookup map on the side; the
//! graph lives in process memory and is serialized to a node-link JSON file
//! next to the database.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use regex::Regex;
use serde::{Deserialize, Serialize};

use mnemosyne_types::Session;

pub const RELATION_USES: &str = "USES";
pub const RELATION_MENTIONS: &str = "MENTIONS";

static WIKILINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("static wikilink pattern"));

/// Result type for mnemosyne-graph operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Session,
    Application,
    Concept,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkData {
    source: String,
    target: String,
    relation: String,
}

/// Node-link serialization shape, compatible with common graph tooling.
#[derive(Serialize, Deserialize)]
struct SerializedGraph {
    directed: bool,
    multigraph: bool,
    nodes: Vec<NodeData>,
    links: Vec<LinkData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedNode {
    pub id: String,
    pub kind: NodeKind,
    pub from: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
}

#[derive(Default)]
pub struct KnowledgeGraph {
    graph: DiGraph<NodeData, String>,
    index: HashMap<String, NodeIndex>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a previously saved graph; a missing file yields an empty graph.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "graph file not found, starting empty");
            return Ok(Self::new());
        }

        let raw = std::fs::read_to_string(path)?;
        let serialized: SerializedGraph = serde_json::from_str(&raw)?;

        let mut graph = Self::new();
        for NodeData { id, kind, summary } in serialized.nodes {
            graph.ensure_node(&id, kind, summary);
        }
        for link in serialized.links {
            if let (Some(&source), Some(&target)) =
                (graph.index.get(&link.source), graph.index.get(&link.target))
            {
                graph.graph.add_edge(source, target, link.relation);
            }
        }

        tracing::info!(nodes = graph.graph.node_count(), "knowledge graph loaded");
        Ok(graph)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = SerializedGraph {
            directed: true,
            multigraph: true,
            nodes: self.graph.node_weights().cloned().collect(),
            links: self
                .graph
                .edge_indices()
                .filter_map(|edge| {
                    let (source, target) = self.graph.edge_endpoints(edge)?;
                    Some(LinkData {
                        source: self.graph[source].id.clone(),
                        target: self.graph[target].id.clone(),
                        relation: self.graph[edge].clone(),
                    })
                })
                .collect(),
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&serialized)?)?;
        tracing::info!(nodes = serialized.nodes.len(), path = %path.display(), "knowledge graph saved");
        Ok(())
    }

    /// First-pass writes for an archived session: the session node, its
    /// application with a `USES` edge, and a `MENTIONS` edge per concept
    /// found in the summary's wikilinks and the tag list.
    pub fn record_session(&mut self, session: &Session) {
        let summary = session.activity_summary.as_deref().unwrap_or("");
        let session_id = format!("session:{}", short_uuid(session));
        let session_node = self.ensure_node(
            &session_id,
            NodeKind::Session,
            Some(truncate(summary, 100)),
        );

        let app_id = format!("app:{}", session.primary_process);
        let app_node = self.ensure_node(&app_id, NodeKind::Application, None);
        self.add_edge_unique(session_node, app_node, RELATION_USES);

        let mut concepts: Vec<String> = WIKILINK
            .captures_iter(summary)
            .map(|cap| cap[1].to_string())
            .collect();
        concepts.extend(session.tags.iter().cloned());

        for concept in concepts {
            let concept_id = format!("concept:{}", concept.to_lowercase());
            let concept_node = self.ensure_node(&concept_id, NodeKind::Concept, None);
            self.add_edge_unique(session_node, concept_node, RELATION_MENTIONS);
        }

        tracing::debug!(
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "graph updated"
        );
    }

    /// Labelled concept-to-concept edge from secondary analysis.
    pub fn add_relationship(&mut self, concept_a: &str, relation: &str, concept_b: &str) {
        let a = self.ensure_node(
            &format!("concept:{}", concept_a.to_lowercase()),
            NodeKind::Concept,
            None,
        );
        let b = self.ensure_node(
            &format!("concept:{}", concept_b.to_lowercase()),
            NodeKind::Concept,
            None,
        );
        self.add_edge_unique(a, b, relation);
    }

    /// Entities reachable within `depth` hops from any node whose id
    /// contains the query (case-insensitive).
    pub fn find_related(&self, entity: &str, depth: usize) -> Vec<RelatedNode> {
        let needle = entity.to_lowercase();
        let starts: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph[idx].id.to_lowercase().contains(&needle))
            .collect();

        let mut results = Vec::new();
        for start in starts {
            let mut frontier = vec![start];
            let mut seen: HashMap<NodeIndex, usize> = HashMap::from([(start, 0)]);

            for hop in 1..=depth {
                let mut next = Vec::new();
                for &node in &frontier {
                    for neighbor in self.graph.neighbors_directed(node, Direction::Outgoing) {
                        if seen.contains_key(&neighbor) {
                            continue;
                        }
                        seen.insert(neighbor, hop);
                        next.push(neighbor);
                        results.push(RelatedNode {
                            id: self.graph[neighbor].id.clone(),
                            kind: self.graph[neighbor].kind,
                            from: self.graph[start].id.clone(),
                        });
                    }
                }
                frontier = next;
            }
        }

        results
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
        }
    }

    fn ensure_node(&mut self, id: &str, kind: NodeKind, summary: Option<String>) -> NodeIndex {
        if let Some(&existing) = self.index.get(id) {
            if let Some(summary) = summary {
                self.graph[existing].summary = Some(summary);
            }
            return existing;
        }

        let node = self.graph.add_node(NodeData {
            id: id.to_string(),
            kind,
            summary,
        });
        self.index.insert(id.to_string(), node);
        node
    }

    fn add_edge_unique(&mut self, source: NodeIndex, target: NodeIndex, relation: &str) {
        let exists = self
            .graph
            .edges_connecting(source, target)
            .any(|edge| edge.weight().as_str() == relation);
        if !exists {
            self.graph.add_edge(source, target, relation.to_string());
        }
    }
}

fn short_uuid(session: &Session) -> String {
    session
        .session_uuid
        .to_string()
        .chars()
        .take(8)
        .collect()
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemosyne_types::CloseReason;
    use petgraph::visit::EdgeRef as _;
    use uuid::Uuid;

    fn session(summary: &str, tags: &[&str]) -> Session {
        Session {
            session_uuid: Uuid::new_v4(),
            start_time: 100,
            end_time: 400,
            primary_process: "code.exe".into(),
            primary_window: "main.rs".into(),
            window_transitions: vec![],
            events: vec![],
            avg_input_intensity: 50.0,
            close_reason: CloseReason::WindowChange,
            activity_summary: Some(summary.into()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn record_session_creates_uses_and_mentions() {
        let mut graph = KnowledgeGraph::new();
        graph.record_session(&session("Refactoring [[Parser]] internals", &["coding"]));

        let stats = graph.stats();
        // session + app + two concepts
        assert_eq!(stats.nodes, 4);
        // USES + two MENTIONS
        assert_eq!(stats.edges, 3);
    }

    #[test]
    fn duplicate_concepts_do_not_duplicate_edges() {
        let mut graph = KnowledgeGraph::new();
        graph.record_session(&session("About [[rust]]", &["rust"]));

        // "[[rust]]" and the "rust" tag collapse onto one concept node.
        assert_eq!(graph.stats().nodes, 3);
        assert_eq!(graph.stats().edges, 2);
    }

    #[test]
    fn add_relationship_links_lowercased_concepts() {
        let mut graph = KnowledgeGraph::new();
        graph.add_relationship("Redis", "FEEDS", "Pipeline");

        assert_eq!(graph.stats().nodes, 2);
        assert_eq!(graph.stats().edges, 1);
        assert!(graph.index.contains_key("concept:redis"));
        assert!(graph.index.contains_key("concept:pipeline"));
    }

    #[test]
    fn find_related_walks_outgoing_edges_to_depth() {
        let mut graph = KnowledgeGraph::new();
        graph.add_relationship("a", "R1", "b");
        graph.add_relationship("b", "R2", "c");
        graph.add_relationship("c", "R3", "d");

        let related = graph.find_related("concept:a", 2);
        let ids: Vec<_> = related.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"concept:b"));
        assert!(ids.contains(&"concept:c"));
        assert!(!ids.contains(&"concept:d"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge_graph.json");

        let mut graph = KnowledgeGraph::new();
        graph.record_session(&session("Working on [[mnemosyne]]", &[]));
        graph.add_relationship("mnemosyne", "STORES", "sessions");
        graph.save(&path).unwrap();

        let loaded = KnowledgeGraph::load(&path).unwrap();
        assert_eq!(loaded.stats().nodes, graph.stats().nodes);
        assert_eq!(loaded.stats().edges, graph.stats().edges);

        let relations: Vec<String> = loaded
            .graph
            .edge_references()
            .map(|e| e.weight().clone())
            .collect();
        assert!(relations.contains(&"USES".to_string()));
        assert!(relations.contains(&"STORES".to_string()));
    }

    #[test]
    fn load_missing_file_is_empty_graph() {
        let graph = KnowledgeGraph::load(Path::new("/nonexistent/graph.json")).unwrap();
        assert_eq!(graph.stats().nodes, 0);
    }
}
