//! Dependency graph builder.
//!
//! Turns raw adjacency into a directed `petgraph` graph over entity keys and
//! flattens it back into [`EdgeRecord`]s for the edge tier.
//!
//! ## Resolution
//!
//! A raw reference `target (tag)` is split into target and relation, then the
//! target is resolved against the entity set, in order:
//!
//! 1. the exact key
//! 2. the key qualified by the caller or one of its containers
//!    (`walk` called from `build_tree` resolves to `build_tree.walk`)
//! 3. the only entity whose last key segment equals the target's last segment
//!
//! Steps 2 and 3 never produce a self edge: `parse` called inside
//! `Parser.parse` is not `Parser.parse`. Only a reference spelling the
//! caller's own key resolves to the caller. References that do not resolve
//! are dropped and counted in [`GraphBuildSummary::dropped`].

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef as _};
use petgraph::Direction;
use serde::Serialize;
use tik_db::{EdgeDirection, EdgeRecord, EdgeRef, EntityKind, Provenance, Relation};

use crate::entity::Entity;

/// Confidence of an edge resolved from static analysis.
pub const AUTO_EDGE_WEIGHT: f64 = 0.95;

/// Confidence of an edge proposed by the generation capability.
pub const POLISHED_EDGE_WEIGHT: f64 = 0.9;

/// Convergence threshold for PageRank.
const CONVERGENCE: f64 = 1e-6;
/// Maximum PageRank iterations.
const MAX_ITERATIONS: usize = 100;

/// Split a raw reference into its target and relation.
///
/// `"Parser.parse (contains)"` gives `("Parser.parse", Contains)`; a reference
/// without suffix is a `calls` reference.
pub fn parse_raw_ref(raw: &str) -> (&str, Relation) {
    if let Some((target, tag)) = raw
        .strip_suffix(')')
        .and_then(|stripped| stripped.rsplit_once(" ("))
    {
        return (target.trim(), Relation::from_tag(tag));
    }
    (raw.trim(), Relation::Calls)
}

// ============================================================================
// KeyResolver
// ============================================================================

/// Resolves textual references to entity keys.
#[derive(Debug)]
pub struct KeyResolver<'a> {
    entities: &'a BTreeMap<String, Entity>,
    by_name: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> KeyResolver<'a> {
    pub fn new(entities: &'a BTreeMap<String, Entity>) -> Self {
        let mut by_name: HashMap<&str, Vec<&str>> = HashMap::new();
        for (key, entity) in entities {
            by_name.entry(entity.name()).or_default().push(key.as_str());
        }
        Self { entities, by_name }
    }

    /// Resolve `target` as referenced from `caller`.
    pub fn resolve(&self, caller: &str, target: &str) -> Option<&'a str> {
        if target.is_empty() {
            return None;
        }
        if let Some((key, _)) = self.entities.get_key_value(target) {
            return Some(key.as_str());
        }

        let mut scope = Some(caller);
        while let Some(prefix) = scope {
            let candidate = format!("{prefix}.{target}");
            if let Some((key, _)) = self.entities.get_key_value(candidate.as_str()) {
                // A method body does not see its class's names unqualified.
                if key != caller {
                    return Some(key.as_str());
                }
            }
            scope = prefix.rsplit_once('.').map(|(parent, _)| parent);
        }

        let name = target.rsplit('.').next().unwrap_or(target);
        match self.by_name.get(name).map(Vec::as_slice) {
            Some([only]) if *only != caller => Some(*only),
            _ => None,
        }
    }
}

// ============================================================================
// DependencyGraph
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub key: String,
    pub kind: EntityKind,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub relation: Relation,
    pub weight: f64,
    pub reason: Option<String>,
}

/// Counts from one graph build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphBuildSummary {
    pub resolved: usize,
    pub dropped: usize,
}

/// Counts for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSummary {
    pub nodes: usize,
    pub edges: usize,
    pub edges_by_relation: BTreeMap<String, usize>,
    /// Nodes without any edge.
    pub isolated: usize,
}

/// Directed graph over entity keys.
///
/// Never mutated once published; centrality and descendant queries are
/// read-only.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Graph with one node per entity and no edges.
    pub fn with_nodes(entities: &BTreeMap<String, Entity>) -> Self {
        let mut graph = DiGraph::with_capacity(entities.len(), 0);
        let mut index = HashMap::with_capacity(entities.len());
        for (key, entity) in entities {
            let node = graph.add_node(GraphNode {
                key: key.clone(),
                kind: entity.kind,
                weight: entity.weight,
            });
            index.insert(key.clone(), node);
        }
        Self { graph, index }
    }

    /// Build the graph from raw adjacency.
    pub fn build(
        entities: &BTreeMap<String, Entity>,
        raw: &BTreeMap<String, Vec<String>>,
    ) -> (Self, GraphBuildSummary) {
        let mut graph = Self::with_nodes(entities);
        let resolver = KeyResolver::new(entities);
        let mut summary = GraphBuildSummary::default();

        for (caller, refs) in raw {
            if !graph.contains(caller) {
                summary.dropped += refs.len();
                continue;
            }
            for raw_ref in refs {
                let (target, relation) = parse_raw_ref(raw_ref);
                match resolver.resolve(caller, target) {
                    Some(to) => {
                        graph.add_edge(caller, to, relation, AUTO_EDGE_WEIGHT, None);
                        summary.resolved += 1;
                    }
                    None => {
                        tracing::trace!(caller = %caller, target = %target, "Dropped unresolved reference");
                        summary.dropped += 1;
                    }
                }
            }
        }

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            resolved = summary.resolved,
            dropped = summary.dropped,
            "Built dependency graph"
        );
        (graph, summary)
    }

    /// Rebuild a graph from edge-tier records.
    ///
    /// Only outgoing entries make edges; an incoming entry mirrors an edge
    /// its source record already owns. Entries targeting keys outside
    /// `entities` are ignored.
    pub fn from_edge_records(
        entities: &BTreeMap<String, Entity>,
        records: &BTreeMap<String, EdgeRecord>,
    ) -> Self {
        let mut graph = Self::with_nodes(entities);
        for (key, record) in records {
            let weight = edge_weight(record.provenance);
            for edge in record.outgoing() {
                graph.add_edge(key, &edge.to, edge.relation, weight, edge.reason.clone());
            }
        }
        graph
    }

    /// Add or replace the edge `from -> to`. Unknown endpoints are ignored.
    fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        relation: Relation,
        weight: f64,
        reason: Option<String>,
    ) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        self.graph.update_edge(
            a,
            b,
            GraphEdge {
                relation,
                weight,
                reason,
            },
        );
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.graph.find_edge(a, b).is_some(),
            _ => false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn key_of(&self, node: NodeIndex) -> &str {
        &self.graph[node].key
    }

    /// All `(from, to, relation)` triples, sorted.
    pub fn edges(&self) -> Vec<(String, String, Relation)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    self.key_of(e.source()).to_string(),
                    self.key_of(e.target()).to_string(),
                    e.weight().relation,
                )
            })
            .collect();
        edges.sort();
        edges
    }

    /// Outgoing `(target, relation)` pairs of `key`, sorted by target.
    pub fn outgoing(&self, key: &str) -> Vec<(String, Relation)> {
        let Some(&node) = self.index.get(key) else {
            return Vec::new();
        };
        let mut out: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (self.key_of(e.target()).to_string(), e.weight().relation))
            .collect();
        out.sort();
        out
    }

    /// Flatten the graph into one edge record per entity.
    ///
    /// Each record lists the undirected neighbor set sorted by key. A
    /// successor contributes its outgoing edge's relation; a neighbor that is
    /// only a predecessor contributes the incoming edge's relation.
    pub fn edge_records(&self, entities: &BTreeMap<String, Entity>) -> BTreeMap<String, EdgeRecord> {
        let mut records = BTreeMap::new();
        for (key, entity) in entities {
            let Some(&node) = self.index.get(key) else {
                continue;
            };
            let mut neighbors: BTreeMap<&str, EdgeRef> = BTreeMap::new();
            for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                let to = self.key_of(edge.target());
                neighbors.insert(to, outgoing_ref(to, edge.weight()));
            }
            for edge in self.graph.edges_directed(node, Direction::Incoming) {
                let from = self.key_of(edge.source());
                neighbors.entry(from).or_insert_with(|| {
                    let mut edge_ref = outgoing_ref(from, edge.weight());
                    edge_ref.direction = EdgeDirection::Incoming;
                    edge_ref
                });
            }
            records.insert(
                key.clone(),
                EdgeRecord {
                    edges: neighbors.into_values().collect(),
                    kind: entity.kind,
                    container_path: entity.container_path.clone(),
                    provenance: Provenance::Ast,
                },
            );
        }
        records
    }

    /// Keys reachable from `key` in breadth-first order, excluding `key`
    /// itself, at most `limit` of them.
    pub fn descendants(&self, key: &str, limit: usize) -> Vec<String> {
        let Some(&start) = self.index.get(key) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut out = Vec::new();
        while out.len() < limit {
            let Some(node) = bfs.next(&self.graph) else {
                break;
            };
            if node != start {
                out.push(self.key_of(node).to_string());
            }
        }
        out
    }

    /// Weighted PageRank over the whole graph.
    ///
    /// Rank of dangling nodes is spread uniformly. Scores sum to 1.
    pub fn pagerank(&self, damping: f64) -> HashMap<String, f64> {
        let n = self.graph.node_count();
        if n == 0 {
            return HashMap::new();
        }

        let out_weight: Vec<f64> = self
            .graph
            .node_indices()
            .map(|node| {
                self.graph
                    .edges_directed(node, Direction::Outgoing)
                    .map(|e| e.weight().weight)
                    .sum()
            })
            .collect();

        let uniform = 1.0 / n as f64;
        let mut scores = vec![uniform; n];
        for _ in 0..MAX_ITERATIONS {
            let dangling: f64 = self
                .graph
                .node_indices()
                .filter(|node| out_weight[node.index()] <= f64::EPSILON)
                .map(|node| scores[node.index()])
                .sum();

            let mut new_scores = vec![(1.0 - damping) * uniform + damping * dangling * uniform; n];
            for edge in self.graph.edge_references() {
                let source = edge.source().index();
                let total = out_weight[source];
                if total > f64::EPSILON {
                    new_scores[edge.target().index()] +=
                        damping * scores[source] * edge.weight().weight / total;
                }
            }

            let max_diff = scores
                .iter()
                .zip(&new_scores)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f64, f64::max);
            scores = new_scores;
            if max_diff < CONVERGENCE {
                break;
            }
        }

        self.graph
            .node_indices()
            .map(|node| (self.key_of(node).to_string(), scores[node.index()]))
            .collect()
    }

    pub fn summary(&self) -> GraphSummary {
        let mut edges_by_relation = BTreeMap::new();
        for edge in self.graph.edge_references() {
            *edges_by_relation
                .entry(edge.weight().relation.to_string())
                .or_insert(0) += 1;
        }
        let connected: HashSet<NodeIndex> = self
            .graph
            .edge_references()
            .flat_map(|e| [e.source(), e.target()])
            .collect();
        GraphSummary {
            nodes: self.node_count(),
            edges: self.edge_count(),
            edges_by_relation,
            isolated: self.node_count() - connected.len(),
        }
    }
}

fn edge_weight(provenance: Provenance) -> f64 {
    match provenance {
        Provenance::GenerationService => POLISHED_EDGE_WEIGHT,
        _ => AUTO_EDGE_WEIGHT,
    }
}

fn outgoing_ref(to: &str, edge: &GraphEdge) -> EdgeRef {
    let edge_ref = EdgeRef::outgoing(to, edge.relation);
    match &edge.reason {
        Some(reason) => edge_ref.with_reason(reason.clone()),
        None => edge_ref,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ManualEntity;

    fn entities(keys: &[(&str, EntityKind)]) -> BTreeMap<String, Entity> {
        keys.iter()
            .map(|(key, kind)| {
                (
                    key.to_string(),
                    ManualEntity::new(*key, *kind, "pass").to_entity(),
                )
            })
            .collect()
    }

    fn raw(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, refs)| (k.to_string(), refs.iter().map(|r| r.to_string()).collect()))
            .collect()
    }

    fn sample() -> BTreeMap<String, Entity> {
        entities(&[
            ("Parser", EntityKind::Class),
            ("Parser.parse", EntityKind::Function),
            ("Parser.tokenize", EntityKind::Function),
            ("build_tree", EntityKind::Function),
            ("build_tree.walk", EntityKind::Function),
        ])
    }

    #[test]
    fn test_parse_raw_ref() {
        assert_eq!(parse_raw_ref("A.b (contains)"), ("A.b", Relation::Contains));
        assert_eq!(parse_raw_ref("f (assign)"), ("f", Relation::Assigns));
        assert_eq!(parse_raw_ref("lib.os (import)"), ("lib.os", Relation::Imports));
        assert_eq!(parse_raw_ref("f"), ("f", Relation::Calls));
        assert_eq!(parse_raw_ref("f (weird)"), ("f", Relation::Unknown));
    }

    #[test]
    fn test_resolver_order() {
        let entities = sample();
        let resolver = KeyResolver::new(&entities);
        assert_eq!(resolver.resolve("Parser.parse", "build_tree"), Some("build_tree"));
        assert_eq!(resolver.resolve("build_tree", "walk"), Some("build_tree.walk"));
        assert_eq!(resolver.resolve("Parser.parse", "tokenize"), Some("Parser.tokenize"));
        assert_eq!(resolver.resolve("build_tree", "lexer.tokenize"), Some("Parser.tokenize"));
        assert_eq!(resolver.resolve("build_tree", "missing"), None);
        // Fuzzy matching never points an entity at itself.
        assert_eq!(resolver.resolve("Parser.tokenize", "other.tokenize"), None);
    }

    #[test]
    fn test_build_resolves_and_drops() {
        let entities = sample();
        let adjacency = raw(&[
            ("Parser", &["Parser.parse (contains)", "Parser.tokenize (contains)"]),
            ("Parser.parse", &["Parser.tokenize", "build_tree (assign)", "json.dumps"]),
            ("build_tree", &["walk"]),
            ("ghost", &["Parser"]),
        ]);
        let (graph, summary) = DependencyGraph::build(&entities, &adjacency);

        assert_eq!(summary.resolved, 5);
        assert_eq!(summary.dropped, 2);
        assert_eq!(graph.edge_count(), 5);
        for (from, to, _) in graph.edges() {
            assert!(entities.contains_key(&from) && entities.contains_key(&to));
            assert_ne!(from, to);
        }
        assert_eq!(
            graph.outgoing("Parser.parse"),
            vec![
                ("Parser.tokenize".to_string(), Relation::Calls),
                ("build_tree".to_string(), Relation::Assigns)
            ]
        );
    }

    #[test]
    fn test_bare_method_name_is_not_the_caller() {
        let entities = sample();
        let resolver = KeyResolver::new(&entities);
        assert_eq!(resolver.resolve("Parser.parse", "parse"), None);
        assert_eq!(resolver.resolve("Parser.parse", "Parser.parse"), Some("Parser.parse"));

        let (graph, summary) =
            DependencyGraph::build(&entities, &raw(&[("Parser.parse", &["parse", "tokenize"])]));
        assert_eq!(summary.dropped, 1);
        assert!(!graph.has_edge("Parser.parse", "Parser.parse"));
        assert!(graph.has_edge("Parser.parse", "Parser.tokenize"));
    }

    #[test]
    fn test_explicit_self_reference_kept() {
        let entities = entities(&[("fact", EntityKind::Function)]);
        let (graph, _) = DependencyGraph::build(&entities, &raw(&[("fact", &["fact"])]));
        assert!(graph.has_edge("fact", "fact"));
    }

    #[test]
    fn test_edge_records_neighbors_and_direction() {
        let entities = sample();
        let adjacency = raw(&[
            ("Parser", &["Parser.parse (contains)"]),
            ("Parser.parse", &["Parser.tokenize"]),
            ("Parser.tokenize", &["Parser.parse (assign)"]),
        ]);
        let (graph, _) = DependencyGraph::build(&entities, &adjacency);
        let records = graph.edge_records(&entities);

        assert_eq!(records.len(), entities.len());
        let parse = &records["Parser.parse"];
        assert_eq!(
            parse.edges,
            vec![
                EdgeRef::incoming("Parser", Relation::Contains),
                EdgeRef::outgoing("Parser.tokenize", Relation::Calls),
            ]
        );
        // Successor wins over predecessor for mutual neighbors.
        assert_eq!(
            records["Parser.tokenize"].edges,
            vec![EdgeRef::outgoing("Parser.parse", Relation::Assigns)]
        );
        assert!(records["build_tree"].edges.is_empty());
        for (key, record) in &records {
            record
                .ensure_targets(key, |k| entities.contains_key(k))
                .unwrap();
        }
    }

    #[test]
    fn test_edge_records_idempotent() {
        let entities = sample();
        let adjacency = raw(&[("Parser.parse", &["Parser.tokenize", "build_tree"])]);
        let first = DependencyGraph::build(&entities, &adjacency).0.edge_records(&entities);
        let second = DependencyGraph::build(&entities, &adjacency).0.edge_records(&entities);
        assert_eq!(
            serde_json::to_string_pretty(&first).unwrap(),
            serde_json::to_string_pretty(&second).unwrap()
        );
    }

    #[test]
    fn test_from_edge_records_round_trip() {
        let entities = sample();
        let adjacency = raw(&[
            ("Parser", &["Parser.parse (contains)"]),
            ("Parser.parse", &["Parser.tokenize", "build_tree (assign)"]),
        ]);
        let (graph, _) = DependencyGraph::build(&entities, &adjacency);
        let rebuilt = DependencyGraph::from_edge_records(&entities, &graph.edge_records(&entities));
        assert_eq!(rebuilt.edges(), graph.edges());
    }

    #[test]
    fn test_from_edge_records_ignores_unknown_targets() {
        let entities = entities(&[("a", EntityKind::Function)]);
        let mut records = BTreeMap::new();
        records.insert(
            "a".to_string(),
            EdgeRecord {
                edges: vec![EdgeRef::outgoing("gone", Relation::Calls)],
                kind: EntityKind::Function,
                container_path: "a.py".to_string(),
                provenance: Provenance::Ast,
            },
        );
        let graph = DependencyGraph::from_edge_records(&entities, &records);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_from_edge_records_reads_outgoing_only() {
        let entities = entities(&[("a", EntityKind::Function), ("b", EntityKind::Function)]);
        let mut records = BTreeMap::new();
        records.insert(
            "a".to_string(),
            EdgeRecord {
                edges: Vec::new(),
                kind: EntityKind::Function,
                container_path: "a.py".to_string(),
                provenance: Provenance::GenerationService,
            },
        );
        records.insert(
            "b".to_string(),
            EdgeRecord {
                edges: vec![EdgeRef::incoming("a", Relation::Calls)],
                kind: EntityKind::Function,
                container_path: "b.py".to_string(),
                provenance: Provenance::Ast,
            },
        );
        let graph = DependencyGraph::from_edge_records(&entities, &records);
        assert!(!graph.has_edge("a", "b"));
    }

    #[test]
    fn test_descendants_bfs_limited() {
        let entities = entities(&[
            ("a", EntityKind::Function),
            ("b", EntityKind::Function),
            ("c", EntityKind::Function),
            ("d", EntityKind::Function),
        ]);
        let adjacency = raw(&[("a", &["b"]), ("b", &["c", "a"]), ("c", &["d"])]);
        let (graph, _) = DependencyGraph::build(&entities, &adjacency);

        assert_eq!(graph.descendants("a", 5), vec!["b", "c", "d"]);
        assert_eq!(graph.descendants("a", 1), vec!["b"]);
        assert!(graph.descendants("d", 5).is_empty());
        assert!(graph.descendants("zzz", 5).is_empty());
    }

    #[test]
    fn test_pagerank_sums_to_one_and_favours_sinks() {
        let entities = entities(&[
            ("a", EntityKind::Function),
            ("b", EntityKind::Function),
            ("hub", EntityKind::Function),
        ]);
        let adjacency = raw(&[("a", &["hub"]), ("b", &["hub"])]);
        let (graph, _) = DependencyGraph::build(&entities, &adjacency);
        let ranks = graph.pagerank(0.85);

        let total: f64 = ranks.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(ranks["hub"] > ranks["a"]);
        assert!((ranks["a"] - ranks["b"]).abs() < 1e-12);
    }

    #[test]
    fn test_pagerank_empty() {
        assert!(DependencyGraph::default().pagerank(0.85).is_empty());
    }

    #[test]
    fn test_summary() {
        let entities = sample();
        let adjacency = raw(&[
            ("Parser", &["Parser.parse (contains)"]),
            ("Parser.parse", &["Parser.tokenize"]),
        ]);
        let summary = DependencyGraph::build(&entities, &adjacency).0.summary();
        assert_eq!(summary.nodes, 5);
        assert_eq!(summary.edges, 2);
        assert_eq!(summary.edges_by_relation["contains"], 1);
        assert_eq!(summary.edges_by_relation["calls"], 1);
        assert_eq!(summary.isolated, 2);
    }
}
