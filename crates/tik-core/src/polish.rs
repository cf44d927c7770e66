//! Edge polishing and edge-tier reconciliation.
//!
//! Static edges are a best-effort signal. When polishing is enabled the
//! generation capability is shown an entity's snippet excerpt and its raw
//! references and asked for the real outgoing edges as a strict JSON array:
//!
//! ```json
//! [{"to": "Parser.tokenize", "type": "calls", "reason": "splits input first"}]
//! ```
//!
//! Entries that do not resolve to a known key or carry an unknown type are
//! dropped. An empty answer, or a failure after all retries, keeps the static
//! record.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tik_db::{EdgeRecord, EdgeRef, Provenance, Relation, SnippetRecord};
use tik_model::{
    parse_json_array, GenerationCapability, GenerationConfig, GenerationRequest, ModelResult,
    RetryPolicy,
};

use crate::config::EdgeConfig;
use crate::context::excerpt;
use crate::entity::Entity;
use crate::graph::KeyResolver;

const POLISH_INSTRUCTION: &str = "You refine the dependency edges of one code entity. \
Reply with a JSON array only, no prose. Each element is an object \
{\"to\": <entity key>, \"type\": <calls|contains|assigns|imports>, \"reason\": <short justification>}. \
Only list edges supported by the snippet.";

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    /// Cached generation-service records kept as-is.
    pub kept: usize,
    /// Records newly polished in this pass.
    pub polished: usize,
    /// Records taken from static analysis.
    pub ast: usize,
}

/// Asks the generation capability to refine one entity's edges.
#[derive(Debug)]
pub struct EdgePolisher<'a> {
    capability: &'a dyn GenerationCapability,
    model: String,
    policy: RetryPolicy,
    snippet_chars: usize,
}

impl<'a> EdgePolisher<'a> {
    pub fn new(
        capability: &'a dyn GenerationCapability,
        generation: &GenerationConfig,
        edges: &EdgeConfig,
    ) -> Self {
        Self {
            capability,
            model: generation.model.clone(),
            policy: generation.retry_policy(),
            snippet_chars: edges.prompt_snippet_chars,
        }
    }

    /// Polished record for `entity`, or `None` to keep `ast_record`.
    ///
    /// The record holds outgoing edges only; [`reconcile_edges`] adds the
    /// incoming side once every record is decided.
    pub fn polish(
        &self,
        entity: &Entity,
        snippet: &str,
        raw_refs: &[String],
        resolver: &KeyResolver<'_>,
        ast_record: &EdgeRecord,
    ) -> Option<EdgeRecord> {
        let request = GenerationRequest::new(
            self.model.clone(),
            POLISH_INSTRUCTION,
            self.prompt(entity, snippet, raw_refs),
        );
        let label = format!("edge polish {}", entity.key);
        let outgoing = match self.policy.run(&label, |_| {
            let content = self.capability.generate(&request)?.into_content()?;
            parse_polished(&content, &entity.key, resolver)
        }) {
            Ok(edges) => edges,
            Err(e) => {
                tracing::debug!(key = %entity.key, "Keeping static edges: {e}");
                return None;
            }
        };
        if outgoing.is_empty() {
            tracing::debug!(key = %entity.key, "Polishing returned no usable edges");
            return None;
        }

        let mut edges = outgoing;
        edges.sort_by(|a, b| (&a.to, a.relation).cmp(&(&b.to, b.relation)));

        Some(EdgeRecord {
            edges,
            kind: ast_record.kind,
            container_path: ast_record.container_path.clone(),
            provenance: Provenance::GenerationService,
        })
    }

    fn prompt(&self, entity: &Entity, snippet: &str, raw_refs: &[String]) -> String {
        let mut prompt = format!(
            "ID: {}\nType: {}\nSnippet:\n{}\n",
            entity.key,
            entity.kind,
            excerpt(snippet, self.snippet_chars)
        );
        if raw_refs.is_empty() {
            prompt.push_str("Candidate references: none\n");
        } else {
            prompt.push_str("Candidate references:\n");
            for reference in raw_refs {
                prompt.push_str("- ");
                prompt.push_str(reference);
                prompt.push('\n');
            }
        }
        prompt
    }
}

/// Parse a polishing reply into resolved outgoing edges.
///
/// Malformed content is an error (retried); individual unusable entries are
/// skipped.
fn parse_polished(
    content: &str,
    caller: &str,
    resolver: &KeyResolver<'_>,
) -> ModelResult<Vec<EdgeRef>> {
    let items = parse_json_array(content)?;
    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    for item in items {
        let Value::Object(map) = item else {
            continue;
        };
        let Some(to) = map.get("to").and_then(Value::as_str) else {
            continue;
        };
        let Some(tag) = map.get("type").and_then(Value::as_str).filter(|t| !t.trim().is_empty())
        else {
            continue;
        };
        let relation = Relation::from_tag(tag);
        if relation == Relation::Unknown {
            continue;
        }
        let Some(target) = resolver.resolve(caller, to.trim()) else {
            continue;
        };
        if target == caller {
            continue;
        }
        if !seen.insert((target.to_string(), relation)) {
            continue;
        }
        let edge = EdgeRef::outgoing(target, relation);
        edges.push(match map.get("reason").and_then(Value::as_str) {
            Some(reason) if !reason.trim().is_empty() => edge.with_reason(reason.trim()),
            _ => edge,
        });
    }
    Ok(edges)
}

/// Decide the authoritative edge record of every entity.
///
/// A cached `GenerationService` record whose targets all still exist is kept.
/// Otherwise the entity is polished when a polisher is given, falling back to
/// the static record.
///
/// Only the outgoing entries of the decided records count. Incoming entries
/// are rebuilt from them, so an edge dropped by polishing is gone from both
/// endpoints.
pub fn reconcile_edges(
    entities: &BTreeMap<String, Entity>,
    ast_records: BTreeMap<String, EdgeRecord>,
    cached: &BTreeMap<String, EdgeRecord>,
    polisher: Option<&EdgePolisher<'_>>,
    snippets: &BTreeMap<String, SnippetRecord>,
    raw: &BTreeMap<String, Vec<String>>,
) -> (BTreeMap<String, EdgeRecord>, ReconcileSummary) {
    let resolver = KeyResolver::new(entities);
    let mut summary = ReconcileSummary::default();
    let mut records = BTreeMap::new();

    for (key, ast_record) in ast_records {
        if let Some(previous) = cached
            .get(&key)
            .filter(|r| r.provenance == Provenance::GenerationService)
            .map(outgoing_only)
        {
            match previous.ensure_targets(&key, |k| entities.contains_key(k)) {
                Ok(()) => {
                    records.insert(key, previous);
                    summary.kept += 1;
                    continue;
                }
                Err(e) => tracing::debug!("Discarding cached polished record: {e}"),
            }
        }

        let polished = match (polisher, entities.get(&key)) {
            (Some(polisher), Some(entity)) => polisher.polish(
                entity,
                snippets.get(&key).map(|s| s.snippet.as_str()).unwrap_or(""),
                raw.get(&key).map(Vec::as_slice).unwrap_or(&[]),
                &resolver,
                &ast_record,
            ),
            _ => None,
        };
        match polished {
            Some(record) => {
                records.insert(key, record);
                summary.polished += 1;
            }
            None => {
                records.insert(key, outgoing_only(&ast_record));
                summary.ast += 1;
            }
        }
    }
    link_incoming(&mut records);

    tracing::debug!(
        kept = summary.kept,
        polished = summary.polished,
        ast = summary.ast,
        "Reconciled edge tier"
    );
    (records, summary)
}

fn outgoing_only(record: &EdgeRecord) -> EdgeRecord {
    EdgeRecord {
        edges: record.outgoing().cloned().collect(),
        kind: record.kind,
        container_path: record.container_path.clone(),
        provenance: record.provenance,
    }
}

/// Mirror every outgoing edge `a -> b` as an incoming entry on `b`.
///
/// A neighbor already listed as a successor keeps its outgoing entry, so each
/// record names a neighbor at most once per direction.
fn link_incoming(records: &mut BTreeMap<String, EdgeRecord>) {
    let mut incoming: BTreeMap<String, Vec<EdgeRef>> = BTreeMap::new();
    for (key, record) in records.iter() {
        for edge in record.outgoing() {
            let mut back = EdgeRef::incoming(key.as_str(), edge.relation);
            back.reason = edge.reason.clone();
            incoming.entry(edge.to.clone()).or_default().push(back);
        }
    }
    for (key, entries) in incoming {
        let Some(record) = records.get_mut(&key) else {
            continue;
        };
        let mut neighbors: HashSet<String> = record.edges.iter().map(|e| e.to.clone()).collect();
        for entry in entries {
            if neighbors.insert(entry.to.clone()) {
                record.edges.push(entry);
            }
        }
        record
            .edges
            .sort_by(|a, b| (&a.to, a.relation).cmp(&(&b.to, b.relation)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ManualEntity;
    use crate::graph::DependencyGraph;
    use std::sync::Mutex;
    use tik_db::EntityKind;
    use tik_model::{GenerationResponse, ModelError};

    #[derive(Debug)]
    struct Scripted {
        replies: Mutex<Vec<ModelResult<GenerationResponse>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: Vec<ModelResult<GenerationResponse>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl GenerationCapability for Scripted {
        fn generate(&self, _request: &GenerationRequest) -> ModelResult<GenerationResponse> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ModelError::GenerationUnavailable {
                    endpoint: "scripted".to_string(),
                    message: "no reply left".to_string(),
                });
            }
            replies.remove(0)
        }
    }

    fn config() -> (GenerationConfig, EdgeConfig) {
        let generation = GenerationConfig {
            backoff_ms: 0,
            ..GenerationConfig::default()
        };
        (generation, EdgeConfig::default())
    }

    fn entities() -> BTreeMap<String, Entity> {
        named(&["run", "load", "save"])
    }

    fn named(keys: &[&str]) -> BTreeMap<String, Entity> {
        keys.iter()
            .copied()
            .map(|k| {
                (
                    k.to_string(),
                    ManualEntity::new(k, EntityKind::Function, "pass").to_entity(),
                )
            })
            .collect()
    }

    fn ast_record(edges: Vec<EdgeRef>) -> EdgeRecord {
        EdgeRecord {
            edges,
            kind: EntityKind::Function,
            container_path: "app.py".to_string(),
            provenance: Provenance::Ast,
        }
    }

    #[test]
    fn test_parse_polished_filters_entries() {
        let entities = entities();
        let resolver = KeyResolver::new(&entities);
        let content = r#"[
            {"to": "load", "type": "calls", "reason": "reads first"},
            {"to": "load", "type": "call"},
            {"to": "ghost", "type": "calls"},
            {"to": "save", "type": "teleports"},
            {"to": "save"},
            "noise",
            {"to": "save", "type": "assigns"}
        ]"#;
        let edges = parse_polished(content, "run", &resolver).unwrap();
        assert_eq!(
            edges,
            vec![
                EdgeRef::outgoing("load", Relation::Calls).with_reason("reads first"),
                EdgeRef::outgoing("save", Relation::Assigns),
            ]
        );
    }

    #[test]
    fn test_parse_polished_drops_self_target() {
        let entities = entities();
        let resolver = KeyResolver::new(&entities);
        let content = r#"[{"to": "run", "type": "calls"}, {"to": "load", "type": "calls"}]"#;
        let edges = parse_polished(content, "run", &resolver).unwrap();
        assert_eq!(edges, vec![EdgeRef::outgoing("load", Relation::Calls)]);
    }

    #[test]
    fn test_parse_polished_rejects_prose() {
        let entities = entities();
        let resolver = KeyResolver::new(&entities);
        let err = parse_polished("Sure! [{\"to\": \"load\"}]", "run", &resolver).unwrap_err();
        assert!(matches!(err, ModelError::MalformedContent { .. }));
    }

    #[test]
    fn test_polish_retries_then_accepts() {
        let entities = entities();
        let resolver = KeyResolver::new(&entities);
        let capability = Scripted::new(vec![
            Ok(GenerationResponse::ok("not json")),
            Ok(GenerationResponse::ok(r#"[{"to": "save", "type": "calls"}]"#)),
        ]);
        let (generation, edges) = config();
        let polisher = EdgePolisher::new(&capability, &generation, &edges);
        let ast = ast_record(vec![
            EdgeRef::outgoing("load", Relation::Calls),
            EdgeRef::incoming("save", Relation::Calls),
        ]);

        let record = polisher
            .polish(&entities["run"], "def run(): save()", &[], &resolver, &ast)
            .unwrap();
        assert_eq!(capability.calls(), 2);
        assert_eq!(record.provenance, Provenance::GenerationService);
        // Incoming entries of the static record are not carried over.
        assert_eq!(record.edges, vec![EdgeRef::outgoing("save", Relation::Calls)]);
    }

    #[test]
    fn test_polish_exhaustion_keeps_static() {
        let entities = entities();
        let resolver = KeyResolver::new(&entities);
        let capability = Scripted::new(Vec::new());
        let (generation, edges) = config();
        let polisher = EdgePolisher::new(&capability, &generation, &edges);
        let ast = ast_record(vec![EdgeRef::outgoing("load", Relation::Calls)]);

        assert!(polisher
            .polish(&entities["run"], "", &[], &resolver, &ast)
            .is_none());
        assert_eq!(capability.calls(), 3);
    }

    #[test]
    fn test_reconcile_keeps_valid_cached_polish() {
        let entities = entities();
        let mut ast = BTreeMap::new();
        ast.insert("run".to_string(), ast_record(Vec::new()));
        ast.insert("load".to_string(), ast_record(Vec::new()));

        let mut cached = BTreeMap::new();
        cached.insert(
            "run".to_string(),
            EdgeRecord {
                provenance: Provenance::GenerationService,
                ..ast_record(vec![EdgeRef::outgoing("save", Relation::Calls)])
            },
        );
        cached.insert(
            "load".to_string(),
            EdgeRecord {
                provenance: Provenance::GenerationService,
                ..ast_record(vec![EdgeRef::outgoing("deleted", Relation::Calls)])
            },
        );

        let (records, summary) =
            reconcile_edges(&entities, ast, &cached, None, &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(summary, ReconcileSummary { kept: 1, polished: 0, ast: 1 });
        assert_eq!(records["run"].provenance, Provenance::GenerationService);
        assert_eq!(records["load"].provenance, Provenance::Ast);
    }

    #[test]
    fn test_reconcile_polished_edges_are_authoritative() {
        let entities = named(&["a", "b", "c"]);
        let mut ast = BTreeMap::new();
        ast.insert(
            "a".to_string(),
            ast_record(vec![
                EdgeRef::outgoing("b", Relation::Calls),
                EdgeRef::outgoing("c", Relation::Calls),
            ]),
        );
        ast.insert("b".to_string(), ast_record(vec![EdgeRef::incoming("a", Relation::Calls)]));
        ast.insert("c".to_string(), ast_record(vec![EdgeRef::incoming("a", Relation::Calls)]));

        // Every entity is told it calls `b`, including `b` itself.
        let reply = r#"[{"to": "b", "type": "calls"}]"#;
        let capability = Scripted::new(vec![
            Ok(GenerationResponse::ok(reply)),
            Ok(GenerationResponse::ok(reply)),
            Ok(GenerationResponse::ok(reply)),
        ]);
        let (generation, edge_config) = config();
        let polisher = EdgePolisher::new(&capability, &generation, &edge_config);

        let (records, summary) = reconcile_edges(
            &entities,
            ast,
            &BTreeMap::new(),
            Some(&polisher),
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        assert_eq!(summary, ReconcileSummary { kept: 0, polished: 2, ast: 1 });
        assert_eq!(records["a"].edges, vec![EdgeRef::outgoing("b", Relation::Calls)]);
        assert_eq!(
            records["b"].edges,
            vec![
                EdgeRef::incoming("a", Relation::Calls),
                EdgeRef::incoming("c", Relation::Calls),
            ]
        );
        assert_eq!(records["c"].edges, vec![EdgeRef::outgoing("b", Relation::Calls)]);

        let graph = DependencyGraph::from_edge_records(&entities, &records);
        assert_eq!(
            graph.edges(),
            vec![
                ("a".to_string(), "b".to_string(), Relation::Calls),
                ("c".to_string(), "b".to_string(), Relation::Calls),
            ]
        );
    }

    #[test]
    fn test_reconcile_drops_stale_incoming_entries() {
        let entities = entities();
        let mut ast = BTreeMap::new();
        ast.insert("run".to_string(), ast_record(Vec::new()));
        ast.insert(
            "load".to_string(),
            ast_record(vec![EdgeRef::incoming("save", Relation::Calls)]),
        );
        ast.insert("save".to_string(), ast_record(Vec::new()));

        let (records, _) =
            reconcile_edges(&entities, ast, &BTreeMap::new(), None, &BTreeMap::new(), &BTreeMap::new());
        assert!(records["load"].edges.is_empty());
        let graph = DependencyGraph::from_edge_records(&entities, &records);
        assert_eq!(graph.edge_count(), 0);
    }
}
