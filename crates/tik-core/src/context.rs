//! Context assembly for retrieved entities.
//!
//! Renders the tiers of each hit as tagged lines:
//!
//! ```text
//! [descriptor: Parser.parse] {"purpose":"...","uses":[...],...}
//! [edges: Parser.parse] [{"to":"Parser.tokenize","relation":"calls",...}]
//! [snippet: Parser.parse] def parse(self, text): ...
//! ```
//!
//! Snippets are truncated here, at read time; the snippet tier always holds
//! the full text.

use tik_db::{Descriptor, EdgeRef};

/// Snippet characters rendered per entity.
pub const CONTEXT_SNIPPET_CHARS: usize = 100;

const SNIPPET_TRIGGERS: &[&str] = &["code", "snippet", "debug", "implement", "source", "код"];
const EDGE_TRIGGERS: &[&str] = &["relation", "call", "depend", "edge", "uses", "связи"];

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// Which tiers to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLevels {
    pub descriptors: bool,
    pub edges: bool,
    pub snippets: bool,
}

impl ContextLevels {
    /// Descriptors always; edges and snippets when the query asks for them.
    pub fn for_query(query: &str) -> Self {
        let lower = query.to_lowercase();
        Self {
            descriptors: true,
            edges: EDGE_TRIGGERS.iter().any(|t| lower.contains(t)),
            snippets: SNIPPET_TRIGGERS.iter().any(|t| lower.contains(t)),
        }
    }

    pub fn all() -> Self {
        Self {
            descriptors: true,
            edges: true,
            snippets: true,
        }
    }
}

/// The tier attachments of one retrieved entity.
#[derive(Debug, Clone)]
pub struct ContextEntry<'a> {
    pub key: &'a str,
    pub descriptor: Option<&'a Descriptor>,
    pub edges: &'a [EdgeRef],
    pub snippet: Option<&'a str>,
}

/// Render `entries` in order, one line per selected tier.
pub fn render_context(entries: &[ContextEntry<'_>], levels: ContextLevels) -> String {
    let mut lines = Vec::new();
    for entry in entries {
        if levels.descriptors {
            if let Some(descriptor) = entry.descriptor {
                let json = serde_json::to_string(descriptor).unwrap_or_default();
                lines.push(format!("[descriptor: {}] {}", entry.key, json));
            }
        }
        if levels.edges {
            let json = serde_json::to_string(entry.edges).unwrap_or_default();
            lines.push(format!("[edges: {}] {}", entry.key, json));
        }
        if levels.snippets {
            if let Some(snippet) = entry.snippet {
                lines.push(format!(
                    "[snippet: {}] {}",
                    entry.key,
                    excerpt(snippet, CONTEXT_SNIPPET_CHARS)
                ));
            }
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tik_db::Relation;

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("abcdef", 3), "abc...");
        assert_eq!(excerpt("ééé", 2), "éé...");
        assert_eq!(excerpt("", 0), "");
    }

    #[test]
    fn test_levels_for_query() {
        assert_eq!(
            ContextLevels::for_query("what parses config"),
            ContextLevels {
                descriptors: true,
                edges: false,
                snippets: false
            }
        );
        let levels = ContextLevels::for_query("Show the code that calls save");
        assert!(levels.edges && levels.snippets);
    }

    #[test]
    fn test_render_context() {
        let descriptor = Descriptor {
            purpose: "Parses text.".to_string(),
            uses: vec![],
            returns: "dict".to_string(),
            edge_cases: "N/A".to_string(),
        };
        let edges = vec![EdgeRef::outgoing("tokenize", Relation::Calls)];
        let snippet = "x".repeat(150);
        let entries = vec![ContextEntry {
            key: "parse",
            descriptor: Some(&descriptor),
            edges: &edges,
            snippet: Some(&snippet),
        }];

        let rendered = render_context(&entries, ContextLevels::all());
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("[descriptor: parse] {\"purpose\":\"Parses text.\""));
        assert_eq!(
            lines[1],
            "[edges: parse] [{\"to\":\"tokenize\",\"relation\":\"calls\",\"direction\":\"outgoing\"}]"
        );
        assert_eq!(lines[2], format!("[snippet: parse] {}...", "x".repeat(100)));

        let only_descriptors = render_context(&entries, ContextLevels::for_query("parse"));
        assert_eq!(only_descriptors.lines().count(), 1);
    }
}
