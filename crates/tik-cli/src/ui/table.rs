//! Table rendering for CLI output using comfy-table.
//!
//! | Command | Table Function |
//! |---------|----------------|
//! | `tik ask` | `render_hits_table()` |
//! | `tik index`, `tik cache stat` | `render_tier_stats()` |
//! | `tik show` | `render_edges_table()` |

use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, ColumnConstraint, Table, Width};
use tik_core::TierStats;
use tik_db::EdgeRef;

use super::format::{format_breakdown, format_thousands, truncate_str};

/// One retrieved entity for display.
#[derive(Debug, Clone)]
pub struct HitRow {
    pub key: String,
    pub kind: String,
    pub score: f64,
    pub path: String,
}

/// Render ranked hits for `tik ask`.
///
/// # Example Output
///
/// ```text
/// #   KEY              KIND       SCORE   FILE
/// 1   Store.save       function   1.482   store.py
/// 2   Store            class      0.531   store.py
/// ```
pub fn render_hits_table(hits: &[HitRow]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(vec![
        Cell::new("#").set_alignment(CellAlignment::Right),
        Cell::new("KEY"),
        Cell::new("KIND"),
        Cell::new("SCORE").set_alignment(CellAlignment::Right),
        Cell::new("FILE"),
    ]);
    table.set_constraints(vec![
        ColumnConstraint::LowerBoundary(Width::Fixed(3)),  // #
        ColumnConstraint::LowerBoundary(Width::Fixed(16)), // KEY
        ColumnConstraint::LowerBoundary(Width::Fixed(8)),  // KIND
        ColumnConstraint::LowerBoundary(Width::Fixed(7)),  // SCORE
        ColumnConstraint::LowerBoundary(Width::Fixed(10)), // FILE
    ]);

    for (i, hit) in hits.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1).set_alignment(CellAlignment::Right),
            Cell::new(truncate_str(&hit.key, 48)),
            Cell::new(&hit.kind),
            Cell::new(format!("{:.3}", hit.score)).set_alignment(CellAlignment::Right),
            Cell::new(truncate_str(&hit.path, 40)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render one row per tier.
///
/// # Example Output
///
/// ```text
/// TIER         RECORDS   AVG LEN   CONTAINERS   PROVENANCE
/// snippet           42     312.5            6   AST 95.2%, Manual 4.8%
/// edges             42       2.1            6   AST 100.0%
/// descriptor        42     118.0            6   Fallback 100.0%
/// ```
pub fn render_tier_stats(stats: &[TierStats]) -> String {
    if stats.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(vec![
        Cell::new("TIER"),
        Cell::new("RECORDS").set_alignment(CellAlignment::Right),
        Cell::new("AVG LEN").set_alignment(CellAlignment::Right),
        Cell::new("CONTAINERS").set_alignment(CellAlignment::Right),
        Cell::new("PROVENANCE"),
    ]);

    for tier in stats {
        table.add_row(vec![
            Cell::new(tier.tier.as_str()),
            Cell::new(format_thousands(tier.count as u64)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", tier.avg_field_length)).set_alignment(CellAlignment::Right),
            Cell::new(tier.distinct_containers).set_alignment(CellAlignment::Right),
            Cell::new(format_breakdown(&tier.provenance_breakdown_pct)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render the edge list of one entity for `tik show`.
pub fn render_edges_table(edges: &[EdgeRef]) -> String {
    if edges.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(vec![
        Cell::new("DIR"),
        Cell::new("RELATION"),
        Cell::new("ENTITY"),
        Cell::new("REASON"),
    ]);

    for edge in edges {
        table.add_row(vec![
            Cell::new(edge.direction.as_str()),
            Cell::new(edge.relation.as_str()),
            Cell::new(truncate_str(&edge.to, 48)),
            Cell::new(truncate_str(edge.reason.as_deref().unwrap_or("-"), 60)),
        ]);
    }

    table.trim_fmt().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tik_db::{Relation, Tier};

    #[test]
    fn test_render_hits_table() {
        let output = render_hits_table(&[HitRow {
            key: "Store.save".to_string(),
            kind: "function".to_string(),
            score: 1.5,
            path: "store.py".to_string(),
        }]);
        assert!(output.contains("KEY"));
        assert!(output.contains("Store.save"));
        assert!(output.contains("1.500"));
        assert!(render_hits_table(&[]).is_empty());
    }

    #[test]
    fn test_render_tier_stats() {
        let mut pct = BTreeMap::new();
        pct.insert("AST".to_string(), 100.0);
        pct.insert("Manual".to_string(), 0.0);
        let output = render_tier_stats(&[TierStats {
            tier: Tier::Snippet,
            count: 1200,
            avg_field_length: 88.25,
            provenance_breakdown_pct: pct,
            distinct_containers: 3,
        }]);
        assert!(output.contains("snippet"));
        assert!(output.contains("1,200"));
        assert!(output.contains("AST 100.0%"));
        assert!(!output.contains("Manual"));
    }

    #[test]
    fn test_render_edges_table() {
        let edges = vec![
            EdgeRef::outgoing("Store.validate", Relation::Calls).with_reason("checks input"),
            EdgeRef::incoming("main", Relation::Calls),
        ];
        let output = render_edges_table(&edges);
        assert!(output.contains("outgoing"));
        assert!(output.contains("incoming"));
        assert!(output.contains("checks input"));
    }
}
