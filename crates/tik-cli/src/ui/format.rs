//! Formatting utilities for CLI output.

/// Truncate a string to at most `max_chars` characters, replacing the tail
/// with `...` when it is cut.
///
/// ```text
/// truncate_str("hello", 10)       -> "hello"
/// truncate_str("hello world", 8)  -> "hello..."
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= 3 {
        return ".".repeat(max_chars);
    }
    let kept: String = s.chars().take(max_chars - 3).collect();
    format!("{}...", kept)
}

/// Collapse all whitespace runs (newlines included) into single spaces.
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Format a number with thousands separators.
pub fn format_thousands(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    let len = s.len();

    for (i, c) in s.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result
}

/// Format a percentage breakdown as `a 50.0%, b 50.0%`, skipping zeros.
pub fn format_breakdown<'a>(entries: impl IntoIterator<Item = (&'a String, &'a f64)>) -> String {
    let parts: Vec<String> = entries
        .into_iter()
        .filter(|(_, pct)| **pct > 0.0)
        .map(|(name, pct)| format!("{} {:.1}%", name, pct))
        .collect();
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 5), "hello");
        assert_eq!(truncate_str("hello world", 8), "hello...");
        assert_eq!(truncate_str("hello", 3), "...");
        assert_eq!(truncate_str("ééééé", 4), "é...");
    }

    #[test]
    fn test_single_line() {
        assert_eq!(single_line("def f():\n    return 1\n"), "def f(): return 1");
    }

    #[test]
    fn test_format_thousands() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1000), "1,000");
        assert_eq!(format_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_format_breakdown() {
        let mut pct = BTreeMap::new();
        pct.insert("AST".to_string(), 75.0);
        pct.insert("Manual".to_string(), 25.0);
        pct.insert("Other".to_string(), 0.0);
        assert_eq!(format_breakdown(&pct), "AST 75.0%, Manual 25.0%");
        assert_eq!(format_breakdown(&BTreeMap::new()), "-");
    }
}
