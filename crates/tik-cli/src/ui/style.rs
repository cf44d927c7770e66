//! Message styling for `tik` output.
//!
//! | Prefix | Meaning | Color |
//! |--------|---------|-------|
//! | `[ok]` | Success | Green |
//! | `[err]` | Error | Red |
//! | `[warn]` | Warning | Yellow |
//! | `[info]` | Information | Blue |
//! | `[hint]` | Suggestion | Cyan |
//!
//! Every method returns plain text when colors are off, so tests and piped
//! output see the same strings.

use owo_colors::{AnsiColors, OwoColorize};

use super::color::ColorMode;

/// Message severity for CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Ok,
    Err,
    Warn,
    Info,
    Hint,
}

impl MessageType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Ok => "[ok]",
            Self::Err => "[err]",
            Self::Warn => "[warn]",
            Self::Info => "[info]",
            Self::Hint => "[hint]",
        }
    }

    fn color(&self) -> AnsiColors {
        match self {
            Self::Ok => AnsiColors::Green,
            Self::Err => AnsiColors::Red,
            Self::Warn => AnsiColors::Yellow,
            Self::Info => AnsiColors::Blue,
            Self::Hint => AnsiColors::Cyan,
        }
    }
}

/// Styling for one command invocation.
///
/// ```text
/// let style = Style::new(ColorMode::Never);
/// println!("{}", style.message(MessageType::Ok, "Index built"));
/// ```
#[derive(Debug, Clone)]
pub struct Style {
    color_mode: ColorMode,
}

impl Style {
    pub fn new(color_mode: ColorMode) -> Self {
        Self { color_mode }
    }

    pub fn colors_enabled(&self) -> bool {
        self.color_mode.is_enabled()
    }

    fn paint(&self, text: &str, color: AnsiColors) -> String {
        if self.colors_enabled() {
            text.color(color).to_string()
        } else {
            text.to_string()
        }
    }

    /// `[ok] Index built`
    pub fn message(&self, msg_type: MessageType, text: &str) -> String {
        format!("{} {}", self.paint(msg_type.prefix(), msg_type.color()), text)
    }

    /// Detail line under a message, indented past the prefix.
    pub fn message_detail(&self, label: &str, value: &str) -> String {
        format!("     {}: {}", label, value)
    }

    pub fn section(&self, title: &str) -> String {
        if self.colors_enabled() {
            title.bold().to_string()
        } else {
            title.to_string()
        }
    }

    /// Error message followed by optional `Cause:` and `Hint:` lines.
    pub fn error_with_context(&self, msg: &str, cause: Option<&str>, hint: Option<&str>) -> String {
        let mut lines = vec![self.message(MessageType::Err, msg)];
        lines.extend(cause.map(|c| format!("      Cause: {}", c)));
        lines.extend(hint.map(|h| format!("      Hint: {}", h)));
        lines.join("\n")
    }

    /// Indented list entry. `+` added, `-` removed, `~` changed.
    pub fn list_item(&self, marker: &str, text: &str) -> String {
        let marker = match marker {
            "+" => self.paint(marker, AnsiColors::Green),
            "-" => self.paint(marker, AnsiColors::Red),
            "~" => self.paint(marker, AnsiColors::Yellow),
            other => other.to_string(),
        };
        format!("  {} {}", marker, text)
    }

    pub fn key_value(&self, key: &str, value: &str) -> String {
        if self.colors_enabled() {
            format!("{}: {}", key.dimmed(), value)
        } else {
            format!("{}: {}", key, value)
        }
    }

    pub fn entity_key(&self, key: &str) -> String {
        self.paint(key, AnsiColors::Cyan)
    }

    /// Hybrid score with three decimals.
    ///
    /// Scores are unbounded above (keyword boost and expansion add to the
    /// similarity): green from 1.0, yellow from 0.5.
    pub fn score(&self, value: f64) -> String {
        let formatted = format!("{:.3}", value);
        match value {
            v if v >= 1.0 => self.paint(&formatted, AnsiColors::Green),
            v if v >= 0.5 => self.paint(&formatted, AnsiColors::Yellow),
            _ => formatted,
        }
    }
}
