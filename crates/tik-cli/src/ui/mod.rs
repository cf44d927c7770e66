//! Output helpers for the `tik` binary.
//!
//! - `color`: `--color` flag and terminal detection
//! - `style`: message prefixes, sections, key/value lines
//! - `format`: truncation, thousands separators, provenance breakdowns
//! - `table`: comfy-table renderers for hits, tier stats and edges
//!
//! Every listing command also has a `--json` form, so nothing here needs to
//! be machine-parseable.

pub mod color;
pub mod format;
pub mod style;
pub mod table;

pub use color::ColorMode;
pub use style::{MessageType, Style};
