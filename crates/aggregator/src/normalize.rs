//! Display-name normalization
//!
//! Upstream listings embed compatibility tags in mod names (`"[1.2] Mod
//! Name"`, `"(0.90) Mod Name"`). Names are the merge join key, so the same
//! mod must normalize to the same string on every source: trim, strip one
//! leading bracket group, strip one leading parenthesis group, trim again.

use once_cell::sync::Lazy;
use regex::Regex;

static LEADING_BRACKET_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[.*?\]").unwrap());
static LEADING_PAREN_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(.*?\)").unwrap());

/// Normalize a free-text mod name.
pub fn normalize(text: &str) -> String {
    let trimmed = text.trim();
    let stripped = LEADING_BRACKET_TAG.replace(trimmed, "");
    let stripped = stripped.trim();
    let stripped = LEADING_PAREN_TAG.replace(stripped, "");
    stripped.trim().to_string()
}
