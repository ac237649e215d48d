//! Post-processing: pull a JSON document out of a model reply.
//!
//! ## Why is post-processing necessary?
//!
//! Even well-prompted models occasionally wrap their answer in artefacts that
//! are harmless to a human reader but break `serde_json`:
//!
//! - Wrapping output in ` ```json ... ``` ` fences despite the prompt
//!   saying "do not wrap in fences"
//! - A sentence of commentary before or after the JSON
//! - A leading byte-order mark or zero-width space
//!
//! These helpers are only used for reporting (`--json` output, pretty
//! printing). The raw text returned by the extraction and reconciliation
//! clients is never rewritten.
//!
//! ## Rule Order
//!
//! Invisible characters go first so the fence regex sees a clean start of
//! input; fences go before the brace scan so a fenced reply parses whole.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Parse the JSON document contained in a model reply, if there is one.
///
/// Tries, in order: the cleaned reply as a whole, then the outermost
/// `{...}` or `[...]` span inside it.
pub fn extract_json(reply: &str) -> Option<Value> {
    let cleaned = strip_code_fences(&remove_invisible_chars(reply));
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str(cleaned) {
        return Some(v);
    }

    outermost_span(cleaned).and_then(|span| serde_json::from_str(span).ok())
}

/// Pretty-print the JSON in a reply, or return the reply unchanged.
pub fn pretty_json(reply: &str) -> String {
    match extract_json(reply).and_then(|v| serde_json::to_string_pretty(&v).ok()) {
        Some(pretty) => pretty,
        None => reply.to_string(),
    }
}

// ── Rule 1: Strip invisible characters ───────────────────────────────────────

static RE_INVISIBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{FEFF}\u{200B}\u{200C}\u{200D}\u{2060}]").unwrap());

fn remove_invisible_chars(input: &str) -> String {
    RE_INVISIBLE.replace_all(input, "").to_string()
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

/// Remove one outer ```` ```json ```` (or bare ```` ``` ````) fence pair.
pub fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3: Outermost object/array span ──────────────────────────────────────

fn outermost_span(input: &str) -> Option<&str> {
    let start = input.find(['{', '['])?;
    let close = if input[start..].starts_with('{') { '}' } else { ']' };
    let end = input.rfind(close)?;
    (end > start).then(|| &input[start..=end])
}
