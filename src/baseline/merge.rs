//! Marker and merge semantics for baseline completion.
//!
//! Copied and enriched files embed a source marker recording the baseline
//! name, original relative path, and timestamp. The marker doubles as the
//! idempotency guard: re-running enrich never appends behind the same marker
//! twice. JSON files are deep-merged instead of appended — arrays unioned,
//! objects merged key-wise, scalars from the target taking precedence unless
//! absent — with a `_baselineSource` field as the marker equivalent.

use serde_json::{Map, Value};
use std::path::Path;

/// JSON field recording baseline provenance.
pub const JSON_SOURCE_FIELD: &str = "_baselineSource";

/// Comment style used for marker embedding, derived from file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStyle {
    Twig,
    Html,
    CssJs,
    Json,
    /// Binary or unknown: copied verbatim, no marker.
    None,
}

impl MarkerStyle {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("twig") => MarkerStyle::Twig,
            Some("html") | Some("htm") => MarkerStyle::Html,
            Some("css") | Some("js") => MarkerStyle::CssJs,
            Some("json") => MarkerStyle::Json,
            _ => MarkerStyle::None,
        }
    }
}

/// Byte threshold below which an existing file is judged "thin" and eligible
/// for enrichment. `None` means the extension is never enriched.
pub fn thin_threshold(path: &Path) -> Option<u64> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("twig") | Some("html") | Some("htm") => Some(600),
        Some("json") => Some(80),
        Some("css") | Some("js") => Some(120),
        _ => None,
    }
}

/// Stable marker key identifying one (baseline, source file) pair. The
/// timestamp is appended for the audit trail but excluded from idempotency
/// matching.
fn marker_key(baseline: &str, source_rel: &str) -> String {
    format!("baseline:{baseline} source:{source_rel}")
}

/// Render the marker comment for a text file, `None` for [`MarkerStyle::None`]
/// and [`MarkerStyle::Json`] (JSON marks via [`JSON_SOURCE_FIELD`]).
pub fn marker_comment(
    style: MarkerStyle,
    baseline: &str,
    source_rel: &str,
    timestamp: &str,
) -> Option<String> {
    let key = marker_key(baseline, source_rel);
    match style {
        MarkerStyle::Twig => Some(format!("{{# {key} {timestamp} #}}")),
        MarkerStyle::Html => Some(format!("<!-- {key} {timestamp} -->")),
        MarkerStyle::CssJs => Some(format!("/* {key} {timestamp} */")),
        MarkerStyle::Json | MarkerStyle::None => None,
    }
}

/// Whether `content` already carries the marker for this (baseline, source)
/// pair, in any comment style and regardless of timestamp.
pub fn has_marker(content: &str, baseline: &str, source_rel: &str) -> bool {
    content.contains(&marker_key(baseline, source_rel))
}

/// Annotate baseline content for a fill copy. Text styles get the marker
/// prepended; JSON gets [`JSON_SOURCE_FIELD`] injected; everything else is
/// returned verbatim.
pub fn annotate_copy(
    bytes: &[u8],
    style: MarkerStyle,
    baseline: &str,
    source_rel: &str,
    timestamp: &str,
) -> Vec<u8> {
    match style {
        MarkerStyle::Json => match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(mut map)) => {
                map.insert(
                    JSON_SOURCE_FIELD.to_string(),
                    source_value(baseline, source_rel, timestamp),
                );
                serde_json::to_vec_pretty(&Value::Object(map)).unwrap_or_else(|_| bytes.to_vec())
            }
            // Non-object or malformed JSON is copied verbatim.
            _ => bytes.to_vec(),
        },
        style => match (
            marker_comment(style, baseline, source_rel, timestamp),
            std::str::from_utf8(bytes),
        ) {
            (Some(marker), Ok(text)) => format!("{marker}\n{text}").into_bytes(),
            _ => bytes.to_vec(),
        },
    }
}

/// Append baseline content to a thin text file behind its marker.
pub fn append_enrichment(existing: &str, baseline_content: &str, marker: &str) -> String {
    let mut out = existing.to_string();
    if !out.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    out.push_str(marker);
    out.push('\n');
    out.push_str(baseline_content);
    out
}

/// Deep-merge a baseline JSON document into a target document.
///
/// Objects merge key-wise, arrays union (baseline elements absent from the
/// target are appended), and scalars from the target take precedence unless
/// absent. The merged document carries [`JSON_SOURCE_FIELD`].
pub fn merge_json(
    target: Value,
    baseline: Value,
    baseline_name: &str,
    source_rel: &str,
    timestamp: &str,
) -> Value {
    let mut merged = merge_value(target, baseline);
    if let Value::Object(map) = &mut merged {
        map.insert(
            JSON_SOURCE_FIELD.to_string(),
            source_value(baseline_name, source_rel, timestamp),
        );
    }
    merged
}

fn merge_value(target: Value, baseline: Value) -> Value {
    match (target, baseline) {
        (Value::Object(target_map), Value::Object(baseline_map)) => {
            let mut merged: Map<String, Value> = Map::new();
            let mut target_map = target_map;
            for (key, baseline_value) in baseline_map {
                match target_map.remove(&key) {
                    Some(target_value) => {
                        merged.insert(key, merge_value(target_value, baseline_value));
                    }
                    None => {
                        merged.insert(key, baseline_value);
                    }
                }
            }
            // Keys only present in the target carry over untouched.
            for (key, value) in target_map {
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (Value::Array(mut target_items), Value::Array(baseline_items)) => {
            for item in baseline_items {
                if !target_items.contains(&item) {
                    target_items.push(item);
                }
            }
            Value::Array(target_items)
        }
        // Target scalars win; a target null counts as absent.
        (Value::Null, baseline_value) => baseline_value,
        (target_value, _) => target_value,
    }
}

fn source_value(baseline: &str, source_rel: &str, timestamp: &str) -> Value {
    serde_json::json!({
        "baseline": baseline,
        "path": source_rel,
        "timestamp": timestamp,
    })
}
