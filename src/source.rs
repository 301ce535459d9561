//! Input data model produced by the upstream prototype parser.
//!
//! The factory makes no assumptions about how a [`ParsedSource`] was produced
//! beyond its shape: a set of pages with their raw markup, a per-page
//! component inventory, per-page inline scripts, and the set of pages whose
//! prior output may be skipped.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

/// One page of the parsed prototype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSource {
    /// Path of the page relative to the prototype root, e.g. `shop/index.html`.
    pub rel: String,
    /// Raw page markup as parsed upstream.
    pub html: String,
}

/// A component fragment detected upstream within one page.
///
/// The `signature` is an opaque key identifying structurally-equivalent
/// fragments across pages. Fragments sharing a signature with at least two
/// occurrences across the whole prototype are hoist candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentFragment {
    pub signature: String,
    /// Exact markup of the fragment as it appears in the page, when the
    /// upstream detector captured it. Candidates without markup cannot be
    /// hoisted and are counted only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// Normalized, parsed representation of a static prototype. Owned and
/// produced upstream; the factory only reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedSource {
    /// Root directory of the original prototype on disk. Asset references in
    /// page markup resolve against this tree.
    pub input_root: PathBuf,
    pub pages: Vec<PageSource>,
    /// Per-page component inventory, keyed by page `rel`.
    #[serde(default)]
    pub layout_map: BTreeMap<String, Vec<ComponentFragment>>,
    /// Per-page extracted inline scripts, keyed by page `rel`, in document
    /// order.
    #[serde(default)]
    pub js_map: BTreeMap<String, Vec<String>>,
    /// Pages whose prior output may be skipped when `lock_unchanged` is
    /// enabled. A caching hint, never a correctness requirement.
    #[serde(default)]
    pub unchanged: BTreeSet<String>,
}

impl ParsedSource {
    /// Fragments recorded for one page, empty when the inventory has none.
    pub fn fragments(&self, rel: &str) -> &[ComponentFragment] {
        self.layout_map.get(rel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Inline scripts recorded for one page, in document order.
    pub fn scripts(&self, rel: &str) -> &[String] {
        self.js_map.get(rel).map(Vec::as_slice).unwrap_or(&[])
    }
}
