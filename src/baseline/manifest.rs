//! Persisted artifacts of baseline completion: the cumulative manifest, the
//! per-run log entries, and the optional Markdown diff report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::Write as _,
    path::{Path, PathBuf},
};

use crate::{error::ForgeError, paths::OutputRoot};

pub const BASELINE_SUMMARY_REL: &str = "reports/baseline-summary.json";
pub const BASELINE_DIFF_REL: &str = "reports/baseline-diff.md";
pub const BASELINE_LOGS_DIR: &str = "reports/logs";

/// Per-category counters, cumulative across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub added: usize,
    pub enriched: usize,
    pub forced: usize,
    pub skipped: usize,
}

/// Cumulative record of everything baseline completion ever contributed to
/// one theme output. `copied` grows monotonically across runs; it never
/// shrinks unless the output tree is deleted externally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineManifest {
    pub baseline_name: String,
    pub baseline_root: PathBuf,
    /// Best-effort VCS revision of the primary baseline source.
    pub baseline_commit: Option<String>,
    pub copied: BTreeSet<String>,
    pub stats: BaselineStats,
    pub timestamp: Option<DateTime<Utc>>,
}

impl BaselineManifest {
    /// Load the persisted manifest, defaulting when absent. A malformed
    /// summary is replaced rather than fatal — it is advisory output.
    pub async fn load(output: &OutputRoot) -> Self {
        match output.read_to_string(BASELINE_SUMMARY_REL).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("Discarding malformed baseline summary: {e}");
                BaselineManifest::default()
            }),
            Err(_) => BaselineManifest::default(),
        }
    }

    /// Fold one run's results in. The copied set is a union — files recorded
    /// by earlier runs stay recorded even when this run skipped them.
    pub fn absorb(&mut self, entry: &BaselineLogEntry) {
        for rel in entry
            .added
            .iter()
            .chain(entry.enriched.iter())
            .chain(entry.forced.iter())
        {
            self.copied.insert(rel.clone());
        }
        self.stats.added += entry.added.len();
        self.stats.enriched += entry.enriched.len();
        self.stats.forced += entry.forced.len();
        self.stats.skipped += entry.skipped.len();
        self.timestamp = Some(entry.timestamp);
        if self.baseline_commit.is_none() {
            self.baseline_commit = entry.baseline_commit.clone();
        }
    }

    pub async fn persist(&self, output: &OutputRoot) -> Result<(), ForgeError> {
        let json = serde_json::to_string_pretty(self)?;
        output.write(BASELINE_SUMMARY_REL, json.as_bytes()).await?;
        Ok(())
    }
}

/// Immutable snapshot of one completion run that made changes, persisted
/// under `reports/logs/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineLogEntry {
    pub added: Vec<String>,
    pub skipped: Vec<String>,
    pub enriched: Vec<String>,
    pub forced: Vec<String>,
    pub duration_ms: u64,
    pub baseline_commit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Default for BaselineLogEntry {
    fn default() -> Self {
        BaselineLogEntry {
            added: Vec::new(),
            skipped: Vec::new(),
            enriched: Vec::new(),
            forced: Vec::new(),
            duration_ms: 0,
            baseline_commit: None,
            timestamp: Utc::now(),
        }
    }
}

impl BaselineLogEntry {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.enriched.is_empty() || !self.forced.is_empty()
    }

    /// Persist this entry under the logs directory, named by timestamp.
    pub async fn persist(&self, output: &OutputRoot) -> Result<(), ForgeError> {
        let name = format!(
            "{BASELINE_LOGS_DIR}/baseline-{}.json",
            self.timestamp.format("%Y%m%dT%H%M%S%3f")
        );
        let json = serde_json::to_string_pretty(self)?;
        output.write(&name, json.as_bytes()).await?;
        Ok(())
    }
}

/// Best-effort VCS revision of a baseline source: reads `.git/HEAD` in the
/// root or any ancestor, following one level of symbolic ref. Absence is not
/// an error.
pub fn read_baseline_commit(baseline_root: &Path) -> Option<String> {
    for dir in baseline_root.ancestors() {
        let git_dir = dir.join(".git");
        if !git_dir.is_dir() {
            continue;
        }
        let head = std::fs::read_to_string(git_dir.join("HEAD")).ok()?;
        let head = head.trim();
        if let Some(ref_name) = head.strip_prefix("ref: ") {
            let commit = std::fs::read_to_string(git_dir.join(ref_name.trim())).ok()?;
            return Some(commit.trim().to_string());
        }
        return Some(head.to_string());
    }
    None
}

/// Render the human-auditable Markdown diff report for one run.
pub fn render_diff_report(
    baseline_name: &str,
    entry: &BaselineLogEntry,
    manifest: &BaselineManifest,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Baseline completion report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Baseline: `{baseline_name}`");
    if let Some(commit) = &entry.baseline_commit {
        let _ = writeln!(out, "- Commit: `{commit}`");
    }
    let _ = writeln!(out, "- Run: {}", entry.timestamp.to_rfc3339());
    let _ = writeln!(out, "- Duration: {}ms", entry.duration_ms);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "| Category | This run | Cumulative |\n|---|---|---|"
    );
    let _ = writeln!(
        out,
        "| Added | {} | {} |",
        entry.added.len(),
        manifest.stats.added
    );
    let _ = writeln!(
        out,
        "| Enriched | {} | {} |",
        entry.enriched.len(),
        manifest.stats.enriched
    );
    let _ = writeln!(
        out,
        "| Forced | {} | {} |",
        entry.forced.len(),
        manifest.stats.forced
    );
    let _ = writeln!(
        out,
        "| Skipped | {} | {} |",
        entry.skipped.len(),
        manifest.stats.skipped
    );

    for (title, files) in [
        ("Added", &entry.added),
        ("Enriched", &entry.enriched),
        ("Forced", &entry.forced),
    ] {
        if files.is_empty() {
            continue;
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "## {title}");
        let _ = writeln!(out);
        for file in files {
            let _ = writeln!(out, "- `{file}`");
        }
    }
    out
}
