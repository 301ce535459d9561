//! Baseline completion: guaranteeing the output theme satisfies a minimum
//! structural completeness contract by filling gaps from ordered fallback
//! theme sources.
//!
//! Three mutually exclusive modes per run (see
//! [`BaselineMode`](crate::config::BaselineMode)): `fill` copies only files
//! entirely absent from the output, `enrich` additionally supplements thin
//! existing files behind an idempotency marker, and `force` overwrites
//! destinations byte-for-byte for explicit re-syncs. Fill copies and
//! enrichments embed a provenance marker; forced files are written verbatim
//! so the output matches the baseline source exactly.
//!
//! ## Key Components
//!
//! - [`BaselineCompletionEngine`] - classifies and applies per-file actions
//! - [`BaselinePrompt`] - approval seam; CI callers use [`AutoApprove`]
//! - [`BaselineManifest`] / [`BaselineLogEntry`] - persisted audit trail
//! - [`merge`] - marker formats, thin thresholds, JSON deep-merge

pub mod manifest;
pub mod merge;

use chrono::Utc;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use crate::{
    cache::FactoryCache,
    config::{BaselineConfig, BaselineMode, FactoryConfig},
    error::ForgeError,
    paths::{to_slash, OutputRoot},
};

pub use manifest::{
    read_baseline_commit, render_diff_report, BaselineLogEntry, BaselineManifest, BaselineStats,
    BASELINE_DIFF_REL, BASELINE_LOGS_DIR, BASELINE_SUMMARY_REL,
};
pub use merge::{has_marker, merge_json, thin_threshold, MarkerStyle, JSON_SOURCE_FIELD};

/// Approval seam for interactive runs. The pipeline asks once per baseline
/// before filling; non-interactive (CI) callers auto-approve.
pub trait BaselinePrompt {
    fn approve(&self, baseline: &str, planned: usize) -> bool;
}

/// Default prompt: approve everything. The interactive implementation lives
/// with the CLI, outside this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl BaselinePrompt for AutoApprove {
    fn approve(&self, baseline: &str, planned: usize) -> bool {
        tracing::debug!("Auto-approving {planned} planned file(s) from baseline {baseline:?}");
        true
    }
}

/// Per-file decision for one candidate destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Copy,
    Enrich,
    Force,
    Skip,
}

/// Outcome of one completion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineRunReport {
    pub entry: BaselineLogEntry,
    pub manifest: BaselineManifest,
    /// Baseline names actually consulted, in chain order.
    pub chain: Vec<String>,
    pub warnings: Vec<String>,
}

/// One resolved link of the baseline fallback chain.
struct ResolvedBaseline {
    name: String,
    root: PathBuf,
    config: BaselineConfig,
}

pub struct BaselineCompletionEngine<'a> {
    config: &'a FactoryConfig,
    cache: &'a FactoryCache,
    output: OutputRoot,
    prompt: &'a dyn BaselinePrompt,
}

impl<'a> BaselineCompletionEngine<'a> {
    pub fn new(
        config: &'a FactoryConfig,
        cache: &'a FactoryCache,
        output: OutputRoot,
        prompt: &'a dyn BaselinePrompt,
    ) -> Self {
        BaselineCompletionEngine {
            config,
            cache,
            output,
            prompt,
        }
    }

    /// Run completion over the configured baseline chain in the configured
    /// mode, persisting the manifest, per-run log entry, and optional diff
    /// report.
    pub async fn complete(&self) -> Result<BaselineRunReport, ForgeError> {
        let started = Instant::now();
        let timestamp = Utc::now();

        let mut report = BaselineRunReport::default();
        let chain = self.resolve_chain(&mut report.warnings);
        report.chain = chain.iter().map(|b| b.name.clone()).collect();

        let mut entry = BaselineLogEntry {
            timestamp,
            ..Default::default()
        };

        for baseline in &chain {
            tracing::info!(
                "Reconciling against baseline {:?} at {:?} in {:?} mode",
                baseline.name,
                baseline.root,
                self.config.baseline_mode
            );
            let candidates = self.enumerate(baseline, &mut report.warnings)?;
            let mut planned = Vec::new();
            for (source, dest_rel) in candidates {
                let action = self.classify(&baseline.name, &dest_rel).await;
                planned.push((source, dest_rel, action));
            }

            let pending = planned.iter().filter(|(_, _, a)| *a != Action::Skip).count();
            if pending > 0 && !self.prompt.approve(&baseline.name, pending) {
                report.warnings.push(format!(
                    "baseline {:?}: {pending} pending file(s) declined by prompt",
                    baseline.name
                ));
                entry
                    .skipped
                    .extend(planned.into_iter().map(|(_, rel, _)| rel));
                continue;
            }

            for (source, dest_rel, action) in planned {
                match action {
                    Action::Skip => entry.skipped.push(dest_rel),
                    Action::Copy => {
                        let bytes = tokio::fs::read(&source).await?;
                        let style = MarkerStyle::for_path(Path::new(&dest_rel));
                        let stamp = source_timestamp(&source);
                        let annotated = merge::annotate_copy(
                            &bytes,
                            style,
                            &baseline.name,
                            &dest_rel,
                            &stamp,
                        );
                        self.output.write(&dest_rel, &annotated).await?;
                        entry.added.push(dest_rel);
                    }
                    Action::Force => {
                        // Byte-for-byte: a forced destination matches the
                        // baseline source exactly.
                        self.output.copy_in(&source, &dest_rel).await?;
                        entry.forced.push(dest_rel);
                    }
                    Action::Enrich => {
                        match self.enrich(baseline, &source, &dest_rel).await {
                            Ok(true) => entry.enriched.push(dest_rel),
                            Ok(false) => entry.skipped.push(dest_rel),
                            Err(e) => {
                                report.warnings.push(format!(
                                    "baseline {:?}: enrich of {dest_rel} failed: {e}",
                                    baseline.name
                                ));
                            }
                        }
                    }
                }
            }
        }

        entry.duration_ms = started.elapsed().as_millis() as u64;
        entry.baseline_commit = chain.first().and_then(|b| read_baseline_commit(&b.root));

        let mut manifest = BaselineManifest::load(&self.output).await;
        if let Some(primary) = chain.first() {
            manifest.baseline_name = primary.name.clone();
            manifest.baseline_root = primary.root.clone();
        }
        manifest.absorb(&entry);
        if let Err(e) = manifest.persist(&self.output).await {
            // Advisory output: never fail the build over it.
            report.warnings.push(format!("baseline summary write failed: {e}"));
        }

        if entry.changed() {
            if let Err(e) = entry.persist(&self.output).await {
                report.warnings.push(format!("baseline log write failed: {e}"));
            }
            if self.config.write_diff_report {
                let primary = chain.first().map(|b| b.name.as_str()).unwrap_or("none");
                let diff = render_diff_report(primary, &entry, &manifest);
                if let Err(e) = self.output.write(BASELINE_DIFF_REL, diff.as_bytes()).await {
                    report.warnings.push(format!("baseline diff write failed: {e}"));
                }
            }
        }

        report.entry = entry;
        report.manifest = manifest;
        Ok(report)
    }

    /// Expand the configured names depth-first through their declared
    /// fallbacks, skipping unavailable sources and breaking reference loops.
    fn resolve_chain(&self, warnings: &mut Vec<String>) -> Vec<ResolvedBaseline> {
        let mut chain = Vec::new();
        let mut visited = std::collections::BTreeSet::new();
        let mut queue: Vec<String> = self.config.baselines.iter().rev().cloned().collect();

        while let Some(name) = queue.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let root = self.config.baseline_root(&name);
            if !root.is_dir() {
                warnings.push(format!(
                    "baseline {name:?} unavailable at {root:?}, continuing with next fallback"
                ));
                continue;
            }
            let config = match BaselineConfig::load(&root) {
                Ok(config) => config,
                Err(e) => {
                    warnings.push(format!("baseline {name:?} skipped: {e}"));
                    continue;
                }
            };
            if let Some(fallback) = &config.fallback {
                queue.push(fallback.clone());
            }
            chain.push(ResolvedBaseline { name, root, config });
        }
        chain
    }

    /// Enumerate (source path, destination rel) candidates for one baseline,
    /// group by group, using the mtime-keyed listing cache.
    fn enumerate(
        &self,
        baseline: &ResolvedBaseline,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<(PathBuf, String)>, ForgeError> {
        let mut candidates = Vec::new();
        for group in baseline.config.effective_groups() {
            let dir = baseline.root.join(group.source_dir());
            if !dir.is_dir() {
                continue;
            }
            let files = match self.cache.list_files(&dir) {
                Ok(files) => files,
                Err(e) => {
                    warnings.push(format!(
                        "baseline {:?}: listing {dir:?} failed: {e}",
                        baseline.name
                    ));
                    continue;
                }
            };
            for file in files {
                let dest_rel = to_slash(&Path::new(group.output_dir()).join(&file));
                candidates.push((dir.join(&file), dest_rel));
            }
        }
        Ok(candidates)
    }

    /// Decide what to do with one candidate destination under the active
    /// mode and current output-tree state.
    async fn classify(&self, baseline_name: &str, dest_rel: &str) -> Action {
        if !self.output.exists(dest_rel) {
            return Action::Copy;
        }
        match self.config.baseline_mode {
            BaselineMode::Fill => Action::Skip,
            BaselineMode::Force => Action::Force,
            BaselineMode::Enrich => {
                let path = Path::new(dest_rel);
                let Some(threshold) = thin_threshold(path) else {
                    return Action::Skip;
                };
                let Some(size) = self.output.file_size(dest_rel) else {
                    return Action::Skip;
                };
                if size >= threshold {
                    return Action::Skip;
                }
                // The marker is the idempotency guard: an already-enriched
                // file is never appended to again, however thin.
                match self.output.read_to_string(dest_rel).await {
                    Ok(content) => {
                        let marked = if MarkerStyle::for_path(path) == MarkerStyle::Json {
                            content.contains(JSON_SOURCE_FIELD)
                        } else {
                            has_marker(&content, baseline_name, dest_rel)
                        };
                        if marked {
                            Action::Skip
                        } else {
                            Action::Enrich
                        }
                    }
                    // Unreadable as text: nothing sensible to append to.
                    Err(_) => Action::Skip,
                }
            }
        }
    }

    /// Apply one enrichment. Returns `Ok(false)` when the file turned out
    /// not to be enrichable (non-text baseline content, marker race).
    async fn enrich(
        &self,
        baseline: &ResolvedBaseline,
        source: &Path,
        dest_rel: &str,
    ) -> Result<bool, ForgeError> {
        let style = MarkerStyle::for_path(Path::new(dest_rel));
        let stamp = source_timestamp(source);
        if style == MarkerStyle::Json {
            let target_text = self.output.read_to_string(dest_rel).await?;
            // Malformed JSON in the target falls back to an empty document
            // before merging; it never aborts the run.
            let target: Value = serde_json::from_str(&target_text).unwrap_or(Value::Null);
            let baseline_text = tokio::fs::read_to_string(source).await?;
            let baseline_value: Value = match serde_json::from_str(&baseline_text) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Baseline JSON {source:?} malformed: {e}");
                    return Ok(false);
                }
            };
            let merged = merge_json(target, baseline_value, &baseline.name, dest_rel, &stamp);
            let json = serde_json::to_string_pretty(&merged)?;
            self.output.write(dest_rel, json.as_bytes()).await?;
            return Ok(true);
        }

        let Some(marker) = merge::marker_comment(style, &baseline.name, dest_rel, &stamp)
        else {
            return Ok(false);
        };
        let existing = self.output.read_to_string(dest_rel).await?;
        let addition = tokio::fs::read_to_string(source).await?;
        let enriched = merge::append_enrichment(&existing, &addition, &marker);
        self.output.write(dest_rel, enriched.as_bytes()).await?;
        Ok(true)
    }
}

/// Marker timestamp for one baseline source file: its mtime, not the run's
/// wall clock. Copied bytes are thereby identical across runs from the same
/// baseline state, keeping the build checksum reproducible.
fn source_timestamp(path: &Path) -> String {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|mtime| chrono::DateTime::<Utc>::from(mtime).to_rfc3339())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Prompt that refuses everything, for exercising the decline path.
    struct DenyAll;
    impl BaselinePrompt for DenyAll {
        fn approve(&self, _baseline: &str, _planned: usize) -> bool {
            false
        }
    }

    struct Fixture {
        _search: TempDir,
        _out: TempDir,
        config: FactoryConfig,
        cache: FactoryCache,
        output: OutputRoot,
    }

    impl Fixture {
        /// A search root with one baseline `main` providing a layout, a page,
        /// and a locale file.
        fn new(mode: BaselineMode) -> Self {
            let search = TempDir::new().unwrap();
            let out = TempDir::new().unwrap();
            let src = search.path().join("theme-main/src");
            for (rel, content) in [
                ("layout/default.twig", "<html>{% block content %}{% endblock %}</html>"),
                ("pages/cart.twig", "<section>cart</section>"),
                ("locales/en.json", r#"{"title": "Baseline", "tags": ["base"]}"#),
            ] {
                let path = src.join(rel);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, content).unwrap();
            }

            let config = FactoryConfig {
                baselines: vec!["main".to_string()],
                baseline_search_root: Some(search.path().to_path_buf()),
                baseline_mode: mode,
                output_root: out.path().to_path_buf(),
                ..Default::default()
            };
            let output = OutputRoot::new(out.path());
            Fixture {
                _search: search,
                _out: out,
                config,
                cache: FactoryCache::new(),
                output,
            }
        }

        async fn run(&self) -> BaselineRunReport {
            BaselineCompletionEngine::new(
                &self.config,
                &self.cache,
                self.output.clone(),
                &AutoApprove,
            )
            .complete()
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn fill_copies_missing_files_and_is_idempotent() {
        let fx = Fixture::new(BaselineMode::Fill);

        let first = fx.run().await;
        assert_eq!(first.entry.added.len(), 3);
        assert!(first.entry.changed());
        let layout = fx.output.read_to_string("layout/default.twig").await.unwrap();
        assert!(layout.contains("baseline:main source:layout/default.twig"));

        // Second run: nothing added, copied set unchanged.
        let second = fx.run().await;
        assert!(second.entry.added.is_empty());
        assert!(!second.entry.changed());
        assert_eq!(second.manifest.copied, first.manifest.copied);
        assert_eq!(second.manifest.copied.len(), 3);
    }

    #[tokio::test]
    async fn copied_bytes_are_identical_across_runs() {
        let fx = Fixture::new(BaselineMode::Fill);
        let other_out = TempDir::new().unwrap();
        let mut other_config = fx.config.clone();
        other_config.output_root = other_out.path().to_path_buf();
        let other_output = OutputRoot::new(other_out.path());

        fx.run().await;
        std::thread::sleep(std::time::Duration::from_millis(20));
        BaselineCompletionEngine::new(&other_config, &fx.cache, other_output.clone(), &AutoApprove)
            .complete()
            .await
            .unwrap();

        // Marker timestamps derive from the baseline files, not the run
        // clock, so both fills produce the same bytes.
        for rel in ["layout/default.twig", "pages/cart.twig", "locales/en.json"] {
            assert_eq!(
                fx.output.read_to_string(rel).await.unwrap(),
                other_output.read_to_string(rel).await.unwrap(),
                "{rel} differs between runs"
            );
        }
    }

    #[tokio::test]
    async fn fill_never_touches_existing_files() {
        let fx = Fixture::new(BaselineMode::Fill);
        fx.output.write("pages/cart.twig", b"mine").await.unwrap();

        let report = fx.run().await;
        assert!(report.entry.skipped.contains(&"pages/cart.twig".to_string()));
        assert_eq!(
            fx.output.read_to_string("pages/cart.twig").await.unwrap(),
            "mine"
        );
    }

    #[tokio::test]
    async fn enrich_appends_marker_exactly_once() {
        let fx = Fixture::new(BaselineMode::Enrich);
        // Thin page: below the 600-byte twig threshold.
        fx.output.write("pages/cart.twig", b"<p>thin</p>").await.unwrap();

        let first = fx.run().await;
        assert_eq!(first.entry.enriched, vec!["pages/cart.twig".to_string()]);
        let enriched = fx.output.read_to_string("pages/cart.twig").await.unwrap();
        assert!(enriched.starts_with("<p>thin</p>\n{# baseline:main source:pages/cart.twig"));
        assert!(enriched.contains("<section>cart</section>"));

        let second = fx.run().await;
        assert!(second.entry.enriched.is_empty());
        assert_eq!(
            fx.output.read_to_string("pages/cart.twig").await.unwrap(),
            enriched
        );
    }

    #[tokio::test]
    async fn enrich_deep_merges_thin_json() {
        let fx = Fixture::new(BaselineMode::Enrich);
        fx.output
            .write("locales/en.json", br#"{"title": "Mine"}"#)
            .await
            .unwrap();

        let report = fx.run().await;
        assert_eq!(report.entry.enriched, vec!["locales/en.json".to_string()]);
        let merged: Value = serde_json::from_str(
            &fx.output.read_to_string("locales/en.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(merged["title"], "Mine");
        assert_eq!(merged["tags"][0], "base");
        assert_eq!(merged[JSON_SOURCE_FIELD]["baseline"], "main");

        // Marked now, so a second run performs no further merge.
        let second = fx.run().await;
        assert!(second.entry.enriched.is_empty());
    }

    #[tokio::test]
    async fn enrich_treats_malformed_target_json_as_empty() {
        let fx = Fixture::new(BaselineMode::Enrich);
        fx.output.write("locales/en.json", b"{not json").await.unwrap();

        let report = fx.run().await;
        assert_eq!(report.entry.enriched, vec!["locales/en.json".to_string()]);
        let merged: Value = serde_json::from_str(
            &fx.output.read_to_string("locales/en.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(merged["title"], "Baseline");
    }

    #[tokio::test]
    async fn force_rewrites_byte_for_byte() {
        let fx = Fixture::new(BaselineMode::Force);
        fx.output
            .write("pages/cart.twig", b"completely different")
            .await
            .unwrap();

        let report = fx.run().await;
        assert_eq!(report.entry.forced, vec!["pages/cart.twig".to_string()]);
        assert_eq!(
            fx.output.read_to_string("pages/cart.twig").await.unwrap(),
            "<section>cart</section>"
        );
    }

    #[tokio::test]
    async fn missing_baseline_is_skipped_with_warning() {
        let mut fx = Fixture::new(BaselineMode::Fill);
        fx.config.baselines = vec!["ghost".to_string(), "main".to_string()];

        let report = fx.run().await;
        assert_eq!(report.chain, vec!["main".to_string()]);
        assert!(report.warnings.iter().any(|w| w.contains("ghost")));
        // The chain continued and main still filled.
        assert_eq!(report.entry.added.len(), 3);
    }

    #[tokio::test]
    async fn fallback_chain_is_followed() {
        let fx = Fixture::new(BaselineMode::Fill);
        // main declares a fallback providing one extra partial.
        let search = fx.config.baseline_search_root.clone().unwrap();
        std::fs::write(
            search.join("theme-main/src/baseline.config.json"),
            r#"{"fallback": "blank"}"#,
        )
        .unwrap();
        let blank = search.join("theme-blank/src/partials");
        std::fs::create_dir_all(&blank).unwrap();
        std::fs::write(blank.join("footer.twig"), "<footer/>").unwrap();

        let report = fx.run().await;
        assert_eq!(report.chain, vec!["main".to_string(), "blank".to_string()]);
        assert!(report
            .entry
            .added
            .contains(&"partials/footer.twig".to_string()));
    }

    #[tokio::test]
    async fn declined_prompt_writes_nothing() {
        let fx = Fixture::new(BaselineMode::Fill);
        let report = BaselineCompletionEngine::new(
            &fx.config,
            &fx.cache,
            fx.output.clone(),
            &DenyAll,
        )
        .complete()
        .await
        .unwrap();

        assert!(report.entry.added.is_empty());
        assert_eq!(report.entry.skipped.len(), 3);
        assert!(!fx.output.exists("layout/default.twig"));
    }

    #[tokio::test]
    async fn log_entry_persisted_only_when_changed() {
        let fx = Fixture::new(BaselineMode::Fill);
        fx.run().await;
        let logs_dir = fx.output.path().join(BASELINE_LOGS_DIR);
        assert_eq!(std::fs::read_dir(&logs_dir).unwrap().count(), 1);

        // Idempotent second run adds no log entry.
        fx.run().await;
        assert_eq!(std::fs::read_dir(&logs_dir).unwrap().count(), 1);
    }
}
