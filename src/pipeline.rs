//! End-to-end build pipeline.
//!
//! Stage order is fixed: template adaptation consumes the parsed prototype,
//! the dependency graph is derived from the files just written, baseline
//! completion fills structural gaps (re-scanning the graph when it added
//! template files), and the build manifest hashes the completed tree.
//! Exactly one pipeline run may target a given output directory at a time;
//! the output lock is held for the whole run.

use crate::{
    adapter::{AdapterReport, TemplateAdapter},
    baseline::{AutoApprove, BaselineCompletionEngine, BaselinePrompt, BaselineRunReport},
    cache::{FactoryCache, OutputLock},
    config::FactoryConfig,
    error::ForgeError,
    graph::{DependencyGraph, DependencyGraphBuilder, TEMPLATE_DIRS},
    manifest::{BuildManifest, BuildManifestGenerator},
    paths::OutputRoot,
    source::ParsedSource,
};

/// Aggregated outcome of one full build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub adapter: AdapterReport,
    pub graph: DependencyGraph,
    pub baseline: BaselineRunReport,
    pub manifest: BuildManifest,
}

impl BuildReport {
    /// All stage warnings, in stage order.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = self.adapter.warnings.clone();
        warnings.extend(self.graph.warnings.clone());
        warnings.extend(self.baseline.warnings.clone());
        warnings
    }
}

pub struct ThemeFactory {
    config: FactoryConfig,
    cache: FactoryCache,
    prompt: Box<dyn BaselinePrompt + Send + Sync>,
}

impl ThemeFactory {
    pub fn new(config: FactoryConfig) -> Self {
        ThemeFactory {
            config,
            cache: FactoryCache::new(),
            prompt: Box::new(AutoApprove),
        }
    }

    /// Replace the approval seam, for interactive callers.
    pub fn with_prompt(mut self, prompt: Box<dyn BaselinePrompt + Send + Sync>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Run the full pipeline over one parsed prototype.
    pub async fn build(&self, source: &ParsedSource) -> Result<BuildReport, ForgeError> {
        tokio::fs::create_dir_all(&self.config.output_root).await?;
        let _lock = OutputLock::acquire(&self.config.output_root)?;
        let output = OutputRoot::new(&self.config.output_root);
        tracing::info!(
            "Building theme {:?} into {:?}",
            self.config.theme,
            self.config.output_root
        );

        let mut report = BuildReport::default();

        let adapter = TemplateAdapter::new(&self.config, output.clone());
        report.adapter = adapter.adapt(source).await?;

        let graph_builder = DependencyGraphBuilder::new(output.clone());
        report.graph = graph_builder.build().await?;

        let engine =
            BaselineCompletionEngine::new(&self.config, &self.cache, output.clone(), &*self.prompt);
        report.baseline = engine.complete().await?;

        // Baseline completion may have added templates the graph has never
        // seen; re-derive it so the cached order covers the full tree.
        if touches_template_dirs(&report.baseline.entry.added)
            || touches_template_dirs(&report.baseline.entry.enriched)
            || touches_template_dirs(&report.baseline.entry.forced)
        {
            tracing::debug!("Baseline added template files, re-scanning dependency graph");
            report.graph = graph_builder.build().await?;
        }
        if let Err(e) = graph_builder.write_cache(&report.graph).await {
            tracing::warn!("Graph cache write failed: {e}");
        }

        let generator = BuildManifestGenerator::new(output);
        // Skipped-unchanged pages are a caching optimization, not failures;
        // nothing in the pipeline currently produces a hard per-file failure.
        report.manifest = generator
            .generate(
                &self.config.theme,
                &self.config.input_checksum,
                report.graph.topo_order.clone(),
                report.warnings(),
                Vec::new(),
            )
            .await?;
        // Advisory artifact: a failed write is logged, never fatal.
        if let Err(e) = generator.persist(&report.manifest).await {
            tracing::warn!("Manifest write failed: {e}");
        }

        Ok(report)
    }
}

fn touches_template_dirs(rels: &[String]) -> bool {
    rels.iter().any(|rel| {
        rel.split('/')
            .next()
            .is_some_and(|dir| TEMPLATE_DIRS.contains(&dir))
    })
}
