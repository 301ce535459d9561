//! Template adaptation: drives one page end-to-end and owns the output
//! template layout.
//!
//! For each page the adapter applies asset normalization, optionally applies
//! partial hoisting, wraps the result in the layout-extension envelope, and
//! writes `pages/<rel>.twig`. It also guarantees the default layout shell
//! exists, copies the prototype `assets/` subtree, and extracts inline
//! scripts to `assets/js/`.

use std::path::Path;

use crate::{
    assets::{copy_asset_tree, write_inline_scripts, AssetNormalizer},
    config::FactoryConfig,
    error::ForgeError,
    hoist::{PartialHoister, Substitution},
    paths::{to_slash, OutputRoot},
    source::ParsedSource,
};

pub const DEFAULT_LAYOUT_REL: &str = "layout/default.twig";

const DEFAULT_LAYOUT_SHELL: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{% block title %}{% endblock %}</title>
</head>
<body>
{% block content %}{% endblock %}
</body>
</html>
"#;

/// Counters and warnings for one adaptation stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AdapterReport {
    pub pages_written: Vec<String>,
    pub pages_skipped: Vec<String>,
    pub partials_written: Vec<String>,
    pub scripts_written: usize,
    pub assets_copied: usize,
    pub normalized_assets: usize,
    pub warnings: Vec<String>,
}

/// Orchestrates [`AssetNormalizer`] and [`PartialHoister`] per page and
/// writes layout/page/partial files under strict containment rules.
pub struct TemplateAdapter<'a> {
    config: &'a FactoryConfig,
    output: OutputRoot,
}

impl<'a> TemplateAdapter<'a> {
    pub fn new(config: &'a FactoryConfig, output: OutputRoot) -> Self {
        TemplateAdapter { config, output }
    }

    /// Run the full adaptation stage over a parsed prototype.
    pub async fn adapt(&self, source: &ParsedSource) -> Result<AdapterReport, ForgeError> {
        let mut report = AdapterReport::default();

        self.ensure_layout_shell().await?;

        let (assets_copied, mut copy_warnings) = copy_asset_tree(
            &source.input_root,
            &self.output,
            self.config.max_asset_bytes,
        )
        .await?;
        report.assets_copied = assets_copied;
        report.warnings.append(&mut copy_warnings);

        let hoister = if self.config.hoist_partials {
            let hoister = PartialHoister::from_source(source);
            report.partials_written = hoister.write_partials(&self.output).await?;
            Some(hoister)
        } else {
            None
        };

        let mut normalizer =
            AssetNormalizer::new(source.input_root.clone(), self.output.clone());

        for page in &source.pages {
            let template_rel = page_template_rel(&page.rel);

            if self.config.lock_unchanged
                && source.unchanged.contains(&page.rel)
                && self.output.exists(&template_rel)
            {
                tracing::debug!("Skipping unchanged page {}", page.rel);
                report.pages_skipped.push(page.rel.clone());
                continue;
            }

            let mut html = normalizer.normalize_page(&page.rel, &page.html).await?;

            if let Some(hoister) = &hoister {
                let (hoisted, outcomes) = hoister.substitute(source, &page.rel, &html);
                html = hoisted;
                for outcome in outcomes {
                    if outcome.result == Substitution::Missed {
                        report.warnings.push(format!(
                            "{}: fragment {:?} listed in inventory but not found verbatim",
                            page.rel, outcome.signature
                        ));
                    }
                }
            }

            self.output
                .write(&template_rel, wrap_in_layout(&html).as_bytes())
                .await?;
            tracing::info!("Adapted {} -> {}", page.rel, template_rel);
            report.pages_written.push(template_rel);

            report.scripts_written +=
                write_inline_scripts(&self.output, &page.rel, source.scripts(&page.rel))
                    .await?
                    .len();
        }

        report.normalized_assets = normalizer.copied;
        report.warnings.append(&mut normalizer.warnings);
        Ok(report)
    }

    /// Write the default layout shell when absent. Existing layouts — hand
    /// edited or baseline supplied — are never clobbered here.
    async fn ensure_layout_shell(&self) -> Result<(), ForgeError> {
        if !self.output.exists(DEFAULT_LAYOUT_REL) {
            self.output
                .write(DEFAULT_LAYOUT_REL, DEFAULT_LAYOUT_SHELL.as_bytes())
                .await?;
            tracing::info!("Wrote default layout shell");
        }
        Ok(())
    }
}

/// Output-relative template path for a page: `pages/<rel-without-ext>.twig`.
pub fn page_template_rel(page_rel: &str) -> String {
    let stem = Path::new(page_rel).with_extension("");
    format!("pages/{}.twig", to_slash(&stem))
}

/// Wrap normalized page markup in the fixed layout-extension envelope.
fn wrap_in_layout(html: &str) -> String {
    format!(
        "{{% extends \"{DEFAULT_LAYOUT_REL}\" %}}\n\n{{% block content %}}\n{}\n{{% endblock %}}\n",
        html.trim_end()
    )
}
