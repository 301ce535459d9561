//! Factory configuration.
//!
//! [`FactoryConfig`] is usually constructed programmatically by the caller
//! that owns the CLI surface, but can also be loaded from a `themeforge.toml`
//! file. Per-baseline settings live next to each baseline source in a
//! `baseline.config.json` (see [`BaselineConfig`]).

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use crate::error::ForgeError;

/// Environment variable overriding the `.baselines/` root convention.
pub const BASELINE_ROOT_ENV: &str = "THEMEFORGE_BASELINE_ROOT";

/// Completion mode for the baseline engine. Mutually exclusive per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineMode {
    /// Only copy files entirely absent from the output; never touch existing
    /// files.
    #[default]
    Fill,
    /// Fill, plus supplement existing files under the per-extension thin
    /// threshold by appending baseline content behind an idempotency marker
    /// (deep-merging for JSON).
    Enrich,
    /// Unconditionally overwrite destination files with baseline content.
    Force,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Theme name; the output tree roots at `<output_root>`.
    pub theme: String,
    /// Root of the original prototype.
    pub input_root: PathBuf,
    /// Directory the theme is written into. Exactly one pipeline run may
    /// target it at a time.
    pub output_root: PathBuf,
    /// Opt-in partial hoisting. Off by default: a hoist rewrites page markup
    /// and only pays for itself when fragments genuinely recur.
    pub hoist_partials: bool,
    /// Skip rewriting pages the upstream parser declared unchanged.
    pub lock_unchanged: bool,
    /// Maximum size for files copied verbatim from the prototype `assets/`
    /// subtree. Larger files are skipped with a warning.
    pub max_asset_bytes: u64,
    /// Ordered fallback chain of baseline names. Earlier entries win.
    pub baselines: Vec<String>,
    /// Directory baseline names resolve under. Defaults to `.baselines`,
    /// overridable via [`BASELINE_ROOT_ENV`].
    pub baseline_search_root: Option<PathBuf>,
    pub baseline_mode: BaselineMode,
    /// Emit `reports/baseline-diff.md` alongside the summary.
    pub write_diff_report: bool,
    /// Externally supplied checksum of the parsed input, recorded in the
    /// build manifest.
    pub input_checksum: String,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        FactoryConfig {
            theme: "default".to_string(),
            input_root: PathBuf::new(),
            output_root: PathBuf::new(),
            hoist_partials: false,
            lock_unchanged: false,
            max_asset_bytes: 10 * 1024 * 1024,
            baselines: Vec::new(),
            baseline_search_root: None,
            baseline_mode: BaselineMode::Fill,
            write_diff_report: false,
            input_checksum: String::new(),
        }
    }
}

impl FactoryConfig {
    /// Load from a `themeforge.toml` file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ForgeError> {
        tracing::debug!("Reading factory config from {:?}", path.as_ref());
        let content = read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    /// Directory a named baseline resolves to.
    ///
    /// Convention: `.baselines/theme-<name>/src` relative to the current
    /// directory. `baseline_search_root` takes precedence, then
    /// [`BASELINE_ROOT_ENV`], then the `.baselines` default.
    pub fn baseline_root(&self, name: &str) -> PathBuf {
        let base = self
            .baseline_search_root
            .clone()
            .or_else(|| std::env::var(BASELINE_ROOT_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(".baselines"));
        base.join(format!("theme-{name}")).join("src")
    }
}

/// File groups a baseline contributes, mapped to output subdirectories.
///
/// `layouts` → `layout/`, `pages` → `pages/`, `components` → `partials/`,
/// `locales` → `locales/`, `assets` → `assets/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileGroup {
    Layouts,
    Pages,
    Components,
    Locales,
    Assets,
}

impl FileGroup {
    pub const ALL: [FileGroup; 5] = [
        FileGroup::Layouts,
        FileGroup::Pages,
        FileGroup::Components,
        FileGroup::Locales,
        FileGroup::Assets,
    ];

    /// Subdirectory of the baseline source holding this group.
    pub fn source_dir(&self) -> &'static str {
        match self {
            FileGroup::Layouts => "layout",
            FileGroup::Pages => "pages",
            FileGroup::Components => "partials",
            FileGroup::Locales => "locales",
            FileGroup::Assets => "assets",
        }
    }

    /// Output subdirectory this group is copied into.
    pub fn output_dir(&self) -> &'static str {
        self.source_dir()
    }
}

/// Per-baseline configuration, read from `baseline.config.json` in the
/// baseline root when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Groups this baseline contributes. Empty means all groups.
    pub groups: Vec<FileGroup>,
    /// Optional further fallback baseline consulted after this one.
    pub fallback: Option<String>,
    /// Free-form metadata carried into the diff report.
    pub meta: BTreeMap<String, String>,
}

impl BaselineConfig {
    /// Load the config sitting next to a baseline source, defaulting when the
    /// file is absent. A malformed config is a configuration error: silently
    /// ignoring it would copy groups the baseline author excluded.
    pub fn load(baseline_root: &Path) -> Result<Self, ForgeError> {
        let path = baseline_root.join("baseline.config.json");
        if !path.exists() {
            return Ok(BaselineConfig::default());
        }
        let content = read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| ForgeError::Config(format!("Malformed {}: {e}", path.display())))
    }

    pub fn effective_groups(&self) -> Vec<FileGroup> {
        if self.groups.is_empty() {
            FileGroup::ALL.to_vec()
        } else {
            self.groups.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_roundtrips_through_toml() {
        let config = FactoryConfig {
            theme: "storefront".to_string(),
            hoist_partials: true,
            baselines: vec!["hyva".to_string(), "blank".to_string()],
            baseline_mode: BaselineMode::Enrich,
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: FactoryConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.theme, "storefront");
        assert!(parsed.hoist_partials);
        assert_eq!(parsed.baseline_mode, BaselineMode::Enrich);
    }

    #[test]
    fn baseline_config_defaults_when_absent() {
        let tmp = TempDir::new().unwrap();
        let config = BaselineConfig::load(tmp.path()).unwrap();
        assert_eq!(config.effective_groups().len(), FileGroup::ALL.len());
        assert!(config.fallback.is_none());
    }

    #[test]
    fn baseline_config_reads_groups_and_fallback() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("baseline.config.json"),
            r#"{"groups": ["layouts", "components"], "fallback": "blank"}"#,
        )
        .unwrap();
        let config = BaselineConfig::load(tmp.path()).unwrap();
        assert_eq!(
            config.effective_groups(),
            vec![FileGroup::Layouts, FileGroup::Components]
        );
        assert_eq!(config.fallback.as_deref(), Some("blank"));
    }

    #[test]
    fn malformed_baseline_config_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("baseline.config.json"), "{not json").unwrap();
        assert!(matches!(
            BaselineConfig::load(tmp.path()),
            Err(ForgeError::Config(_))
        ));
    }
}
