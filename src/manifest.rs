//! Build manifest: the machine-readable completeness and reproducibility
//! signal emitted once per build as `manifest.json`.
//!
//! The checksum covers the structural output tree only (`layout/`, `pages/`,
//! `partials/`, `locales/`, `assets/`), hashed in path-sorted order so two
//! builds from byte-identical inputs produce identical values regardless of
//! traversal or wall-clock time. Timestamps are recorded separately and
//! excluded from the hash domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use crate::{error::ForgeError, paths::to_slash, paths::OutputRoot};

pub const MANIFEST_REL: &str = "manifest.json";

/// Output subtrees that participate in the checksum. Reports, caches, and
/// the manifest itself stay outside the hash domain.
const STRUCTURAL_DIRS: [&str; 5] = ["layout", "pages", "partials", "locales", "assets"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub theme: String,
    pub pages: usize,
    pub components: usize,
    pub assets: usize,
    /// SHA-256 over the path-sorted (relative path, content) sequence of
    /// every structural file.
    pub checksum: String,
    /// Externally supplied checksum of the parsed input, carried through for
    /// downstream validators.
    pub input_checksum: String,
    pub warnings: Vec<String>,
    pub failed_files: Vec<String>,
    /// Template emission order from the dependency graph: every referenced
    /// template precedes its referencers.
    pub page_order: Vec<String>,
    pub generated_at: Option<DateTime<Utc>>,
}

pub struct BuildManifestGenerator {
    output: OutputRoot,
}

impl BuildManifestGenerator {
    pub fn new(output: OutputRoot) -> Self {
        BuildManifestGenerator { output }
    }

    /// Hash the completed output tree and assemble the manifest. Counts are
    /// derived from the same walk that feeds the checksum.
    pub async fn generate(
        &self,
        theme: &str,
        input_checksum: &str,
        page_order: Vec<String>,
        warnings: Vec<String>,
        failed_files: Vec<String>,
    ) -> Result<BuildManifest, ForgeError> {
        let mut entries = Vec::new();
        for dir in STRUCTURAL_DIRS {
            let root = self.output.path().join(dir);
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let rel = entry
                    .path()
                    .strip_prefix(self.output.path())
                    .map(to_slash)
                    .unwrap_or_default();
                entries.push((rel, entry.path().to_path_buf()));
            }
        }
        // Path-sorted hashing makes the checksum independent of walk order.
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        let mut manifest = BuildManifest {
            theme: theme.to_string(),
            input_checksum: input_checksum.to_string(),
            warnings,
            failed_files,
            page_order,
            generated_at: Some(Utc::now()),
            ..Default::default()
        };
        for (rel, path) in &entries {
            let bytes = tokio::fs::read(path).await?;
            hasher.update(rel.as_bytes());
            hasher.update(&bytes);
            match rel.split('/').next() {
                Some("pages") => manifest.pages += 1,
                Some("partials") => manifest.components += 1,
                Some("assets") => manifest.assets += 1,
                _ => {}
            }
        }
        manifest.checksum = hex::encode(hasher.finalize());
        tracing::info!(
            "Manifest for theme {theme:?}: {} page(s), {} component(s), {} asset(s), checksum {}",
            manifest.pages,
            manifest.components,
            manifest.assets,
            manifest.checksum
        );
        Ok(manifest)
    }

    /// Persist the manifest. Best-effort by contract: callers log and
    /// continue on failure since the manifest is advisory.
    pub async fn persist(&self, manifest: &BuildManifest) -> Result<(), ForgeError> {
        let json = serde_json::to_string_pretty(manifest)?;
        self.output.write(MANIFEST_REL, json.as_bytes()).await?;
        Ok(())
    }
}

/// Checksum helper for callers that want the hash of an arbitrary tree with
/// the same domain rules, used to fingerprint parsed inputs.
pub async fn checksum_tree(root: &Path) -> Result<String, ForgeError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(root)
            .map(to_slash)
            .unwrap_or_default();
        entries.push((rel, entry.path().to_path_buf()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = Sha256::new();
    for (rel, path) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update(&tokio::fs::read(path).await?);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_tree(output: &OutputRoot) {
        for (rel, content) in [
            ("layout/default.twig", "layout"),
            ("pages/index.twig", "index"),
            ("pages/cart.twig", "cart"),
            ("partials/footer.twig", "footer"),
            ("assets/site.css", "body{}"),
            ("reports/baseline-summary.json", "{}"),
            (".factory-cache/graph.json", "{}"),
        ] {
            output.write(rel, content.as_bytes()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn counts_follow_output_subtrees() {
        let tmp = TempDir::new().unwrap();
        let output = OutputRoot::new(tmp.path());
        write_tree(&output).await;

        let generator = BuildManifestGenerator::new(output);
        let manifest = generator
            .generate("storefront", "in-123", Vec::new(), Vec::new(), Vec::new())
            .await
            .unwrap();
        assert_eq!(manifest.pages, 2);
        assert_eq!(manifest.components, 1);
        assert_eq!(manifest.assets, 1);
        assert_eq!(manifest.input_checksum, "in-123");
    }

    #[tokio::test]
    async fn checksum_is_stable_across_time_and_excludes_reports() {
        let tmp = TempDir::new().unwrap();
        let output = OutputRoot::new(tmp.path());
        write_tree(&output).await;
        let generator = BuildManifestGenerator::new(output.clone());

        let first = generator
            .generate("t", "", Vec::new(), Vec::new(), Vec::new())
            .await
            .unwrap();
        // Mutating non-structural files between runs must not move the hash.
        output
            .write("reports/baseline-summary.json", b"{\"changed\": true}")
            .await
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = generator
            .generate("t", "", Vec::new(), Vec::new(), Vec::new())
            .await
            .unwrap();

        assert_eq!(first.checksum, second.checksum);
        assert_ne!(first.generated_at, second.generated_at);
    }

    #[tokio::test]
    async fn checksum_moves_with_structural_content() {
        let tmp = TempDir::new().unwrap();
        let output = OutputRoot::new(tmp.path());
        write_tree(&output).await;
        let generator = BuildManifestGenerator::new(output.clone());

        let before = generator
            .generate("t", "", Vec::new(), Vec::new(), Vec::new())
            .await
            .unwrap();
        output.write("pages/index.twig", b"edited").await.unwrap();
        let after = generator
            .generate("t", "", Vec::new(), Vec::new(), Vec::new())
            .await
            .unwrap();
        assert_ne!(before.checksum, after.checksum);
    }

    #[tokio::test]
    async fn tree_checksum_fingerprints_content_not_location() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        for dir in [a.path(), b.path()] {
            std::fs::create_dir_all(dir.join("img")).unwrap();
            std::fs::write(dir.join("index.html"), "<h1>Home</h1>").unwrap();
            std::fs::write(dir.join("img/logo.png"), "bytes").unwrap();
        }

        // Identical trees at different locations hash identically.
        assert_eq!(
            checksum_tree(a.path()).await.unwrap(),
            checksum_tree(b.path()).await.unwrap()
        );

        std::fs::write(b.path().join("index.html"), "<h1>Edited</h1>").unwrap();
        assert_ne!(
            checksum_tree(a.path()).await.unwrap(),
            checksum_tree(b.path()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn manifest_persists_as_json() {
        let tmp = TempDir::new().unwrap();
        let output = OutputRoot::new(tmp.path());
        write_tree(&output).await;
        let generator = BuildManifestGenerator::new(output.clone());

        let manifest = generator
            .generate("t", "", vec!["layout/default.twig".to_string()], Vec::new(), Vec::new())
            .await
            .unwrap();
        generator.persist(&manifest).await.unwrap();

        let reloaded: BuildManifest = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join(MANIFEST_REL)).unwrap(),
        )
        .unwrap();
        assert_eq!(reloaded, manifest);
    }
}
