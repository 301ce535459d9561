//! Asset normalization and content-addressed copying.
//!
//! [`AssetNormalizer`] rewrites relative `src=`/`href=` references inside
//! page markup to content-addressed paths under `assets/normalized/` and
//! copies the referenced bytes into the output tree exactly once per distinct
//! (path, hash) pair. Identical source bytes always normalize to the
//! identical output path — the basis for build reproducibility.
//!
//! Also hosts the two verbatim-copy side channels driven by the template
//! adapter: the prototype `assets/` subtree and per-page inline scripts.

use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::BTreeSet,
    path::{Component, Path, PathBuf},
};
use walkdir::WalkDir;

use crate::{
    error::ForgeError,
    paths::{to_slash, OutputRoot},
};

/// `src=`/`href=` attribute values in either quote style.
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(src|href)\s*=\s*(?:"([^"]+)"|'([^']+)')"#)
        .expect("asset attribute pattern is valid")
});

/// An asset reference extracted from markup. Ephemeral: created and consumed
/// within one normalization pass over one page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AssetReference {
    /// The raw attribute value as written in the page.
    url: String,
    /// `'"'` or `'\''`, preserved so rewriting keeps the original quoting.
    quote: char,
}

/// Rewrites asset references for a whole build. One instance spans all pages
/// so the (path, hash) dedup set is global.
pub struct AssetNormalizer {
    input_root: PathBuf,
    output: OutputRoot,
    /// (input-root-relative path, short hash) pairs already copied.
    seen: BTreeSet<(String, String)>,
    pub copied: usize,
    pub warnings: Vec<String>,
}

impl AssetNormalizer {
    pub fn new(input_root: impl Into<PathBuf>, output: OutputRoot) -> Self {
        AssetNormalizer {
            input_root: input_root.into(),
            output,
            seen: BTreeSet::new(),
            copied: 0,
            warnings: Vec::new(),
        }
    }

    /// Rewrite every normalizable asset reference in one page's markup,
    /// copying referenced bytes into the output asset tree.
    ///
    /// Unreadable or missing source files are left as originally referenced —
    /// broken references become validator warnings, not build errors.
    pub async fn normalize_page(
        &mut self,
        page_rel: &str,
        html: &str,
    ) -> Result<String, ForgeError> {
        let page_dir = Path::new(page_rel).parent().unwrap_or(Path::new(""));
        let references = extract_references(html);

        let mut rewritten = html.to_string();
        for reference in references {
            let Some(source_rel) = self.resolve_reference(page_dir, &reference.url) else {
                continue;
            };
            let source_path = self.input_root.join(&source_rel);
            let bytes = match tokio::fs::read(&source_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!("Leaving {:?} unnormalized: {}", reference.url, e);
                    self.warnings.push(format!(
                        "{page_rel}: asset '{}' unreadable, left unnormalized: {e}",
                        reference.url
                    ));
                    continue;
                }
            };

            let hash = short_hash(&bytes);
            let normalized_rel = normalized_path(&source_rel, &hash);
            let key = (to_slash(&source_rel), hash);
            if self.seen.insert(key) {
                self.output.write(&normalized_rel, &bytes).await?;
                self.copied += 1;
            }

            // Exact-match replacement of the quoted token, so unrelated text
            // that merely contains the url is never touched.
            let q = reference.quote;
            let original = format!("{q}{}{q}", reference.url);
            let replacement = format!("{q}{}{q}", to_slash(&normalized_rel));
            rewritten = rewritten.replace(&original, &replacement);
        }
        Ok(rewritten)
    }

    /// Resolve a candidate reference to an input-root-relative file path.
    /// Returns `None` for references that are out of normalization scope.
    fn resolve_reference(&self, page_dir: &Path, url: &str) -> Option<PathBuf> {
        if !is_candidate(url) {
            return None;
        }
        // Strip query string and fragment before touching the filesystem.
        let path_part = url.split(['?', '#']).next().unwrap_or(url);
        if path_part.is_empty() {
            return None;
        }

        // Lexical resolution against the page directory. References that
        // climb above the input root are out of scope.
        let mut resolved = Vec::new();
        for component in page_dir.components().chain(Path::new(path_part).components()) {
            match component {
                Component::Normal(part) => resolved.push(PathBuf::from(part)),
                Component::ParentDir => {
                    resolved.pop()?;
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        let rel: PathBuf = resolved.iter().collect();
        let full = self.input_root.join(&rel);
        match std::fs::metadata(&full) {
            Ok(meta) if meta.is_file() => Some(rel),
            _ => None,
        }
    }
}

fn extract_references(html: &str) -> Vec<AssetReference> {
    let mut references = Vec::new();
    for caps in ATTR_RE.captures_iter(html) {
        let (url, quote) = if let Some(double) = caps.get(2) {
            (double.as_str(), '"')
        } else if let Some(single) = caps.get(3) {
            (single.as_str(), '\'')
        } else {
            continue;
        };
        let reference = AssetReference {
            url: url.to_string(),
            quote,
        };
        if !references.contains(&reference) {
            references.push(reference);
        }
    }
    references
}

/// Whether a raw attribute value is eligible for normalization: relative,
/// not already content-addressed, and not an external or pseudo reference.
fn is_candidate(url: &str) -> bool {
    if url.is_empty()
        || url.starts_with("//")
        || url.starts_with('/')
        || url.starts_with('#')
        || url.starts_with("assets/")
    {
        return false;
    }
    // Any scheme (http:, https:, data:, mailto:, tel:, ...) is external.
    if let Some(colon) = url.find(':') {
        let scheme = &url[..colon];
        if !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return false;
        }
    }
    true
}

/// First 8 hex characters of the MD5 digest of `bytes`.
pub fn short_hash(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    hex::encode(digest)[..8].to_string()
}

/// Content-addressed output path for a source file:
/// `assets/normalized/<rel-without-ext>.<hash><ext>`.
fn normalized_path(source_rel: &Path, hash: &str) -> PathBuf {
    let stem = source_rel.with_extension("");
    let ext = source_rel
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let file = format!("{}.{hash}{ext}", to_slash(&stem));
    Path::new("assets/normalized").join(file)
}

/// Copy the prototype `assets/` subtree verbatim into the output, applying
/// the max-file-size filter and refusing to follow symlinks.
pub async fn copy_asset_tree(
    input_root: &Path,
    output: &OutputRoot,
    max_bytes: u64,
) -> Result<(usize, Vec<String>), ForgeError> {
    let source = input_root.join("assets");
    if !source.is_dir() {
        return Ok((0, Vec::new()));
    }

    let mut copied = 0;
    let mut warnings = Vec::new();
    for entry in WalkDir::new(&source).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warnings.push(format!("assets: unreadable entry skipped: {e}"));
                continue;
            }
        };
        if entry.file_type().is_symlink() {
            warnings.push(format!(
                "assets: symlink {:?} not followed",
                entry.path()
            ));
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > max_bytes {
            warnings.push(format!(
                "assets: {:?} exceeds size limit ({size} > {max_bytes} bytes), skipped",
                entry.path()
            ));
            continue;
        }
        let rel = Path::new("assets").join(entry.path().strip_prefix(&source)?);
        output.copy_in(entry.path(), &rel).await?;
        copied += 1;
    }
    Ok((copied, warnings))
}

/// Write a page's extracted inline scripts to `assets/js/<page>-<n>.js`.
/// Returns the output-relative paths written.
pub async fn write_inline_scripts(
    output: &OutputRoot,
    page_rel: &str,
    scripts: &[String],
) -> Result<Vec<String>, ForgeError> {
    let stem = Path::new(page_rel).with_extension("");
    let page_key = to_slash(&stem).replace('/', "-");
    let mut written = Vec::with_capacity(scripts.len());
    for (index, script) in scripts.iter().enumerate() {
        let rel = format!("assets/js/{page_key}-{index}.js");
        output.write(&rel, script.as_bytes()).await?;
        written.push(rel);
    }
    Ok(written)
}
