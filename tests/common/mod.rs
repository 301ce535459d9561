//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use themeforge::source::{ComponentFragment, PageSource, ParsedSource};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times — subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Ten fixed bytes standing in for image content.
#[allow(dead_code)]
pub const LOGO_BYTES: &[u8] = b"PNG<data>!";

/// Shared footer markup used by the hoisting fixtures.
#[allow(dead_code)]
pub const FOOTER_HTML: &str = "<footer><p>© Storefront</p></footer>";

/// Create a small prototype directory: two pages sharing a footer fragment,
/// both referencing `img/logo.png`, plus a stylesheet under `assets/`.
///
/// Returns the prototype root (e.g. `<temp_dir>/prototype/`).
#[allow(dead_code)]
pub fn create_prototype(temp_dir: &TempDir) -> PathBuf {
    let root = temp_dir.path().join("prototype");
    std::fs::create_dir_all(root.join("img")).unwrap();
    std::fs::create_dir_all(root.join("assets/css")).unwrap();

    std::fs::write(root.join("img/logo.png"), LOGO_BYTES).unwrap();
    std::fs::write(root.join("assets/css/site.css"), "body { margin: 0 }").unwrap();

    let index = format!(
        "<header><img src=\"img/logo.png\" alt=\"logo\"></header>\n<h1>Home</h1>\n{FOOTER_HTML}"
    );
    let cart = format!(
        "<header><img src=\"./img/logo.png\" alt=\"logo\"></header>\n<h1>Cart</h1>\n{FOOTER_HTML}"
    );
    std::fs::write(root.join("index.html"), &index).unwrap();
    std::fs::write(root.join("cart.html"), &cart).unwrap();

    root
}

/// Build the [`ParsedSource`] an upstream parser would produce for
/// [`create_prototype`]: both pages carry the `footer-v1` fragment in their
/// component inventory.
#[allow(dead_code)]
pub fn parse_prototype(root: &Path) -> ParsedSource {
    let mut source = ParsedSource {
        input_root: root.to_path_buf(),
        ..Default::default()
    };
    for rel in ["index.html", "cart.html"] {
        source.pages.push(PageSource {
            rel: rel.to_string(),
            html: std::fs::read_to_string(root.join(rel)).unwrap(),
        });
        source.layout_map.insert(
            rel.to_string(),
            vec![ComponentFragment {
                signature: "footer-v1".to_string(),
                html: Some(FOOTER_HTML.to_string()),
            }],
        );
    }
    source
}

/// Create a baseline source `<search_root>/theme-<name>/src` populated with
/// the given (relative path, content) files. Returns the baseline root.
#[allow(dead_code)]
pub fn create_baseline(search_root: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let root = search_root.join(format!("theme-{name}")).join("src");
    for (rel, content) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
    root
}
