//! # themeforge
//!
//! A Rust library that converts a parsed static HTML/CSS/JS prototype into a
//! deployable Twig theme package.
//!
//! ## Overview
//!
//! themeforge consumes a [`ParsedSource`](source::ParsedSource) — the output
//! of an upstream prototype parser — and produces a complete theme output
//! tree: layout shell, page templates wrapped in a layout-extension envelope,
//! hoisted partials, content-addressed assets, locale files filled from
//! baseline theme sources, and a reproducible build manifest.
//!
//! ### Key Features
//!
//! - **Asset normalization**: relative asset references are rewritten to
//!   content-addressed paths; identical bytes referenced from multiple pages
//!   converge on one physical file
//! - **Partial hoisting**: markup fragments recurring across pages are
//!   extracted to standalone partials and replaced with include directives
//! - **Dependency graph**: the emitted templates are scanned for
//!   `extends`/`include` relations; cycles are fatal, and a topological
//!   order emits every referenced template before its referencers
//! - **Baseline completion**: ordered fallback theme sources fill structural
//!   gaps in `fill`, `enrich`, or `force` mode, with a persisted audit trail
//! - **Reproducible manifest**: a single checksum over the structural output
//!   tree, stable across wall-clock time
//! - **Strict containment**: every write resolves inside the output root; a
//!   traversal or symlink escape aborts that file operation
//!
//! ## Architecture
//!
//! The library is organized around the pipeline stages:
//!
//! - **[`adapter`]**: per-page orchestration and template layout (`TemplateAdapter`)
//! - **[`assets`]**: reference rewriting and asset copying (`AssetNormalizer`)
//! - **[`hoist`]**: recurring-fragment extraction (`PartialHoister`)
//! - **[`graph`]**: dependency scanning, cycle detection, ordering (`DependencyGraphBuilder`)
//! - **[`baseline`]**: gap filling from fallback themes (`BaselineCompletionEngine`)
//! - **[`manifest`]**: checksum and build manifest (`BuildManifestGenerator`)
//! - **[`pipeline`]**: stage sequencing and the output lock (`ThemeFactory`)
//!
//! ## Quick Start
//!
//! Build a theme from a parsed prototype:
//!
//! ```rust,no_run
//! use themeforge::{
//!     config::FactoryConfig,
//!     pipeline::ThemeFactory,
//!     source::{PageSource, ParsedSource},
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FactoryConfig {
//!         theme: "storefront".to_string(),
//!         input_root: "./prototype".into(),
//!         output_root: "./output/storefront".into(),
//!         baselines: vec!["blank".to_string()],
//!         ..Default::default()
//!     };
//!
//!     let source = ParsedSource {
//!         input_root: "./prototype".into(),
//!         pages: vec![PageSource {
//!             rel: "index.html".to_string(),
//!             html: "<h1>Home</h1>".to_string(),
//!         }],
//!         ..Default::default()
//!     };
//!
//!     let factory = ThemeFactory::new(config);
//!     let report = factory.build(&source).await?;
//!
//!     println!("checksum: {}", report.manifest.checksum);
//!     for warning in report.warnings() {
//!         println!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Output Layout
//!
//! ```text
//! layout/default.twig
//! pages/<rel>.twig
//! partials/<signature-derived-name>.twig
//! assets/            (copied + normalized/<hash>.<ext> + js/<page>-<n>.js)
//! locales/
//! reports/baseline-summary.json
//! reports/baseline-diff.md
//! manifest.json
//! .factory-cache/graph.json
//! ```
//!
//! ## Module Guide
//!
//! Start with [`pipeline::ThemeFactory`] for full builds, or drive individual
//! stages directly: [`adapter::TemplateAdapter`] for template emission,
//! [`baseline::BaselineCompletionEngine`] for completion alone.

pub mod adapter;
pub mod assets;
pub mod baseline;
pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod hoist;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod source;

pub use error::*;
