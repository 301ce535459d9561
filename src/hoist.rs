//! Structural partial hoisting.
//!
//! [`PartialHoister`] consumes the pre-computed per-page component inventory
//! and promotes fragments whose signature occurs at least twice across the
//! whole prototype into shared partial templates. The ≥2 threshold is a hard
//! correctness rule, not a tuning knob: a single-occurrence fragment hoisted
//! to a partial is pure indirection with no dedup benefit.
//!
//! Substitution is byte-identical literal matching. Each attempt produces an
//! explicit [`Substitution`] outcome so a fragment that fails to recur
//! verbatim (trailing whitespace, normalization drift) surfaces as a build
//! warning instead of vanishing silently.

use std::collections::BTreeMap;

use crate::{error::ForgeError, paths::OutputRoot, source::ParsedSource};

/// Result of substituting one hoist candidate into one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    /// The fragment matched byte-for-byte and every occurrence was replaced
    /// with an include directive.
    Replaced { occurrences: usize },
    /// The page's inventory lists the signature, but the canonical fragment
    /// text does not appear verbatim in the page markup.
    Missed,
}

/// One substitution attempt, tagged with its signature for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoistOutcome {
    pub signature: String,
    pub partial_rel: String,
    pub result: Substitution,
}

/// A hoist candidate: a signature with global occurrence count ≥2 and a
/// canonical fragment body.
#[derive(Debug, Clone)]
struct Candidate {
    partial_rel: String,
    fragment: String,
}

/// Plans and applies partial hoisting for one build.
#[derive(Debug, Default)]
pub struct PartialHoister {
    /// Candidates keyed by signature, deterministic iteration order.
    candidates: BTreeMap<String, Candidate>,
}

impl PartialHoister {
    /// Compute global occurrence counts over the component inventory and
    /// retain every signature seen in two or more places. The canonical
    /// fragment body is the first captured markup in page order.
    pub fn from_source(source: &ParsedSource) -> Self {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for fragments in source.layout_map.values() {
            for fragment in fragments {
                *counts.entry(fragment.signature.as_str()).or_default() += 1;
            }
        }

        // Canonical bodies follow page order, not inventory-map key order.
        let mut bodies: BTreeMap<&str, &str> = BTreeMap::new();
        for page in &source.pages {
            for fragment in source.fragments(&page.rel) {
                if let Some(html) = fragment.html.as_deref() {
                    bodies.entry(fragment.signature.as_str()).or_insert(html);
                }
            }
        }

        let mut candidates = BTreeMap::new();
        for (signature, count) in counts {
            if count < 2 {
                continue;
            }
            let Some(fragment) = bodies.get(signature) else {
                tracing::debug!(
                    "Signature {signature:?} recurs {count} times but has no captured markup"
                );
                continue;
            };
            candidates.insert(
                signature.to_string(),
                Candidate {
                    partial_rel: format!("partials/{}.twig", sanitize_signature(signature)),
                    fragment: (*fragment).to_string(),
                },
            );
        }
        PartialHoister { candidates }
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Replace every verbatim occurrence of each candidate listed in the
    /// page's inventory with an include directive. Returns the rewritten
    /// markup plus one tagged outcome per attempted signature.
    pub fn substitute(
        &self,
        source: &ParsedSource,
        page_rel: &str,
        html: &str,
    ) -> (String, Vec<HoistOutcome>) {
        let mut rewritten = html.to_string();
        let mut outcomes = Vec::new();

        // Only attempt signatures the inventory recorded for this page;
        // candidates are global but occurrences are not.
        let mut attempted = BTreeMap::new();
        for fragment in source.fragments(page_rel) {
            if let Some(candidate) = self.candidates.get(&fragment.signature) {
                attempted.insert(fragment.signature.as_str(), candidate);
            }
        }

        for (signature, candidate) in attempted {
            let occurrences = rewritten.matches(&candidate.fragment).count();
            let result = if occurrences > 0 {
                let include = format!("{{% include \"{}\" %}}", candidate.partial_rel);
                rewritten = rewritten.replace(&candidate.fragment, &include);
                Substitution::Replaced { occurrences }
            } else {
                tracing::warn!(
                    "Hoist candidate {signature:?} not found verbatim in {page_rel}"
                );
                Substitution::Missed
            };
            outcomes.push(HoistOutcome {
                signature: signature.to_string(),
                partial_rel: candidate.partial_rel.clone(),
                result,
            });
        }
        (rewritten, outcomes)
    }

    /// Write each candidate fragment once to the partials directory.
    /// Returns the output-relative paths written, sorted by signature.
    pub async fn write_partials(&self, output: &OutputRoot) -> Result<Vec<String>, ForgeError> {
        let mut written = Vec::with_capacity(self.candidates.len());
        for candidate in self.candidates.values() {
            output
                .write(&candidate.partial_rel, candidate.fragment.as_bytes())
                .await?;
            written.push(candidate.partial_rel.clone());
        }
        Ok(written)
    }
}

/// Derive a safe partial filename from an opaque signature string.
pub fn sanitize_signature(signature: &str) -> String {
    let mut out = String::with_capacity(signature.len());
    let mut last_dash = false;
    for c in signature.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '_' {
            last_dash = false;
            c.to_ascii_lowercase()
        } else {
            if last_dash {
                continue;
            }
            last_dash = true;
            '-'
        };
        out.push(mapped);
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "partial".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ComponentFragment, PageSource};
    use tempfile::TempDir;

    fn fragment(signature: &str, html: Option<&str>) -> ComponentFragment {
        ComponentFragment {
            signature: signature.to_string(),
            html: html.map(str::to_string),
        }
    }

    fn two_page_source(footer: &str) -> ParsedSource {
        let mut source = ParsedSource::default();
        for rel in ["index.html", "about.html"] {
            source.pages.push(PageSource {
                rel: rel.to_string(),
                html: format!("<main>{rel}</main>{footer}"),
            });
            source
                .layout_map
                .insert(rel.to_string(), vec![fragment("footer-v1", Some(footer))]);
        }
        source
    }

    #[test]
    fn recurring_fragment_is_replaced_in_every_page() {
        let footer = "<footer><p>© Example</p></footer>";
        let source = two_page_source(footer);
        let hoister = PartialHoister::from_source(&source);
        assert_eq!(hoister.candidate_count(), 1);

        for page in &source.pages {
            let (rewritten, outcomes) = hoister.substitute(&source, &page.rel, &page.html);
            assert!(rewritten.contains("{% include \"partials/footer-v1.twig\" %}"));
            assert!(!rewritten.contains(footer));
            assert_eq!(
                outcomes,
                vec![HoistOutcome {
                    signature: "footer-v1".to_string(),
                    partial_rel: "partials/footer-v1.twig".to_string(),
                    result: Substitution::Replaced { occurrences: 1 },
                }]
            );
        }
    }

    #[test]
    fn single_occurrence_is_never_hoisted() {
        let mut source = ParsedSource::default();
        source.pages.push(PageSource {
            rel: "index.html".to_string(),
            html: "<header>once</header>".to_string(),
        });
        source.layout_map.insert(
            "index.html".to_string(),
            vec![fragment("header-v1", Some("<header>once</header>"))],
        );

        let hoister = PartialHoister::from_source(&source);
        assert_eq!(hoister.candidate_count(), 0);
        let (rewritten, outcomes) =
            hoister.substitute(&source, "index.html", "<header>once</header>");
        assert_eq!(rewritten, "<header>once</header>");
        assert!(outcomes.is_empty());
    }

    #[test]
    fn canonical_body_comes_from_the_first_page_in_page_order() {
        let mut source = ParsedSource::default();
        // Page order is z then a; the inventory map sorts a first.
        for (rel, body) in [("z.html", "<hero>Z</hero>"), ("a.html", "<hero>A</hero>")] {
            source.pages.push(PageSource {
                rel: rel.to_string(),
                html: body.to_string(),
            });
            source
                .layout_map
                .insert(rel.to_string(), vec![fragment("hero-v1", Some(body))]);
        }

        let hoister = PartialHoister::from_source(&source);
        let (rewritten, outcomes) = hoister.substitute(&source, "z.html", "<hero>Z</hero>");
        assert!(rewritten.contains("{% include \"partials/hero-v1.twig\" %}"));
        assert_eq!(outcomes[0].result, Substitution::Replaced { occurrences: 1 });

        // The drifted variant on the later page misses against the canonical
        // body captured from the first page.
        let (unchanged, outcomes) = hoister.substitute(&source, "a.html", "<hero>A</hero>");
        assert_eq!(unchanged, "<hero>A</hero>");
        assert_eq!(outcomes[0].result, Substitution::Missed);
    }

    #[test]
    fn non_verbatim_occurrence_is_tagged_missed() {
        let footer = "<footer>exact</footer>";
        let mut source = two_page_source(footer);
        // Second page drifted by whitespace after inventory capture.
        source.pages[1].html = "<main>about.html</main><footer>exact </footer>".to_string();

        let hoister = PartialHoister::from_source(&source);
        let (rewritten, outcomes) =
            hoister.substitute(&source, "about.html", &source.pages[1].html);
        assert_eq!(rewritten, source.pages[1].html);
        assert_eq!(outcomes[0].result, Substitution::Missed);
    }

    #[test]
    fn signatures_without_markup_only_count() {
        let mut source = ParsedSource::default();
        for rel in ["a.html", "b.html"] {
            source
                .layout_map
                .insert(rel.to_string(), vec![fragment("nav-v2", None)]);
        }
        let hoister = PartialHoister::from_source(&source);
        assert_eq!(hoister.candidate_count(), 0);
    }

    #[test]
    fn sanitized_names_are_safe_filenames() {
        assert_eq!(sanitize_signature("footer-v1"), "footer-v1");
        assert_eq!(sanitize_signature("Nav Bar/Main"), "nav-bar-main");
        assert_eq!(sanitize_signature("../../etc"), "etc");
        assert_eq!(sanitize_signature("§§§"), "partial");
    }

    #[tokio::test]
    async fn partials_are_written_once() {
        let footer = "<footer>shared</footer>";
        let source = two_page_source(footer);
        let hoister = PartialHoister::from_source(&source);

        let tmp = TempDir::new().unwrap();
        let output = OutputRoot::new(tmp.path());
        let written = hoister.write_partials(&output).await.unwrap();
        assert_eq!(written, vec!["partials/footer-v1.twig".to_string()]);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("partials/footer-v1.twig")).unwrap(),
            footer
        );
    }
}
