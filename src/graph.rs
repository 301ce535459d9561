//! Template dependency graph: construction, cycle detection, ordering.
//!
//! The graph is always derived from a full re-scan of the written `layout/`,
//! `pages/`, and `partials/` trees — never tracked in memory during writing —
//! which keeps it valid across resumed or partial builds. Directive parsing
//! sits behind [`parse_directives`] so the regex scan can be swapped for a
//! real template parser without touching graph logic.
//!
//! A detected cycle is a hard failure: silently proceeding risks infinite
//! template recursion at render time.

use once_cell::sync::Lazy;
use petgraph::{
    graph::{Graph, NodeIndex},
    visit::{depth_first_search, Control, DfsEvent},
    Direction,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use walkdir::WalkDir;

use crate::{
    error::ForgeError,
    paths::{to_slash, OutputRoot},
};

/// Subdirectories scanned for templates, in scan order.
pub const TEMPLATE_DIRS: [&str; 3] = ["layout", "pages", "partials"];

/// Informational cache written to `.factory-cache/graph.json`.
pub const GRAPH_CACHE_REL: &str = ".factory-cache/graph.json";

static EXTENDS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{%-?\s*extends\s+(?:"([^"]+)"|'([^']+)')\s*-?%\}"#)
        .expect("extends pattern is valid")
});

static INCLUDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{%-?\s*include\s+(?:"([^"]+)"|'([^']+)')[^%]*-?%\}"#)
        .expect("include pattern is valid")
});

/// Structural relations extracted from one template body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateDirectives {
    pub extends: Vec<String>,
    pub includes: Vec<String>,
}

/// Extract `extends`/`include` targets from template text.
pub fn parse_directives(text: &str) -> TemplateDirectives {
    let capture = |caps: &regex::Captures<'_>| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    };
    TemplateDirectives {
        extends: EXTENDS_RE
            .captures_iter(text)
            .filter_map(|caps| capture(&caps))
            .collect(),
        includes: INCLUDE_RE
            .captures_iter(text)
            .filter_map(|caps| capture(&caps))
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Extends,
    Include,
}

/// One directed relation: `from` references `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// The derived graph plus its validated topological order.
///
/// Directionality: edges run referencing → referenced. The topological order
/// emits every referenced template before any template that references it,
/// so layouts precede the pages extending them and partials precede the
/// pages including them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<TemplateEdge>,
    pub topo_order: Vec<String>,
    pub warnings: Vec<String>,
}

/// Builds the dependency graph by re-reading the emitted template files.
pub struct DependencyGraphBuilder {
    output: OutputRoot,
}

impl DependencyGraphBuilder {
    pub fn new(output: OutputRoot) -> Self {
        DependencyGraphBuilder { output }
    }

    /// Scan the output tree, build the graph, detect cycles, and compute the
    /// topological order. Cycles abort with [`ForgeError::TemplateCycle`].
    pub async fn build(&self) -> Result<DependencyGraph, ForgeError> {
        let mut warnings = Vec::new();
        let mut node_set = BTreeSet::new();
        let mut edges = Vec::new();

        for dir in TEMPLATE_DIRS {
            let root = self.output.path().join(dir);
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warnings.push(format!("graph: unreadable entry skipped: {e}"));
                        continue;
                    }
                };
                if !entry.file_type().is_file()
                    || entry.path().extension().and_then(|e| e.to_str()) != Some("twig")
                {
                    continue;
                }
                let rel = to_slash(&Path::new(dir).join(entry.path().strip_prefix(&root)?));
                let text = tokio::fs::read_to_string(entry.path()).await?;
                let directives = parse_directives(&text);
                node_set.insert(rel.clone());
                for (kind, targets) in [
                    (EdgeKind::Extends, &directives.extends),
                    (EdgeKind::Include, &directives.includes),
                ] {
                    for target in targets {
                        node_set.insert(target.clone());
                        if !self.output.exists(target) {
                            warnings.push(format!(
                                "graph: {rel} references missing template {target}"
                            ));
                        }
                        edges.push(TemplateEdge {
                            from: rel.clone(),
                            to: target.clone(),
                            kind,
                        });
                    }
                }
            }
        }

        let nodes: Vec<String> = node_set.into_iter().collect();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

        // petgraph holds the structure; a name index maps back and forth.
        let mut graph: Graph<String, EdgeKind> = Graph::new();
        let mut index: BTreeMap<&str, NodeIndex> = BTreeMap::new();
        for node in &nodes {
            index.insert(node, graph.add_node(node.clone()));
        }
        for edge in &edges {
            graph.add_edge(index[edge.from.as_str()], index[edge.to.as_str()], edge.kind);
        }

        if let Some(cycle) = find_cycle(&graph) {
            return Err(ForgeError::TemplateCycle(cycle));
        }

        let topo_order = kahn_order(&graph);
        // Kahn omits cyclic nodes; a truncated order is a cycle signal even
        // if the DFS above somehow missed it.
        if topo_order.len() < nodes.len() {
            let ordered: BTreeSet<&String> = topo_order.iter().collect();
            let stuck: Vec<String> = nodes
                .iter()
                .filter(|n| !ordered.contains(n))
                .cloned()
                .collect();
            return Err(ForgeError::TemplateCycle(stuck));
        }

        Ok(DependencyGraph {
            nodes,
            edges,
            topo_order,
            warnings,
        })
    }

    /// Persist the informational graph cache for downstream display tools.
    pub async fn write_cache(&self, graph: &DependencyGraph) -> Result<(), ForgeError> {
        let json = serde_json::to_string_pretty(graph)?;
        self.output.write(GRAPH_CACHE_REL, json.as_bytes()).await?;
        Ok(())
    }
}

/// Depth-first cycle search. A back edge — a target still on the "currently
/// visiting" stack — indicates a cycle; members are recovered by walking the
/// recorded tree-edge predecessors. Returns the first cycle found.
fn find_cycle(graph: &Graph<String, EdgeKind>) -> Option<Vec<String>> {
    let mut predecessor = vec![NodeIndex::end(); graph.node_count()];
    let mut back_edge = None;
    depth_first_search(graph, graph.node_indices(), |event| match event {
        DfsEvent::TreeEdge(source, target) => {
            predecessor[target.index()] = source;
            Control::Continue
        }
        DfsEvent::BackEdge(source, target) => {
            back_edge = Some((source, target));
            Control::Break(())
        }
        _ => Control::<()>::Continue,
    });

    let (from, to) = back_edge?;
    let mut members = vec![from];
    let mut current = from;
    while current != to {
        current = predecessor[current.index()];
        members.push(current);
    }
    members.reverse();
    Some(members.into_iter().map(|i| graph[i].clone()).collect())
}

/// Kahn's algorithm over out-degree counts, emitting referenced templates
/// before their referencers. Cyclic nodes are omitted from the result, so a
/// truncated order is itself a cycle signal.
fn kahn_order(graph: &Graph<String, EdgeKind>) -> Vec<String> {
    // degree = number of outgoing references still unemitted.
    let mut degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Outgoing).count())
        .collect();

    let mut queue: VecDeque<NodeIndex> = graph
        .node_indices()
        .filter(|n| degree[n.index()] == 0)
        .collect();
    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(node) = queue.pop_front() {
        order.push(graph[node].clone());
        for source in graph.neighbors_directed(node, Direction::Incoming) {
            degree[source.index()] -= 1;
            if degree[source.index()] == 0 {
                queue.push_back(source);
            }
        }
    }
    order
}
