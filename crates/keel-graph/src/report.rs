//! Read-only view of a resolved graph for generators.
//!
//! A [`GraphReport`] flattens the arena into plain records: node indices
//! become integers, traits are final, and conflicts carry both requiring
//! paths. It serializes to JSON with `serde_json`.

use std::io::Write;

use keel_core::model::{PackageType, RequirementKind, Traits};
use serde::{Deserialize, Serialize};

use crate::binary::BinaryState;
use crate::error::{ResolveError, format_path};
use crate::graph::{ConflictKind, Context, Graph};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphReport {
    pub roots: Vec<usize>,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
    pub conflicts: Vec<ConflictRecord>,
    pub errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub index: usize,
    pub reference: String,
    pub context: Context,
    pub package_type: PackageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<BinaryState>,
    pub requiring_path: Vec<String>,
    /// One entry per reachable dependency.
    pub dependencies: Vec<TransitiveRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitiveRecord {
    pub dependency: usize,
    pub direct: bool,
    pub traits: Traits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub src: usize,
    pub dst: usize,
    pub kind: RequirementKind,
    pub traits: Traits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub kind: String,
    pub name: String,
    pub existing: String,
    pub existing_path: Vec<String>,
    pub requested: String,
    pub requested_path: Vec<String>,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorRecord {
    #[must_use]
    pub fn from_error(error: &ResolveError) -> Self {
        Self {
            code: error.code().code().to_string(),
            message: error.to_string(),
            hint: error.hint().map(str::to_string),
        }
    }
}

impl GraphReport {
    /// Snapshot `graph`, with `extra` errors (e.g. from binary resolution)
    /// appended to the graph's own.
    #[must_use]
    pub fn new(graph: &Graph, extra: &[ResolveError]) -> Self {
        let nodes = graph
            .nodes()
            .map(|(id, node)| NodeRecord {
                index: id.index(),
                reference: node.reference.to_string(),
                context: node.context,
                package_type: node.package_type,
                package_id: node.package_id.as_ref().map(|p| p.hash.clone()),
                package_revision: node.package_revision().map(str::to_string),
                binary: node.binary.as_ref().map(|s| s.state),
                requiring_path: graph.requiring_path(id),
                dependencies: graph
                    .transitive_deps(id)
                    .map(|t| TransitiveRecord {
                        dependency: t.dependency.index(),
                        direct: t.direct,
                        traits: t.traits,
                    })
                    .collect(),
            })
            .collect();

        let edges = graph
            .all_edges()
            .map(|(src, dst, edge)| EdgeRecord {
                src: src.index(),
                dst: dst.index(),
                kind: edge.kind,
                traits: edge.traits,
            })
            .collect();

        let conflicts = graph
            .conflicts()
            .iter()
            .map(|c| ConflictRecord {
                kind: match c.kind {
                    ConflictKind::Version => "version".to_string(),
                    ConflictKind::Revision => "revision".to_string(),
                },
                name: c.name.clone(),
                existing: c.existing.clone(),
                existing_path: c.existing_path.clone(),
                requested: c.requested.clone(),
                requested_path: c.requested_path.clone(),
                resolved: c.resolved,
            })
            .collect();

        let errors = graph
            .errors()
            .iter()
            .chain(extra)
            .map(ErrorRecord::from_error)
            .collect();

        Self {
            roots: graph.roots().iter().map(|r| r.index()).collect(),
            nodes,
            edges,
            conflicts,
            errors,
        }
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text rendering: one line per node, then problems.
    ///
    /// # Errors
    ///
    /// Propagates write errors.
    pub fn render_human(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "Dependency graph ({} nodes, {} edges)",
            self.nodes.len(),
            self.edges.len()
        )?;
        for node in &self.nodes {
            let id = match (&node.package_id, &node.package_revision) {
                (Some(id), Some(prev)) => format!(":{id}#{prev}"),
                (Some(id), None) => format!(":{id}"),
                _ => String::new(),
            };
            let state = node.binary.map_or_else(String::new, |s| format!(" [{s}]"));
            writeln!(w, "  - {} ({}){id}{state}", node.reference, node.context)?;
        }

        let auto_resolved: Vec<&ConflictRecord> =
            self.conflicts.iter().filter(|c| c.resolved).collect();
        if !auto_resolved.is_empty() {
            writeln!(w)?;
            writeln!(w, "Resolved conflicts:")?;
            for c in auto_resolved {
                writeln!(
                    w,
                    "  - {}: kept {} ({}), wanted {} ({})",
                    c.name,
                    c.existing,
                    format_path(&c.existing_path),
                    c.requested,
                    format_path(&c.requested_path)
                )?;
            }
        }

        if !self.errors.is_empty() {
            writeln!(w)?;
            writeln!(w, "Errors:")?;
            for e in &self.errors {
                writeln!(w, "  - [{}] {}", e.code, e.message)?;
                if let Some(hint) = &e.hint {
                    writeln!(w, "    hint: {hint}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResolutionContext;
    use crate::graph::build::GraphBuilder;
    use crate::recipe::{Recipe, RecipeIndex};
    use keel_core::model::{PackageReference, Requirement};

    fn reference(text: &str) -> PackageReference {
        PackageReference::parse(text).unwrap()
    }

    fn graph() -> Graph {
        let index = RecipeIndex::new()
            .with(
                Recipe::new(reference("a/1.0#r"))
                    .requiring(Requirement::requires("c/1.0").unwrap()),
            )
            .with(
                Recipe::new(reference("b/1.0#r"))
                    .requiring(Requirement::requires("c/2.0").unwrap()),
            )
            .with(Recipe::new(reference("c/1.0#r")))
            .with(Recipe::new(reference("c/2.0#r")));
        let root = Recipe::consumer(reference("root/1.0"))
            .requiring(Requirement::requires("a/1.0").unwrap())
            .requiring(Requirement::requires("b/1.0").unwrap());
        GraphBuilder::new(&index, &ResolutionContext::default())
            .build(root)
            .unwrap()
    }

    #[test]
    fn report_flattens_nodes_edges_and_conflicts() {
        let report = GraphReport::new(&graph(), &[]);
        assert_eq!(report.roots, [0]);
        assert_eq!(report.nodes.len(), 4);
        assert_eq!(report.edges.len(), 3);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, "E2004");

        let root = &report.nodes[0];
        assert_eq!(root.dependencies.len(), 3);
        assert!(root.package_id.is_none());
    }

    #[test]
    fn json_round_trips() {
        let report = GraphReport::new(&graph(), &[]);
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["nodes"][0]["context"], "host");
        assert_eq!(value["edges"][0]["kind"], "require");
        assert!(value["nodes"][0].get("package_id").is_none());
        let back: GraphReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn human_rendering_lists_errors() {
        let mut out = Vec::new();
        GraphReport::new(&graph(), &[]).render_human(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Dependency graph (4 nodes, 3 edges)"));
        assert!(text.contains("[E2004] version conflict for 'c'"));
    }
}
