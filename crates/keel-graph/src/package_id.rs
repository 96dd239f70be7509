//! Package ID computation.
//!
//! A node's package ID is the BLAKE3 digest of a canonical text built from,
//! in order: its name and version, the settings and options its recipe
//! declares relevant, and one line per `Require` dependency whose detail is
//! set by the node's *own* [`PackageIdMode`]. Build and test requirements
//! never feed the ID.
//!
//! IDs are computed leaves first. Nodes on the same topological level do
//! not depend on each other and are hashed in parallel.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use keel_core::model::{Options, PackageId, PackageIdMode, RequirementKind, Settings};
use rayon::prelude::*;
use tracing::{debug, instrument, trace};

use crate::error::GraphError;
use crate::graph::{Graph, Node, NodeId};

/// Everything a package ID is hashed from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdInputs {
    pub name: String,
    pub version: String,
    pub settings: Settings,
    pub options: Options,
    /// Dependency name to its identity line.
    pub requires: BTreeMap<String, String>,
}

impl IdInputs {
    /// The canonical text that is hashed.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[package]\nname={}\nversion={}", self.name, self.version);
        out.push_str("[settings]\n");
        for (key, value) in self.settings.iter() {
            let _ = writeln!(out, "{}={}", escape(key), escape(value));
        }
        out.push_str("[options]\n");
        for (key, value) in self.options.iter() {
            let _ = writeln!(out, "{}={}", escape(key), escape(value));
        }
        out.push_str("[requires]\n");
        for line in self.requires.values() {
            let _ = writeln!(out, "{line}");
        }
        out
    }

    /// Hex BLAKE3 digest of [`IdInputs::canonical`].
    #[must_use]
    pub fn hash(&self) -> String {
        blake3::hash(self.canonical().as_bytes()).to_hex().to_string()
    }
}

/// Each canonical line holds exactly one unescaped `=` and no line break.
fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['\\', '\n', '\r', '=']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 4);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' => out.push_str("\\="),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// How `dependency` appears in a consumer using `mode`.
///
/// Unknown revisions or IDs are written as `?`, so learning them later
/// changes the line.
#[must_use]
pub fn contribution(dependency: &Node, mode: PackageIdMode) -> String {
    let fields = mode.fields();
    let reference = &dependency.reference;
    let mut line = reference.name.clone();
    if fields.version {
        let _ = write!(line, "/{}", reference.version);
    }
    if fields.user_channel {
        if let Some(user) = &reference.user {
            let _ = write!(line, "@{user}");
        }
        if let Some(channel) = &reference.channel {
            let _ = write!(line, "/{channel}");
        }
    }
    if fields.recipe_revision {
        let _ = write!(line, "#{}", reference.revision.as_deref().unwrap_or("?"));
    }
    if fields.package_id {
        let hash = dependency.package_id.as_ref().map_or("?", |id| id.hash.as_str());
        let _ = write!(line, ":{hash}");
    }
    if fields.package_revision {
        let _ = write!(line, "#{}", dependency.package_revision().unwrap_or("?"));
    }
    line
}

/// Derive the ID inputs of `id` from the current graph state.
#[must_use]
pub fn compute_inputs(graph: &Graph, id: NodeId) -> IdInputs {
    let node = &graph[id];
    let mode = node.mode;
    let mut requires = BTreeMap::new();

    for (dst, edge) in graph.edges(id) {
        if edge.kind != RequirementKind::Require {
            continue;
        }
        let dependency = &graph[dst];
        requires.insert(dependency.reference.name.clone(), contribution(dependency, mode));
        if mode.is_recursive() {
            for transitive in graph.transitive_deps(dst) {
                if transitive.traits.visible && !transitive.traits.build {
                    let upstream = &graph[transitive.dependency];
                    requires
                        .entry(upstream.reference.name.clone())
                        .or_insert_with(|| contribution(upstream, mode));
                }
            }
        }
    }

    IdInputs {
        name: node.reference.name.clone(),
        version: node.reference.version.to_string(),
        settings: node.settings.filtered(&node.settings_used_in_id),
        options: node.options.filtered(&node.options_used_in_id),
        requires,
    }
}

/// Compute every package ID, leaves first. Returns the number of nodes
/// hashed.
///
/// # Errors
///
/// Returns [`GraphError::StructuralCycle`] if the graph is not a DAG.
#[instrument(skip(graph), fields(nodes = graph.node_count()))]
pub fn compute_package_ids(graph: &mut Graph) -> Result<usize, GraphError> {
    let levels = graph.levels()?;
    let mut hashed = 0;

    for level in levels {
        let computed: Vec<(NodeId, IdInputs, String)> = level
            .par_iter()
            .map(|&id| {
                let inputs = compute_inputs(graph, id);
                let hash = inputs.hash();
                (id, inputs, hash)
            })
            .collect();

        for (id, inputs, hash) in computed {
            trace!(reference = %graph[id].reference, package_id = %hash, "package id");
            let node = &mut graph[id];
            node.package_id = Some(PackageId::new(hash));
            node.id_inputs = Some(inputs);
            hashed += 1;
        }
    }

    debug!(hashed, "package ids computed");
    Ok(hashed)
}

/// Recompute `id`'s inputs; when they differ from the snapshot its ID was
/// hashed from, rehash and clear the package revision. Returns whether the
/// ID changed.
pub fn refresh(graph: &mut Graph, id: NodeId) -> bool {
    let inputs = compute_inputs(graph, id);
    if graph[id].id_inputs.as_ref() == Some(&inputs) {
        return false;
    }
    let hash = inputs.hash();
    let node = &mut graph[id];
    node.package_id = Some(PackageId::new(hash));
    node.id_inputs = Some(inputs);
    true
}
