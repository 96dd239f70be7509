//! The dependency graph arena.
//!
//! Nodes and edges live in a petgraph [`DiGraph`]; a [`NodeId`] is a plain
//! arena index. An edge `A -> B` means "A requires B". Back-references
//! (`Node::dependents`, `Node::required_by`) are indices and never own.
//!
//! ```text
//! root recipe
//!        ↓  build::GraphBuilder::build()
//! Graph (nodes, declared edges, conflicts, load errors)
//!        ↓  traits::propagate()
//! Graph + one TransitiveDep per (node, dependency)
//!        ↓  package_id::compute_package_ids()
//! Graph + package IDs
//!        ↓  binary::BinaryResolver::resolve()
//! Graph + binary states
//! ```

pub mod build;
pub mod conflict;
pub mod cycles;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Index, IndexMut};

use keel_core::model::{
    Options, PackageId, PackageIdMode, PackageReference, PackageType, RequirementKind, Settings,
    Traits,
};
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::binary::BinaryStatus;
use crate::error::{GraphError, ResolveError};
use crate::package_id::IdInputs;
use crate::recipe::{CompatibilityHook, LoadError};

pub use conflict::{Conflict, ConflictKind};

/// Arena index of a node.
pub type NodeId = NodeIndex;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Which platform a node is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    /// The platform the final artifacts run on.
    Host,
    /// The platform running build tools.
    Build,
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Build => "build",
        })
    }
}

// ---------------------------------------------------------------------------
// Node / Edge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Node {
    pub reference: PackageReference,
    pub context: Context,
    pub package_type: PackageType,
    pub settings: Settings,
    pub options: Options,
    pub settings_used_in_id: Vec<String>,
    pub options_used_in_id: Vec<String>,
    /// The mode this node uses to fold in its own dependencies.
    pub mode: PackageIdMode,
    pub consumer: bool,
    pub compatibility: Option<CompatibilityHook>,
    pub package_id: Option<PackageId>,
    /// Inputs the current package ID was hashed from.
    pub id_inputs: Option<IdInputs>,
    /// Outgoing edges in declaration order.
    pub dependencies: Vec<EdgeIndex>,
    pub dependents: BTreeSet<NodeId>,
    /// The node that first required this one; `None` for roots.
    pub required_by: Option<NodeId>,
    /// Hops from the root.
    pub depth: usize,
    pub binary: Option<BinaryStatus>,
}

impl Node {
    #[must_use]
    pub fn new(reference: PackageReference, context: Context) -> Self {
        Self {
            reference,
            context,
            package_type: PackageType::Unknown,
            settings: Settings::new(),
            options: Options::new(),
            settings_used_in_id: Vec::new(),
            options_used_in_id: Vec::new(),
            mode: PackageIdMode::default(),
            consumer: false,
            compatibility: None,
            package_id: None,
            id_inputs: None,
            dependencies: Vec::new(),
            dependents: BTreeSet::new(),
            required_by: None,
            depth: 0,
            binary: None,
        }
    }

    /// `name/version#rrev:package_id#prev`, as far as it is known.
    #[must_use]
    pub fn full_reference(&self) -> String {
        match &self.package_id {
            Some(id) => format!("{}:{id}", self.reference),
            None => self.reference.to_string(),
        }
    }

    #[must_use]
    pub fn package_revision(&self) -> Option<&str> {
        self.package_id.as_ref().and_then(|id| id.revision.as_deref())
    }
}

/// One declared requirement between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub kind: RequirementKind,
    /// Declared traits with `run` resolved against the destination's type.
    pub traits: Traits,
    /// Arena edges are always direct declarations; indirect dependencies
    /// only exist as [`TransitiveDep`]s.
    pub direct: bool,
}

impl Edge {
    #[must_use]
    pub const fn new(kind: RequirementKind, traits: Traits) -> Self {
        Self {
            kind,
            traits,
            direct: true,
        }
    }
}

/// The single effective view node N has of a reachable dependency D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitiveDep {
    pub dependency: NodeId,
    pub traits: Traits,
    /// N declares D itself.
    pub direct: bool,
}

/// A requirement whose recipe could not be loaded. No node exists for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub requirement: String,
    pub requester: NodeId,
    pub path: Vec<String>,
    pub error: LoadError,
}

impl LoadFailure {
    #[must_use]
    pub fn to_error(&self) -> ResolveError {
        ResolveError::RecipeLoad {
            requirement: self.requirement.clone(),
            path: self.path.clone(),
            source: self.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Graph {
    inner: DiGraph<Node, Edge>,
    roots: Vec<NodeId>,
    conflicts: Vec<Conflict>,
    load_failures: Vec<LoadFailure>,
    transitive: BTreeMap<NodeId, BTreeMap<NodeId, TransitiveDep>>,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, node: Node) -> NodeId {
        let id = self.add_node(node);
        self.roots.push(id);
        id
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.inner.add_node(node)
    }

    /// Attach `src -> dst`, keeping both back-references in sync.
    pub fn add_edge(&mut self, src: NodeId, dst: NodeId, edge: Edge) -> EdgeIndex {
        let index = self.inner.add_edge(src, dst, edge);
        self.inner[src].dependencies.push(index);
        self.inner[dst].dependents.insert(src);
        index
    }

    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inner.node_indices()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.inner
            .node_indices()
            .map(move |id| (id, &self.inner[id]))
    }

    /// Outgoing edges of `node` in declaration order as `(dst, edge)`.
    pub fn edges(&self, node: NodeId) -> impl Iterator<Item = (NodeId, &Edge)> + '_ {
        self.inner[node].dependencies.iter().filter_map(move |&e| {
            let (_, dst) = self.inner.edge_endpoints(e)?;
            Some((dst, &self.inner[e]))
        })
    }

    /// Every edge as `(src, dst, edge)` in insertion order.
    pub fn all_edges(&self) -> impl Iterator<Item = (NodeId, NodeId, &Edge)> + '_ {
        self.inner
            .edge_references()
            .map(|e| (e.source(), e.target(), e.weight()))
    }

    pub(crate) const fn inner(&self) -> &DiGraph<Node, Edge> {
        &self.inner
    }

    /// First node named `name` in `context`.
    #[must_use]
    pub fn find(&self, name: &str, context: Context) -> Option<NodeId> {
        self.nodes()
            .find(|(_, n)| n.reference.name == name && n.context == context)
            .map(|(id, _)| id)
    }

    /// References from the root down to `node` along first-requirers.
    #[must_use]
    pub fn requiring_path(&self, node: NodeId) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            path.push(self.inner[id].reference.to_string());
            cursor = self.inner[id].required_by;
            if path.len() > self.inner.node_count() {
                break;
            }
        }
        path.reverse();
        path
    }

    // -- problems -----------------------------------------------------------

    pub fn record_conflict(&mut self, conflict: Conflict) {
        self.conflicts.push(conflict);
    }

    pub fn record_load_failure(&mut self, failure: LoadFailure) {
        self.load_failures.push(failure);
    }

    #[must_use]
    pub fn load_failures(&self) -> &[LoadFailure] {
        &self.load_failures
    }

    #[must_use]
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Conflicts naming `node` as one of the involved nodes.
    pub fn conflicts_for(&self, node: NodeId) -> impl Iterator<Item = &Conflict> + '_ {
        self.conflicts
            .iter()
            .filter(move |c| c.involved.contains(&node))
    }

    /// Every unresolved conflict and load failure, as errors.
    #[must_use]
    pub fn errors(&self) -> Vec<ResolveError> {
        let mut errors: Vec<ResolveError> = self
            .conflicts
            .iter()
            .filter(|c| !c.resolved)
            .map(Conflict::to_error)
            .collect();
        errors.extend(self.load_failures.iter().map(LoadFailure::to_error));
        errors
    }

    /// Whether the closed graph can go on to binary resolution.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.load_failures.is_empty() && self.conflicts.iter().all(|c| c.resolved)
    }

    // -- transitive view ----------------------------------------------------

    pub(crate) fn set_transitive(
        &mut self,
        transitive: BTreeMap<NodeId, BTreeMap<NodeId, TransitiveDep>>,
    ) {
        self.transitive = transitive;
    }

    /// Effective dependencies of `node`, one entry per reachable dependency.
    pub fn transitive_deps(&self, node: NodeId) -> impl Iterator<Item = &TransitiveDep> + '_ {
        self.transitive
            .get(&node)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    #[must_use]
    pub fn transitive_dep(&self, node: NodeId, dependency: NodeId) -> Option<&TransitiveDep> {
        self.transitive.get(&node)?.get(&dependency)
    }

    // -- ordering -----------------------------------------------------------

    /// Nodes grouped by topological depth, leaves first. Nodes in one level
    /// never depend on each other.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::StructuralCycle`] if the graph has a cycle.
    pub fn levels(&self) -> Result<Vec<Vec<NodeId>>, GraphError> {
        let mut pending: BTreeMap<NodeId, usize> = self
            .inner
            .node_indices()
            .map(|id| (id, self.inner[id].dependencies.len()))
            .collect();
        let mut current: Vec<NodeId> = pending
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut levels = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next = BTreeSet::new();
            for &id in &current {
                for edge in self.inner.edges_directed(id, Direction::Incoming) {
                    let src = edge.source();
                    if let Some(count) = pending.get_mut(&src) {
                        *count -= 1;
                        if *count == 0 {
                            next.insert(src);
                        }
                    }
                }
            }
            levels.push(std::mem::take(&mut current));
            current = next.into_iter().collect();
        }

        if placed == self.inner.node_count() {
            Ok(levels)
        } else {
            let path = cycles::find_cycle(self).unwrap_or_default();
            Err(GraphError::StructuralCycle { path })
        }
    }
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(&self, index: NodeId) -> &Node {
        &self.inner[index]
    }
}

impl IndexMut<NodeId> for Graph {
    fn index_mut(&mut self, index: NodeId) -> &mut Node {
        &mut self.inner[index]
    }
}
