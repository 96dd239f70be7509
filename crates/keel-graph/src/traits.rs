//! Trait propagation.
//!
//! Every node gets exactly one [`TransitiveDep`] per reachable dependency.
//! A path `N -e1-> X -> ... -> D` counts for N only if every edge after
//! `e1` is visible; `e1` itself only decides whether N's own consumers see
//! D. Along a counted path:
//!
//! - `include` and `link` are ANDed;
//! - past a build requirement, everything is `build`, nothing is `include`
//!   or `link`, and `run` is the tool's own `run`;
//! - otherwise `build` is ANDed, and `run` becomes `Yes` when D is a linked
//!   runtime artifact or keeps the value seen one hop further down.
//!
//! Paths to the same D are merged trait-wise with OR (`run`: `Yes` over
//! `Unknown` over `No`). The rule is evaluated per node from its children's
//! exported views, leaves first, which is equal to enumerating every path
//! because each step distributes over the merge.

use std::collections::BTreeMap;

use keel_core::model::{PackageType, RequirementKind, RunTrait, Traits};
use tracing::{debug, instrument};

use crate::error::GraphError;
use crate::graph::{Edge, Graph, NodeId, TransitiveDep};

/// Resolve an edge's declared `run` against the destination's package type.
#[must_use]
pub fn edge_traits(declared: Traits, dst_type: PackageType) -> Traits {
    if declared.run != RunTrait::Unknown {
        return declared;
    }
    let run = match (declared.link, dst_type.is_runtime_artifact()) {
        (true, Some(true)) => RunTrait::Yes,
        (_, Some(false)) => RunTrait::No,
        _ => RunTrait::Unknown,
    };
    Traits { run, ..declared }
}

/// Traits of D seen through `edge`, given the traits its destination
/// exports for D.
#[must_use]
pub fn compose(edge: &Edge, tail: Traits, dst_type: PackageType) -> Traits {
    if edge.kind == RequirementKind::BuildRequire {
        return Traits {
            visible: edge.traits.visible,
            include: false,
            link: false,
            run: edge.traits.run,
            build: true,
        };
    }
    let include = edge.traits.include && tail.include;
    let link = edge.traits.link && tail.link;
    let run = if link && dst_type.is_runtime_artifact() == Some(true) {
        RunTrait::Yes
    } else {
        tail.run
    };
    Traits {
        visible: edge.traits.visible,
        include,
        link,
        run,
        build: edge.traits.build && tail.build,
    }
}

fn merge(into: &mut BTreeMap<NodeId, TransitiveDep>, dependency: NodeId, traits: Traits, direct: bool) {
    into.entry(dependency)
        .and_modify(|existing| {
            existing.traits = existing.traits.union(traits);
            existing.direct |= direct;
        })
        .or_insert(TransitiveDep {
            dependency,
            traits,
            direct,
        });
}

fn merge_exported(into: &mut BTreeMap<NodeId, Traits>, dependency: NodeId, traits: Traits) {
    into.entry(dependency)
        .and_modify(|existing| *existing = existing.union(traits))
        .or_insert(traits);
}

/// Compute every node's transitive dependencies and store them on the graph.
///
/// # Errors
///
/// Returns [`GraphError::StructuralCycle`] if the graph is not a DAG.
#[instrument(skip(graph), fields(nodes = graph.node_count()))]
pub fn propagate(graph: &mut Graph) -> Result<(), GraphError> {
    let levels = graph.levels()?;
    let mut exported: BTreeMap<NodeId, BTreeMap<NodeId, Traits>> = BTreeMap::new();
    let mut all: BTreeMap<NodeId, BTreeMap<NodeId, TransitiveDep>> = BTreeMap::new();

    for node in levels.into_iter().flatten() {
        let mut mine = BTreeMap::new();
        let mut export = BTreeMap::new();

        for (dst, edge) in graph.edges(node) {
            merge(&mut mine, dst, edge.traits, true);
            if edge.traits.visible {
                merge_exported(&mut export, dst, edge.traits);
            }
            let Some(below) = exported.get(&dst) else {
                continue;
            };
            for (&dependency, &tail) in below {
                let traits = compose(edge, tail, graph[dependency].package_type);
                merge(&mut mine, dependency, traits, false);
                if edge.traits.visible {
                    merge_exported(&mut export, dependency, traits);
                }
            }
        }

        exported.insert(node, export);
        all.insert(node, mine);
    }

    debug!(
        entries = all.values().map(BTreeMap::len).sum::<usize>(),
        "traits propagated"
    );
    graph.set_transitive(all);
    Ok(())
}
