//! Entry points tying the stages together.

use keel_core::cache::BinaryCache;
use rayon::prelude::*;
use tracing::{info, instrument};

use crate::binary::{BinaryReport, BinaryResolver, PackageBuilder};
use crate::context::ResolutionContext;
use crate::error::GraphError;
use crate::graph::Graph;
use crate::graph::build::GraphBuilder;
use crate::package_id::compute_package_ids;
use crate::recipe::{Recipe, RecipeLoader};

/// Expand `root`, propagate traits and compute package IDs.
///
/// The graph may still carry conflicts or load failures; check
/// [`Graph::is_consistent`] before resolving binaries.
///
/// # Errors
///
/// Returns [`GraphError::StructuralCycle`] when the requirements form a
/// cycle.
pub fn resolve<L: RecipeLoader + ?Sized>(
    root: Recipe,
    loader: &L,
    ctx: &ResolutionContext,
) -> Result<Graph, GraphError> {
    let mut graph = GraphBuilder::new(loader, ctx).build(root)?;
    compute_package_ids(&mut graph)?;
    Ok(graph)
}

/// Resolve independent roots in parallel, one arena each. Results are in
/// the order of `roots`.
#[instrument(skip_all, fields(roots = roots.len()))]
pub fn resolve_roots<L: RecipeLoader + Sync + ?Sized>(
    roots: Vec<Recipe>,
    loader: &L,
    ctx: &ResolutionContext,
) -> Vec<Result<Graph, GraphError>> {
    let results: Vec<Result<Graph, GraphError>> = roots
        .into_par_iter()
        .map(|root| resolve(root, loader, ctx))
        .collect();
    info!(
        resolved = results.iter().filter(|r| r.is_ok()).count(),
        "roots resolved"
    );
    results
}

/// Resolve binaries for a graph, refusing graphs with unresolved conflicts
/// or load failures; those problems are returned in the report instead.
///
/// # Errors
///
/// Returns [`GraphError::StructuralCycle`] if the graph is not a DAG.
pub fn resolve_binaries(
    graph: &mut Graph,
    cache: &dyn BinaryCache,
    builder: &dyn PackageBuilder,
    ctx: &ResolutionContext,
) -> Result<BinaryReport, GraphError> {
    if !graph.is_consistent() {
        return Ok(BinaryReport {
            errors: graph.errors(),
            ..BinaryReport::default()
        });
    }
    BinaryResolver::new(cache, builder, ctx).resolve(graph)
}
