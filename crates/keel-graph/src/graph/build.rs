//! Breadth-first graph expansion.
//!
//! The builder keeps a queue of `(requester, requirement)` pairs. Each
//! requirement is first rewritten by any override for its name, then either
//! matched against the node already holding that name in the destination
//! context or loaded through the [`RecipeLoader`] into a new node. Nodes are
//! keyed by `(name, context)`: within one context every package sees the
//! same profile, so the name fixes the configuration.

use std::collections::{HashMap, VecDeque};

use keel_core::model::{Requirement, RequirementKind};
use tracing::{debug, instrument, trace, warn};

use super::conflict::{Conflict, ConflictKind, Verdict, judge};
use super::cycles::would_create_cycle;
use super::{Context, Edge, Graph, LoadFailure, Node, NodeId};
use crate::context::ResolutionContext;
use crate::error::GraphError;
use crate::recipe::{LoadContext, Recipe, RecipeLoader};
use crate::traits::{edge_traits, propagate};

/// Expands one root recipe into a closed [`Graph`].
pub struct GraphBuilder<'a, L: ?Sized> {
    loader: &'a L,
    ctx: &'a ResolutionContext,
    graph: Graph,
    index: HashMap<(String, Context), NodeId>,
    queue: VecDeque<(NodeId, Requirement)>,
}

impl<'a, L: RecipeLoader + ?Sized> GraphBuilder<'a, L> {
    #[must_use]
    pub fn new(loader: &'a L, ctx: &'a ResolutionContext) -> Self {
        Self {
            loader,
            ctx,
            graph: Graph::new(),
            index: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    /// Expand `root` and propagate traits over the result.
    ///
    /// Conflicts and load failures are recorded on the graph; only a cycle
    /// stops expansion.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::StructuralCycle`] when a requirement closes a
    /// cycle.
    #[instrument(skip(self, root), fields(root = %root.reference))]
    pub fn build(mut self, root: Recipe) -> Result<Graph, GraphError> {
        let root_id = self.insert(root, Context::Host, None, true);

        while let Some((parent, requirement)) = self.queue.pop_front() {
            self.expand(parent, requirement)?;
        }

        propagate(&mut self.graph)?;
        debug!(
            root = %self.graph[root_id].reference,
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            conflicts = self.graph.conflicts().len(),
            load_failures = self.graph.load_failures().len(),
            "graph closed"
        );
        Ok(self.graph)
    }

    fn expand(&mut self, parent: NodeId, mut requirement: Requirement) -> Result<(), GraphError> {
        if let Some(pin) = self.ctx.overrides.get(&requirement.name) {
            trace!(requirement = %requirement, "override applied");
            pin.apply(&mut requirement);
        }

        let context = match requirement.kind {
            RequirementKind::BuildRequire => Context::Build,
            RequirementKind::Require | RequirementKind::TestRequire => self.graph[parent].context,
        };

        match self.index.get(&(requirement.name.clone(), context)).copied() {
            Some(existing) => self.revisit(parent, existing, &requirement),
            None => {
                self.load_new(parent, requirement, context);
                Ok(())
            }
        }
    }

    /// A requirement reached a name that already has a node.
    fn revisit(
        &mut self,
        parent: NodeId,
        existing: NodeId,
        requirement: &Requirement,
    ) -> Result<(), GraphError> {
        if let Some(path) = would_create_cycle(&self.graph, parent, existing) {
            return Err(GraphError::StructuralCycle { path });
        }

        match judge(&self.graph[existing].reference, requirement) {
            Verdict::Reuse => {
                self.connect(parent, existing, requirement);
            }
            Verdict::RevisionMismatch => {
                let resolved = self.reresolve_revision(parent, existing, requirement);
                let conflict =
                    self.conflict(ConflictKind::Revision, parent, existing, requirement, resolved);
                if resolved {
                    warn!(
                        name = %requirement.name,
                        requested = %requirement,
                        kept = %self.graph[existing].reference,
                        "revision conflict resolved to the existing revision"
                    );
                    self.connect(parent, existing, requirement);
                }
                self.graph.record_conflict(conflict);
            }
            Verdict::VersionMismatch => {
                let conflict =
                    self.conflict(ConflictKind::Version, parent, existing, requirement, false);
                debug!(
                    name = %requirement.name,
                    existing = %conflict.existing,
                    requested = %conflict.requested,
                    "version conflict"
                );
                self.graph.record_conflict(conflict);
            }
        }
        Ok(())
    }

    /// Ask the loader for the existing node's revision in place of the
    /// pinned one.
    fn reresolve_revision(
        &self,
        parent: NodeId,
        existing: NodeId,
        requirement: &Requirement,
    ) -> bool {
        let node = &self.graph[existing];
        let mut pinned = requirement.clone();
        pinned.revision.clone_from(&node.reference.revision);
        let load_ctx = LoadContext {
            context: node.context,
            profile: self.ctx.profile(node.context),
            requested_by: &self.graph[parent].reference,
        };
        self.loader
            .load(&pinned, &load_ctx)
            .is_ok_and(|recipe| recipe.reference == node.reference)
    }

    fn conflict(
        &self,
        kind: ConflictKind,
        parent: NodeId,
        existing: NodeId,
        requirement: &Requirement,
        resolved: bool,
    ) -> Conflict {
        let mut requested_path = self.graph.requiring_path(parent);
        requested_path.push(requirement.to_string());
        Conflict {
            kind,
            name: requirement.name.clone(),
            context: self.graph[existing].context,
            involved: vec![existing, parent],
            existing: self.graph[existing].reference.to_string(),
            existing_path: self.graph.requiring_path(existing),
            requested: requirement.to_string(),
            requested_path,
            resolved,
        }
    }

    fn load_new(&mut self, parent: NodeId, requirement: Requirement, context: Context) {
        let loaded = {
            let load_ctx = LoadContext {
                context,
                profile: self.ctx.profile(context),
                requested_by: &self.graph[parent].reference,
            };
            self.loader.load(&requirement, &load_ctx)
        };

        match loaded {
            Ok(recipe) => {
                let id = self.insert(recipe, context, Some(parent), false);
                self.connect(parent, id, &requirement);
            }
            Err(error) => {
                let mut path = self.graph.requiring_path(parent);
                path.push(requirement.to_string());
                debug!(requirement = %requirement, %error, "recipe load failed");
                self.graph.record_load_failure(LoadFailure {
                    requirement: requirement.to_string(),
                    requester: parent,
                    path,
                    error,
                });
            }
        }
    }

    /// Create the node for `recipe` and queue its requirements.
    fn insert(
        &mut self,
        recipe: Recipe,
        context: Context,
        required_by: Option<NodeId>,
        root: bool,
    ) -> NodeId {
        let profile = self.ctx.profile(context);
        let options = profile.options_for(&recipe.reference, &recipe.default_options);
        let package_type = recipe.package_type.resolve(&options);
        let mode = self.ctx.mode_for(&recipe.reference.name, recipe.package_id_mode);
        let depth = required_by.map_or(0, |p| self.graph[p].depth + 1);

        let mut node = Node::new(recipe.reference.clone(), context);
        node.package_type = package_type;
        node.settings = profile.settings.clone();
        node.options = options;
        node.settings_used_in_id.clone_from(&recipe.settings_used_in_id);
        node.options_used_in_id.clone_from(&recipe.options_used_in_id);
        node.mode = mode;
        node.consumer = recipe.consumer;
        node.compatibility.clone_from(&recipe.compatibility);
        node.required_by = required_by;
        node.depth = depth;

        let id = if root {
            self.graph.add_root(node)
        } else {
            self.graph.add_node(node)
        };
        trace!(reference = %recipe.reference, %context, depth, "node created");
        self.index.insert((recipe.reference.name.clone(), context), id);
        self.queue
            .extend(recipe.all_requirements().cloned().map(|r| (id, r)));
        id
    }

    fn connect(&mut self, parent: NodeId, dst: NodeId, requirement: &Requirement) {
        let traits = edge_traits(requirement.traits, self.graph[dst].package_type);
        self.graph
            .add_edge(parent, dst, Edge::new(requirement.kind, traits));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;
    use crate::recipe::RecipeIndex;
    use keel_core::model::{PackageReference, PackageType, Profile, Settings};

    fn reference(text: &str) -> PackageReference {
        PackageReference::parse(text).unwrap()
    }

    fn req(text: &str) -> Requirement {
        Requirement::requires(text).unwrap()
    }

    fn root(requires: &[&str]) -> Recipe {
        requires
            .iter()
            .fold(Recipe::consumer(reference("root/1.0")), |r, text| {
                r.requiring(req(text))
            })
    }

    fn build(index: &RecipeIndex, ctx: &ResolutionContext, root: Recipe) -> Graph {
        GraphBuilder::new(index, ctx).build(root).unwrap()
    }

    #[test]
    fn shared_dependency_gets_one_node() {
        let index = RecipeIndex::new()
            .with(Recipe::new(reference("a/1.0#r")).requiring(req("c/[>=1.0 <2]")))
            .with(Recipe::new(reference("b/1.0#r")).requiring(req("c/1.2")))
            .with(Recipe::new(reference("c/1.2#r")))
            .with(Recipe::new(reference("c/1.5#r")));
        let ctx = ResolutionContext::default();
        let g = build(&index, &ctx, root(&["a/1.0", "b/1.0"]));

        assert_eq!(g.node_count(), 4);
        let c = g.find("c", Context::Host).unwrap();
        // `a` reached c first and picked the highest match; b's exact 1.2 is
        // not contained, so it conflicts instead of forking a second node.
        assert_eq!(g[c].reference.to_string(), "c/1.5#r");
        assert_eq!(g.conflicts().len(), 1);
        assert!(!g.is_consistent());
    }

    #[test]
    fn compatible_later_requirement_reuses_the_node() {
        let index = RecipeIndex::new()
            .with(Recipe::new(reference("a/1.0#r")).requiring(req("c/1.2")))
            .with(Recipe::new(reference("b/1.0#r")).requiring(req("c/[>=1.0 <2]")))
            .with(Recipe::new(reference("c/1.2#r")))
            .with(Recipe::new(reference("c/1.5#r")));
        let ctx = ResolutionContext::default();
        let g = build(&index, &ctx, root(&["a/1.0", "b/1.0"]));

        let c = g.find("c", Context::Host).unwrap();
        assert_eq!(g[c].reference.to_string(), "c/1.2#r");
        assert_eq!(g[c].dependents.len(), 2);
        assert!(g.is_consistent());
    }

    #[test]
    fn build_requirements_land_in_build_context_with_build_profile() {
        let index = RecipeIndex::new()
            .with(
                Recipe::new(reference("lib/1.0#r"))
                    .requiring(Requirement::build_requires("cmake/3.27").unwrap()),
            )
            .with(Recipe::new(reference("cmake/3.27#r")).requiring(req("zlib/1.3")))
            .with(Recipe::new(reference("zlib/1.3#r")));
        let ctx = ResolutionContext::new(
            Profile::new(Settings::new().with("arch", "armv8")),
            Profile::new(Settings::new().with("arch", "x86_64")),
        );
        let g = build(&index, &ctx, root(&["lib/1.0"]));

        let cmake = g.find("cmake", Context::Build).unwrap();
        let zlib = g.find("zlib", Context::Build).unwrap();
        assert!(g.find("zlib", Context::Host).is_none());
        assert_eq!(g[cmake].settings.get("arch"), Some("x86_64"));
        assert_eq!(g[zlib].context, Context::Build);
        assert_eq!(g[zlib].depth, 3);
    }

    #[test]
    fn same_name_in_both_contexts_is_two_nodes() {
        let index = RecipeIndex::new()
            .with(
                Recipe::new(reference("app/1.0#r"))
                    .requiring(req("protobuf/3.21"))
                    .requiring(Requirement::build_requires("protobuf/3.21").unwrap()),
            )
            .with(Recipe::new(reference("protobuf/3.21#r")));
        let ctx = ResolutionContext::default();
        let g = build(&index, &ctx, root(&["app/1.0"]));

        assert!(g.find("protobuf", Context::Host).is_some());
        assert!(g.find("protobuf", Context::Build).is_some());
        assert_eq!(g.node_count(), 4);
    }

    #[test]
    fn options_and_type_come_from_defaults_and_profile() {
        let index = RecipeIndex::new().with(
            Recipe::new(reference("zlib/1.3#r"))
                .with_type(PackageType::Library)
                .with_option("shared", "False"),
        );
        let host = Profile::default().with_option("zlib/*", "shared", "True");
        let ctx = ResolutionContext::new(host, Profile::default());
        let g = build(&index, &ctx, root(&["zlib/1.3"]));

        let zlib = g.find("zlib", Context::Host).unwrap();
        assert_eq!(g[zlib].options.get("shared"), Some("True"));
        assert_eq!(g[zlib].package_type, PackageType::SharedLibrary);
    }

    #[test]
    fn revision_conflict_is_reresolved_and_recorded() {
        let index = RecipeIndex::new()
            .with(Recipe::new(reference("a/1.0#r")).requiring(req("c/1.0#r2")))
            .with(Recipe::new(reference("c/1.0#r1")))
            .with(Recipe::new(reference("c/1.0#r2")));
        let ctx = ResolutionContext::default();
        let g = build(&index, &ctx, root(&["c/1.0#r1", "a/1.0"]));

        let c = g.find("c", Context::Host).unwrap();
        assert_eq!(g[c].reference.revision.as_deref(), Some("r1"));
        assert_eq!(g[c].dependents.len(), 2);
        let [conflict] = g.conflicts() else {
            panic!("expected one conflict, got {:?}", g.conflicts());
        };
        assert_eq!(conflict.kind, ConflictKind::Revision);
        assert!(conflict.resolved);
        assert!(g.is_consistent());
    }

    #[test]
    fn missing_recipe_is_collected_not_thrown() {
        let index = RecipeIndex::new()
            .with(Recipe::new(reference("a/1.0#r")).requiring(req("ghost/1.0")));
        let ctx = ResolutionContext::default();
        let g = build(&index, &ctx, root(&["a/1.0", "other/2.0"]));

        assert_eq!(g.errors().len(), 2);
        let ghost = g
            .load_failures()
            .iter()
            .find(|f| f.requirement == "ghost/1.0")
            .unwrap();
        assert_eq!(ghost.path, ["root/1.0", "a/1.0#r", "ghost/1.0"]);
        assert!(matches!(ghost.to_error(), ResolveError::RecipeLoad { .. }));
    }

    #[test]
    fn cycle_by_name_aborts() {
        let index = RecipeIndex::new()
            .with(Recipe::new(reference("a/1.0#r")).requiring(req("b/1.0")))
            .with(Recipe::new(reference("b/1.0#r")).requiring(req("a/1.0")));
        let ctx = ResolutionContext::default();
        let err = GraphBuilder::new(&index, &ctx)
            .build(root(&["a/1.0"]))
            .unwrap_err();
        let GraphError::StructuralCycle { path } = err;
        assert_eq!(path, ["b/1.0#r", "a/1.0#r", "b/1.0#r"]);
    }
}
