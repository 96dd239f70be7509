//! The binary resolution loop.
//!
//! Levels are processed leaves first. For each level:
//!
//! 1. Sequentially, nodes whose dependencies did not resolve are cancelled,
//!    and every other node's package ID is refreshed from its dependencies'
//!    now-known package revisions. A node whose ID changed is `IdStale`.
//! 2. In parallel on a pool of `jobs` workers, each node is looked up in the
//!    cache (trying compatible IDs on a miss) and built when the build
//!    policy allows it.
//! 3. Sequentially, outcomes are written back to the graph.
//!
//! A node therefore never starts before all its dependencies are resolved,
//! and a rebuilt leaf only invalidates consumers whose mode tracks package
//! revisions.

pub mod state;

pub use state::{BinaryState, BinaryStatus, StateError};

use std::sync::atomic::{AtomicBool, Ordering};

use keel_core::cache::{
    Artifact, BinaryCache, BinaryKey, BinaryLocation, BuiltAgainst, CacheError,
};
use keel_core::model::{
    BuildPolicy, Options, PackageId, PackageReference, RequirementKind, Settings,
};
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::context::{FailureMode, ResolutionContext};
use crate::error::{GraphError, ResolveError};
use crate::graph::{Context, Graph, NodeId};
use crate::package_id::{IdInputs, compute_package_ids, refresh};

// ---------------------------------------------------------------------------
// Builder collaborator
// ---------------------------------------------------------------------------

/// Everything a builder is told about one package to build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub reference: PackageReference,
    pub package_id: String,
    pub context: Context,
    pub settings: Settings,
    pub options: Options,
    /// `reference:package_id#prev` of each dependency, in declaration order.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct BuildError {
    pub reason: String,
}

impl BuildError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The build collaborator: turns a request into the files of one binary.
pub trait PackageBuilder: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BuildError`] when the package cannot be built.
    fn build(&self, request: &BuildRequest) -> Result<Artifact, BuildError>;
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct BinaryReport {
    pub cache_hits: Vec<NodeId>,
    pub built: Vec<NodeId>,
    /// Nodes whose package ID was recomputed after a dependency resolved.
    pub stale: Vec<NodeId>,
    pub errors: Vec<ResolveError>,
}

impl BinaryReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

struct Job {
    id: NodeId,
    key: BinaryKey,
    policy: BuildPolicy,
    built_against: BuiltAgainst,
    /// Package ID hashes of compatible configurations, in preference order.
    alternates: Vec<String>,
    request: BuildRequest,
}

enum Failure {
    Missing,
    Build(String),
    Cache(CacheError),
    Aborted,
}

struct Outcome {
    id: NodeId,
    /// States entered, in order, after the node's current one.
    states: Vec<BinaryState>,
    package_revision: Option<String>,
    compatible_id: Option<String>,
    failure: Option<Failure>,
}

impl Outcome {
    const fn new(id: NodeId) -> Self {
        Self {
            id,
            states: Vec::new(),
            package_revision: None,
            compatible_id: None,
            failure: None,
        }
    }

    fn fail(mut self, state: BinaryState, failure: Failure) -> Self {
        self.states.push(state);
        self.failure = Some(failure);
        self
    }
}

// ---------------------------------------------------------------------------
// BinaryResolver
// ---------------------------------------------------------------------------

pub struct BinaryResolver<'a> {
    cache: &'a dyn BinaryCache,
    builder: &'a dyn PackageBuilder,
    ctx: &'a ResolutionContext,
}

impl<'a> BinaryResolver<'a> {
    #[must_use]
    pub fn new(
        cache: &'a dyn BinaryCache,
        builder: &'a dyn PackageBuilder,
        ctx: &'a ResolutionContext,
    ) -> Self {
        Self {
            cache,
            builder,
            ctx,
        }
    }

    /// Drive every node of `graph` to a terminal binary state.
    ///
    /// Package IDs are computed first if any node lacks one. Problems are
    /// collected in the report; callers should only pass graphs that are
    /// [consistent](Graph::is_consistent).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::StructuralCycle`] if the graph is not a DAG.
    #[instrument(skip(self, graph), fields(nodes = graph.node_count(), jobs = self.ctx.jobs))]
    pub fn resolve(&self, graph: &mut Graph) -> Result<BinaryReport, GraphError> {
        if graph.nodes().any(|(_, node)| node.package_id.is_none()) {
            compute_package_ids(graph)?;
        }
        let levels = graph.levels()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.ctx.jobs)
            .thread_name(|i| format!("keel-build-{i}"))
            .build();
        if let Err(error) = &pool {
            warn!(%error, "worker pool unavailable, using the global pool");
        }

        let aborted = AtomicBool::new(false);
        let mut report = BinaryReport::default();

        for level in levels {
            let jobs = self.prepare(graph, &level, &aborted, &mut report);
            let run_all = || -> Vec<Outcome> {
                jobs.par_iter().map(|job| self.run(job, &aborted)).collect()
            };
            let outcomes = match &pool {
                Ok(pool) => pool.install(run_all),
                Err(_) => run_all(),
            };
            for outcome in outcomes {
                Self::apply(graph, outcome, &mut report);
            }
        }

        info!(
            cache_hits = report.cache_hits.len(),
            built = report.built.len(),
            stale = report.stale.len(),
            errors = report.errors.len(),
            "binaries resolved"
        );
        Ok(report)
    }

    /// Phase 1: cancel blocked nodes, refresh IDs and snapshot the work.
    fn prepare(
        &self,
        graph: &mut Graph,
        level: &[NodeId],
        aborted: &AtomicBool,
        report: &mut BinaryReport,
    ) -> Vec<Job> {
        let mut jobs = Vec::new();
        for &id in level {
            let mut status = BinaryStatus::new();
            let blocker = graph.edges(id).map(|(dst, _)| dst).find(|&dst| {
                graph[dst]
                    .binary
                    .as_ref()
                    .is_some_and(|s| s.state.is_blocking())
            });

            if graph[id].consumer {
                let next = if blocker.is_some() {
                    BinaryState::Cancelled
                } else {
                    BinaryState::Resolved
                };
                advance(&mut status, next, &graph[id].reference);
                graph[id].binary = Some(status);
                continue;
            }

            let cause = match blocker {
                Some(dst) => Some(format!("dependency {} did not resolve", graph[dst].reference)),
                None if self.fail_fast() && aborted.load(Ordering::SeqCst) => {
                    Some("an earlier build failed".to_string())
                }
                None => None,
            };
            if let Some(cause) = cause {
                debug!(reference = %graph[id].reference, %cause, "cancelled");
                advance(&mut status, BinaryState::Cancelled, &graph[id].reference);
                report.errors.push(ResolveError::Cancelled {
                    reference: graph[id].reference.to_string(),
                    cause,
                });
                graph[id].binary = Some(status);
                continue;
            }

            // Revisions learned from cache hits only complete the ID; an
            // upstream binary built in this run makes it stale.
            let rebuilt = rebuilt_upstream(graph, id);
            if refresh(graph, id) && rebuilt {
                debug!(
                    reference = %graph[id].reference,
                    package_id = %graph[id].full_reference(),
                    "package id stale, recomputed"
                );
                advance(&mut status, BinaryState::IdStale, &graph[id].reference);
                report.stale.push(id);
            }
            graph[id].binary = Some(status);
            jobs.push(self.job(graph, id));
        }
        jobs
    }

    fn job(&self, graph: &Graph, id: NodeId) -> Job {
        let node = &graph[id];
        let package_id = node.package_id.clone().unwrap_or_else(|| PackageId::new(""));

        let mut built_against = BuiltAgainst::new();
        let mut dependencies = Vec::new();
        for (dst, edge) in graph.edges(id) {
            let dependency = &graph[dst];
            dependencies.push(dependency.full_reference());
            // Tools and test packages do not make a binary outdated.
            if edge.kind != RequirementKind::Require {
                continue;
            }
            if let Some(dep_id) = &dependency.package_id {
                built_against.insert(
                    format!("{}:{}", dependency.reference, dep_id.hash),
                    dep_id.revision.clone().unwrap_or_default(),
                );
            }
        }

        let mut alternates: Vec<String> = Vec::new();
        if let (Some(hook), Some(inputs)) = (&node.compatibility, &node.id_inputs) {
            for hash in hook.alternatives(inputs).iter().map(IdInputs::hash) {
                if hash != package_id.hash && !alternates.contains(&hash) {
                    alternates.push(hash);
                }
            }
        }

        Job {
            id,
            key: BinaryKey::new(node.reference.clone(), PackageId::new(package_id.hash.clone())),
            policy: self.ctx.policy_for(&node.reference),
            built_against,
            alternates,
            request: BuildRequest {
                reference: node.reference.clone(),
                package_id: package_id.hash,
                context: node.context,
                settings: node.settings.clone(),
                options: node.options.clone(),
                dependencies,
            },
        }
    }

    /// Phase 2 for one node. Runs on a worker.
    fn run(&self, job: &Job, aborted: &AtomicBool) -> Outcome {
        let mut outcome = Outcome::new(job.id);

        if job.policy != BuildPolicy::Always {
            match self.lookup(job, &mut outcome) {
                Err(error) => return outcome.fail(BinaryState::Failed, Failure::Cache(error)),
                Ok(Some(location)) => {
                    let outdated = job.policy == BuildPolicy::Outdated
                        && location.built_against != job.built_against;
                    if !outdated {
                        outcome.package_revision = Some(location.package_revision);
                        return outcome;
                    }
                    debug!(reference = %job.key.reference, "binary outdated");
                    outcome.compatible_id = None;
                }
                Ok(None) if !job.policy.allows_build() => {
                    return outcome.fail(BinaryState::Missing, Failure::Missing);
                }
                Ok(None) => {}
            }
        }

        if self.fail_fast() && aborted.load(Ordering::SeqCst) {
            return outcome.fail(BinaryState::Cancelled, Failure::Aborted);
        }

        outcome.states.push(BinaryState::Building);
        debug!(reference = %job.key.reference, package_id = %job.request.package_id, "building");
        let committed = self
            .builder
            .build(&job.request)
            .map_err(|error| Failure::Build(error.reason))
            .and_then(|artifact| {
                self.cache
                    .commit(&job.key, &artifact, &job.built_against)
                    .map_err(Failure::Cache)
            });
        match committed {
            Ok(prev) => {
                outcome.states.push(BinaryState::Built);
                outcome.package_revision = Some(prev);
                outcome
            }
            Err(failure) => {
                if self.fail_fast() {
                    aborted.store(true, Ordering::SeqCst);
                }
                outcome.fail(BinaryState::Failed, failure)
            }
        }
    }

    /// Look up the node's own ID, then each compatible ID, recording the
    /// states passed through.
    fn lookup(
        &self,
        job: &Job,
        outcome: &mut Outcome,
    ) -> Result<Option<BinaryLocation>, CacheError> {
        if let Some(location) = self.cache.lookup(&job.key)? {
            outcome.states.push(BinaryState::CacheHit);
            return Ok(Some(location));
        }
        outcome.states.push(BinaryState::CacheMiss);
        for hash in &job.alternates {
            if let Some(location) = self.cache.lookup(&job.key.with_hash(hash.clone()))? {
                debug!(reference = %job.key.reference, compatible = %hash, "compatible binary found");
                outcome.states.push(BinaryState::CacheHit);
                outcome.compatible_id = Some(hash.clone());
                return Ok(Some(location));
            }
        }
        Ok(None)
    }

    /// Phase 3: write one outcome back.
    fn apply(graph: &mut Graph, outcome: Outcome, report: &mut BinaryReport) {
        let id = outcome.id;
        let reference = graph[id].reference.clone();
        let path = graph.requiring_path(id);
        let node = &mut graph[id];
        let status = node.binary.get_or_insert_with(BinaryStatus::new);
        for &state in &outcome.states {
            advance(status, state, &reference);
        }

        let Some(failure) = outcome.failure else {
            if status.state == BinaryState::Built {
                report.built.push(id);
            } else {
                report.cache_hits.push(id);
            }
            advance(status, BinaryState::Resolved, &reference);
            if let Some(package_id) = node.package_id.as_mut() {
                if let Some(hash) = outcome.compatible_id {
                    status.computed_id = Some(std::mem::replace(&mut package_id.hash, hash));
                }
                package_id.revision = outcome.package_revision;
            }
            return;
        };

        let package_id = node
            .package_id
            .as_ref()
            .map(|id| id.hash.clone())
            .unwrap_or_default();
        let error = match failure {
            Failure::Missing => ResolveError::MissingBinary {
                reference: reference.to_string(),
                package_id,
                path,
            },
            Failure::Build(reason) => ResolveError::BuildFailure {
                reference: reference.to_string(),
                path,
                reason,
            },
            Failure::Cache(source) => ResolveError::Cache {
                reference: reference.to_string(),
                source,
            },
            Failure::Aborted => ResolveError::Cancelled {
                reference: reference.to_string(),
                cause: "an earlier build failed".to_string(),
            },
        };
        debug!(%reference, %error, "binary not resolved");
        report.errors.push(error);
    }

    fn fail_fast(&self) -> bool {
        self.ctx.failure_mode == FailureMode::FailFast
    }
}

/// Whether a package feeding `id`'s package ID was built in this run.
fn rebuilt_upstream(graph: &Graph, id: NodeId) -> bool {
    let built = |dep: NodeId| {
        graph[dep]
            .binary
            .as_ref()
            .is_some_and(|s| s.visited(BinaryState::Built))
    };
    graph
        .edges(id)
        .filter(|(_, edge)| edge.kind == RequirementKind::Require)
        .any(|(dst, _)| {
            built(dst)
                || graph
                    .transitive_deps(dst)
                    .any(|t| t.traits.visible && !t.traits.build && built(t.dependency))
        })
}

fn advance(status: &mut BinaryStatus, next: BinaryState, reference: &PackageReference) {
    if let Err(error) = status.advance(next) {
        warn!(%reference, %error, "binary state not advanced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build::GraphBuilder;
    use crate::recipe::{Recipe, RecipeIndex};
    use keel_core::cache::MemoryCache;
    use keel_core::model::Requirement;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        built: Mutex<Vec<String>>,
        fail: Vec<&'static str>,
    }

    impl PackageBuilder for Recorder {
        fn build(&self, request: &BuildRequest) -> Result<Artifact, BuildError> {
            if self.fail.contains(&request.reference.name.as_str()) {
                return Err(BuildError::new("compiler exploded"));
            }
            self.built.lock().unwrap().push(request.reference.name.clone());
            Ok(Artifact::new().with_file("lib/out", request.package_id.as_bytes()))
        }
    }

    fn reference(text: &str) -> PackageReference {
        PackageReference::parse(text).unwrap()
    }

    fn graph(ctx: &ResolutionContext) -> Graph {
        let index = RecipeIndex::new()
            .with(
                Recipe::new(reference("app/1.0#r"))
                    .requiring(Requirement::requires("zlib/1.3").unwrap()),
            )
            .with(Recipe::new(reference("zlib/1.3#r")));
        let root = Recipe::consumer(reference("root/1.0"))
            .requiring(Requirement::requires("app/1.0").unwrap());
        let mut g = GraphBuilder::new(&index, ctx).build(root).unwrap();
        compute_package_ids(&mut g).unwrap();
        g
    }

    fn state(g: &Graph, name: &str) -> BinaryState {
        let id = g.find(name, Context::Host).unwrap();
        g[id].binary.as_ref().unwrap().state
    }

    #[test]
    fn never_policy_reports_missing_binaries() {
        let ctx = ResolutionContext::default();
        let mut g = graph(&ctx);
        let cache = MemoryCache::new();
        let builder = Recorder::default();
        let report = BinaryResolver::new(&cache, &builder, &ctx)
            .resolve(&mut g)
            .unwrap();

        assert_eq!(state(&g, "zlib"), BinaryState::Missing);
        assert_eq!(state(&g, "app"), BinaryState::Cancelled);
        assert_eq!(report.errors.len(), 2);
        assert!(matches!(report.errors[0], ResolveError::MissingBinary { .. }));
        assert!(builder.built.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_policy_builds_and_commits() {
        let ctx = ResolutionContext::default().with_policy("*", BuildPolicy::Missing);
        let mut g = graph(&ctx);
        let cache = MemoryCache::new();
        let builder = Recorder::default();
        let report = BinaryResolver::new(&cache, &builder, &ctx)
            .resolve(&mut g)
            .unwrap();

        assert!(report.is_success(), "{:?}", report.errors);
        assert_eq!(*builder.built.lock().unwrap(), ["zlib", "app"]);
        assert_eq!(cache.len(), 2);
        let zlib = g.find("zlib", Context::Host).unwrap();
        assert!(g[zlib].package_revision().is_some());
        assert_eq!(state(&g, "root"), BinaryState::Resolved);

        // Second run is all cache hits.
        let mut again = graph(&ctx);
        let report = BinaryResolver::new(&cache, &builder, &ctx)
            .resolve(&mut again)
            .unwrap();
        assert_eq!(report.cache_hits.len(), 2);
        assert!(report.built.is_empty());
    }

    #[test]
    fn fail_fast_cancels_dependents() {
        let ctx = ResolutionContext::default().with_policy("*", BuildPolicy::Missing);
        let mut g = graph(&ctx);
        let cache = MemoryCache::new();
        let builder = Recorder {
            fail: vec!["zlib"],
            ..Recorder::default()
        };
        let report = BinaryResolver::new(&cache, &builder, &ctx)
            .resolve(&mut g)
            .unwrap();

        assert_eq!(state(&g, "zlib"), BinaryState::Failed);
        assert_eq!(state(&g, "app"), BinaryState::Cancelled);
        assert_eq!(state(&g, "root"), BinaryState::Cancelled);
        assert!(matches!(
            report.errors[0],
            ResolveError::BuildFailure { ref reason, .. } if reason == "compiler exploded"
        ));
    }

    #[test]
    fn tool_revisions_are_not_recorded_as_built_against() {
        let ctx = ResolutionContext::default();
        let index = RecipeIndex::new()
            .with(
                Recipe::new(reference("app/1.0#r"))
                    .requiring(Requirement::requires("zlib/1.3").unwrap())
                    .requiring(Requirement::build_requires("cmake/3.27").unwrap()),
            )
            .with(Recipe::new(reference("zlib/1.3#r")))
            .with(Recipe::new(reference("cmake/3.27#r")));
        let root = Recipe::consumer(reference("root/1.0"))
            .requiring(Requirement::requires("app/1.0").unwrap());
        let mut g = GraphBuilder::new(&index, &ctx).build(root).unwrap();
        compute_package_ids(&mut g).unwrap();

        let cache = MemoryCache::new();
        let builder = Recorder::default();
        let app = g.find("app", Context::Host).unwrap();
        let job = BinaryResolver::new(&cache, &builder, &ctx).job(&g, app);

        let against: Vec<&String> = job.built_against.keys().collect();
        assert_eq!(against.len(), 1);
        assert!(against[0].starts_with("zlib/1.3#r:"));
        assert_eq!(job.request.dependencies.len(), 2);
    }
}
