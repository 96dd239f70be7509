//! Package ID properties over random recipe sets.


use std::collections::BTreeMap;

use generators::*;
use keel_core::model::{PackageIdMode, PackageReference, Requirement, RequirementKind};
use keel_graph::{Context, Graph, Recipe, RecipeIndex, ResolutionContext, resolve, resolve_roots};
use proptest::prelude::*;

fn index(spec: &DagSpec) -> RecipeIndex {
    recipes(spec)
        .into_iter()
        .fold(RecipeIndex::new(), RecipeIndex::with)
}

/// A consumer requiring every package, so each one has a host node.
fn root(spec: &DagSpec) -> Recipe {
    (0..spec.types.len()).fold(
        Recipe::consumer(PackageReference::parse("root/1.0").unwrap()),
        |recipe, i| recipe.requiring(Requirement::requires(&format!("p{i}/1.0")).unwrap()),
    )
}

fn host_ids(graph: &Graph) -> BTreeMap<String, String> {
    graph
        .nodes()
        .filter(|(_, node)| node.context == Context::Host && !node.consumer)
        .map(|(_, node)| {
            let hash = node.package_id.as_ref().map(|id| id.hash.clone()).unwrap();
            (node.reference.name.clone(), hash)
        })
        .collect()
}

fn arb_mode() -> impl Strategy<Value = PackageIdMode> {
    prop::sample::select(PackageIdMode::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn ids_are_deterministic(spec in arb_dag(8), mode in arb_mode()) {
        let index = index(&spec);
        let ctx = ResolutionContext::default().with_default_mode(mode);

        let first = resolve(root(&spec), &index, &ctx).unwrap();
        let second = resolve(root(&spec), &index, &ctx).unwrap();
        prop_assert!(first.is_consistent());
        prop_assert_eq!(host_ids(&first), host_ids(&second));

        let parallel = resolve_roots(vec![root(&spec), root(&spec), root(&spec)], &index, &ctx);
        for graph in parallel {
            prop_assert_eq!(host_ids(&graph.unwrap()), host_ids(&first));
        }
    }

    #[test]
    fn only_requires_feed_host_ids(spec in arb_dag(8), mode in arb_mode()) {
        let ctx = ResolutionContext::default().with_default_mode(mode);
        let with_tools = resolve(root(&spec), &index(&spec), &ctx).unwrap();

        let mut stripped = spec.clone();
        stripped.edges.retain(|e| e.kind == RequirementKind::Require);
        let without = resolve(root(&stripped), &index(&stripped), &ctx).unwrap();

        prop_assert_eq!(host_ids(&with_tools), host_ids(&without));
    }
}

#[test]
fn unrelated_mode_ignores_dependency_versions() {
    let build = |zlib: &str, mode| {
        let index = RecipeIndex::new()
            .with(Recipe::new(PackageReference::parse(&format!("zlib/{zlib}#r")).unwrap()))
            .with(
                Recipe::new(PackageReference::parse("app/1.0#r").unwrap())
                    .requiring(Requirement::requires(&format!("zlib/{zlib}")).unwrap()),
            );
        let root = Recipe::consumer(PackageReference::parse("root/1.0").unwrap())
            .requiring(Requirement::requires("app/1.0").unwrap());
        let ctx = ResolutionContext::default().with_mode("app", mode);
        host_ids(&resolve(root, &index, &ctx).unwrap())["app"].clone()
    };

    assert_eq!(
        build("1.2", PackageIdMode::Unrelated),
        build("1.3", PackageIdMode::Unrelated)
    );
    assert_ne!(
        build("1.2", PackageIdMode::FullVersion),
        build("1.3", PackageIdMode::FullVersion)
    );
}
