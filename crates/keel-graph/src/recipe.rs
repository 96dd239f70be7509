//! Recipes and the recipe collaborator.
//!
//! A [`Recipe`] is what a loader hands back for one requirement: the pinned
//! reference, its declared requirements, which settings and options feed
//! its package ID, and an optional compatibility hook. How recipes are
//! authored or executed is up to the [`RecipeLoader`]; [`RecipeIndex`] is an
//! in-memory loader over registered recipe revisions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use keel_core::ErrorCode;
use keel_core::model::{
    Options, PackageIdMode, PackageReference, PackageType, Profile, Requirement, RequirementKind,
};
use tracing::trace;

use crate::graph::Context;
use crate::package_id::IdInputs;

// ---------------------------------------------------------------------------
// CompatibilityHook
// ---------------------------------------------------------------------------

/// Pure function mapping computed ID inputs to alternates whose binaries are
/// also acceptable, tried in order on a cache miss.
#[derive(Clone)]
pub struct CompatibilityHook(Arc<dyn Fn(&IdInputs) -> Vec<IdInputs> + Send + Sync>);

impl CompatibilityHook {
    pub fn new(hook: impl Fn(&IdInputs) -> Vec<IdInputs> + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    #[must_use]
    pub fn alternatives(&self, inputs: &IdInputs) -> Vec<IdInputs> {
        (self.0)(inputs)
    }
}

impl fmt::Debug for CompatibilityHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompatibilityHook(..)")
    }
}

// ---------------------------------------------------------------------------
// Recipe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Recipe {
    /// Pinned once registered or loaded.
    pub reference: PackageReference,
    pub package_type: PackageType,
    pub requires: Vec<Requirement>,
    pub build_requires: Vec<Requirement>,
    pub test_requires: Vec<Requirement>,
    /// Setting keys (or dotted prefixes) that feed the package ID.
    pub settings_used_in_id: Vec<String>,
    pub options_used_in_id: Vec<String>,
    pub default_options: Options,
    pub package_id_mode: Option<PackageIdMode>,
    pub compatibility: Option<CompatibilityHook>,
    /// A consumer recipe is a graph root with no binary of its own.
    pub consumer: bool,
}

impl Recipe {
    #[must_use]
    pub fn new(reference: PackageReference) -> Self {
        Self {
            reference,
            package_type: PackageType::Unknown,
            requires: Vec::new(),
            build_requires: Vec::new(),
            test_requires: Vec::new(),
            settings_used_in_id: Vec::new(),
            options_used_in_id: Vec::new(),
            default_options: Options::new(),
            package_id_mode: None,
            compatibility: None,
            consumer: false,
        }
    }

    /// A root recipe that only declares requirements.
    #[must_use]
    pub fn consumer(reference: PackageReference) -> Self {
        Self {
            consumer: true,
            ..Self::new(reference)
        }
    }

    /// Add a requirement to the list matching its kind.
    #[must_use]
    pub fn requiring(mut self, requirement: Requirement) -> Self {
        match requirement.kind {
            RequirementKind::Require => self.requires.push(requirement),
            RequirementKind::BuildRequire => self.build_requires.push(requirement),
            RequirementKind::TestRequire => self.test_requires.push(requirement),
        }
        self
    }

    #[must_use]
    pub const fn with_type(mut self, package_type: PackageType) -> Self {
        self.package_type = package_type;
        self
    }

    #[must_use]
    pub fn with_settings_in_id(mut self, keys: &[&str]) -> Self {
        self.settings_used_in_id = keys.iter().map(ToString::to_string).collect();
        self
    }

    /// Declare a default option that also feeds the package ID.
    #[must_use]
    pub fn with_option(mut self, key: &str, default: &str) -> Self {
        self.default_options.insert(key, default);
        if !self.options_used_in_id.iter().any(|k| k == key) {
            self.options_used_in_id.push(key.to_string());
        }
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: PackageIdMode) -> Self {
        self.package_id_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn with_compatibility(mut self, hook: CompatibilityHook) -> Self {
        self.compatibility = Some(hook);
        self
    }

    /// Declared requirements in expansion order.
    pub fn all_requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.requires
            .iter()
            .chain(&self.build_requires)
            .chain(&self.test_requires)
    }

    /// Digest of the recipe's declared content, used as its revision when
    /// none was given.
    #[must_use]
    pub fn content_revision(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.reference.display_name().as_bytes());
        hasher.update(format!("\ntype={:?}", self.package_type).as_bytes());
        for requirement in self.all_requirements() {
            hasher.update(
                format!(
                    "\n{} {} {}",
                    requirement.kind, requirement, requirement.traits
                )
                .as_bytes(),
            );
        }
        for key in &self.settings_used_in_id {
            hasher.update(format!("\nsetting={key}").as_bytes());
        }
        for (key, value) in self.default_options.iter() {
            hasher.update(format!("\noption={key}={value}").as_bytes());
        }
        let hex = hasher.finalize().to_hex();
        hex[..32].to_string()
    }
}

// ---------------------------------------------------------------------------
// Loader interface
// ---------------------------------------------------------------------------

/// What a loader may see while resolving one requirement.
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    pub context: Context,
    pub profile: &'a Profile,
    pub requested_by: &'a PackageReference,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("no recipe satisfies '{0}'")]
    NotFound(String),

    #[error("recipe {reference} failed to load: {reason}")]
    Failed { reference: String, reason: String },
}

impl LoadError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::RecipeNotFound,
            Self::Failed { .. } => ErrorCode::RecipeLoadFailed,
        }
    }
}

/// The recipe collaborator.
///
/// Resolves a requirement to one concrete recipe revision: the highest
/// version satisfying a range, and the latest revision unless one is pinned.
pub trait RecipeLoader {
    /// # Errors
    ///
    /// Returns [`LoadError`] when nothing satisfies the requirement or the
    /// recipe cannot be evaluated.
    fn load(&self, requirement: &Requirement, context: &LoadContext<'_>)
    -> Result<Recipe, LoadError>;
}

// ---------------------------------------------------------------------------
// RecipeIndex
// ---------------------------------------------------------------------------

/// In-memory recipes keyed by name, revisions kept in registration order.
#[derive(Debug, Clone, Default)]
pub struct RecipeIndex {
    recipes: BTreeMap<String, Vec<Recipe>>,
}

impl RecipeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recipe revision; later registrations of the same version
    /// are newer. Unpinned references get their content revision.
    pub fn register(&mut self, mut recipe: Recipe) -> PackageReference {
        if recipe.reference.revision.is_none() {
            recipe.reference.revision = Some(recipe.content_revision());
        }
        let reference = recipe.reference.clone();
        self.recipes
            .entry(reference.name.clone())
            .or_default()
            .push(recipe);
        reference
    }

    #[must_use]
    pub fn with(mut self, recipe: Recipe) -> Self {
        self.register(recipe);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recipes.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

impl RecipeLoader for RecipeIndex {
    fn load(
        &self,
        requirement: &Requirement,
        context: &LoadContext<'_>,
    ) -> Result<Recipe, LoadError> {
        let candidates = self
            .recipes
            .get(&requirement.name)
            .ok_or_else(|| LoadError::NotFound(requirement.to_string()))?;

        // Later registrations win ties on version, so iterate in order and
        // keep the last maximum.
        let mut best: Option<&Recipe> = None;
        for recipe in candidates.iter().filter(|r| requirement.accepts(&r.reference)) {
            if best.is_none_or(|b| recipe.reference.version >= b.reference.version) {
                best = Some(recipe);
            }
        }

        let recipe = best.ok_or_else(|| LoadError::NotFound(requirement.to_string()))?;
        trace!(
            requirement = %requirement,
            resolved = %recipe.reference,
            context = ?context.context,
            "recipe resolved"
        );
        Ok(recipe.clone())
    }
}
