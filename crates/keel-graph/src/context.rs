//! The explicit resolution context threaded through every stage.
//!
//! Profiles, overrides, package-ID modes and build policy all live here;
//! nothing is read from process-wide state.

use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use keel_core::config::KeelConfig;
use keel_core::model::{
    BuildPolicy, PackageIdMode, PackageReference, PolicyRule, Profile, Requirement,
    RequirementError, VersionExpr, policy_for,
};

use crate::graph::Context;

/// A user pin for one package name. Always wins over declared versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub version: VersionExpr,
    pub revision: Option<String>,
}

impl Override {
    /// Parse the value side of `name = "1.5"` or `name = "1.5#rrev"`.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementError`] for malformed versions or a range
    /// combined with a revision.
    pub fn parse(name: &str, value: &str) -> Result<Self, RequirementError> {
        let parsed = Requirement::requires(&format!("{name}/{}", value.trim()))?;
        Ok(Self {
            version: parsed.version,
            revision: parsed.revision,
        })
    }

    /// Rewrite `requirement` to this pin.
    pub fn apply(&self, requirement: &mut Requirement) {
        requirement.version = self.version.clone();
        requirement.revision = self.revision.clone();
    }
}

/// What happens to the rest of the run when a build fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Stop starting new builds; builds already running finish.
    #[default]
    FailFast,
    /// Keep building every branch that does not depend on the failure.
    KeepGoing,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub host: Profile,
    pub build: Profile,
    pub overrides: BTreeMap<String, Override>,
    pub default_mode: PackageIdMode,
    /// Per-name modes; these win over a recipe's own choice.
    pub modes: BTreeMap<String, PackageIdMode>,
    pub build_policy: Vec<PolicyRule>,
    pub jobs: usize,
    pub failure_mode: FailureMode,
}

impl Default for ResolutionContext {
    fn default() -> Self {
        Self::new(Profile::default(), Profile::default())
    }
}

impl ResolutionContext {
    #[must_use]
    pub fn new(host: Profile, build: Profile) -> Self {
        Self {
            host,
            build,
            overrides: BTreeMap::new(),
            default_mode: PackageIdMode::default(),
            modes: BTreeMap::new(),
            build_policy: Vec::new(),
            jobs: 1,
            failure_mode: FailureMode::default(),
        }
    }

    /// Build a context from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the override that does not parse.
    pub fn from_config(config: &KeelConfig) -> Result<Self> {
        let mut overrides = BTreeMap::new();
        for (name, value) in &config.overrides {
            let pin = Override::parse(name, value)
                .with_context(|| format!("invalid override {name} = \"{value}\""))?;
            overrides.insert(name.clone(), pin);
        }
        Ok(Self {
            host: config.host.clone(),
            build: config.build.clone(),
            overrides,
            default_mode: config.package_id.default_mode,
            modes: config.package_id.modes.clone(),
            build_policy: config.build_policy.clone(),
            jobs: config.binaries.jobs.max(1),
            failure_mode: if config.binaries.keep_going {
                FailureMode::KeepGoing
            } else {
                FailureMode::FailFast
            },
        })
    }

    /// Pin `name` to `value` (`"1.5"` or `"1.5#rrev"`).
    ///
    /// # Errors
    ///
    /// See [`Override::parse`].
    pub fn with_override(mut self, name: &str, value: &str) -> Result<Self, RequirementError> {
        self.overrides
            .insert(name.to_string(), Override::parse(name, value)?);
        Ok(self)
    }

    #[must_use]
    pub fn with_mode(mut self, name: &str, mode: PackageIdMode) -> Self {
        self.modes.insert(name.to_string(), mode);
        self
    }

    #[must_use]
    pub const fn with_default_mode(mut self, mode: PackageIdMode) -> Self {
        self.default_mode = mode;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, pattern: &str, policy: BuildPolicy) -> Self {
        self.build_policy.push(PolicyRule::new(pattern, policy));
        self
    }

    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    #[must_use]
    pub const fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    #[must_use]
    pub const fn profile(&self, context: Context) -> &Profile {
        match context {
            Context::Host => &self.host,
            Context::Build => &self.build,
        }
    }

    /// The mode a consumer named `name` uses for its own package ID.
    #[must_use]
    pub fn mode_for(&self, name: &str, recipe_mode: Option<PackageIdMode>) -> PackageIdMode {
        self.modes
            .get(name)
            .copied()
            .or(recipe_mode)
            .unwrap_or(self.default_mode)
    }

    #[must_use]
    pub fn policy_for(&self, reference: &PackageReference) -> BuildPolicy {
        policy_for(&self.build_policy, reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::model::{Settings, Version};

    #[test]
    fn override_parses_version_and_revision() {
        let pin = Override::parse("zlib", "1.3#abc").unwrap();
        assert_eq!(pin.version.to_string(), "1.3");
        assert_eq!(pin.revision.as_deref(), Some("abc"));

        let mut req = Requirement::requires("zlib/[>=1.0 <2]").unwrap();
        pin.apply(&mut req);
        assert_eq!(req.to_string(), "zlib/1.3#abc");

        assert!(Override::parse("zlib", "[>1]#abc").is_err());
    }

    #[test]
    fn configured_mode_beats_recipe_mode_beats_default() {
        let ctx = ResolutionContext::default()
            .with_default_mode(PackageIdMode::FullVersion)
            .with_mode("app", PackageIdMode::PackageRevision);
        assert_eq!(
            ctx.mode_for("app", Some(PackageIdMode::Unrelated)),
            PackageIdMode::PackageRevision
        );
        assert_eq!(
            ctx.mode_for("lib", Some(PackageIdMode::Unrelated)),
            PackageIdMode::Unrelated
        );
        assert_eq!(ctx.mode_for("lib", None), PackageIdMode::FullVersion);
    }

    #[test]
    fn profiles_are_selected_by_context() {
        let ctx = ResolutionContext::new(
            Profile::new(Settings::new().with("arch", "armv8")),
            Profile::new(Settings::new().with("arch", "x86_64")),
        );
        assert_eq!(ctx.profile(Context::Host).settings.get("arch"), Some("armv8"));
        assert_eq!(ctx.profile(Context::Build).settings.get("arch"), Some("x86_64"));
    }

    #[test]
    fn from_config_carries_every_section() {
        let mut config = KeelConfig::default();
        config.overrides.insert("openssl".into(), "3.1".into());
        config.binaries.keep_going = true;
        config.binaries.jobs = 0;
        config.build_policy.push(PolicyRule::new("*", BuildPolicy::Missing));

        let ctx = ResolutionContext::from_config(&config).unwrap();
        assert_eq!(ctx.failure_mode, FailureMode::KeepGoing);
        assert_eq!(ctx.jobs, 1);
        assert!(ctx.overrides.contains_key("openssl"));
        let zlib = PackageReference::new("zlib", Version::parse("1.3").unwrap());
        assert_eq!(ctx.policy_for(&zlib), BuildPolicy::Missing);

        config.overrides.insert("bad".into(), "[>1]#r".into());
        let err = ResolutionContext::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
