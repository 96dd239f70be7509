//! Normalized dependency declarations.
//!
//! A [`Requirement`] is one entry of a recipe's `requires`, `build_requires`
//! (also spelled `tool_requires`) or `test_requires` list. It carries the
//! version expression, an optional pinned recipe revision, and the declared
//! [`Traits`] for the edge it will become.
//!
//! # Default traits per kind
//!
//! | kind           | visible | include | link | run     | build |
//! |----------------|---------|---------|------|---------|-------|
//! | `Require`      | yes     | yes     | yes  | unknown | no    |
//! | `BuildRequire` | no      | no      | no   | yes     | yes   |
//! | `TestRequire`  | no      | yes     | yes  | unknown | no    |

use std::fmt;

use serde::{Deserialize, Serialize};

use super::reference::{PackageReference, ReferenceError, split_reference};
use super::version::{VersionError, VersionExpr};
use crate::error::ErrorCode;

/// Errors produced while parsing a requirement declaration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequirementError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("invalid version expression in requirement '{input}': {source}")]
    Version {
        input: String,
        #[source]
        source: VersionError,
    },

    #[error("a version range cannot be combined with a pinned revision in '{0}'")]
    RangeWithRevision(String),
}

impl RequirementError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Reference(err) => err.code(),
            Self::Version { .. } => ErrorCode::InvalidVersion,
            Self::RangeWithRevision(_) => ErrorCode::InvalidRequirement,
        }
    }
}

// ---------------------------------------------------------------------------
// Kind and traits
// ---------------------------------------------------------------------------

/// Where a requirement was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    Require,
    BuildRequire,
    TestRequire,
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Require => "requires",
            Self::BuildRequire => "build_requires",
            Self::TestRequire => "test_requires",
        })
    }
}

/// Ternary `run` trait. `Unknown` defers to the linked package type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrait {
    Yes,
    No,
    #[default]
    Unknown,
}

impl RunTrait {
    /// Trait-wise union: any `Yes` wins, then any `Unknown`.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        match (self, other) {
            (Self::Yes, _) | (_, Self::Yes) => Self::Yes,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            (Self::No, Self::No) => Self::No,
        }
    }

    /// `Some(bool)` when known.
    #[must_use]
    pub const fn known(self) -> Option<bool> {
        match self {
            Self::Yes => Some(true),
            Self::No => Some(false),
            Self::Unknown => None,
        }
    }
}

impl From<bool> for RunTrait {
    fn from(value: bool) -> Self {
        if value { Self::Yes } else { Self::No }
    }
}

/// The five propagation traits carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Traits {
    pub visible: bool,
    pub include: bool,
    pub link: bool,
    pub run: RunTrait,
    pub build: bool,
}

impl Traits {
    /// Declared defaults for a requirement of `kind`.
    #[must_use]
    pub const fn defaults_for(kind: RequirementKind) -> Self {
        match kind {
            RequirementKind::Require => Self {
                visible: true,
                include: true,
                link: true,
                run: RunTrait::Unknown,
                build: false,
            },
            RequirementKind::BuildRequire => Self {
                visible: false,
                include: false,
                link: false,
                run: RunTrait::Yes,
                build: true,
            },
            RequirementKind::TestRequire => Self {
                visible: false,
                include: true,
                link: true,
                run: RunTrait::Unknown,
                build: false,
            },
        }
    }

    /// Trait-wise union used when several paths reach the same dependency.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            visible: self.visible || other.visible,
            include: self.include || other.include,
            link: self.link || other.link,
            run: self.run.union(other.run),
            build: self.build || other.build,
        }
    }
}

impl fmt::Display for Traits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |on: bool| if on { "+" } else { "-" };
        let run = match self.run {
            RunTrait::Yes => "+",
            RunTrait::No => "-",
            RunTrait::Unknown => "?",
        };
        write!(
            f,
            "{}visible {}include {}link {}run {}build",
            flag(self.visible),
            flag(self.include),
            flag(self.link),
            run,
            flag(self.build)
        )
    }
}

// ---------------------------------------------------------------------------
// Requirement
// ---------------------------------------------------------------------------

/// One normalized dependency declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub name: String,
    pub version: VersionExpr,
    pub user: Option<String>,
    pub channel: Option<String>,
    /// Pinned recipe revision, if any.
    pub revision: Option<String>,
    pub kind: RequirementKind,
    pub traits: Traits,
}

impl Requirement {
    /// Parse `name/<version|range>[@user[/channel]][#revision]` with the
    /// default traits for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementError`] for malformed references, malformed
    /// version expressions, or a range combined with a pinned revision.
    pub fn parse(input: &str, kind: RequirementKind) -> Result<Self, RequirementError> {
        let raw = split_reference(input)?;
        let version =
            VersionExpr::parse(raw.version).map_err(|source| RequirementError::Version {
                input: input.trim().to_string(),
                source,
            })?;
        if version.is_range() && raw.revision.is_some() {
            return Err(RequirementError::RangeWithRevision(input.trim().to_string()));
        }
        Ok(Self {
            name: raw.name.to_string(),
            version,
            user: raw.user.map(str::to_string),
            channel: raw.channel.map(str::to_string),
            revision: raw.revision.map(str::to_string),
            kind,
            traits: Traits::defaults_for(kind),
        })
    }

    /// Shorthand for a regular `requires` entry.
    ///
    /// # Errors
    ///
    /// See [`Requirement::parse`].
    pub fn requires(input: &str) -> Result<Self, RequirementError> {
        Self::parse(input, RequirementKind::Require)
    }

    /// Shorthand for a `build_requires`/`tool_requires` entry.
    ///
    /// # Errors
    ///
    /// See [`Requirement::parse`].
    pub fn build_requires(input: &str) -> Result<Self, RequirementError> {
        Self::parse(input, RequirementKind::BuildRequire)
    }

    /// Shorthand for a `test_requires` entry.
    ///
    /// # Errors
    ///
    /// See [`Requirement::parse`].
    pub fn test_requires(input: &str) -> Result<Self, RequirementError> {
        Self::parse(input, RequirementKind::TestRequire)
    }

    /// Replace the declared traits.
    #[must_use]
    pub fn with_traits(mut self, traits: Traits) -> Self {
        self.traits = traits;
        self
    }

    #[must_use]
    pub fn visible(mut self, visible: bool) -> Self {
        self.traits.visible = visible;
        self
    }

    #[must_use]
    pub fn run(mut self, run: RunTrait) -> Self {
        self.traits.run = run;
        self
    }

    /// Whether `reference` satisfies this requirement.
    #[must_use]
    pub fn accepts(&self, reference: &PackageReference) -> bool {
        self.name == reference.name
            && self.user == reference.user
            && self.channel == reference.channel
            && self.version.contains(&reference.version)
            && match (&self.revision, &reference.revision) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
                (None, _) => true,
            }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        match (&self.user, &self.channel) {
            (Some(user), Some(channel)) => write!(f, "@{user}/{channel}")?,
            (Some(user), None) => write!(f, "@{user}")?,
            _ => {}
        }
        if let Some(revision) = &self.revision {
            write!(f, "#{revision}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::version::Version;

    #[test]
    fn parses_range_requirement() {
        let req = Requirement::requires("openssl/[>=3.0 <4]@acme/stable").unwrap();
        assert_eq!(req.name, "openssl");
        assert!(req.version.is_range());
        assert_eq!(req.user.as_deref(), Some("acme"));
        assert_eq!(req.to_string(), "openssl/[>=3.0 <4]@acme/stable");
    }

    #[test]
    fn range_with_revision_is_rejected() {
        let err = Requirement::requires("zlib/[>=1]#abc").unwrap_err();
        assert!(matches!(err, RequirementError::RangeWithRevision(_)));
        assert_eq!(err.code(), ErrorCode::InvalidRequirement);
    }

    #[test]
    fn kind_selects_default_traits() {
        let lib = Requirement::requires("zlib/1.3").unwrap();
        assert!(lib.traits.visible && lib.traits.link && !lib.traits.build);
        assert_eq!(lib.traits.run, RunTrait::Unknown);

        let tool = Requirement::build_requires("cmake/3.27").unwrap();
        assert!(!tool.traits.visible && !tool.traits.link && tool.traits.build);
        assert_eq!(tool.traits.run, RunTrait::Yes);

        let test = Requirement::test_requires("gtest/1.14").unwrap();
        assert!(!test.traits.visible && test.traits.include);
    }

    #[test]
    fn accepts_checks_range_and_pinned_revision() {
        let ranged = Requirement::requires("zlib/[~1.2]").unwrap();
        let hit = PackageReference::new("zlib", Version::parse("1.2.13").unwrap());
        assert!(ranged.accepts(&hit));
        assert!(!ranged.accepts(&PackageReference::new("zlib", Version::parse("1.3").unwrap())));

        let pinned = Requirement::requires("zlib/1.2.13#r1").unwrap();
        assert!(pinned.accepts(&hit.with_revision("r1")));
        assert!(!pinned.accepts(&hit.with_revision("r2")));
        assert!(!pinned.accepts(&hit));
    }

    #[test]
    fn run_union_prefers_yes_then_unknown() {
        assert_eq!(RunTrait::No.union(RunTrait::Yes), RunTrait::Yes);
        assert_eq!(RunTrait::No.union(RunTrait::Unknown), RunTrait::Unknown);
        assert_eq!(RunTrait::No.union(RunTrait::No), RunTrait::No);
    }

    #[test]
    fn traits_display_is_compact() {
        let t = Traits::defaults_for(RequirementKind::BuildRequire);
        assert_eq!(t.to_string(), "-visible -include -link +run +build");
    }
}
