//! Build permission policy, consulted when no binary matches a package ID.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::reference::PackageReference;
use super::settings::RefPattern;

/// What the binary loop may do for a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPolicy {
    /// Never build; a missing binary is an error.
    #[default]
    Never,
    /// Build only when no binary exists for the package ID.
    Missing,
    /// Always build, even over a cache hit.
    Always,
    /// Build when missing, or when the cached binary was built against
    /// different upstream package revisions.
    Outdated,
}

impl BuildPolicy {
    /// Whether a cache miss may be turned into a build.
    #[must_use]
    pub const fn allows_build(self) -> bool {
        !matches!(self, Self::Never)
    }
}

impl fmt::Display for BuildPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Never => "never",
            Self::Missing => "missing",
            Self::Always => "always",
            Self::Outdated => "outdated",
        })
    }
}

impl FromStr for BuildPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "missing" => Ok(Self::Missing),
            "always" => Ok(Self::Always),
            "outdated" => Ok(Self::Outdated),
            other => Err(format!("unknown build policy '{other}'")),
        }
    }
}

/// One `pattern -> policy` rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub pattern: RefPattern,
    pub policy: BuildPolicy,
}

impl PolicyRule {
    #[must_use]
    pub fn new(pattern: &str, policy: BuildPolicy) -> Self {
        Self {
            pattern: RefPattern::new(pattern),
            policy,
        }
    }
}

/// The policy of the first rule matching `reference`, or `Never`.
#[must_use]
pub fn policy_for(rules: &[PolicyRule], reference: &PackageReference) -> BuildPolicy {
    rules
        .iter()
        .find(|rule| rule.pattern.matches(reference))
        .map_or(BuildPolicy::Never, |rule| rule.policy)
}
