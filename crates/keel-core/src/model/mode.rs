//! Package-ID modes.
//!
//! A consumer's mode decides how much of each dependency's identity is
//! folded into the consumer's own package ID.
//!
//! | mode                    | per dependency                         | recursive |
//! |-------------------------|----------------------------------------|-----------|
//! | `unrelated_mode`        | name only                              | no        |
//! | `recipe_revision_mode`  | `name/version#rrev`                    | no        |
//! | `package_revision_mode` | `name/version#rrev:package_id#prev`    | no        |
//! | `full_version_mode`     | `name/version`                         | yes       |
//! | `full_recipe_mode`      | `name/version@user/channel#rrev`       | yes       |
//! | `full_package_mode`     | full recipe + `:package_id`            | yes       |
//! | `full_revision_mode`    | full recipe + `:package_id#prev`       | yes       |
//!
//! Recursive modes also fold in each dependency's own transitive host
//! requirements.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a consumer folds dependency identities into its package ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum PackageIdMode {
    #[serde(rename = "unrelated_mode")]
    Unrelated,
    #[default]
    #[serde(rename = "recipe_revision_mode")]
    RecipeRevision,
    #[serde(rename = "package_revision_mode")]
    PackageRevision,
    #[serde(rename = "full_version_mode")]
    FullVersion,
    #[serde(rename = "full_recipe_mode")]
    FullRecipe,
    #[serde(rename = "full_package_mode")]
    FullPackage,
    #[serde(rename = "full_revision_mode")]
    FullRevision,
}

/// What a mode reads from one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeFields {
    pub version: bool,
    pub user_channel: bool,
    pub recipe_revision: bool,
    pub package_id: bool,
    pub package_revision: bool,
}

impl PackageIdMode {
    pub const ALL: [Self; 7] = [
        Self::Unrelated,
        Self::RecipeRevision,
        Self::PackageRevision,
        Self::FullVersion,
        Self::FullRecipe,
        Self::FullPackage,
        Self::FullRevision,
    ];

    /// The fields of each dependency folded into the consumer's hash.
    #[must_use]
    pub const fn fields(self) -> ModeFields {
        let (version, user_channel, recipe_revision, package_id, package_revision) = match self {
            Self::Unrelated => (false, false, false, false, false),
            Self::RecipeRevision => (true, false, true, false, false),
            Self::PackageRevision => (true, false, true, true, true),
            Self::FullVersion => (true, false, false, false, false),
            Self::FullRecipe => (true, true, true, false, false),
            Self::FullPackage => (true, true, true, true, false),
            Self::FullRevision => (true, true, true, true, true),
        };
        ModeFields {
            version,
            user_channel,
            recipe_revision,
            package_id,
            package_revision,
        }
    }

    /// Whether the mode also folds each dependency's transitive requirements.
    #[must_use]
    pub const fn is_recursive(self) -> bool {
        matches!(
            self,
            Self::FullVersion | Self::FullRecipe | Self::FullPackage | Self::FullRevision
        )
    }

    /// Whether a new package revision upstream changes the consumer's ID.
    #[must_use]
    pub const fn tracks_package_revision(self) -> bool {
        self.fields().package_revision
    }

    /// The canonical `*_mode` spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unrelated => "unrelated_mode",
            Self::RecipeRevision => "recipe_revision_mode",
            Self::PackageRevision => "package_revision_mode",
            Self::FullVersion => "full_version_mode",
            Self::FullRecipe => "full_recipe_mode",
            Self::FullPackage => "full_package_mode",
            Self::FullRevision => "full_revision_mode",
        }
    }
}

impl fmt::Display for PackageIdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageIdMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted || mode.as_str().trim_end_matches("_mode") == wanted)
            .ok_or_else(|| format!("unknown package id mode '{wanted}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_revision_modes_track_package_revisions() {
        let tracking: Vec<PackageIdMode> = PackageIdMode::ALL
            .into_iter()
            .filter(|m| m.tracks_package_revision())
            .collect();
        assert_eq!(
            tracking,
            [PackageIdMode::PackageRevision, PackageIdMode::FullRevision]
        );
    }

    #[test]
    fn parses_with_or_without_suffix() {
        assert_eq!("full_package_mode".parse(), Ok(PackageIdMode::FullPackage));
        assert_eq!("unrelated".parse(), Ok(PackageIdMode::Unrelated));
        assert!("strict".parse::<PackageIdMode>().is_err());
    }

    #[test]
    fn serde_uses_mode_spelling() {
        let json = serde_json::to_string(&PackageIdMode::FullRevision).unwrap();
        assert_eq!(json, "\"full_revision_mode\"");
    }

    #[test]
    fn full_modes_are_recursive() {
        assert!(PackageIdMode::FullVersion.is_recursive());
        assert!(!PackageIdMode::PackageRevision.is_recursive());
    }
}
