//! Package references and package IDs.
//!
//! A [`PackageReference`] names a recipe: `name/version[@user[/channel]][#revision]`.
//! The recipe revision is optional until the reference is pinned; two
//! references that differ only in revision are the *same package* (see
//! [`PackageReference::same_package`]) but not equal.
//!
//! A [`PackageId`] names one binary configuration of a recipe. Its hash is
//! content-derived; its package revision is assigned once a concrete binary
//! exists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::version::{Version, VersionError};
use crate::error::ErrorCode;

/// Errors produced while parsing references.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    /// The reference has no `/version` part.
    #[error("reference '{0}' is missing a version (expected name/version)")]
    MissingVersion(String),

    /// A name, user, channel or revision field has illegal characters.
    #[error("invalid {field} '{value}' in reference '{input}'")]
    InvalidField {
        input: String,
        field: &'static str,
        value: String,
    },

    /// The version part does not parse.
    #[error("invalid version in reference '{input}': {source}")]
    Version {
        input: String,
        #[source]
        source: VersionError,
    },
}

impl ReferenceError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Version { .. } => ErrorCode::InvalidVersion,
            _ => ErrorCode::InvalidReference,
        }
    }
}

/// Split `input` into its `name`, version slot, user, channel and revision.
///
/// Shared with requirement parsing, where the version slot may be a range.
pub(crate) struct RawReference<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub user: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub revision: Option<&'a str>,
}

pub(crate) fn split_reference(input: &str) -> Result<RawReference<'_>, ReferenceError> {
    let trimmed = input.trim();
    let (body, revision) = match trimmed.split_once('#') {
        Some((body, rev)) => (body, Some(rev)),
        None => (trimmed, None),
    };

    let (name_version, user_channel) = match body.split_once('@') {
        Some((nv, uc)) => (nv, Some(uc)),
        None => (body, None),
    };
    let (name, version) = name_version
        .split_once('/')
        .ok_or_else(|| ReferenceError::MissingVersion(trimmed.to_string()))?;
    let (user, channel) = match user_channel {
        Some(uc) => match uc.split_once('/') {
            Some((user, channel)) => (Some(user), Some(channel)),
            None => (Some(uc), None),
        },
        None => (None, None),
    };

    validate_field(trimmed, "name", name)?;
    if version.trim().is_empty() {
        return Err(ReferenceError::MissingVersion(trimmed.to_string()));
    }
    if let Some(user) = user {
        validate_field(trimmed, "user", user)?;
    }
    if let Some(channel) = channel {
        validate_field(trimmed, "channel", channel)?;
    }
    if let Some(revision) = revision {
        validate_field(trimmed, "revision", revision)?;
    }

    Ok(RawReference {
        name,
        version,
        user,
        channel,
        revision,
    })
}

fn validate_field(input: &str, field: &'static str, value: &str) -> Result<(), ReferenceError> {
    let valid = value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'))
        && (field != "name" || value.chars().all(|c| !c.is_ascii_uppercase()));
    if valid {
        Ok(())
    } else {
        Err(ReferenceError::InvalidField {
            input: input.to_string(),
            field,
            value: value.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// PackageReference
// ---------------------------------------------------------------------------

/// A recipe reference. Immutable value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageReference {
    pub name: String,
    pub version: Version,
    pub user: Option<String>,
    pub channel: Option<String>,
    /// `None` means unresolved: the latest revision applies.
    pub revision: Option<String>,
}

impl PackageReference {
    /// Build an unpinned reference without user or channel.
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            user: None,
            channel: None,
            revision: None,
        }
    }

    /// Parse `name/version[@user[/channel]][#revision]`.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError`] when a field is missing or malformed.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let raw = split_reference(input)?;
        let version = Version::parse(raw.version).map_err(|source| ReferenceError::Version {
            input: input.trim().to_string(),
            source,
        })?;
        Ok(Self {
            name: raw.name.to_string(),
            version,
            user: raw.user.map(str::to_string),
            channel: raw.channel.map(str::to_string),
            revision: raw.revision.map(str::to_string),
        })
    }

    /// Same package, possibly a different recipe revision.
    #[must_use]
    pub fn same_package(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.user == other.user
            && self.channel == other.channel
    }

    /// A copy with the recipe revision pinned.
    #[must_use]
    pub fn with_revision(&self, revision: impl Into<String>) -> Self {
        Self {
            revision: Some(revision.into()),
            ..self.clone()
        }
    }

    /// A copy with the recipe revision cleared.
    #[must_use]
    pub fn without_revision(&self) -> Self {
        Self {
            revision: None,
            ..self.clone()
        }
    }

    /// `name/version[@user/channel]` without the revision.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.without_revision().to_string()
    }
}

impl fmt::Display for PackageReference {
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

impl FromStr for PackageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PackageReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// PackageId
// ---------------------------------------------------------------------------

/// Identity of one binary configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    /// Hex content digest of the canonical ID inputs.
    pub hash: String,
    /// Assigned once a concrete binary exists.
    pub revision: Option<String>,
}

impl PackageId {
    /// A package ID with no binary revision yet.
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            revision: None,
        }
    }

    /// Two IDs are the same binary iff hash and package revision both match.
    #[must_use]
    pub fn same_binary(&self, other: &Self) -> bool {
        self.hash == other.hash && self.revision == other.revision
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)?;
        if let Some(revision) = &self.revision {
            write!(f, "#{revision}")?;
        }
        Ok(())
    }
}
