//! Conflict detection between a requirement and an existing node.
//!
//! Overrides are applied to every requirement before it gets here, so an
//! overridden name always agrees with its node. Breadth-first expansion
//! guarantees the existing node came from a requirement at least as near
//! the root as the new one; that node wins when the new requirement
//! accepts its version, and a conflict is raised otherwise.

use keel_core::model::{PackageReference, Requirement};

use super::{Context, NodeId};
use crate::error::ResolveError;

/// What to do with a requirement that names an existing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The existing node satisfies the requirement.
    Reuse,
    /// Same version, different pinned recipe revision.
    RevisionMismatch,
    /// The requirement does not accept the existing version.
    VersionMismatch,
}

/// Compare `requirement` against the reference of the node it collides with.
#[must_use]
pub fn judge(existing: &PackageReference, requirement: &Requirement) -> Verdict {
    if requirement.user != existing.user
        || requirement.channel != existing.channel
        || !requirement.version.contains(&existing.version)
    {
        return Verdict::VersionMismatch;
    }
    match (&requirement.revision, &existing.revision) {
        (Some(wanted), Some(actual)) if wanted != actual => Verdict::RevisionMismatch,
        _ => Verdict::Reuse,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Version,
    Revision,
}

/// A collision between two requirements for the same package.
///
/// Revision conflicts that were re-resolved to the existing revision stay
/// recorded with `resolved = true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub name: String,
    pub context: Context,
    /// The existing node and the node whose requirement collided with it.
    pub involved: Vec<NodeId>,
    pub existing: String,
    pub existing_path: Vec<String>,
    pub requested: String,
    pub requested_path: Vec<String>,
    pub resolved: bool,
}

impl Conflict {
    #[must_use]
    pub fn to_error(&self) -> ResolveError {
        let (name, existing, requested) = (
            self.name.clone(),
            self.existing.clone(),
            self.requested.clone(),
        );
        let (existing_path, requested_path) =
            (self.existing_path.clone(), self.requested_path.clone());
        match self.kind {
            ConflictKind::Version => ResolveError::VersionConflict {
                name,
                existing,
                existing_path,
                requested,
                requested_path,
            },
            ConflictKind::Revision => ResolveError::RevisionConflict {
                name,
                existing,
                existing_path,
                requested,
                requested_path,
            },
        }
    }
}
