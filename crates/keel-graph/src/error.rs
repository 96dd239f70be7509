//! Resolution errors.
//!
//! [`GraphError`] aborts a resolution outright. [`ResolveError`] values are
//! collected per node and reported together so one run can show every
//! problem across independent branches.

use keel_core::ErrorCode;
use keel_core::cache::CacheError;

use crate::recipe::LoadError;

/// Render a requiring path as `root/1.0 -> a/1.0 -> c/2.0`.
#[must_use]
pub fn format_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Errors that stop resolution because the graph cannot be processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("dependency cycle: {}", format_path(.path))]
    StructuralCycle { path: Vec<String> },
}

impl GraphError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::StructuralCycle { .. } => ErrorCode::StructuralCycle,
        }
    }
}

/// A problem attached to one node.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(
        "version conflict for '{name}': {existing} (required by {}) vs {requested} (required by {})",
        format_path(.existing_path),
        format_path(.requested_path)
    )]
    VersionConflict {
        name: String,
        existing: String,
        existing_path: Vec<String>,
        requested: String,
        requested_path: Vec<String>,
    },

    #[error(
        "recipe revision conflict for '{name}': {existing} (required by {}) vs {requested} (required by {})",
        format_path(.existing_path),
        format_path(.requested_path)
    )]
    RevisionConflict {
        name: String,
        existing: String,
        existing_path: Vec<String>,
        requested: String,
        requested_path: Vec<String>,
    },

    #[error("cannot load '{requirement}' (required by {}): {source}", format_path(.path))]
    RecipeLoad {
        requirement: String,
        path: Vec<String>,
        #[source]
        source: LoadError,
    },

    #[error("missing binary for {reference}:{package_id} (required by {})", format_path(.path))]
    MissingBinary {
        reference: String,
        package_id: String,
        path: Vec<String>,
    },

    #[error("build of {reference} failed (required by {}): {reason}", format_path(.path))]
    BuildFailure {
        reference: String,
        path: Vec<String>,
        reason: String,
    },

    #[error("{reference} was not built: {cause}")]
    Cancelled { reference: String, cause: String },

    #[error("binary cache error for {reference}: {source}")]
    Cache {
        reference: String,
        #[source]
        source: CacheError,
    },
}

impl ResolveError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::VersionConflict { .. } => ErrorCode::VersionConflict,
            Self::RevisionConflict { .. } => ErrorCode::RevisionConflict,
            Self::RecipeLoad { source, .. } => source.code(),
            Self::MissingBinary { .. } => ErrorCode::MissingBinary,
            Self::BuildFailure { .. } => ErrorCode::BuildFailed,
            Self::Cancelled { .. } => ErrorCode::BuildCancelled,
            Self::Cache { source, .. } => source.code(),
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_versions_and_paths() {
        let err = ResolveError::VersionConflict {
            name: "c".into(),
            existing: "c/1.0".into(),
            existing_path: vec!["r/1.0".into(), "a/1.0".into()],
            requested: "c/2.0".into(),
            requested_path: vec!["r/1.0".into(), "b/1.0".into()],
        };
        let text = err.to_string();
        assert!(text.contains("c/1.0 (required by r/1.0 -> a/1.0)"));
        assert!(text.contains("c/2.0 (required by r/1.0 -> b/1.0)"));
        assert_eq!(err.code(), ErrorCode::VersionConflict);
    }

    #[test]
    fn cycle_renders_its_path() {
        let err = GraphError::StructuralCycle {
            path: vec!["a/1".into(), "b/1".into(), "a/1".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a/1 -> b/1 -> a/1");
        assert_eq!(err.code(), ErrorCode::StructuralCycle);
    }
}
