use std::fmt;

/// Machine-readable error codes shared by every keel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidReference,
    InvalidVersion,
    InvalidRequirement,
    RecipeNotFound,
    RecipeLoadFailed,
    StructuralCycle,
    VersionConflict,
    RevisionConflict,
    MissingBinary,
    BuildFailed,
    BuildCancelled,
    CacheCorrupt,
    CacheWriteFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::InvalidReference => "E1101",
            Self::InvalidVersion => "E1102",
            Self::InvalidRequirement => "E1103",
            Self::RecipeNotFound => "E2001",
            Self::RecipeLoadFailed => "E2002",
            Self::StructuralCycle => "E2003",
            Self::VersionConflict => "E2004",
            Self::RevisionConflict => "E2005",
            Self::MissingBinary => "E3001",
            Self::BuildFailed => "E3002",
            Self::BuildCancelled => "E3003",
            Self::CacheCorrupt => "E4001",
            Self::CacheWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidReference => "Invalid package reference",
            Self::InvalidVersion => "Invalid version or version range",
            Self::InvalidRequirement => "Invalid requirement declaration",
            Self::RecipeNotFound => "Recipe not found",
            Self::RecipeLoadFailed => "Recipe failed to load",
            Self::StructuralCycle => "Dependency cycle",
            Self::VersionConflict => "Version conflict",
            Self::RevisionConflict => "Recipe revision conflict",
            Self::MissingBinary => "Missing prebuilt binary",
            Self::BuildFailed => "Package build failed",
            Self::BuildCancelled => "Package build cancelled",
            Self::CacheCorrupt => "Corrupt cache entry",
            Self::CacheWriteFailed => "Cache write failed",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .keel/config.toml and retry."),
            Self::InvalidReference => Some("Use the form name/version[@user/channel][#revision]."),
            Self::InvalidVersion => Some("Use dotted versions or bracketed ranges like [>=1.0 <2]."),
            Self::InvalidRequirement => None,
            Self::RecipeNotFound => Some("Check the requirement name and version range."),
            Self::RecipeLoadFailed => None,
            Self::StructuralCycle => Some("Remove one of the requirements that closes the loop."),
            Self::VersionConflict => {
                Some("Add an override for the package in the [overrides] config section.")
            }
            Self::RevisionConflict => Some("Pin the same recipe revision in both requirements."),
            Self::MissingBinary => Some("Allow building it with a Missing or Always build policy."),
            Self::BuildFailed => None,
            Self::BuildCancelled => Some("Fix the failing upstream build or enable keep_going."),
            Self::CacheCorrupt => Some("Remove the package folder from the cache and rebuild."),
            Self::CacheWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other keel process releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 16] = [
        ErrorCode::ConfigParseError,
        ErrorCode::InvalidReference,
        ErrorCode::InvalidVersion,
        ErrorCode::InvalidRequirement,
        ErrorCode::RecipeNotFound,
        ErrorCode::RecipeLoadFailed,
        ErrorCode::StructuralCycle,
        ErrorCode::VersionConflict,
        ErrorCode::RevisionConflict,
        ErrorCode::MissingBinary,
        ErrorCode::BuildFailed,
        ErrorCode::BuildCancelled,
        ErrorCode::CacheCorrupt,
        ErrorCode::CacheWriteFailed,
        ErrorCode::LockContention,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let text = code.code();
            assert_eq!(text.len(), 5);
            assert!(text.starts_with('E'));
            assert!(text.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn conflict_codes_carry_hints() {
        assert!(ErrorCode::VersionConflict.hint().is_some());
        assert!(ErrorCode::MissingBinary.hint().is_some());
        assert_eq!(ErrorCode::StructuralCycle.to_string(), "E2003");
    }
}
