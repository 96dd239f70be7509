//! Version numbers and bracketed version ranges.
//!
//! # Versions
//!
//! A version is a dot-separated list of components with an optional
//! `-prerelease` and `+build` suffix: `1.2.3`, `2.0-beta.1`, `1.0+cci.20240101`.
//!
//! - Numeric components compare numerically, text components lexically, and a
//!   numeric component always sorts before a text one.
//! - Trailing zero components are not significant: `1.2 == 1.2.0`.
//! - A prerelease sorts before the matching release: `2.0-rc1 < 2.0`.
//! - Build metadata breaks ties last: `1.0 < 1.0+1`.
//!
//! # Ranges
//!
//! Ranges are written in brackets and contain whitespace-separated conditions
//! that must all hold, with `||` separating alternatives:
//!
//! ```text
//! [>=1.0 <2.0]        both bounds
//! [~1.2]              >=1.2 <1.3
//! [^1.2]              >=1.2 <2
//! [1.4 || >=2.1]      exactly 1.4, or 2.1 and later
//! [*]                 any release
//! [>=1.0, include_prerelease]
//! ```
//!
//! Prerelease versions only satisfy a range when `include_prerelease` is set
//! or when a condition names a prerelease explicitly.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ErrorCode;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while parsing versions and version ranges.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// The input was empty or whitespace.
    #[error("empty version")]
    Empty,

    /// The input is not a valid version.
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: &'static str },

    /// The input is not a valid bracketed range.
    #[error("invalid version range '{input}': {reason}")]
    InvalidRange { input: String, reason: String },
}

impl VersionError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidVersion
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Component {
    Number(u64),
    Text(String),
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

fn parse_components(input: &str, part: &str) -> Result<Vec<Component>, VersionError> {
    part.split('.')
        .map(|piece| {
            if piece.is_empty() {
                return Err(VersionError::InvalidVersion {
                    input: input.to_string(),
                    reason: "empty component",
                });
            }
            if !piece.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(VersionError::InvalidVersion {
                    input: input.to_string(),
                    reason: "components may only contain letters, digits and '_'",
                });
            }
            if piece.bytes().all(|b| b.is_ascii_digit()) {
                piece
                    .parse::<u64>()
                    .map(Component::Number)
                    .map_err(|_| VersionError::InvalidVersion {
                        input: input.to_string(),
                        reason: "numeric component does not fit in 64 bits",
                    })
            } else {
                Ok(Component::Text(piece.to_string()))
            }
        })
        .collect()
}

/// Strip trailing zero components, which carry no ordering weight.
fn significant(components: &[Component]) -> &[Component] {
    let mut end = components.len();
    while end > 0 && components[end - 1] == Component::Number(0) {
        end -= 1;
    }
    &components[..end]
}

fn join(components: &[Component]) -> String {
    components
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A parsed package version. Keeps its original spelling for display.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    main: Vec<Component>,
    pre: Option<Vec<Component>>,
    build: Option<Vec<Component>>,
}

impl Version {
    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if the input is empty or has malformed
    /// components.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(VersionError::Empty);
        }

        let (rest, build) = match raw.split_once('+') {
            Some((rest, build)) => (rest, Some(parse_components(raw, build)?)),
            None => (raw, None),
        };
        let (main, pre) = match rest.split_once('-') {
            Some((main, pre)) => (main, Some(parse_components(raw, pre)?)),
            None => (rest, None),
        };

        Ok(Self {
            raw: raw.to_string(),
            main: parse_components(raw, main)?,
            pre,
            build,
        })
    }

    fn from_main(main: Vec<Component>) -> Self {
        Self {
            raw: join(&main),
            main,
            pre: None,
            build: None,
        }
    }

    /// The version as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this version carries a `-prerelease` suffix.
    #[must_use]
    pub const fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// The leading numeric component, if the version starts with one.
    #[must_use]
    pub fn major(&self) -> Option<u64> {
        match self.main.first() {
            Some(Component::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Increment the component at `index`, dropping everything after it.
    ///
    /// Missing components are treated as zero. Returns `None` when the
    /// component at `index` is not numeric.
    #[must_use]
    pub fn bump(&self, index: usize) -> Option<Self> {
        let mut main: Vec<Component> = self.main.iter().take(index + 1).cloned().collect();
        while main.len() <= index {
            main.push(Component::Number(0));
        }
        match main.get_mut(index) {
            Some(Component::Number(n)) => *n = n.checked_add(1)?,
            _ => return None,
        }
        Some(Self::from_main(main))
    }

    /// Index of the first non-zero numeric component (used by `^` ranges).
    fn first_nonzero(&self) -> usize {
        self.main
            .iter()
            .position(|c| *c != Component::Number(0))
            .unwrap_or(0)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        significant(&self.main)
            .cmp(significant(&other.main))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        significant(&self.main).hash(state);
        self.pre.hash(state);
        self.build.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// VersionRange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Operator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Condition {
    op: Operator,
    version: Version,
}

impl Condition {
    fn matches(&self, candidate: &Version) -> bool {
        let ord = candidate.cmp(&self.version);
        match self.op {
            Operator::Eq => ord == Ordering::Equal,
            Operator::Gt => ord == Ordering::Greater,
            Operator::Ge => ord != Ordering::Less,
            Operator::Lt => ord == Ordering::Less,
            Operator::Le => ord != Ordering::Greater,
        }
    }
}

/// A bracketed version range such as `[>=1.0 <2.0]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<Vec<Condition>>,
    include_prerelease: bool,
}

const OPERATORS: [(&str, Operator); 5] = [
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    (">", Operator::Gt),
    ("<", Operator::Lt),
    ("=", Operator::Eq),
];

impl VersionRange {
    /// Parse a bracketed range expression.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidRange`] for missing brackets, unknown
    /// flags, empty alternatives, or malformed bounds.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let raw = input.trim();
        let invalid = |reason: &str| VersionError::InvalidRange {
            input: raw.to_string(),
            reason: reason.to_string(),
        };

        let inner = raw
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| invalid("ranges must be enclosed in brackets"))?;

        let mut parts = inner.split(',');
        let expression = parts.next().unwrap_or_default();
        let mut include_prerelease = false;
        for flag in parts {
            match flag.trim() {
                "include_prerelease" | "include_prerelease=True" => include_prerelease = true,
                "" => {}
                other => {
                    return Err(invalid(format!("unknown range option '{other}'").as_str()));
                }
            }
        }

        let mut alternatives = Vec::new();
        for alternative in expression.split("||") {
            let conditions = parse_alternative(raw, alternative)?;
            alternatives.push(conditions);
        }

        Ok(Self {
            raw: raw.to_string(),
            alternatives,
            include_prerelease,
        })
    }

    /// Whether `version` satisfies this range.
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|conditions| {
            let allow_pre = self.include_prerelease
                || conditions.iter().any(|c| c.version.is_prerelease());
            if version.is_prerelease() && !allow_pre {
                return false;
            }
            conditions.iter().all(|c| c.matches(version))
        })
    }

    /// Whether prerelease versions are admitted.
    #[must_use]
    pub const fn includes_prerelease(&self) -> bool {
        self.include_prerelease
    }
}

fn parse_alternative(raw: &str, alternative: &str) -> Result<Vec<Condition>, VersionError> {
    let invalid = |reason: String| VersionError::InvalidRange {
        input: raw.to_string(),
        reason,
    };

    let mut tokens: Vec<String> = Vec::new();
    let mut pending: Option<&str> = None;
    for token in alternative.split_whitespace() {
        // Allow a space between an operator and its version: `>= 1.0`.
        if let Some(op) = pending.take() {
            tokens.push(format!("{op}{token}"));
        } else if matches!(token, ">=" | "<=" | ">" | "<" | "=" | "~" | "^") {
            pending = Some(token);
        } else {
            tokens.push(token.to_string());
        }
    }
    if let Some(op) = pending {
        return Err(invalid(format!("operator '{op}' has no version")));
    }
    if tokens.is_empty() {
        return Err(invalid("empty alternative".to_string()));
    }

    let mut conditions = Vec::new();
    for token in tokens {
        if token == "*" {
            continue;
        }
        if let Some(rest) = token.strip_prefix('~') {
            let lower = Version::parse(rest).map_err(|e| invalid(e.to_string()))?;
            let index = usize::from(lower.main.len() > 1);
            let upper = lower
                .bump(index)
                .ok_or_else(|| invalid(format!("cannot compute upper bound for '~{rest}'")))?;
            conditions.push(Condition { op: Operator::Ge, version: lower });
            conditions.push(Condition { op: Operator::Lt, version: upper });
            continue;
        }
        if let Some(rest) = token.strip_prefix('^') {
            let lower = Version::parse(rest).map_err(|e| invalid(e.to_string()))?;
            let upper = lower
                .bump(lower.first_nonzero())
                .ok_or_else(|| invalid(format!("cannot compute upper bound for '^{rest}'")))?;
            conditions.push(Condition { op: Operator::Ge, version: lower });
            conditions.push(Condition { op: Operator::Lt, version: upper });
            continue;
        }

        let (op, rest) = OPERATORS
            .iter()
            .find_map(|(prefix, op)| token.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((Operator::Eq, token.as_str()));
        let version = Version::parse(rest).map_err(|e| invalid(e.to_string()))?;
        conditions.push(Condition { op, version });
    }
    Ok(conditions)
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ---------------------------------------------------------------------------
// VersionExpr
// ---------------------------------------------------------------------------

/// The version slot of a requirement: either an exact version or a range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionExpr {
    Exact(Version),
    Range(VersionRange),
}

impl VersionExpr {
    /// Parse either `1.2.3` or `[>=1.2 <2]`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] when the version or range is malformed.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.starts_with('[') {
            VersionRange::parse(trimmed).map(Self::Range)
        } else {
            Version::parse(trimmed).map(Self::Exact)
        }
    }

    /// Whether `version` satisfies this expression.
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        match self {
            Self::Exact(exact) => exact == version,
            Self::Range(range) => range.contains(version),
        }
    }

    /// Whether the expression is a range rather than a pinned version.
    #[must_use]
    pub const fn is_range(&self) -> bool {
        matches!(self, Self::Range(_))
    }
}

impl fmt::Display for VersionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => v.fmt(f),
            Self::Range(r) => r.fmt(f),
        }
    }
}

impl FromStr for VersionExpr {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Version> for VersionExpr {
    fn from(version: Version) -> Self {
        Self::Exact(version)
    }
}

impl Serialize for VersionExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn range(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn numeric_components_compare_numerically() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2") > v("1.99.99"));
        assert!(v("1.2.3") < v("1.2.4"));
    }

    #[test]
    fn trailing_zeros_are_not_significant() {
        assert_eq!(v("1.2"), v("1.2.0"));
        assert_eq!(v("1"), v("1.0.0"));
        assert_eq!(v("1.2").to_string(), "1.2");
    }

    #[test]
    fn prerelease_sorts_before_release() {
        assert!(v("2.0-rc1") < v("2.0"));
        assert!(v("2.0-alpha") < v("2.0-beta"));
        assert!(v("1.9") < v("2.0-alpha"));
    }

    #[test]
    fn build_metadata_breaks_ties_last() {
        assert!(v("1.0") < v("1.0+1"));
        assert!(v("1.0+1") < v("1.1"));
    }

    #[test]
    fn text_components_sort_after_numbers() {
        assert!(v("1.2") < v("1.a"));
        assert!(v("1.a") < v("1.b"));
    }

    #[test]
    fn malformed_versions_are_rejected() {
        assert_eq!(Version::parse("  "), Err(VersionError::Empty));
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.2-").is_err());
        assert!(Version::parse("1/2").is_err());
    }

    #[test]
    fn bump_truncates_and_increments() {
        assert_eq!(v("1.2.3").bump(1).unwrap().to_string(), "1.3");
        assert_eq!(v("1").bump(1).unwrap().to_string(), "1.1");
        assert!(v("1.x").bump(1).is_none());
    }

    #[test]
    fn range_with_both_bounds() {
        let r = range("[>=1.0 <2.0]");
        assert!(r.contains(&v("1.0")));
        assert!(r.contains(&v("1.9.9")));
        assert!(!r.contains(&v("2.0")));
        assert!(!r.contains(&v("0.9")));
    }

    #[test]
    fn operator_may_be_separated_from_version() {
        let r = range("[>= 1.0 < 2]");
        assert!(r.contains(&v("1.5")));
        assert!(!r.contains(&v("2.1")));
    }

    #[test]
    fn tilde_allows_patch_updates() {
        let r = range("[~1.2]");
        assert!(r.contains(&v("1.2.9")));
        assert!(!r.contains(&v("1.3")));

        let major_only = range("[~1]");
        assert!(major_only.contains(&v("1.9")));
        assert!(!major_only.contains(&v("2.0")));
    }

    #[test]
    fn caret_allows_minor_updates() {
        let r = range("[^1.2]");
        assert!(r.contains(&v("1.9")));
        assert!(!r.contains(&v("2.0")));

        let zero = range("[^0.2.1]");
        assert!(zero.contains(&v("0.2.5")));
        assert!(!zero.contains(&v("0.3")));
    }

    #[test]
    fn alternatives_are_ored() {
        let r = range("[1.4 || >=2.1]");
        assert!(r.contains(&v("1.4")));
        assert!(!r.contains(&v("1.5")));
        assert!(r.contains(&v("3.0")));
    }

    #[test]
    fn prereleases_need_opt_in() {
        assert!(!range("[>=1.0]").contains(&v("2.0-beta")));
        assert!(range("[>=1.0, include_prerelease]").contains(&v("2.0-beta")));
        assert!(range("[=2.0-beta]").contains(&v("2.0-beta")));
    }

    #[test]
    fn star_accepts_any_release() {
        let r = range("[*]");
        assert!(r.contains(&v("0.0.1")));
        assert!(r.contains(&v("99")));
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert!(VersionRange::parse(">=1.0").is_err());
        assert!(VersionRange::parse("[]").is_err());
        assert!(VersionRange::parse("[>=]").is_err());
        assert!(VersionRange::parse("[>=1.0, bogus]").is_err());
        assert!(VersionRange::parse("[~x]").is_err());
    }

    #[test]
    fn expr_dispatches_on_bracket() {
        let exact = VersionExpr::parse("1.2").unwrap();
        assert!(!exact.is_range());
        assert!(exact.contains(&v("1.2.0")));

        let ranged = VersionExpr::parse("[>1.0]").unwrap();
        assert!(ranged.is_range());
        assert!(ranged.contains(&v("1.1")));
        assert_eq!(ranged.to_string(), "[>1.0]");
    }

    #[test]
    fn version_serde_uses_plain_strings() {
        let json = serde_json::to_string(&v("1.2-rc1")).unwrap();
        assert_eq!(json, "\"1.2-rc1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.2-rc1"));
    }
}
