//! Settings, options, profiles and reference patterns.
//!
//! Settings and options are kept in `BTreeMap`s so that every iteration is
//! ordered; package IDs hash them directly.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::reference::PackageReference;

// ---------------------------------------------------------------------------
// Settings / Options
// ---------------------------------------------------------------------------

/// Dotted key/value configuration such as `compiler.version = 13`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a setting, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the keys named in `relevant`.
    ///
    /// A relevant key also selects its dotted sub-settings: `compiler`
    /// keeps `compiler.version` and `compiler.cppstd`.
    #[must_use]
    pub fn filtered<S: AsRef<str>>(&self, relevant: &[S]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(key, _)| relevant.iter().any(|r| key_selected(key, r.as_ref())))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

fn key_selected(key: &str, relevant: &str) -> bool {
    key == relevant
        || key
            .strip_prefix(relevant)
            .is_some_and(|rest| rest.starts_with('.'))
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Package options such as `shared = True`.
pub type Options = Settings;

// ---------------------------------------------------------------------------
// RefPattern
// ---------------------------------------------------------------------------

/// A glob over references: `*`, `zlib/*`, `boost*`, `openssl/3.*`.
///
/// A pattern without `/` is matched against the package name alone; a
/// pattern with `/` against `name/version[@user/channel]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefPattern(String);

impl RefPattern {
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `reference` matches this pattern.
    #[must_use]
    pub fn matches(&self, reference: &PackageReference) -> bool {
        if self.0.contains('/') {
            glob_match(&self.0, &reference.display_name())
        } else {
            glob_match(&self.0, &reference.name)
        }
    }

    /// Whether a bare package name matches this pattern.
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        let head = self.0.split('/').next().unwrap_or_default();
        glob_match(head, name)
    }
}

impl fmt::Display for RefPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Minimal `*`/`?` glob matcher with backtracking on the last `*`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// One option assignment scoped to a reference pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopedOption {
    pub pattern: RefPattern,
    pub key: String,
    pub value: String,
}

/// The configuration of one context (host or build).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub options: Vec<ScopedOption>,
}

impl Profile {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            options: Vec::new(),
        }
    }

    /// Add a `pattern:key=value` option, returning `self` for chaining.
    #[must_use]
    pub fn with_option(
        mut self,
        pattern: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.options.push(ScopedOption {
            pattern: RefPattern::new(pattern),
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Profile options that apply to packages named `name`, later entries
    /// overriding earlier ones.
    #[must_use]
    pub fn options_for_name(&self, name: &str) -> Options {
        self.options
            .iter()
            .filter(|o| o.pattern.matches_name(name))
            .map(|o| (o.key.clone(), o.value.clone()))
            .collect()
    }

    /// Overlay the profile's options for `reference` onto `defaults`.
    #[must_use]
    pub fn options_for(&self, reference: &PackageReference, defaults: &Options) -> Options {
        let mut options = defaults.clone();
        for scoped in self.options.iter().filter(|o| o.pattern.matches(reference)) {
            options.insert(scoped.key.clone(), scoped.value.clone());
        }
        options
    }
}

// ---------------------------------------------------------------------------
// PackageType
// ---------------------------------------------------------------------------

/// What kind of artifact a recipe produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageType {
    Library,
    StaticLibrary,
    SharedLibrary,
    HeaderLibrary,
    Application,
    #[default]
    Unknown,
}

impl PackageType {
    /// Whether consumers need this package's files at run time when they
    /// link it. `None` when it cannot be known from the type alone.
    #[must_use]
    pub const fn is_runtime_artifact(self) -> Option<bool> {
        match self {
            Self::SharedLibrary | Self::Application => Some(true),
            Self::StaticLibrary | Self::HeaderLibrary => Some(false),
            Self::Library | Self::Unknown => None,
        }
    }

    /// Resolve a generic `library` with its `shared` option.
    #[must_use]
    pub fn resolve(self, options: &Options) -> Self {
        match (self, options.get("shared")) {
            (Self::Library, Some(v)) if is_truthy(v) => Self::SharedLibrary,
            (Self::Library, Some(_)) => Self::StaticLibrary,
            (other, _) => other,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::version::Version;

    fn zlib() -> PackageReference {
        PackageReference::new("zlib", Version::parse("1.3").unwrap())
    }

    #[test]
    fn filtered_keeps_dotted_subsettings() {
        let settings = Settings::new()
            .with("os", "Linux")
            .with("compiler", "gcc")
            .with("compiler.version", "13")
            .with("compilers", "nope")
            .with("build_type", "Release");
        let kept = settings.filtered(&["compiler", "os"]);
        let keys: Vec<&str> = kept.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["compiler", "compiler.version", "os"]);
    }

    #[test]
    fn glob_patterns_match_names_and_versions() {
        assert!(RefPattern::new("*").matches(&zlib()));
        assert!(RefPattern::new("zl*").matches(&zlib()));
        assert!(RefPattern::new("zlib/1.*").matches(&zlib()));
        assert!(!RefPattern::new("zlib/2.*").matches(&zlib()));
        assert!(!RefPattern::new("boost").matches(&zlib()));
        assert!(RefPattern::new("z?ib").matches(&zlib()));
        assert!(RefPattern::new("zlib/*").matches_name("zlib"));
    }

    #[test]
    fn profile_options_overlay_defaults_in_order() {
        let profile = Profile::default()
            .with_option("*", "fPIC", "True")
            .with_option("zlib/*", "shared", "True")
            .with_option("boost/*", "shared", "False");
        let defaults = Options::new().with("shared", "False").with("fPIC", "False");
        let options = profile.options_for(&zlib(), &defaults);
        assert_eq!(options.get("shared"), Some("True"));
        assert_eq!(options.get("fPIC"), Some("True"));
    }

    #[test]
    fn generic_library_resolves_with_shared_option() {
        let shared = Options::new().with("shared", "True");
        assert_eq!(PackageType::Library.resolve(&shared), PackageType::SharedLibrary);
        let static_ = Options::new().with("shared", "False");
        assert_eq!(PackageType::Library.resolve(&static_), PackageType::StaticLibrary);
        assert_eq!(PackageType::Application.resolve(&shared), PackageType::Application);
        assert_eq!(PackageType::Library.resolve(&Options::new()), PackageType::Library);
    }
}
