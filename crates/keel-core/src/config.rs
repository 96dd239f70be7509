//! Layered configuration.
//!
//! The first file found wins: `<project>/.keel/config.toml`, then
//! `<config_dir>/keel/config.toml`, then built-in defaults. `KEEL_HOME`
//! overrides the cache root. Settings keys containing dots must be quoted
//! in TOML (`"compiler.version" = "13"`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{PackageIdMode, PolicyRule, Profile};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeelConfig {
    /// Profile of the platform the artifacts run on.
    #[serde(default)]
    pub host: Profile,
    /// Profile of the platform running build tools.
    #[serde(default)]
    pub build: Profile,
    /// `name -> "version"` or `name -> "version#recipe_revision"`.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub package_id: PackageIdConfig,
    /// Evaluated in order; the first matching pattern decides.
    #[serde(default)]
    pub build_policy: Vec<PolicyRule>,
    #[serde(default)]
    pub binaries: BinariesConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdConfig {
    #[serde(default)]
    pub default_mode: PackageIdMode,
    /// Per-package-name mode, overriding the recipe's own choice.
    #[serde(default)]
    pub modes: BTreeMap<String, PackageIdMode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinariesConfig {
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default)]
    pub keep_going: bool,
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            keep_going: false,
            cache_root: None,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl BinariesConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Configured cache root, or `<data_dir>/keel`, or `.keel` as a last
    /// resort.
    #[must_use]
    pub fn resolved_cache_root(&self) -> PathBuf {
        self.cache_root.clone().unwrap_or_else(|| {
            dirs::data_dir().map_or_else(|| PathBuf::from(".keel"), |dir| dir.join("keel"))
        })
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

const fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn load_file(path: &Path) -> Result<Option<KeelConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<KeelConfig>(&content)
        .map(Some)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load `<project_root>/.keel/config.toml` if present.
///
/// # Errors
///
/// Returns an error naming the file if it exists but cannot be read or
/// parsed.
pub fn load_project_config(project_root: &Path) -> Result<Option<KeelConfig>> {
    load_file(&project_root.join(".keel/config.toml"))
}

/// Load `<config_dir>/keel/config.toml` if present.
///
/// # Errors
///
/// Returns an error naming the file if it exists but cannot be read or
/// parsed.
pub fn load_user_config() -> Result<Option<KeelConfig>> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(None);
    };
    load_file(&config_dir.join("keel/config.toml"))
}

/// Resolve the effective configuration for `project_root`.
///
/// # Errors
///
/// Returns an error if a config file exists but is malformed.
pub fn resolve_config(project_root: &Path) -> Result<KeelConfig> {
    let project = load_project_config(project_root)?;
    let user = if project.is_none() {
        load_user_config()?
    } else {
        None
    };
    Ok(layer(project, user, env::var("KEEL_HOME").ok()))
}

fn layer(
    project: Option<KeelConfig>,
    user: Option<KeelConfig>,
    keel_home: Option<String>,
) -> KeelConfig {
    let mut config = project.or(user).unwrap_or_default();
    if let Some(home) = keel_home.filter(|h| !h.trim().is_empty()) {
        config.binaries.cache_root = Some(PathBuf::from(home));
    }
    config
}
