//! Filesystem-backed binary cache.
//!
//! Layout under the cache root:
//!
//! ```text
//! p/<name>/<version>/<user|_>/<channel|_>/<rrev>/<package_id>/
//!     package.lock            one lock per (reference, package_id)
//!     <prev>/metadata.json    BinaryLocation without the path
//!     <prev>/package/...      artifact files
//! ```
//!
//! Lookups hold the package lock shared; commits hold it exclusive while
//! the staged folder is renamed into place.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Artifact, BinaryCache, BinaryKey, BinaryLocation, BuiltAgainst, CacheError};
use crate::config::BinariesConfig;
use crate::lock::PackageLock;

const LOCK_FILE: &str = "package.lock";
const METADATA_FILE: &str = "metadata.json";
const PACKAGE_DIR: &str = "package";
const STAGING_PREFIX: &str = ".staging-";

/// Default time to wait for a contended package lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    package_revision: String,
    #[serde(default)]
    built_against: BuiltAgainst,
    created_at: DateTime<Utc>,
}

/// A binary cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
    lock_timeout: Duration,
}

impl LocalCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// The cache described by the `[binaries]` configuration section.
    #[must_use]
    pub fn from_config(config: &BinariesConfig) -> Self {
        Self::new(config.resolved_cache_root()).with_lock_timeout(config.lock_timeout())
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder holding every package revision of `key`'s package ID.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unpinned`] if the reference has no recipe
    /// revision.
    pub fn package_folder(&self, key: &BinaryKey) -> Result<PathBuf, CacheError> {
        let rrev = key.recipe_revision()?;
        let reference = &key.reference;
        Ok(self
            .root
            .join("p")
            .join(&reference.name)
            .join(reference.version.as_str())
            .join(reference.user.as_deref().unwrap_or("_"))
            .join(reference.channel.as_deref().unwrap_or("_"))
            .join(rrev)
            .join(&key.package_id.hash))
    }

    fn read_entry(folder: &Path, prev: &str) -> Result<Option<BinaryLocation>, CacheError> {
        let dir = folder.join(prev);
        let meta_path = dir.join(METADATA_FILE);
        if !meta_path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&meta_path).map_err(|e| CacheError::io(&meta_path, e))?;
        let meta: Metadata = serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
            path: meta_path.clone(),
            reason: e.to_string(),
        })?;
        if meta.package_revision != prev {
            return Err(CacheError::Corrupt {
                path: meta_path,
                reason: format!(
                    "metadata names package revision '{}' but folder is '{prev}'",
                    meta.package_revision
                ),
            });
        }
        Ok(Some(BinaryLocation {
            path: dir.join(PACKAGE_DIR),
            package_revision: meta.package_revision,
            built_against: meta.built_against,
            created_at: meta.created_at,
        }))
    }

    fn latest_entry(folder: &Path) -> Result<Option<BinaryLocation>, CacheError> {
        let entries = match fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(folder, e)),
        };

        let mut latest: Option<BinaryLocation> = None;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(folder, e))?;
            let name = entry.file_name();
            let Some(prev) = name.to_str() else { continue };
            if prev.starts_with('.') || prev == LOCK_FILE || !entry.path().is_dir() {
                continue;
            }
            if let Some(found) = Self::read_entry(folder, prev)? {
                let newer = latest.as_ref().is_none_or(|cur| {
                    (found.created_at, &found.package_revision)
                        > (cur.created_at, &cur.package_revision)
                });
                if newer {
                    latest = Some(found);
                }
            }
        }
        Ok(latest)
    }
}

fn write_metadata(path: &Path, meta: &Metadata) -> Result<(), CacheError> {
    let json = serde_json::to_string_pretty(meta).map_err(|e| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::write(path, json).map_err(|e| CacheError::io(path, e))
}

fn write_artifact(target: &Path, artifact: &Artifact) -> Result<(), CacheError> {
    for (relative, contents) in &artifact.files {
        let relative_path = Path::new(relative);
        let safe = relative_path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || relative.is_empty() {
            return Err(CacheError::io(
                target.join(relative),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "artifact paths must be relative and stay inside the package",
                ),
            ));
        }
        let path = target.join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        fs::write(&path, contents).map_err(|e| CacheError::io(&path, e))?;
    }
    Ok(())
}

impl BinaryCache for LocalCache {
    #[instrument(skip(self), fields(reference = %key.reference, package_id = %key.package_id))]
    fn lookup(&self, key: &BinaryKey) -> Result<Option<BinaryLocation>, CacheError> {
        let folder = self.package_folder(key)?;
        if !folder.exists() {
            debug!("package folder absent");
            return Ok(None);
        }
        let _lock = PackageLock::shared(&folder.join(LOCK_FILE), self.lock_timeout)?;
        let found = match &key.package_id.revision {
            Some(prev) => Self::read_entry(&folder, prev)?,
            None => Self::latest_entry(&folder)?,
        };
        debug!(hit = found.is_some(), "cache lookup");
        Ok(found)
    }

    #[instrument(skip(self, artifact, built_against), fields(reference = %key.reference, package_id = %key.package_id))]
    fn commit(
        &self,
        key: &BinaryKey,
        artifact: &Artifact,
        built_against: &BuiltAgainst,
    ) -> Result<String, CacheError> {
        let folder = self.package_folder(key)?;
        let prev = artifact.digest();
        let _lock = PackageLock::exclusive(&folder.join(LOCK_FILE), self.lock_timeout)?;

        let meta = Metadata {
            package_revision: prev.clone(),
            built_against: built_against.clone(),
            created_at: Utc::now(),
        };

        let final_dir = folder.join(&prev);
        if final_dir.join(METADATA_FILE).is_file() {
            // Same bytes again: refresh what it was built against and when.
            let scratch = folder.join(format!("{STAGING_PREFIX}{prev}.{METADATA_FILE}"));
            write_metadata(&scratch, &meta)?;
            let meta_path = final_dir.join(METADATA_FILE);
            fs::rename(&scratch, &meta_path).map_err(|e| CacheError::io(&meta_path, e))?;
            debug!(package_revision = %prev, "identical binary recommitted");
            return Ok(prev);
        }

        let staging = folder.join(format!("{STAGING_PREFIX}{prev}"));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| CacheError::io(&staging, e))?;
        }
        fs::create_dir_all(staging.join(PACKAGE_DIR)).map_err(|e| CacheError::io(&staging, e))?;
        write_artifact(&staging.join(PACKAGE_DIR), artifact)?;

        write_metadata(&staging.join(METADATA_FILE), &meta)?;

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir).map_err(|e| CacheError::io(&final_dir, e))?;
        }
        fs::rename(&staging, &final_dir).map_err(|e| CacheError::io(&final_dir, e))?;
        debug!(package_revision = %prev, "binary committed");
        Ok(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PackageId, PackageReference};

    fn key(rrev: Option<&str>) -> BinaryKey {
        let mut reference = PackageReference::parse("zlib/1.3@acme/stable").unwrap();
        reference.revision = rrev.map(str::to_string);
        BinaryKey::new(reference, PackageId::new("0123abcd"))
    }

    #[test]
    fn miss_then_commit_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let key = key(Some("r1"));

        assert!(cache.lookup(&key).unwrap().is_none());

        let artifact = Artifact::new().with_file("lib/libz.a", "bytes");
        let mut against = BuiltAgainst::new();
        against.insert("dep/1.0#r:aa".into(), "p9".into());
        let prev = cache.commit(&key, &artifact, &against).unwrap();
        assert_eq!(prev, artifact.digest());

        let hit = cache.lookup(&key).unwrap().unwrap();
        assert_eq!(hit.package_revision, prev);
        assert_eq!(hit.built_against, against);
        assert_eq!(fs::read(hit.path.join("lib/libz.a")).unwrap(), b"bytes");

        let mut exact = key.clone();
        exact.package_id.revision = Some(prev);
        assert!(cache.lookup(&exact).unwrap().is_some());
        exact.package_id.revision = Some("other".into());
        assert!(cache.lookup(&exact).unwrap().is_none());
    }

    #[test]
    fn configured_root_and_timeout_are_used() {
        let config = BinariesConfig {
            cache_root: Some(PathBuf::from("/srv/keel")),
            lock_timeout_ms: 250,
            ..BinariesConfig::default()
        };
        let cache = LocalCache::from_config(&config);
        assert_eq!(cache.root(), Path::new("/srv/keel"));
        assert_eq!(cache.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn folder_layout_uses_placeholders() {
        let cache = LocalCache::new("/cache");
        let mut k = key(Some("r1"));
        k.reference.user = None;
        k.reference.channel = None;
        let folder = cache.package_folder(&k).unwrap();
        assert_eq!(folder, PathBuf::from("/cache/p/zlib/1.3/_/_/r1/0123abcd"));
    }

    #[test]
    fn latest_revision_wins_without_pinned_prev() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let key = key(Some("r1"));

        cache
            .commit(&key, &Artifact::new().with_file("a", "1"), &BuiltAgainst::new())
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = cache
            .commit(&key, &Artifact::new().with_file("a", "2"), &BuiltAgainst::new())
            .unwrap();

        assert_eq!(cache.lookup(&key).unwrap().unwrap().package_revision, second);
    }

    #[test]
    fn recommitting_identical_bytes_keeps_revision() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let key = key(Some("r1"));
        let artifact = Artifact::new().with_file("bin/tool", "x");
        let a = cache.commit(&key, &artifact, &BuiltAgainst::new()).unwrap();
        let b = cache.commit(&key, &artifact, &BuiltAgainst::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn recommit_becomes_latest_with_new_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let key = key(Some("r1"));
        let a = Artifact::new().with_file("lib/libz.a", "a");
        let b = Artifact::new().with_file("lib/libz.a", "b");
        let against = |prev: &str| {
            let mut map = BuiltAgainst::new();
            map.insert("dep".into(), prev.into());
            map
        };

        let first = cache.commit(&key, &a, &against("p1")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.commit(&key, &b, &against("p1")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let again = cache.commit(&key, &a, &against("p2")).unwrap();
        assert_eq!(again, first);

        let latest = cache.lookup(&key).unwrap().unwrap();
        assert_eq!(latest.package_revision, first);
        assert_eq!(latest.built_against, against("p2"));
        assert!(latest.path.join("lib/libz.a").is_file());
    }

    #[test]
    fn escaping_artifact_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let artifact = Artifact::new().with_file("../evil", "x");
        let err = cache
            .commit(&key(Some("r1")), &artifact, &BuiltAgainst::new())
            .unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }

    #[test]
    fn unpinned_reference_cannot_be_committed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let err = cache
            .commit(&key(None), &Artifact::new(), &BuiltAgainst::new())
            .unwrap_err();
        assert!(matches!(err, CacheError::Unpinned(_)));
    }

    #[test]
    fn corrupt_metadata_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let mut key = key(Some("r1"));
        let folder = cache.package_folder(&key).unwrap();
        fs::create_dir_all(folder.join("p1")).unwrap();
        fs::write(folder.join("p1").join(METADATA_FILE), "{not json").unwrap();
        key.package_id.revision = Some("p1".into());
        let err = cache.lookup(&key).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }
}
