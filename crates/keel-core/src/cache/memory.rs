//! In-process binary cache.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

use super::{Artifact, BinaryCache, BinaryKey, BinaryLocation, BuiltAgainst, CacheError};

type Slot = (String, String);

/// A [`BinaryCache`] held in memory. Package revisions are artifact digests.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<Slot, Vec<BinaryLocation>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(key: &BinaryKey) -> Result<Slot, CacheError> {
        key.recipe_revision()?;
        Ok((key.reference.to_string(), key.package_id.hash.clone()))
    }

    /// Record an existing binary with a chosen package revision.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unpinned`] if the reference has no recipe
    /// revision.
    pub fn insert(
        &self,
        key: &BinaryKey,
        package_revision: impl Into<String>,
        built_against: BuiltAgainst,
    ) -> Result<(), CacheError> {
        let slot = Self::slot(key)?;
        let package_revision = package_revision.into();
        let location = BinaryLocation {
            path: PathBuf::from(format!("mem://{}/{}/{package_revision}", slot.0, slot.1)),
            package_revision,
            built_against,
            created_at: Utc::now(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let revisions = entries.entry(slot).or_default();
        revisions.retain(|l| l.package_revision != location.package_revision);
        revisions.push(location);
        drop(entries);
        Ok(())
    }

    /// Number of stored binaries across all package IDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BinaryCache for MemoryCache {
    fn lookup(&self, key: &BinaryKey) -> Result<Option<BinaryLocation>, CacheError> {
        let slot = Self::slot(key)?;
        let entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(revisions) = entries.get(&slot) else {
            return Ok(None);
        };
        let found = match &key.package_id.revision {
            Some(prev) => revisions.iter().find(|l| &l.package_revision == prev),
            None => revisions.last(),
        };
        Ok(found.cloned())
    }

    fn commit(
        &self,
        key: &BinaryKey,
        artifact: &Artifact,
        built_against: &BuiltAgainst,
    ) -> Result<String, CacheError> {
        let prev = artifact.digest();
        self.insert(key, prev.clone(), built_against.clone())?;
        Ok(prev)
    }
}
