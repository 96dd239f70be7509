//! Binary cache addressing.
//!
//! A binary is addressed by `(reference#recipe_revision, package_id,
//! package_revision)`. The cache is only an addressing scheme here: how
//! bytes are moved or compressed is up to the implementation.
//!
//! - [`BinaryCache`]: the collaborator interface consumed by the binary
//!   resolution loop.
//! - [`local::LocalCache`]: a filesystem-backed implementation with
//!   per-package advisory locks.
//! - [`memory::MemoryCache`]: an in-process implementation for embedders
//!   and tests.

pub mod local;
pub mod memory;

pub use local::LocalCache;
pub use memory::MemoryCache;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::lock::LockError;
use crate::model::{PackageId, PackageReference};

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

/// Errors raised by cache implementations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The reference has no recipe revision, so it has no cache address.
    #[error("cannot address '{0}' in the binary cache without a recipe revision")]
    Unpinned(String),

    /// Stored metadata could not be read back.
    #[error("corrupt cache entry at {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl CacheError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unpinned(_) => ErrorCode::InvalidReference,
            Self::Corrupt { .. } => ErrorCode::CacheCorrupt,
            Self::Io { .. } => ErrorCode::CacheWriteFailed,
            Self::Lock(err) => err.code(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Keys and values
// ---------------------------------------------------------------------------

/// Address of one binary.
///
/// When `package_id.revision` is `None`, a lookup returns the most recently
/// committed package revision for that package ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryKey {
    pub reference: PackageReference,
    pub package_id: PackageId,
}

impl BinaryKey {
    #[must_use]
    pub const fn new(reference: PackageReference, package_id: PackageId) -> Self {
        Self {
            reference,
            package_id,
        }
    }

    /// The same key with a different package ID hash and no revision.
    #[must_use]
    pub fn with_hash(&self, hash: impl Into<String>) -> Self {
        Self {
            reference: self.reference.clone(),
            package_id: PackageId::new(hash),
        }
    }

    pub(crate) fn recipe_revision(&self) -> Result<&str, CacheError> {
        self.reference
            .revision
            .as_deref()
            .ok_or_else(|| CacheError::Unpinned(self.reference.to_string()))
    }
}

/// Upstream package revisions a binary was built against, keyed by the
/// dependency's `reference:package_id`.
pub type BuiltAgainst = BTreeMap<String, String>;

/// Where a cached binary lives and what it was built against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryLocation {
    pub path: PathBuf,
    pub package_revision: String,
    #[serde(default)]
    pub built_against: BuiltAgainst,
    pub created_at: DateTime<Utc>,
}

/// The files produced by one build, relative path to contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Artifact {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    /// Content digest of the artifact, used as its package revision.
    ///
    /// Paths are visited in sorted order and length-prefixed, so the digest
    /// depends only on the file set.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (path, contents) in &self.files {
            hasher.update(&(path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update(&(contents.len() as u64).to_le_bytes());
            hasher.update(contents);
        }
        hasher.finalize().to_hex().to_string()
    }
}

// ---------------------------------------------------------------------------
// BinaryCache
// ---------------------------------------------------------------------------

/// The binary cache collaborator.
///
/// Implementations hold a shared lock on the package folder while reading
/// for a hit, and an exclusive lock while committing, so a reader never
/// observes a half-written binary.
pub trait BinaryCache: Send + Sync {
    /// Find the binary at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the cache cannot be read. A plain miss is
    /// `Ok(None)`.
    fn lookup(&self, key: &BinaryKey) -> Result<Option<BinaryLocation>, CacheError>;

    /// Store a freshly built binary and return its package revision.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the binary cannot be written.
    fn commit(
        &self,
        key: &BinaryKey,
        artifact: &Artifact,
        built_against: &BuiltAgainst,
    ) -> Result<String, CacheError>;
}
