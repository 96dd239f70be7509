//! Value types shared by the resolver and the cache.
//!
//! - [`version`]: versions, ranges and the version slot of a requirement.
//! - [`reference`]: recipe references and package IDs.
//! - [`requirement`]: dependency declarations, kinds and edge traits.
//! - [`settings`]: settings, options, profiles, reference patterns and
//!   package types.
//! - [`mode`]: package-ID modes.
//! - [`policy`]: build permission policy.

pub mod mode;
pub mod policy;
pub mod reference;
pub mod requirement;
pub mod settings;
pub mod version;

pub use mode::{ModeFields, PackageIdMode};
pub use policy::{BuildPolicy, PolicyRule, policy_for};
pub use reference::{PackageId, PackageReference, ReferenceError};
pub use requirement::{Requirement, RequirementError, RequirementKind, RunTrait, Traits};
pub use settings::{Options, PackageType, Profile, RefPattern, ScopedOption, Settings};
pub use version::{Version, VersionError, VersionExpr, VersionRange};
