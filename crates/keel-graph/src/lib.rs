#![forbid(unsafe_code)]
//! keel-graph library.
//!
//! Expands a root recipe into a dependency graph over the host and build
//! contexts, propagates edge traits, detects conflicts, computes package
//! IDs and drives each node to a binary through the cache and a builder.
//!
//! ```text
//! Recipe ─▶ GraphBuilder ─▶ propagate ─▶ compute_package_ids ─▶ BinaryResolver
//! ```
//!
//! # Conventions
//!
//! - **Errors**: [`GraphError`] aborts; [`ResolveError`]s are collected per
//!   node and reported together.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod binary;
pub mod context;
pub mod error;
pub mod graph;
pub mod package_id;
pub mod recipe;
pub mod report;
pub mod resolve;
pub mod traits;

pub use binary::{BinaryReport, BinaryResolver, BinaryState, BuildError, BuildRequest, PackageBuilder};
pub use context::{FailureMode, Override, ResolutionContext};
pub use error::{GraphError, ResolveError};
pub use graph::build::GraphBuilder;
pub use graph::{Context, Graph, Node, NodeId, TransitiveDep};
pub use recipe::{CompatibilityHook, LoadContext, LoadError, Recipe, RecipeIndex, RecipeLoader};
pub use report::GraphReport;
pub use resolve::{resolve, resolve_binaries, resolve_roots};
