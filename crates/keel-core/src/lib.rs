#![forbid(unsafe_code)]
//! keel-core library.
//!
//! Value types for package references, versions, requirements and package
//! IDs, plus the binary cache, per-package locks and configuration shared
//! by the resolver.
//!
//! # Conventions
//!
//! - **Errors**: one `thiserror` enum per concern, each with a `code()`
//!   mapping to an [`error::ErrorCode`]; config glue uses `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod model;

pub use error::ErrorCode;
