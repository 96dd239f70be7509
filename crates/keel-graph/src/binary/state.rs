//! Per-node binary state machine.
//!
//! ```text
//! Unknown ──▶ CacheHit ───────────────────────────▶ Resolved
//!    │           │  (outdated)                         ▲
//!    │           ▼                                     │
//!    ├──▶ CacheMiss ──▶ Building ──▶ Built ────────────┘
//!    │        │            │
//!    │        ▼            ▼
//!    │     Missing       Failed
//!    ▼
//! IdStale ──▶ (lookup again, as from Unknown)
//! ```
//!
//! Any state that has not started building can also end in `Cancelled`.
//! `Resolved`, `Missing`, `Failed` and `Cancelled` are terminal.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BinaryState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryState {
    /// Package ID computed, cache not consulted yet.
    Unknown,
    /// A binary exists for this package ID, or a compatible one.
    CacheHit,
    /// No binary for this package ID.
    CacheMiss,
    Building,
    /// A new package revision was committed.
    Built,
    /// A dependency's package revision changed the ID; it was recomputed.
    IdStale,
    Resolved,
    /// No binary and the build policy forbids building.
    Missing,
    Failed,
    /// Not attempted because a dependency or an earlier build failed.
    Cancelled,
}

impl BinaryState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::CacheHit => "cache-hit",
            Self::CacheMiss => "cache-miss",
            Self::Building => "building",
            Self::Built => "built",
            Self::IdStale => "id-stale",
            Self::Resolved => "resolved",
            Self::Missing => "missing",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Missing | Self::Failed | Self::Cancelled
        )
    }

    /// Terminal and unsuccessful; dependents cannot proceed.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::Missing | Self::Failed | Self::Cancelled)
    }

    /// Whether the machine may move from `self` to `next`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        use BinaryState::{
            Building, Built, CacheHit, CacheMiss, Cancelled, Failed, IdStale, Missing, Resolved,
            Unknown,
        };
        matches!(
            (self, next),
            (Unknown, IdStale | Resolved)
                | (Unknown | IdStale, CacheHit | CacheMiss | Building)
                | (Unknown | IdStale | CacheHit | CacheMiss, Cancelled)
                | (CacheMiss, CacheHit | Building | Missing)
                | (CacheHit, Building | Resolved)
                | (Building, Built)
                | (Built, Resolved)
                | (Unknown | IdStale | CacheHit | CacheMiss | Building | Built, Failed)
        )
    }
}

impl fmt::Display for BinaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BinaryStatus
// ---------------------------------------------------------------------------

/// Current state of a node's binary plus every state it passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryStatus {
    pub state: BinaryState,
    pub history: Vec<BinaryState>,
    /// The computed package ID hash when a compatible binary was used in
    /// its place.
    pub computed_id: Option<String>,
}

impl BinaryStatus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: BinaryState::Unknown,
            history: vec![BinaryState::Unknown],
            computed_id: None,
        }
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidTransition`] if the machine does not
    /// allow `state -> next`; the status is left unchanged.
    pub fn advance(&mut self, next: BinaryState) -> Result<(), StateError> {
        if !self.state.can_advance_to(next) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Whether the node went through `state` at any point.
    #[must_use]
    pub fn visited(&self, state: BinaryState) -> bool {
        self.history.contains(&state)
    }
}

impl Default for BinaryStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("invalid binary transition from {from} to {to}")]
    InvalidTransition { from: BinaryState, to: BinaryState },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_path_is_allowed() {
        let mut status = BinaryStatus::new();
        for next in [
            BinaryState::CacheMiss,
            BinaryState::Building,
            BinaryState::Built,
            BinaryState::Resolved,
        ] {
            status.advance(next).unwrap();
        }
        assert!(status.state.is_terminal());
        assert_eq!(status.history.len(), 5);
        assert!(status.visited(BinaryState::Building));
    }

    #[test]
    fn stale_node_looks_up_again() {
        let mut status = BinaryStatus::new();
        status.advance(BinaryState::IdStale).unwrap();
        status.advance(BinaryState::CacheHit).unwrap();
        status.advance(BinaryState::Resolved).unwrap();
        assert_eq!(
            status.history,
            [
                BinaryState::Unknown,
                BinaryState::IdStale,
                BinaryState::CacheHit,
                BinaryState::Resolved
            ]
        );
    }

    #[test]
    fn terminal_states_do_not_move() {
        let mut status = BinaryStatus::new();
        status.advance(BinaryState::CacheMiss).unwrap();
        status.advance(BinaryState::Missing).unwrap();
        let err = status.advance(BinaryState::Building).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition {
                from: BinaryState::Missing,
                to: BinaryState::Building
            }
        );
        assert_eq!(status.state, BinaryState::Missing);
    }

    #[test]
    fn running_builds_are_not_cancelled() {
        assert!(!BinaryState::Building.can_advance_to(BinaryState::Cancelled));
        assert!(BinaryState::CacheMiss.can_advance_to(BinaryState::Cancelled));
    }

    #[test]
    fn blocking_states() {
        assert!(BinaryState::Failed.is_blocking());
        assert!(!BinaryState::Resolved.is_blocking());
        assert_eq!(BinaryState::IdStale.to_string(), "id-stale");
    }
}
