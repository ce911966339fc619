//! Typed errors crossing the orchestrator's public boundary.

use thiserror::Error;

/// Session admission was refused; no session was created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionDenied {
    /// The constraint manager blocked the start
    #[error("constrained: {reason}")]
    Constrained {
        /// What the constraint manager objected to
        reason: String,
    },

    /// The concurrent-session cap is reached
    #[error("capacity: maximum concurrent sessions reached")]
    Capacity,
}
