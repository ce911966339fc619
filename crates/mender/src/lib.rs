//! Self-healing session orchestration.
//!
//! `mender` coordinates an automated detect -> test -> remediate workflow
//! against a target such as a repository or service. Each healing session is
//! driven through a fixed stage sequence:
//!
//! 1. **Identify** - discover issues for the target
//! 2. **Test** - produce a tested solution per issue, skipping constrained ones
//! 3. **Rectify** - apply tested solutions, skipping constrained or
//!    low-confidence fixes
//!
//! The [`HealingOrchestrator`] enforces a global concurrency cap at
//! admission, gates every remediation attempt through the
//! [`ConstraintManager`] (blacklists, retry budgets, per-target cooldowns),
//! and records terminal outcomes to a [`MonitoringSink`]. The stage
//! collaborators themselves (issue trackers, sandbox executors, deployers)
//! sit behind narrow async traits and are supplied by the caller.
//!
//! Sessions run on spawned tasks; callers observe progress only through
//! status snapshots and can request best-effort cancellation with
//! [`HealingOrchestrator::stop_session`].

pub mod config;
pub mod constraints;
pub mod error;
pub mod orchestrator;
pub mod stages;
pub mod store;
pub mod types;

pub use config::{ConstraintConfig, HealingConfig};
pub use constraints::{ConstraintDecision, ConstraintManager};
pub use error::AdmissionDenied;
pub use orchestrator::HealingOrchestrator;
pub use stages::{FixRectifier, IssueIdentifier, LogSink, MonitoringSink, SolutionTester};
pub use store::SessionStore;
pub use types::{
    ConstraintEvent, ConstraintSubject, FailureReason, FixRecord, HealingSession, Issue,
    RectifyOutcome, SessionSnapshot, SessionStatus, Solution,
};
