//! Stage collaborator seams for the healing pipeline.
//!
//! Identify, Test, and Rectify are external capabilities (issue trackers,
//! sandbox executors, deployers). The orchestrator only sequences and
//! constrains calls to them, so each sits behind a narrow async trait.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::types::{HealingSession, Issue, RectifyOutcome, Solution};

/// Discovers issues for a target.
#[async_trait]
pub trait IssueIdentifier: Send + Sync {
    /// Identify issues against `target`. Returned order is preserved through
    /// the rest of the pipeline.
    async fn identify(&self, target: &str) -> Result<Vec<Issue>>;
}

/// Tests a candidate remediation for one issue.
#[async_trait]
pub trait SolutionTester: Send + Sync {
    /// Produce a tested solution for `issue`, or `None` when no viable
    /// candidate was found. An `Err` is a stage failure and ends the session.
    async fn test(&self, issue: &Issue, target: &str) -> Result<Option<Solution>>;
}

/// Applies a tested solution to the target.
#[async_trait]
pub trait FixRectifier: Send + Sync {
    /// Apply `solution`. An unsuccessful application is reported inside the
    /// outcome, not as an `Err`; `Err` means the collaborator itself failed.
    async fn rectify(&self, solution: &Solution, target: &str) -> Result<RectifyOutcome>;
}

/// Receives terminal session records, fire-and-forget.
#[async_trait]
pub trait MonitoringSink: Send + Sync {
    /// Record a finished session. Errors are logged by the orchestrator and
    /// never fail the session.
    async fn record_session_completion(&self, session: &HealingSession) -> Result<()>;
}

/// Monitoring sink that writes session outcomes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl MonitoringSink for LogSink {
    async fn record_session_completion(&self, session: &HealingSession) -> Result<()> {
        info!(
            "Session {} for {} finished as {}: {} issues, {} solutions, {} fixes, {} constraint events",
            session.session_id,
            session.target,
            session.status,
            session.identified_issues.len(),
            session.tested_solutions.len(),
            session.applied_fixes.len(),
            session.constraint_events.len()
        );
        Ok(())
    }
}
