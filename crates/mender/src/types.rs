//! Core types for healing sessions.
//!
//! This module defines the primary data structures for:
//! - Session status and the legal state-machine transitions
//! - Issues, tested solutions, and applied fixes flowing between stages
//! - Constraint events recorded when an action is blocked
//! - Point-in-time snapshots served to status queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Status of a healing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Discovering issues for the target
    Identifying,
    /// Testing candidate solutions per issue
    Testing,
    /// Applying tested solutions
    Rectifying,
    /// Session finished; success is measured by the applied-fix count
    Completed,
    /// Session aborted by a stage failure, cancellation, or lack of solutions
    Failed,
    /// Legacy status value; constraint hits are recorded as per-issue events
    /// and never end a session, so the state machine never enters this
    Constrained,
}

impl SessionStatus {
    /// Check if this is a terminal status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if a session in this status counts against the concurrency cap.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Identifying | Self::Testing | Self::Rectifying)
    }

    /// Check whether a transition to `next` is legal.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Identifying => matches!(next, Self::Testing | Self::Completed | Self::Failed),
            Self::Testing => matches!(next, Self::Rectifying | Self::Failed),
            Self::Rectifying => matches!(next, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed | Self::Constrained => false,
        }
    }

    /// Get the display name for this status.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Identifying => "identifying",
            Self::Testing => "testing",
            Self::Rectifying => "rectifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Constrained => "constrained",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// A stage collaborator signaled failure or timed out
    Stage(String),
    /// No issue survived testing with a usable solution
    NoViableSolution,
    /// The session was cancelled via `stop_session`
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage(message) => write!(f, "{message}"),
            Self::NoViableSolution => write!(f, "no viable solution"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// An issue produced by the Identify stage.
///
/// The orchestrator reads only the identifier and classification; everything
/// else rides along in the opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Identifier, unique within one Identify call
    pub id: String,
    /// Classification tag used for constraint bookkeeping
    pub classification: String,
    /// Opaque payload forwarded verbatim to later stages
    #[serde(default)]
    pub payload: Value,
}

/// A solution produced by the Test stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    /// Solution identifier
    pub id: String,
    /// Identifier of the originating issue
    pub issue_id: String,
    /// Confidence score in [0, 1]
    pub confidence: f64,
    /// Opaque payload forwarded verbatim to the Rectify stage
    #[serde(default)]
    pub payload: Value,
}

/// Result of applying one solution via the Rectify collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RectifyOutcome {
    /// Whether the fix landed
    pub success: bool,
    /// Opaque application record
    #[serde(default)]
    pub record: Value,
    /// Reason the application failed, if it did
    pub error_reason: Option<String>,
}

/// A successfully applied fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRecord {
    /// Identifier of the applied solution
    pub solution_id: String,
    /// Opaque application record from the rectifier
    pub record: Value,
    /// When the fix was applied
    pub applied_at: DateTime<Utc>,
}

/// What a constraint decision was about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintSubject {
    /// A skipped issue
    Issue {
        /// Issue identifier
        id: String,
    },
    /// A skipped solution
    Solution {
        /// Solution identifier
        id: String,
    },
}

/// Record of a constraint blocking an action within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintEvent {
    /// What was blocked
    pub subject: ConstraintSubject,
    /// Why it was blocked
    pub reason: String,
    /// When the decision was made
    pub recorded_at: DateTime<Utc>,
}

/// A single end-to-end healing attempt against a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingSession {
    /// Unique session identifier, assigned at creation
    pub session_id: String,
    /// Opaque locator of the subject being healed
    pub target: String,
    /// Current state-machine position
    pub status: SessionStatus,
    /// Creation timestamp
    pub started_at: DateTime<Utc>,
    /// Issues returned by the Identify stage, in call order
    pub identified_issues: Vec<Issue>,
    /// Solutions appended during Testing, in issue order
    pub tested_solutions: Vec<Solution>,
    /// Fixes appended during Rectifying
    pub applied_fixes: Vec<FixRecord>,
    /// Constraint decisions that blocked an issue or fix
    pub constraint_events: Vec<ConstraintEvent>,
    /// Set when the session reaches `Failed`
    pub failure_reason: Option<FailureReason>,
    /// Wall-clock duration, computed once at the terminal transition
    pub execution_time: Option<Duration>,
}

impl HealingSession {
    /// Create a fresh session in `Identifying`.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            session_id: format!("heal-{}", Uuid::new_v4()),
            target: target.into(),
            status: SessionStatus::Identifying,
            started_at: Utc::now(),
            identified_issues: Vec::new(),
            tested_solutions: Vec::new(),
            applied_fixes: Vec::new(),
            constraint_events: Vec::new(),
            failure_reason: None,
            execution_time: None,
        }
    }

    /// Elapsed wall-clock time: the frozen execution time once terminal,
    /// otherwise time since the session started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.execution_time
            .unwrap_or_else(|| (Utc::now() - self.started_at).to_std().unwrap_or_default())
    }

    /// Build a point-in-time snapshot for status queries.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            target: self.target.clone(),
            status: self.status,
            failure_reason: self.failure_reason.clone(),
            elapsed: self.elapsed(),
            issues_identified: self.identified_issues.len(),
            solutions_tested: self.tested_solutions.len(),
            fixes_applied: self.applied_fixes.len(),
            constraints_triggered: self.constraint_events.len(),
        }
    }
}

/// Point-in-time view of a session for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Session identifier
    pub session_id: String,
    /// Target being healed
    pub target: String,
    /// Current status
    pub status: SessionStatus,
    /// Failure reason, when status is `Failed`
    pub failure_reason: Option<FailureReason>,
    /// Elapsed wall-clock time
    pub elapsed: Duration,
    /// Number of issues identified
    pub issues_identified: usize,
    /// Number of solutions that passed testing
    pub solutions_tested: usize,
    /// Number of fixes applied
    pub fixes_applied: usize,
    /// Number of constraint events recorded
    pub constraints_triggered: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Identifying.is_terminal());
        assert!(!SessionStatus::Constrained.is_terminal());
    }

    #[test]
    fn test_status_active() {
        assert!(SessionStatus::Identifying.is_active());
        assert!(SessionStatus::Testing.is_active());
        assert!(SessionStatus::Rectifying.is_active());
        assert!(!SessionStatus::Completed.is_active());
        assert!(!SessionStatus::Failed.is_active());
    }

    #[test]
    fn test_transition_table() {
        use SessionStatus::{Completed, Failed, Identifying, Rectifying, Testing};

        assert!(Identifying.can_transition_to(Testing));
        assert!(Identifying.can_transition_to(Completed));
        assert!(Identifying.can_transition_to(Failed));
        assert!(!Identifying.can_transition_to(Rectifying));

        assert!(Testing.can_transition_to(Rectifying));
        assert!(Testing.can_transition_to(Failed));
        assert!(!Testing.can_transition_to(Completed));

        assert!(Rectifying.can_transition_to(Completed));
        assert!(Rectifying.can_transition_to(Failed));

        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Identifying));
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::NoViableSolution.to_string(), "no viable solution");
        assert_eq!(FailureReason::Cancelled.to_string(), "cancelled");
        assert_eq!(
            FailureReason::Stage("identify timed out".into()).to_string(),
            "identify timed out"
        );
    }

    #[test]
    fn test_new_session_is_identifying() {
        let session = HealingSession::new("https://github.com/example/repo");
        assert_eq!(session.status, SessionStatus::Identifying);
        assert!(session.session_id.starts_with("heal-"));
        assert!(session.identified_issues.is_empty());
        assert!(session.execution_time.is_none());
    }

    #[test]
    fn test_snapshot_counts_and_frozen_elapsed() {
        let mut session = HealingSession::new("repo");
        session.identified_issues.push(Issue {
            id: "i1".into(),
            classification: "flaky-test".into(),
            payload: Value::Null,
        });
        session.execution_time = Some(Duration::from_secs(42));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.issues_identified, 1);
        assert_eq!(snapshot.solutions_tested, 0);
        assert_eq!(snapshot.elapsed, Duration::from_secs(42));
    }
}
