//! The healing session orchestrator.
//!
//! Owns the per-session state machine: Identify -> Test -> Rectify, with
//! constraint gating before every remediation attempt, a global concurrency
//! cap enforced at admission, and finalization side effects (history update,
//! monitoring notification, retention cleanup) that run unconditionally on
//! the terminal status.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HealingConfig;
use crate::constraints::{ConstraintDecision, ConstraintManager};
use crate::error::AdmissionDenied;
use crate::stages::{FixRectifier, IssueIdentifier, MonitoringSink, SolutionTester};
use crate::store::SessionStore;
use crate::types::{
    ConstraintEvent, ConstraintSubject, FailureReason, FixRecord, HealingSession,
    SessionSnapshot, SessionStatus,
};

/// Terminal result of the staged pipeline, before finalization.
enum StageEnd {
    Completed,
    Failed(FailureReason),
}

/// Drives healing sessions from identification through rectification.
///
/// Cheap to clone; every spawned pipeline task holds its own handle.
#[derive(Clone)]
pub struct HealingOrchestrator {
    config: Arc<HealingConfig>,
    store: SessionStore,
    constraints: Arc<ConstraintManager>,
    identifier: Arc<dyn IssueIdentifier>,
    tester: Arc<dyn SolutionTester>,
    rectifier: Arc<dyn FixRectifier>,
    monitoring: Arc<dyn MonitoringSink>,
}

impl HealingOrchestrator {
    /// Build an orchestrator from configuration and stage collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is out of bounds or a blacklist
    /// pattern fails to compile.
    pub fn new(
        config: HealingConfig,
        identifier: Arc<dyn IssueIdentifier>,
        tester: Arc<dyn SolutionTester>,
        rectifier: Arc<dyn FixRectifier>,
        monitoring: Arc<dyn MonitoringSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let constraints = Arc::new(ConstraintManager::new(&config.constraints)?);

        Ok(Self {
            config: Arc::new(config),
            store: SessionStore::new(),
            constraints,
            identifier,
            tester,
            rectifier,
            monitoring,
        })
    }

    /// Start a healing session for `target`.
    ///
    /// Admission is synchronous; on success the pipeline continues on a
    /// spawned task and the new session id is returned immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionDenied`] when constraints or the concurrency cap
    /// block the start. No session is created on denial.
    pub async fn start_session(&self, target: &str) -> Result<String, AdmissionDenied> {
        if let ConstraintDecision::Deny(reason) = self.constraints.can_start_session(target).await
        {
            warn!("Session for {target} blocked by constraints: {reason}");
            return Err(AdmissionDenied::Constrained { reason });
        }

        let session = HealingSession::new(target);
        let session_id = session.session_id.clone();
        let cancel = self
            .store
            .try_admit(session, self.config.max_concurrent_sessions)
            .await
            .inspect_err(|_| error!("Maximum concurrent sessions reached, rejecting {target}"))?;

        info!("Started healing session {session_id} for {target}");

        let this = self.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            this.run_pipeline(&id, &cancel).await;
        });

        Ok(session_id)
    }

    /// Get a snapshot of one session, or `None` if it is unknown or already
    /// evicted.
    pub async fn session_status(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.store.snapshot(session_id).await
    }

    /// Snapshots of every session still in the store.
    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.store.snapshots().await
    }

    /// Request cancellation of a live session.
    ///
    /// The pipeline observes the signal at stage and iteration boundaries; a
    /// collaborator call already in flight is allowed to finish first, after
    /// which the session finalizes as `Failed` ("cancelled"). Returns whether
    /// a live session was found.
    pub async fn stop_session(&self, session_id: &str) -> bool {
        let found = self.store.cancel(session_id).await;
        if found {
            info!("Stop requested for session {session_id}");
        }
        found
    }

    async fn run_pipeline(&self, session_id: &str, cancel: &CancellationToken) {
        let end = self.execute_stages(session_id, cancel).await;
        self.finalize(session_id, end).await;
    }

    async fn execute_stages(&self, session_id: &str, cancel: &CancellationToken) -> StageEnd {
        let Some(target) = self.store.record(session_id).await.map(|s| s.target) else {
            error!("Session {session_id} missing before pipeline start");
            return StageEnd::Failed(FailureReason::Stage("session missing from store".into()));
        };
        let deadline = self.config.stage_timeout();

        // Identify
        if cancel.is_cancelled() {
            return StageEnd::Failed(FailureReason::Cancelled);
        }
        debug!("Identifying issues for {target}");
        let issues = match timeout(deadline, self.identifier.identify(&target)).await {
            Ok(Ok(issues)) => issues,
            Ok(Err(err)) => {
                return StageEnd::Failed(FailureReason::Stage(format!("identify failed: {err}")))
            }
            Err(_) => return StageEnd::Failed(FailureReason::Stage("identify timed out".into())),
        };

        if issues.is_empty() {
            info!("No issues identified for {target}");
            return StageEnd::Completed;
        }

        self.store
            .update(session_id, |session| {
                session.identified_issues = issues.clone();
                session.status = SessionStatus::Testing;
            })
            .await;

        // Test
        debug!("Testing solutions for {} issues in {target}", issues.len());
        for issue in &issues {
            if cancel.is_cancelled() {
                return StageEnd::Failed(FailureReason::Cancelled);
            }

            if let ConstraintDecision::Deny(reason) =
                self.constraints.can_attempt_issue(&target, issue).await
            {
                warn!("Issue {} is constrained, skipping: {reason}", issue.id);
                self.record_constraint(
                    session_id,
                    ConstraintSubject::Issue {
                        id: issue.id.clone(),
                    },
                    reason,
                )
                .await;
                continue;
            }

            match timeout(deadline, self.tester.test(issue, &target)).await {
                Ok(Ok(Some(solution))) => {
                    self.store
                        .update(session_id, |session| session.tested_solutions.push(solution))
                        .await;
                }
                Ok(Ok(None)) => debug!("No viable solution for issue {}", issue.id),
                Ok(Err(err)) => {
                    return StageEnd::Failed(FailureReason::Stage(format!(
                        "test failed for issue {}: {err}",
                        issue.id
                    )))
                }
                Err(_) => {
                    return StageEnd::Failed(FailureReason::Stage(format!(
                        "test timed out for issue {}",
                        issue.id
                    )))
                }
            }
        }

        let solutions = self
            .store
            .record(session_id)
            .await
            .map(|s| s.tested_solutions)
            .unwrap_or_default();
        if solutions.is_empty() {
            warn!("No viable solutions for {target} after testing");
            return StageEnd::Failed(FailureReason::NoViableSolution);
        }
        self.store
            .transition(session_id, SessionStatus::Rectifying)
            .await;

        // Rectify
        debug!("Applying {} tested solutions to {target}", solutions.len());
        for solution in &solutions {
            if cancel.is_cancelled() {
                return StageEnd::Failed(FailureReason::Cancelled);
            }

            let origin = issues.iter().find(|issue| issue.id == solution.issue_id);
            if let ConstraintDecision::Deny(reason) = self
                .constraints
                .can_apply_fix(&target, solution, origin)
                .await
            {
                warn!("Fix {} is constrained, skipping: {reason}", solution.id);
                self.record_constraint(
                    session_id,
                    ConstraintSubject::Solution {
                        id: solution.id.clone(),
                    },
                    reason,
                )
                .await;
                continue;
            }

            match timeout(deadline, self.rectifier.rectify(solution, &target)).await {
                Ok(Ok(outcome)) if outcome.success => {
                    let fix = FixRecord {
                        solution_id: solution.id.clone(),
                        record: outcome.record,
                        applied_at: Utc::now(),
                    };
                    self.store
                        .update(session_id, |session| session.applied_fixes.push(fix))
                        .await;
                }
                // One failed fix does not abort the session
                Ok(Ok(outcome)) => {
                    error!(
                        "Failed to apply fix {}: {}",
                        solution.id,
                        outcome.error_reason.as_deref().unwrap_or("unknown")
                    );
                }
                Ok(Err(err)) => {
                    return StageEnd::Failed(FailureReason::Stage(format!(
                        "rectify failed for solution {}: {err}",
                        solution.id
                    )))
                }
                Err(_) => {
                    return StageEnd::Failed(FailureReason::Stage(format!(
                        "rectify timed out for solution {}",
                        solution.id
                    )))
                }
            }
        }

        StageEnd::Completed
    }

    async fn record_constraint(
        &self,
        session_id: &str,
        subject: ConstraintSubject,
        reason: String,
    ) {
        self.store
            .update(session_id, |session| {
                session.constraint_events.push(ConstraintEvent {
                    subject,
                    reason,
                    recorded_at: Utc::now(),
                });
            })
            .await;
    }

    /// Seal the session and run the unconditional completion side effects.
    async fn finalize(&self, session_id: &str, end: StageEnd) {
        let (status, reason) = match end {
            StageEnd::Completed => (SessionStatus::Completed, None),
            StageEnd::Failed(reason) => (SessionStatus::Failed, Some(reason)),
        };

        self.store
            .update(session_id, move |session| {
                session.status = status;
                session.failure_reason = reason;
                session.execution_time =
                    Some((Utc::now() - session.started_at).to_std().unwrap_or_default());
            })
            .await;

        let Some(record) = self.store.record(session_id).await else {
            error!("Session {session_id} missing at finalize");
            return;
        };

        if record.status == SessionStatus::Completed {
            info!(
                "Healing session {session_id} completed, applied {} fixes",
                record.applied_fixes.len()
            );
        } else {
            warn!(
                "Healing session {session_id} failed: {}",
                record
                    .failure_reason
                    .as_ref()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string)
            );
        }

        self.constraints.update_session_history(&record).await;

        // Fire-and-forget: a misbehaving sink must not stall finalization.
        let deadline = self.config.stage_timeout();
        match timeout(deadline, self.monitoring.record_session_completion(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("Monitoring sink rejected session {session_id}: {err}"),
            Err(_) => warn!("Monitoring sink timed out for session {session_id}"),
        }

        // Retention: evict the terminal session after the configured window.
        let store = self.store.clone();
        let retention = self.config.session_retention();
        let id = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            store.remove(&id).await;
            debug!("Session {id} evicted after retention window");
        });
        debug!("Session {session_id} cleanup scheduled");
    }
}
