//! Cross-session constraint gating for healing actions.
//!
//! The constraint manager answers "may this action proceed now?" for session
//! starts, per-issue remediation attempts, and fix application. Its history
//! outlives individual sessions, so repeated attempts against the same target
//! are throttled across sessions rather than within one.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ConstraintConfig;
use crate::types::{HealingSession, Issue, Solution};

/// Verdict for a single gated action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintDecision {
    /// The action may proceed
    Allow,
    /// The action is blocked for the given reason
    Deny(String),
}

impl ConstraintDecision {
    /// Check if the action was allowed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Check whether `instant` falls inside the trailing cooldown window.
///
/// The lower bound is inclusive: an event exactly `cooldown` ago still
/// counts. The upper bound is exclusive.
fn within_window(instant: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> bool {
    instant >= now - cooldown && instant < now
}

/// Attempt counters and session-start history, keyed independently of any
/// single session's in-memory state.
#[derive(Default)]
struct ConstraintHistory {
    /// Last recorded session start per target
    session_starts: HashMap<String, DateTime<Utc>>,
    /// Attempt timestamps per (target, classification)
    attempts: HashMap<(String, String), Vec<DateTime<Utc>>>,
}

/// Gates session starts, issue attempts, and fix application.
pub struct ConstraintManager {
    cooldown: Duration,
    max_retries: u32,
    confidence_threshold: f64,
    blacklist: Vec<Regex>,
    history: RwLock<ConstraintHistory>,
}

impl ConstraintManager {
    /// Build a manager from constraint configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a blacklist pattern is not a valid regex.
    pub fn new(config: &ConstraintConfig) -> Result<Self> {
        let blacklist = config
            .blacklist_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("Invalid blacklist pattern '{pattern}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            cooldown: config.cooldown_period(),
            max_retries: config.max_retries_per_issue,
            confidence_threshold: config.confidence_threshold,
            blacklist,
            history: RwLock::new(ConstraintHistory::default()),
        })
    }

    /// First blacklist pattern matching `subject`, if any. Any match denies.
    fn blacklist_match(&self, subject: &str) -> Option<&Regex> {
        self.blacklist.iter().find(|pattern| pattern.is_match(subject))
    }

    /// Decide whether a new session may start for `target`.
    ///
    /// Pure query: recording the start is the caller's responsibility, via
    /// [`Self::update_session_history`] at finalize.
    pub async fn can_start_session(&self, target: &str) -> ConstraintDecision {
        if let Some(pattern) = self.blacklist_match(target) {
            return ConstraintDecision::Deny(format!(
                "target matches blacklist pattern '{pattern}'"
            ));
        }

        let history = self.history.read().await;
        if let Some(&last_start) = history.session_starts.get(target) {
            if within_window(last_start, Utc::now(), self.cooldown) {
                return ConstraintDecision::Deny(format!(
                    "target in cooldown since session started at {last_start}"
                ));
            }
        }

        ConstraintDecision::Allow
    }

    /// Decide whether `issue` may be remediated for `target`.
    ///
    /// Denies when the classification is blacklisted or the attempt budget
    /// for (target, classification) is exhausted within the cooldown window.
    /// Counters are read-only here; they move only via
    /// [`Self::update_session_history`].
    pub async fn can_attempt_issue(&self, target: &str, issue: &Issue) -> ConstraintDecision {
        if let Some(pattern) = self.blacklist_match(&issue.classification) {
            return ConstraintDecision::Deny(format!(
                "classification '{}' matches blacklist pattern '{pattern}'",
                issue.classification
            ));
        }

        let now = Utc::now();
        let history = self.history.read().await;
        let key = (target.to_string(), issue.classification.clone());
        let attempts = history.attempts.get(&key).map_or(0, |stamps| {
            stamps
                .iter()
                .filter(|stamp| within_window(**stamp, now, self.cooldown))
                .count()
        });

        if attempts >= self.max_retries as usize {
            return ConstraintDecision::Deny(format!(
                "{attempts} attempts for '{}' within cooldown window (max {})",
                issue.classification, self.max_retries
            ));
        }

        ConstraintDecision::Allow
    }

    /// Decide whether `solution` may be applied, given its originating issue.
    pub async fn can_apply_fix(
        &self,
        target: &str,
        solution: &Solution,
        origin: Option<&Issue>,
    ) -> ConstraintDecision {
        if let Some(issue) = origin {
            if let ConstraintDecision::Deny(reason) = self.can_attempt_issue(target, issue).await {
                return ConstraintDecision::Deny(reason);
            }
        }

        if solution.confidence < self.confidence_threshold {
            return ConstraintDecision::Deny(format!(
                "confidence {:.2} below threshold {:.2}",
                solution.confidence, self.confidence_threshold
            ));
        }

        ConstraintDecision::Allow
    }

    /// Record one finished session: one attempt per identified issue and the
    /// session start timestamp for the target.
    ///
    /// Must be called exactly once per session, after its terminal status is
    /// set; retries internal to a session are not double-counted.
    pub async fn update_session_history(&self, session: &HealingSession) {
        let now = Utc::now();
        let mut history = self.history.write().await;

        for issue in &session.identified_issues {
            let key = (session.target.clone(), issue.classification.clone());
            let stamps = history.attempts.entry(key).or_default();
            stamps.retain(|stamp| within_window(*stamp, now, self.cooldown));
            stamps.push(now);
        }

        history
            .session_starts
            .insert(session.target.clone(), session.started_at);

        debug!(
            "Recorded history for {}: {} issue attempts",
            session.target,
            session.identified_issues.len()
        );
    }

    /// Shift a recorded session start back in time. Test-only clock control
    /// for cooldown-sensitive scenarios.
    #[cfg(test)]
    pub(crate) async fn backdate_session_start(&self, target: &str, by: Duration) {
        let mut history = self.history.write().await;
        if let Some(stamp) = history.session_starts.get_mut(target) {
            *stamp -= by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn issue(id: &str, classification: &str) -> Issue {
        Issue {
            id: id.into(),
            classification: classification.into(),
            payload: Value::Null,
        }
    }

    fn solution(id: &str, issue_id: &str, confidence: f64) -> Solution {
        Solution {
            id: id.into(),
            issue_id: issue_id.into(),
            confidence,
            payload: Value::Null,
        }
    }

    fn config(max_retries: u32, cooldown_secs: u64, patterns: &[&str]) -> ConstraintConfig {
        ConstraintConfig {
            max_retries_per_issue: max_retries,
            cooldown_period_secs: cooldown_secs,
            blacklist_patterns: patterns.iter().map(ToString::to_string).collect(),
            confidence_threshold: 0.7,
        }
    }

    fn session_with_issues(target: &str, issues: Vec<Issue>) -> HealingSession {
        let mut session = HealingSession::new(target);
        session.identified_issues = issues;
        session
    }

    #[test]
    fn test_window_lower_bound_inclusive() {
        let now = Utc::now();
        let cooldown = Duration::seconds(1800);

        assert!(within_window(now - cooldown, now, cooldown));
        assert!(within_window(now - Duration::seconds(1), now, cooldown));
        assert!(!within_window(now - cooldown - Duration::seconds(1), now, cooldown));
        // Upper bound is exclusive
        assert!(!within_window(now, now, cooldown));
        // Zero cooldown yields an empty window
        assert!(!within_window(now - Duration::seconds(1), now, Duration::zero()));
    }

    #[test]
    fn test_invalid_pattern_rejected_at_construction() {
        let result = ConstraintManager::new(&config(3, 1800, &["[unclosed"]));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_blacklisted_classification_denied() {
        let manager = ConstraintManager::new(&config(3, 1800, &["database_down", "network_outage"]))
            .unwrap();

        let decision = manager
            .can_attempt_issue("repo", &issue("i1", "database_down_primary"))
            .await;
        assert!(!decision.is_allowed());

        let decision = manager.can_attempt_issue("repo", &issue("i2", "flaky-test")).await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_blacklisted_target_blocks_session_start() {
        let manager = ConstraintManager::new(&config(3, 1800, &["quarantined/"])).unwrap();

        assert!(!manager.can_start_session("quarantined/repo").await.is_allowed());
        assert!(manager.can_start_session("healthy/repo").await.is_allowed());
    }

    #[tokio::test]
    async fn test_session_start_cooldown() {
        let manager = ConstraintManager::new(&config(3, 1800, &[])).unwrap();
        let session = session_with_issues("repo", vec![]);

        assert!(manager.can_start_session("repo").await.is_allowed());
        manager.update_session_history(&session).await;
        assert!(!manager.can_start_session("repo").await.is_allowed());

        // A start recorded outside the window no longer blocks
        manager.backdate_session_start("repo", Duration::seconds(3600)).await;
        assert!(manager.can_start_session("repo").await.is_allowed());
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let manager = ConstraintManager::new(&config(2, 1800, &[])).unwrap();
        let flaky = issue("i1", "flaky-test");

        assert!(manager.can_attempt_issue("repo", &flaky).await.is_allowed());

        manager
            .update_session_history(&session_with_issues("repo", vec![flaky.clone()]))
            .await;
        assert!(manager.can_attempt_issue("repo", &flaky).await.is_allowed());

        manager
            .update_session_history(&session_with_issues("repo", vec![flaky.clone()]))
            .await;
        let decision = manager.can_attempt_issue("repo", &flaky).await;
        assert!(!decision.is_allowed());

        // A different classification for the same target keeps its own budget
        assert!(manager
            .can_attempt_issue("repo", &issue("i2", "slow-build"))
            .await
            .is_allowed());
        // Same classification against a different target is unaffected
        assert!(manager.can_attempt_issue("other", &flaky).await.is_allowed());
    }

    #[tokio::test]
    async fn test_zero_retries_denies_first_attempt() {
        let manager = ConstraintManager::new(&config(0, 1800, &[])).unwrap();
        let decision = manager.can_attempt_issue("repo", &issue("i1", "flaky-test")).await;
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn test_can_apply_fix_confidence_threshold() {
        let manager = ConstraintManager::new(&config(3, 1800, &[])).unwrap();
        let origin = issue("i1", "flaky-test");

        let decision = manager
            .can_apply_fix("repo", &solution("s1", "i1", 0.9), Some(&origin))
            .await;
        assert!(decision.is_allowed());

        let decision = manager
            .can_apply_fix("repo", &solution("s2", "i1", 0.4), Some(&origin))
            .await;
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn test_can_apply_fix_delegates_to_issue_constraint() {
        let manager = ConstraintManager::new(&config(3, 1800, &["database_down"])).unwrap();
        let origin = issue("i1", "database_down");

        // High confidence does not rescue a constrained originating issue
        let decision = manager
            .can_apply_fix("repo", &solution("s1", "i1", 0.99), Some(&origin))
            .await;
        assert!(!decision.is_allowed());
    }
}
