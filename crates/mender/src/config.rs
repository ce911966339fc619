//! Configuration surface for the healing pipeline.
//!
//! Mirrors the JSON config file layout: orchestrator-level knobs at the top
//! level and constraint policy in a nested `constraints` object. A missing
//! config file falls back to defaults with a warning.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Top-level configuration for the healing orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Maximum number of sessions allowed in a non-terminal status at once
    pub max_concurrent_sessions: usize,
    /// Per-call timeout for stage collaborators, in seconds
    pub stage_timeout_secs: u64,
    /// How long terminal sessions stay queryable before eviction, in seconds
    pub session_retention_secs: u64,
    /// Constraint policy applied across sessions
    pub constraints: ConstraintConfig,
}

/// Constraint policy shared by all sessions for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintConfig {
    /// Maximum remediation attempts per (target, classification) within the
    /// cooldown window
    pub max_retries_per_issue: u32,
    /// Sliding cooldown window, in seconds
    pub cooldown_period_secs: u64,
    /// Regex patterns that block matching targets and issue classifications
    pub blacklist_patterns: Vec<String>,
    /// Minimum solution confidence required to apply a fix
    pub confidence_threshold: f64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 5,
            stage_timeout_secs: 300,
            session_retention_secs: 600,
            constraints: ConstraintConfig::default(),
        }
    }
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            max_retries_per_issue: 3,
            cooldown_period_secs: 1800,
            blacklist_patterns: vec!["database_down".into(), "network_outage".into()],
            confidence_threshold: 0.7,
        }
    }
}

impl HealingConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file is not an error: defaults are returned and a warning is
    /// logged. A file that exists but does not parse is an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to read config file {}", path.display()))
            }
        }
    }

    /// Check that every knob is within its legal range.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            bail!("max_concurrent_sessions must be greater than zero");
        }
        if self.stage_timeout_secs == 0 {
            bail!("stage_timeout_secs must be greater than zero");
        }
        let threshold = self.constraints.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("confidence_threshold must be within [0, 1], got {threshold}");
        }
        Ok(())
    }

    /// Per-call deadline for stage collaborators.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Retention window for terminal sessions.
    #[must_use]
    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }
}

impl ConstraintConfig {
    /// Cooldown window as a chrono duration for timestamp arithmetic.
    #[must_use]
    pub fn cooldown_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_period_secs as i64)
    }
}
