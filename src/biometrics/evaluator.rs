//! Meditation test evaluation.
//!
//! Every threshold is checked and every failure is reported. Whether a
//! failure actually fails the test is decided by the [`PassPolicy`]:
//! under [`PassPolicy::AlwaysPass`] a finished session passes regardless and
//! the failures are carried along for display only.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MeditationConfig;
use crate::core::{CourseStructure, ProgressEntry, ProgressStore};

/// Configurable pass thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestThresholds {
    pub min_minutes: f64,
    /// Percentage, 0-100.
    pub min_eye_closed_pct: f64,
    /// Allowed head displacement per minute of session.
    pub max_head_movement_per_minute: f64,
    /// Allowed hand displacement per minute of session.
    pub max_hand_movement_per_minute: f64,
    pub min_hand_stability: f64,
}

impl Default for TestThresholds {
    fn default() -> Self {
        MeditationConfig::default().thresholds()
    }
}

/// How threshold failures affect the verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassPolicy {
    /// Every finished session passes; failures are informational.
    #[default]
    AlwaysPass,
    /// Any failure fails the test.
    EnforceThresholds,
}

/// Evaluator input, taken from a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub eye_closed_percent: f64,
    pub head_movement: f64,
    pub hand_movement: f64,
    pub hand_stability: f64,
    /// Time of the last metrics snapshot, 0 without snapshots.
    pub duration_seconds: f64,
}

impl SessionSummary {
    pub fn minutes(&self) -> f64 {
        self.duration_seconds / 60.0
    }
}

/// One failed threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "threshold", rename_all = "snake_case")]
pub enum ThresholdFailure {
    TooShort { minutes: f64, required: f64 },
    EyesOpen { percent: f64, required: f64 },
    HeadMoved { movement: f64, allowed: f64 },
    HandsMoved { movement: f64, allowed: f64 },
    HandsUnstable { stability: f64, required: f64 },
}

impl fmt::Display for ThresholdFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { minutes, required } => write!(
                f,
                "session lasted {:.1} minutes, at least {:.0} required",
                minutes, required
            ),
            Self::EyesOpen { percent, required } => write!(
                f,
                "eyes were closed {:.1}% of the time, at least {:.0}% required",
                percent, required
            ),
            Self::HeadMoved { movement, allowed } => write!(
                f,
                "head moved {:.2}, at most {:.2} allowed",
                movement, allowed
            ),
            Self::HandsMoved { movement, allowed } => write!(
                f,
                "hands moved {:.2}, at most {:.2} allowed",
                movement, allowed
            ),
            Self::HandsUnstable {
                stability,
                required,
            } => write!(
                f,
                "hand stability was {:.2}, at least {:.2} required",
                stability, required
            ),
        }
    }
}

/// Outcome of a meditation test.
///
/// A failed test is a normal value, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestVerdict {
    /// Final decision after the pass policy.
    pub passed: bool,
    /// Failure clauses joined for display; empty when every threshold held.
    pub reason: String,
    pub failures: Vec<ThresholdFailure>,
    /// Whether every threshold held, independent of the policy.
    pub threshold_passed: bool,
}

/// Check `summary` against every threshold.
pub fn threshold_failures(
    summary: &SessionSummary,
    thresholds: &TestThresholds,
) -> Vec<ThresholdFailure> {
    let minutes = summary.minutes();
    let mut failures = Vec::new();

    if minutes < thresholds.min_minutes {
        failures.push(ThresholdFailure::TooShort {
            minutes,
            required: thresholds.min_minutes,
        });
    }

    if summary.eye_closed_percent < thresholds.min_eye_closed_pct {
        failures.push(ThresholdFailure::EyesOpen {
            percent: summary.eye_closed_percent,
            required: thresholds.min_eye_closed_pct,
        });
    }

    // Movement limits scale with session length; a zero-length session is
    // already reported as too short.
    if minutes > 0.0 {
        let head_allowed = thresholds.max_head_movement_per_minute * minutes;
        if summary.head_movement > head_allowed {
            failures.push(ThresholdFailure::HeadMoved {
                movement: summary.head_movement,
                allowed: head_allowed,
            });
        }

        let hand_allowed = thresholds.max_hand_movement_per_minute * minutes;
        if summary.hand_movement > hand_allowed {
            failures.push(ThresholdFailure::HandsMoved {
                movement: summary.hand_movement,
                allowed: hand_allowed,
            });
        }
    }

    if summary.hand_stability < thresholds.min_hand_stability {
        failures.push(ThresholdFailure::HandsUnstable {
            stability: summary.hand_stability,
            required: thresholds.min_hand_stability,
        });
    }

    failures
}

/// Evaluate a finished session.
pub fn evaluate(
    summary: &SessionSummary,
    thresholds: &TestThresholds,
    policy: PassPolicy,
) -> TestVerdict {
    let failures = threshold_failures(summary, thresholds);
    let threshold_passed = failures.is_empty();
    let reason = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");

    let passed = match policy {
        PassPolicy::AlwaysPass => {
            if !threshold_passed {
                tracing::warn!(
                    failures = failures.len(),
                    reason = %reason,
                    "meditation test passed despite failed thresholds"
                );
            }
            true
        }
        PassPolicy::EnforceThresholds => threshold_passed,
    };

    tracing::info!(passed, threshold_passed, "meditation test evaluated");

    TestVerdict {
        passed,
        reason,
        failures,
        threshold_passed,
    }
}

/// Record a passing verdict in the progress store.
///
/// Writes the synthetic meditation-test completion, which is what unlocks
/// the gated level. Returns the written record, or `None` when the test
/// failed or the course has no meditation test.
pub fn apply_verdict(
    store: &mut ProgressStore,
    course: &CourseStructure,
    verdict: &TestVerdict,
    now: DateTime<Utc>,
) -> Option<ProgressEntry> {
    if !verdict.passed {
        return None;
    }
    let level = course.meditation_test_level()?;
    Some(store.record_meditation_pass(level, now))
}
