//! Derived unlock states for levels and days.
//!
//! Nothing here is stored: every state is recomputed from the progress
//! projection by [`crate::core::Progression`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a level or day is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum LockReason {
    /// Not every day of the previous level is completed.
    PreviousLevelIncomplete,
    /// The meditation test gating this level has not been passed.
    MeditationTestPending,
    /// An earlier level was first mastered too long ago and must be rewatched.
    RewatchExpired { level: u32 },
    /// The previous day is not completed yet.
    PreviousDayIncomplete,
    /// The previous day is completed but the inter-day gap has not elapsed.
    WaitingForGap { available_at: DateTime<Utc> },
    /// The level or day does not exist in the course.
    OutOfCourse,
}

/// Unlock state of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum LevelState {
    Unlocked,
    Locked(LockReason),
}

impl LevelState {
    /// Whether the level is open.
    pub fn is_unlocked(&self) -> bool {
        matches!(self, LevelState::Unlocked)
    }
}

/// Unlock state of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum DayState {
    Locked(LockReason),
    UnlockedNotStarted,
    UnlockedInProgress,
    Completed,
}

impl DayState {
    /// Whether the learner may open the day's content.
    ///
    /// Completed days stay accessible for rewatching.
    pub fn is_unlocked(&self) -> bool {
        !matches!(self, DayState::Locked(_))
    }

    /// Whether the day is completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, DayState::Completed)
    }

    /// Lock reason, if locked.
    pub fn lock_reason(&self) -> Option<LockReason> {
        match self {
            DayState::Locked(reason) => Some(*reason),
            _ => None,
        }
    }
}
