//! Progression state machine.
//!
//! Unlock decisions are pure functions of the progress projection, the
//! course layout, the progression rules and the caller-supplied `now`:
//!
//! 1. Level 1 is always open.
//! 2. Level `L > 1` opens when every day of `L - 1` is completed and, for
//!    the level gated by the meditation test, the test record is completed.
//! 3. If an earlier level `k` was first mastered more than
//!    `rewatch_expiry_months` ago, every level above `k` is locked. Levels
//!    are scanned in ascending order and the lowest expired level wins.
//! 4. Day 1 of an open level is open. Day `d > 1` opens once day `d - 1`
//!    is completed and `gap_seconds` have elapsed since that completion.
//! 5. The meditation test opens when every day of the level before the
//!    gated level is completed; the inter-day gap does not apply.

use chrono::{DateTime, Duration, Months, Utc};

use crate::config::ProgressionConfig;
use crate::core::course::CourseStructure;
use crate::core::progress::{DaySlot, ProgressKey, ProgressStore};
use crate::core::state::{DayState, LevelState, LockReason};

/// Read-only view that answers unlock queries.
#[derive(Debug, Clone, Copy)]
pub struct Progression<'a> {
    store: &'a ProgressStore,
    course: &'a CourseStructure,
    config: &'a ProgressionConfig,
}

impl<'a> Progression<'a> {
    /// Create a view over a projection.
    pub fn new(
        store: &'a ProgressStore,
        course: &'a CourseStructure,
        config: &'a ProgressionConfig,
    ) -> Self {
        Self {
            store,
            course,
            config,
        }
    }

    /// Minimum time between completing a day and opening the next one.
    pub fn gap(&self) -> Duration {
        i64::try_from(self.config.gap_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// When the day after one completed at `completed_at` opens.
    ///
    /// Saturates at the latest representable time, which never arrives.
    fn opens_after(&self, completed_at: DateTime<Utc>) -> DateTime<Utc> {
        completed_at
            .checked_add_signed(self.gap())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    // =========================================================================
    // Levels
    // =========================================================================

    /// Lowest level whose first mastery has expired, if any.
    ///
    /// Expiry is disabled when `rewatch_expiry_months` is 0.
    pub fn expired_level(&self, now: DateTime<Utc>) -> Option<u32> {
        if self.config.rewatch_expiry_months == 0 {
            return None;
        }
        let cutoff = now.checked_sub_months(Months::new(self.config.rewatch_expiry_months))?;

        self.course
            .levels()
            .iter()
            .map(|l| l.number)
            .find(|&level| {
                self.store
                    .level_state(level)
                    .and_then(|s| s.first_completed_at)
                    .map(|first| first < cutoff)
                    .unwrap_or(false)
            })
    }

    /// Derive the state of a level.
    pub fn level_state(&self, level: u32, now: DateTime<Utc>) -> LevelState {
        if self.course.level(level).is_none() {
            return LevelState::Locked(LockReason::OutOfCourse);
        }
        if level == 1 {
            return LevelState::Unlocked;
        }

        if let Some(expired) = self.expired_level(now) {
            if level > expired {
                return LevelState::Locked(LockReason::RewatchExpired { level: expired });
            }
        }

        if !self.store.is_level_completed(self.course, level - 1) {
            return LevelState::Locked(LockReason::PreviousLevelIncomplete);
        }

        if self.course.requires_meditation_test(level)
            && !self.store.is_completed(ProgressKey::meditation_test(level))
        {
            return LevelState::Locked(LockReason::MeditationTestPending);
        }

        LevelState::Unlocked
    }

    /// Whether a level is open.
    pub fn is_level_unlocked(&self, level: u32, now: DateTime<Utc>) -> bool {
        self.level_state(level, now).is_unlocked()
    }

    /// Whether every day of every level is completed.
    ///
    /// Gates the closing stage after the last level. This is its own check,
    /// not the unlock state of a level past the end of the course.
    pub fn all_levels_complete(&self) -> bool {
        self.course
            .levels()
            .iter()
            .all(|l| self.store.is_level_completed(self.course, l.number))
    }

    // =========================================================================
    // Days
    // =========================================================================

    /// Derive the state of a day or of the meditation test.
    pub fn day_state(&self, level: u32, day: DaySlot, now: DateTime<Utc>) -> DayState {
        match day {
            DaySlot::Lesson(day) => self.lesson_state(level, day, now),
            DaySlot::MeditationTest => self.meditation_test_state(level),
        }
    }

    fn lesson_state(&self, level: u32, day: u32, now: DateTime<Utc>) -> DayState {
        if !self.course.contains(level, day) {
            return DayState::Locked(LockReason::OutOfCourse);
        }
        if let LevelState::Locked(reason) = self.level_state(level, now) {
            return DayState::Locked(reason);
        }

        let entry = self.store.lesson(level, day);
        if entry.map(|e| e.completed).unwrap_or(false) {
            return DayState::Completed;
        }

        if day > 1 {
            let previous = ProgressKey::lesson(level, day - 1);
            match self.store.get(previous) {
                Some(prev) if prev.completed => {
                    if let Some(available_at) = prev.completed_at.map(|at| self.opens_after(at)) {
                        if now < available_at {
                            return DayState::Locked(LockReason::WaitingForGap { available_at });
                        }
                    }
                }
                _ => return DayState::Locked(LockReason::PreviousDayIncomplete),
            }
        }

        if entry.map(|e| e.is_started()).unwrap_or(false) {
            DayState::UnlockedInProgress
        } else {
            DayState::UnlockedNotStarted
        }
    }

    fn meditation_test_state(&self, level: u32) -> DayState {
        if !self.course.requires_meditation_test(level) {
            return DayState::Locked(LockReason::OutOfCourse);
        }
        if self.store.is_completed(ProgressKey::meditation_test(level)) {
            return DayState::Completed;
        }
        if self.store.is_level_completed(self.course, level - 1) {
            DayState::UnlockedNotStarted
        } else {
            DayState::Locked(LockReason::PreviousLevelIncomplete)
        }
    }

    /// Whether a lesson day is open.
    pub fn is_day_unlocked(&self, level: u32, day: u32, now: DateTime<Utc>) -> bool {
        self.lesson_state(level, day, now).is_unlocked()
    }

    /// Whether the meditation test gating `level` may be taken.
    pub fn is_meditation_test_unlocked(&self, level: u32) -> bool {
        self.meditation_test_state(level).is_unlocked()
    }

    /// Earliest time a day opens under the gap rule.
    ///
    /// `None` for day 1, for the meditation test, and when the previous day
    /// has no completion time yet. Safe to call on any day.
    pub fn next_available_time(&self, level: u32, day: DaySlot) -> Option<DateTime<Utc>> {
        match day {
            DaySlot::MeditationTest | DaySlot::Lesson(0) | DaySlot::Lesson(1) => None,
            DaySlot::Lesson(day) => self
                .store
                .completed_at(ProgressKey::lesson(level, day - 1))
                .map(|at| self.opens_after(at)),
        }
    }

    /// The slot the learner should continue with: the first uncompleted
    /// slot in course order, if it is open.
    ///
    /// Returns `None` when that slot is still locked or the course is done.
    pub fn current_position(&self, now: DateTime<Utc>) -> Option<ProgressKey> {
        for level in self.course.levels().iter().map(|l| l.number) {
            if self.course.requires_meditation_test(level) {
                let test = ProgressKey::meditation_test(level);
                if !self.store.is_completed(test) {
                    return self
                        .meditation_test_state(level)
                        .is_unlocked()
                        .then_some(test);
                }
            }
            if !self.is_level_unlocked(level, now) {
                return None;
            }
            for day in 1..=self.course.days_in(level) {
                match self.lesson_state(level, day, now) {
                    DayState::Completed => continue,
                    state if state.is_unlocked() => return Some(ProgressKey::lesson(level, day)),
                    _ => return None,
                }
            }
        }
        None
    }
}
