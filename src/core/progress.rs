//! Progress records and the in-memory progress projection.
//!
//! Records are never deleted, only overwritten. A record that is
//! `completed` always carries `completed_at`, and the first completion
//! timestamp is never moved by later rewatches.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::course::CourseStructure;
use crate::error::{Result, StillpointError};

/// Slot within a level: a numbered lesson day or the synthetic meditation test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaySlot {
    /// Regular content day (1-based).
    Lesson(u32),
    /// Completion record written when the meditation test is passed.
    MeditationTest,
}

impl fmt::Display for DaySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaySlot::Lesson(day) => write!(f, "day {}", day),
            DaySlot::MeditationTest => write!(f, "meditation test"),
        }
    }
}

/// Key of a progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgressKey {
    pub level: u32,
    pub day: DaySlot,
}

impl ProgressKey {
    /// Key of a regular day.
    pub fn lesson(level: u32, day: u32) -> Self {
        Self {
            level,
            day: DaySlot::Lesson(day),
        }
    }

    /// Key of the synthetic meditation test record for a level.
    pub fn meditation_test(level: u32) -> Self {
        Self {
            level,
            day: DaySlot::MeditationTest,
        }
    }
}

/// Progress of one learner on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub level: u32,
    pub day: DaySlot,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds of the day's video the learner has watched.
    pub watched_seconds: f64,
    /// Total length of the day's video in seconds.
    pub video_duration: f64,
    pub feedback: String,
    /// Last local or remote write; used to resolve stale fetches.
    pub updated_at: DateTime<Utc>,
}

impl ProgressEntry {
    /// Create an untouched record.
    pub fn new(key: ProgressKey, now: DateTime<Utc>) -> Self {
        Self {
            level: key.level,
            day: key.day,
            completed: false,
            completed_at: None,
            watched_seconds: 0.0,
            video_duration: 0.0,
            feedback: String::new(),
            updated_at: now,
        }
    }

    /// The record's key.
    pub fn key(&self) -> ProgressKey {
        ProgressKey {
            level: self.level,
            day: self.day,
        }
    }

    /// `completed` implies `completed_at`.
    pub fn is_consistent(&self) -> bool {
        !self.completed || self.completed_at.is_some()
    }

    /// Whether the learner has interacted with this day at all.
    pub fn is_started(&self) -> bool {
        self.completed || self.watched_seconds > 0.0
    }

    /// Mark completed, keeping the first completion timestamp.
    fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.completed = true;
        self.completed_at.get_or_insert(now);
        self.updated_at = now;
    }
}

/// One-time "first mastered this level" marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelTestState {
    pub level: u32,
    /// Whether the meditation test gating this level was passed.
    pub test_passed: bool,
    /// When every day of the level was first completed.
    pub first_completed_at: Option<DateTime<Utc>>,
}

impl LevelTestState {
    /// Fresh marker for a level.
    pub fn new(level: u32) -> Self {
        Self {
            level,
            test_passed: false,
            first_completed_at: None,
        }
    }
}

/// In-memory projection of a learner's progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressStore {
    entries: BTreeMap<ProgressKey, ProgressEntry>,
    levels: BTreeMap<u32, LevelTestState>,
}

impl ProgressStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record.
    pub fn get(&self, key: ProgressKey) -> Option<&ProgressEntry> {
        self.entries.get(&key)
    }

    /// Look up a regular day.
    pub fn lesson(&self, level: u32, day: u32) -> Option<&ProgressEntry> {
        self.get(ProgressKey::lesson(level, day))
    }

    /// Whether a record exists and is completed.
    pub fn is_completed(&self, key: ProgressKey) -> bool {
        self.get(key).map(|e| e.completed).unwrap_or(false)
    }

    /// Completion timestamp of a record.
    pub fn completed_at(&self, key: ProgressKey) -> Option<DateTime<Utc>> {
        self.get(key).and_then(|e| e.completed_at)
    }

    /// All records in key order.
    pub fn entries(&self) -> impl Iterator<Item = &ProgressEntry> {
        self.entries.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mastery marker for a level.
    pub fn level_state(&self, level: u32) -> Option<&LevelTestState> {
        self.levels.get(&level)
    }

    /// All mastery markers in level order.
    pub fn level_states(&self) -> impl Iterator<Item = &LevelTestState> {
        self.levels.values()
    }

    /// Whether every day of `level` is completed.
    pub fn is_level_completed(&self, course: &CourseStructure, level: u32) -> bool {
        let days = course.days_in(level);
        days > 0 && (1..=days).all(|day| self.is_completed(ProgressKey::lesson(level, day)))
    }

    /// Replace a record wholesale.
    pub fn upsert(&mut self, entry: ProgressEntry) -> Result<()> {
        if !entry.is_consistent() {
            return Err(StillpointError::invalid_state(format!(
                "level {} {} is completed without a completion time",
                entry.level, entry.day
            )));
        }
        self.entries.insert(entry.key(), entry);
        Ok(())
    }

    /// Replace a mastery marker wholesale.
    pub fn set_level_state(&mut self, state: LevelTestState) {
        self.levels.insert(state.level, state);
    }

    /// Record watch progress without completing the day.
    pub fn record_watch(
        &mut self,
        course: &CourseStructure,
        level: u32,
        day: u32,
        watched_seconds: f64,
        video_duration: f64,
        now: DateTime<Utc>,
    ) -> Result<&ProgressEntry> {
        ensure_lesson(course, level, day)?;
        let entry = self
            .entries
            .entry(ProgressKey::lesson(level, day))
            .or_insert_with(|| ProgressEntry::new(ProgressKey::lesson(level, day), now));
        entry.watched_seconds = watched_seconds;
        entry.video_duration = video_duration;
        entry.updated_at = now;
        Ok(entry)
    }

    /// Complete a day.
    ///
    /// Idempotent: a repeat call refreshes watch metrics and feedback but
    /// leaves `completed_at` alone. When this completes the last open day of
    /// the level, the level's first-mastery time is stamped once.
    #[allow(clippy::too_many_arguments)]
    pub fn record_completion(
        &mut self,
        course: &CourseStructure,
        level: u32,
        day: u32,
        watched_seconds: f64,
        video_duration: f64,
        feedback: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<ProgressEntry> {
        ensure_lesson(course, level, day)?;
        let key = ProgressKey::lesson(level, day);
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| ProgressEntry::new(key, now));
        entry.watched_seconds = watched_seconds;
        entry.video_duration = video_duration;
        entry.feedback = feedback.into();
        entry.mark_completed(now);
        let recorded = entry.clone();

        if self.is_level_completed(course, level) {
            let state = self
                .levels
                .entry(level)
                .or_insert_with(|| LevelTestState::new(level));
            if state.first_completed_at.is_none() {
                tracing::info!("level {} mastered", level);
                state.first_completed_at = Some(now);
            }
        }

        Ok(recorded)
    }

    /// Write the synthetic meditation-test completion for `level`.
    pub fn record_meditation_pass(&mut self, level: u32, now: DateTime<Utc>) -> ProgressEntry {
        let key = ProgressKey::meditation_test(level);
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| ProgressEntry::new(key, now));
        entry.mark_completed(now);
        let recorded = entry.clone();

        self.levels
            .entry(level)
            .or_insert_with(|| LevelTestState::new(level))
            .test_passed = true;

        recorded
    }

    /// Stamp mastery markers for levels that are fully completed but have
    /// none, e.g. after loading history from the remote store.
    ///
    /// The stamp is the latest day completion of the level, which is when
    /// mastery actually happened. Returns the stamped levels.
    pub fn mark_mastered_levels(&mut self, course: &CourseStructure) -> Vec<u32> {
        let mut stamped = Vec::new();
        for level in course.levels().iter().map(|l| l.number) {
            if !self.is_level_completed(course, level) {
                continue;
            }
            let already = self
                .levels
                .get(&level)
                .and_then(|s| s.first_completed_at)
                .is_some();
            if already {
                continue;
            }
            let mastered_at = (1..=course.days_in(level))
                .filter_map(|day| self.completed_at(ProgressKey::lesson(level, day)))
                .max();
            if let Some(at) = mastered_at {
                self.levels
                    .entry(level)
                    .or_insert_with(|| LevelTestState::new(level))
                    .first_completed_at = Some(at);
                stamped.push(level);
            }
        }
        stamped
    }

    /// Swap in a complete new projection.
    ///
    /// Inconsistent records are dropped with a warning. The swap happens
    /// only after the replacement maps are fully built.
    pub fn replace_all(&mut self, entries: Vec<ProgressEntry>, levels: Vec<LevelTestState>) {
        let mut next_entries = BTreeMap::new();
        for entry in entries {
            if !entry.is_consistent() {
                tracing::warn!(
                    "dropping inconsistent record for level {} {}",
                    entry.level,
                    entry.day
                );
                continue;
            }
            next_entries.insert(entry.key(), entry);
        }
        let next_levels = levels.into_iter().map(|s| (s.level, s)).collect();

        self.entries = next_entries;
        self.levels = next_levels;
    }
}

fn ensure_lesson(course: &CourseStructure, level: u32, day: u32) -> Result<()> {
    if course.contains(level, day) {
        Ok(())
    } else {
        Err(StillpointError::invalid_state(format!(
            "level {} day {} is not part of the course",
            level, day
        )))
    }
}
