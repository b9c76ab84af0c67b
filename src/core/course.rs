//! Static course catalog.
//!
//! Levels are numbered from 1, days within a level from 1. Each day may
//! carry an opaque content locator that only the presentation layer
//! resolves.

use crate::config::CourseConfig;
use crate::error::{Result, StillpointError};

/// A single consumable day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Day {
    /// Day number within its level (1-based).
    pub number: u32,
    /// Content locator, if the catalog provides one.
    pub content: Option<String>,
}

/// A level and its days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    /// Level number (1-based).
    pub number: u32,
    /// Days in order.
    pub days: Vec<Day>,
}

impl Level {
    /// Number of days in this level.
    pub fn day_count(&self) -> u32 {
        self.days.len() as u32
    }
}

/// Read-only course layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseStructure {
    levels: Vec<Level>,
    meditation_test_level: Option<u32>,
}

impl CourseStructure {
    /// Build a course from day counts, without content locators.
    pub fn new(days_per_level: &[u32], meditation_test_level: Option<u32>) -> Result<Self> {
        let levels = days_per_level
            .iter()
            .enumerate()
            .map(|(i, &days)| Level {
                number: i as u32 + 1,
                days: (1..=days)
                    .map(|number| Day {
                        number,
                        content: None,
                    })
                    .collect(),
            })
            .collect();

        let course = Self {
            levels,
            meditation_test_level,
        };
        course.validate()?;
        Ok(course)
    }

    /// Build the course described by configuration.
    pub fn from_config(config: &CourseConfig) -> Result<Self> {
        let levels = config
            .levels
            .iter()
            .enumerate()
            .map(|(i, level)| Level {
                number: i as u32 + 1,
                days: (1..=level.days)
                    .map(|number| Day {
                        number,
                        content: level.content.get(number as usize - 1).cloned(),
                    })
                    .collect(),
            })
            .collect();

        let course = Self {
            levels,
            meditation_test_level: config.meditation_test(),
        };
        course.validate()?;
        Ok(course)
    }

    fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(StillpointError::config("course has no levels"));
        }
        if let Some(level) = self.levels.iter().find(|l| l.days.is_empty()) {
            return Err(StillpointError::config(format!(
                "level {} has no days",
                level.number
            )));
        }
        if let Some(test_level) = self.meditation_test_level {
            // The test sits between two levels, so it cannot gate level 1.
            if test_level < 2 || test_level > self.level_count() {
                return Err(StillpointError::config(format!(
                    "meditation test level {} must be between 2 and {}",
                    test_level,
                    self.level_count()
                )));
            }
        }
        Ok(())
    }

    /// Number of levels.
    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// All levels in order.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Look up a level by number.
    pub fn level(&self, number: u32) -> Option<&Level> {
        number
            .checked_sub(1)
            .and_then(|i| self.levels.get(i as usize))
    }

    /// Number of days in a level; 0 for unknown levels.
    pub fn days_in(&self, level: u32) -> u32 {
        self.level(level).map(Level::day_count).unwrap_or(0)
    }

    /// Whether `(level, day)` names a real day of the course.
    pub fn contains(&self, level: u32, day: u32) -> bool {
        day >= 1 && day <= self.days_in(level)
    }

    /// Content locator for a day, if any.
    pub fn content(&self, level: u32, day: u32) -> Option<&str> {
        self.level(level)
            .and_then(|l| l.days.get(day.checked_sub(1)? as usize))
            .and_then(|d| d.content.as_deref())
    }

    /// Level whose entry is gated by the meditation test.
    pub fn meditation_test_level(&self) -> Option<u32> {
        self.meditation_test_level
    }

    /// Whether entering `level` requires a passed meditation test.
    pub fn requires_meditation_test(&self, level: u32) -> bool {
        self.meditation_test_level == Some(level)
    }
}
