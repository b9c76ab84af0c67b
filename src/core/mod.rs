//! Core types and logic for Stillpoint.
//!
//! This module contains the course structure, the progress store, the
//! access window rules and the progression state machine that derives
//! which levels and days are open.

pub mod access;
pub mod course;
pub mod progress;
pub mod progression;
pub mod state;

pub use access::{
    is_within_window, next_window_start, time_until_next_window, AccessPolicy, AccessWindow,
};
pub use course::{CourseStructure, Day, Level};
pub use progress::{DaySlot, LevelTestState, ProgressEntry, ProgressKey, ProgressStore};
pub use progression::Progression;
pub use state::{DayState, LevelState, LockReason};
