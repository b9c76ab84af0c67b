//! Remote progress storage traits for Stillpoint.
//!
//! This module defines the `ProgressRemote` trait, the boundary to the
//! external persistence service that owns the authoritative progress copy.

use std::sync::Arc;

use crate::core::{LevelTestState, ProgressEntry};
use crate::error::Result;

/// Trait for remote progress stores.
///
/// Records are replaced whole, never merged field by field. A submitted
/// record older than the stored one (by `updated_at`) does not replace it;
/// the stored record is returned instead.
pub trait ProgressRemote: Send + Sync {
    /// Store a progress record and return the remote's latest copy.
    fn submit_progress(&self, entry: &ProgressEntry) -> Result<ProgressEntry>;

    /// Every progress record of the learner.
    fn fetch_all_progress(&self) -> Result<Vec<ProgressEntry>>;

    /// Store a level marker and return the remote's latest copy.
    ///
    /// The earliest known first-completion time is kept.
    fn submit_level_state(&self, state: &LevelTestState) -> Result<LevelTestState>;

    /// Every level marker of the learner.
    fn fetch_level_states(&self) -> Result<Vec<LevelTestState>>;
}

/// Blanket implementation of ProgressRemote for Arc-wrapped stores.
///
/// This allows sharing one remote between a sync driver and tests.
impl<T: ProgressRemote + ?Sized> ProgressRemote for Arc<T> {
    fn submit_progress(&self, entry: &ProgressEntry) -> Result<ProgressEntry> {
        (**self).submit_progress(entry)
    }

    fn fetch_all_progress(&self) -> Result<Vec<ProgressEntry>> {
        (**self).fetch_all_progress()
    }

    fn submit_level_state(&self, state: &LevelTestState) -> Result<LevelTestState> {
        (**self).submit_level_state(state)
    }

    fn fetch_level_states(&self) -> Result<Vec<LevelTestState>> {
        (**self).fetch_level_states()
    }
}

/// Pick the record a remote keeps when `incoming` meets `stored`.
pub(crate) fn newer_entry(stored: Option<&ProgressEntry>, incoming: &ProgressEntry) -> ProgressEntry {
    match stored {
        Some(stored) if stored.updated_at > incoming.updated_at => stored.clone(),
        _ => incoming.clone(),
    }
}

/// Combine two level markers, keeping the earliest mastery time.
pub(crate) fn merge_level_state(
    stored: Option<&LevelTestState>,
    incoming: &LevelTestState,
) -> LevelTestState {
    let mut merged = incoming.clone();
    if let Some(stored) = stored {
        merged.test_passed |= stored.test_passed;
        merged.first_completed_at = match (stored.first_completed_at, incoming.first_completed_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
    merged
}
