//! In-memory progress remote.
//!
//! This module provides a thread-safe in-memory implementation of the
//! ProgressRemote trait, used in tests and by embedders without a backend.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::{LevelTestState, ProgressEntry, ProgressKey};
use crate::error::{Result, StillpointError};
use crate::storage::traits::{merge_level_state, newer_entry};
use crate::storage::ProgressRemote;

/// In-memory progress remote.
///
/// Thread-safe implementation using `RwLock<BTreeMap>`.
/// Records are lost when the remote is dropped.
#[derive(Debug, Default)]
pub struct MemoryProgressRemote {
    entries: RwLock<BTreeMap<ProgressKey, ProgressEntry>>,
    levels: RwLock<BTreeMap<u32, LevelTestState>>,
}

fn poisoned() -> StillpointError {
    StillpointError::sync("in-memory progress lock poisoned")
}

impl MemoryProgressRemote {
    /// Create a new empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a remote holding the given records, as if fetched from a
    /// server.
    pub fn with_records(entries: Vec<ProgressEntry>, levels: Vec<LevelTestState>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().map(|e| (e.key(), e)).collect()),
            levels: RwLock::new(levels.into_iter().map(|s| (s.level, s)).collect()),
        }
    }

    fn read_entries(&self) -> Result<RwLockReadGuard<'_, BTreeMap<ProgressKey, ProgressEntry>>> {
        self.entries.read().map_err(|_| poisoned())
    }

    fn write_entries(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<ProgressKey, ProgressEntry>>> {
        self.entries.write().map_err(|_| poisoned())
    }

    /// Number of progress records.
    pub fn len(&self) -> usize {
        self.read_entries().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if the remote holds no progress records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a record unconditionally, bypassing the newer-wins rule.
    ///
    /// Simulates another device writing to the server.
    pub fn force_put(&self, entry: ProgressEntry) -> Result<()> {
        self.write_entries()?.insert(entry.key(), entry);
        Ok(())
    }
}

impl ProgressRemote for MemoryProgressRemote {
    fn submit_progress(&self, entry: &ProgressEntry) -> Result<ProgressEntry> {
        let mut entries = self.write_entries()?;
        let kept = newer_entry(entries.get(&entry.key()), entry);
        entries.insert(kept.key(), kept.clone());
        Ok(kept)
    }

    fn fetch_all_progress(&self) -> Result<Vec<ProgressEntry>> {
        Ok(self.read_entries()?.values().cloned().collect())
    }

    fn submit_level_state(&self, state: &LevelTestState) -> Result<LevelTestState> {
        let mut levels = self.levels.write().map_err(|_| poisoned())?;
        let merged = merge_level_state(levels.get(&state.level), state);
        levels.insert(merged.level, merged.clone());
        Ok(merged)
    }

    fn fetch_level_states(&self) -> Result<Vec<LevelTestState>> {
        let levels = self.levels.read().map_err(|_| poisoned())?;
        Ok(levels.values().cloned().collect())
    }
}
