//! File-based progress remote for Stillpoint.
//!
//! Records are stored as JSON files in `~/.stillpoint/progress/`:
//! `progress.json` for day records and `levels.json` for level markers.
//! Atomic writes are achieved via temp file + rename pattern.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::progress_dir;
use crate::core::{LevelTestState, ProgressEntry};
use crate::error::{Result, StillpointError};
use crate::storage::traits::{merge_level_state, newer_entry};
use crate::storage::ProgressRemote;

const PROGRESS_FILE: &str = "progress.json";
const LEVELS_FILE: &str = "levels.json";

/// File-based progress remote.
///
/// Each submit is a read-modify-write of one file, serialized by an
/// in-process lock. Uses atomic writes via temp file + rename pattern.
#[derive(Debug)]
pub struct FileProgressRemote {
    /// Directory holding the progress files.
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileProgressRemote {
    /// Create a remote in the default directory.
    ///
    /// Uses `~/.stillpoint/progress/` or `$STILLPOINT_HOME/progress/`.
    pub fn new() -> Result<Self> {
        let dir = progress_dir().ok_or_else(|| {
            StillpointError::config("Could not determine progress directory (no home directory)")
        })?;
        Self::with_dir(dir)
    }

    /// Create a remote in a custom directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| StillpointError::storage(&dir, e))?;
        }

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the progress files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!(".{}.tmp", name))
    }

    /// Read a JSON list; a missing file is an empty list.
    fn read_list<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let path = self.file_path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| StillpointError::storage(&path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| StillpointError::serde(format!("{}: {}", path.display(), e)))
    }

    /// Write a JSON list atomically using temp file + rename.
    fn write_list<T: Serialize>(&self, name: &str, items: &[T]) -> Result<()> {
        let final_path = self.file_path(name);
        let temp_path = self.temp_path(name);

        let json = serde_json::to_string_pretty(items)?;

        {
            let mut file =
                fs::File::create(&temp_path).map_err(|e| StillpointError::storage(&temp_path, e))?;
            file.write_all(json.as_bytes())
                .map_err(|e| StillpointError::storage(&temp_path, e))?;
            file.sync_all()
                .map_err(|e| StillpointError::storage(&temp_path, e))?;
        }

        // Rename temp file to final path (atomic on POSIX)
        fs::rename(&temp_path, &final_path)
            .map_err(|e| StillpointError::storage(&final_path, e))?;

        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StillpointError::sync("progress file lock poisoned"))
    }
}

impl ProgressRemote for FileProgressRemote {
    fn submit_progress(&self, entry: &ProgressEntry) -> Result<ProgressEntry> {
        let _guard = self.lock()?;
        let mut entries: Vec<ProgressEntry> = self.read_list(PROGRESS_FILE)?;

        let position = entries.iter().position(|e| e.key() == entry.key());
        let kept = newer_entry(position.map(|i| &entries[i]), entry);
        match position {
            Some(i) => entries[i] = kept.clone(),
            None => entries.push(kept.clone()),
        }
        entries.sort_by_key(|e| e.key());

        self.write_list(PROGRESS_FILE, &entries)?;
        tracing::debug!("stored progress for level {} {}", kept.level, kept.day);
        Ok(kept)
    }

    fn fetch_all_progress(&self) -> Result<Vec<ProgressEntry>> {
        self.read_list(PROGRESS_FILE)
    }

    fn submit_level_state(&self, state: &LevelTestState) -> Result<LevelTestState> {
        let _guard = self.lock()?;
        let mut levels: Vec<LevelTestState> = self.read_list(LEVELS_FILE)?;

        let position = levels.iter().position(|s| s.level == state.level);
        let merged = merge_level_state(position.map(|i| &levels[i]), state);
        match position {
            Some(i) => levels[i] = merged.clone(),
            None => levels.push(merged.clone()),
        }
        levels.sort_by_key(|s| s.level);

        self.write_list(LEVELS_FILE, &levels)?;
        Ok(merged)
    }

    fn fetch_level_states(&self) -> Result<Vec<LevelTestState>> {
        self.read_list(LEVELS_FILE)
    }
}
