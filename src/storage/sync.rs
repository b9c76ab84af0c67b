//! Progress synchronization with the remote store.
//!
//! Local writes are pushed record by record. A fetch replaces the whole
//! local projection, except for records written locally that the remote
//! has not acknowledged yet: those are pending, and a fetched copy older
//! than the pending write is stale and loses.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::core::{CourseStructure, LevelTestState, ProgressEntry, ProgressKey, ProgressStore};
use crate::error::{FailOpen, Result, StillpointError};
use crate::storage::ProgressRemote;

#[derive(Debug, Default)]
struct Pending {
    /// Local `updated_at` of each unacknowledged record.
    entries: BTreeMap<ProgressKey, DateTime<Utc>>,
    levels: BTreeSet<u32>,
}

/// What a reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records received from the remote.
    pub fetched: usize,
    /// Pending local records kept over stale or missing remote copies.
    pub kept_local: Vec<ProgressKey>,
    /// Levels whose mastery marker was backfilled.
    pub mastered: Vec<u32>,
}

/// Keeps a [`ProgressStore`] in step with a [`ProgressRemote`].
#[derive(Debug)]
pub struct ProgressSync<R: ProgressRemote> {
    remote: R,
    pending: Mutex<Pending>,
}

impl<R: ProgressRemote> ProgressSync<R> {
    pub fn new(remote: R) -> Self {
        Self {
            remote,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    fn pending(&self) -> Result<MutexGuard<'_, Pending>> {
        self.pending
            .lock()
            .map_err(|_| StillpointError::sync("pending write lock poisoned"))
    }

    /// Whether a local record is waiting for acknowledgement.
    pub fn is_pending(&self, key: ProgressKey) -> bool {
        self.pending()
            .map(|p| p.entries.contains_key(&key))
            .unwrap_or(false)
    }

    /// Number of unacknowledged records and level markers.
    pub fn pending_count(&self) -> usize {
        self.pending()
            .map(|p| p.entries.len() + p.levels.len())
            .unwrap_or(0)
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Submit the local record for `key` and adopt the remote's answer.
    ///
    /// The record stays pending if the submit fails, so a later fetch cannot
    /// overwrite it with an older copy. The remote's answer replaces the
    /// local record only if it is at least as recent.
    pub fn push(&self, store: &mut ProgressStore, key: ProgressKey) -> Result<ProgressEntry> {
        let local = store
            .get(key)
            .cloned()
            .ok_or_else(|| StillpointError::invalid_state(format!("no local record for {:?}", key)))?;

        self.pending()?.entries.insert(key, local.updated_at);

        let remote = self.remote.submit_progress(&local)?;
        self.acknowledge(key, local.updated_at)?;

        match resolve(&local, &remote) {
            Ok(()) => {
                store.upsert(remote.clone())?;
                Ok(remote)
            }
            Err(err) => {
                tracing::info!("{}; keeping local record", err);
                Ok(local)
            }
        }
    }

    /// Submit the local level marker for `level`.
    pub fn push_level_state(
        &self,
        store: &mut ProgressStore,
        level: u32,
    ) -> Result<LevelTestState> {
        let local = store.level_state(level).cloned().ok_or_else(|| {
            StillpointError::invalid_state(format!("no level marker for level {}", level))
        })?;

        self.pending()?.levels.insert(level);
        let merged = self.remote.submit_level_state(&local)?;
        self.pending()?.levels.remove(&level);

        store.set_level_state(merged.clone());
        Ok(merged)
    }

    /// Resubmit every pending record and marker.
    ///
    /// Stops at the first failure; what was not sent stays pending.
    pub fn flush(&self, store: &mut ProgressStore) -> Result<usize> {
        let (keys, levels) = {
            let pending = self.pending()?;
            (
                pending.entries.keys().copied().collect::<Vec<_>>(),
                pending.levels.iter().copied().collect::<Vec<_>>(),
            )
        };

        let mut sent = 0;
        for key in keys {
            if store.get(key).is_none() {
                self.pending()?.entries.remove(&key);
                continue;
            }
            self.push(store, key)?;
            sent += 1;
        }
        for level in levels {
            if store.level_state(level).is_none() {
                self.pending()?.levels.remove(&level);
                continue;
            }
            self.push_level_state(store, level)?;
            sent += 1;
        }
        Ok(sent)
    }

    // Only clears the marker if no newer local write happened meanwhile.
    fn acknowledge(&self, key: ProgressKey, written_at: DateTime<Utc>) -> Result<()> {
        let mut pending = self.pending()?;
        if pending.entries.get(&key).is_some_and(|at| *at <= written_at) {
            pending.entries.remove(&key);
        }
        Ok(())
    }

    // =========================================================================
    // Reconcile
    // =========================================================================

    /// Replace the local projection with the remote's records.
    ///
    /// Pending local records win over older remote copies and survive when
    /// the remote lacks them. The swap into `store` is a single whole
    /// replacement; mastery markers are backfilled afterwards.
    pub fn reconcile(
        &self,
        store: &mut ProgressStore,
        course: &CourseStructure,
    ) -> Result<ReconcileReport> {
        let fetched = self.remote.fetch_all_progress()?;
        let fetched_levels = self.remote.fetch_level_states()?;
        let pending = self.pending()?;

        let mut report = ReconcileReport {
            fetched: fetched.len(),
            ..Default::default()
        };

        let mut entries: BTreeMap<ProgressKey, ProgressEntry> = BTreeMap::new();
        for remote in fetched {
            let key = remote.key();
            let local = pending.entries.contains_key(&key).then(|| store.get(key)).flatten();
            match local {
                Some(local) => match resolve(local, &remote) {
                    Ok(()) => {
                        entries.insert(key, remote);
                    }
                    Err(err) => {
                        tracing::info!("{}; keeping local record", err);
                        entries.insert(key, local.clone());
                        report.kept_local.push(key);
                    }
                },
                None => {
                    entries.insert(key, remote);
                }
            }
        }
        for key in pending.entries.keys() {
            if entries.contains_key(key) {
                continue;
            }
            if let Some(local) = store.get(*key) {
                entries.insert(*key, local.clone());
                report.kept_local.push(*key);
            }
        }

        let mut levels: BTreeMap<u32, LevelTestState> =
            fetched_levels.into_iter().map(|s| (s.level, s)).collect();
        for level in &pending.levels {
            if let Some(local) = store.level_state(*level) {
                levels.insert(*level, local.clone());
            }
        }
        drop(pending);

        store.replace_all(entries.into_values().collect(), levels.into_values().collect());
        report.mastered = store.mark_mastered_levels(course);

        tracing::info!(
            fetched = report.fetched,
            kept_local = report.kept_local.len(),
            mastered = report.mastered.len(),
            "progress reconciled"
        );
        Ok(report)
    }

    /// Reconcile, keeping the current projection if the remote is
    /// unreachable.
    pub fn reconcile_or_keep(
        &self,
        store: &mut ProgressStore,
        course: &CourseStructure,
    ) -> ReconcileReport {
        self.reconcile(store, course)
            .fail_open_default("progress reconciliation failed")
    }
}

/// Check that a remote copy may replace a local record.
///
/// Fails with [`StillpointError::StaleReconciliation`] when the remote copy
/// is older than the local write.
pub fn resolve(local: &ProgressEntry, remote: &ProgressEntry) -> Result<()> {
    if remote.updated_at < local.updated_at {
        return Err(StillpointError::stale(local.level, local.day.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgressionConfig;
    use crate::core::Progression;
    use crate::storage::MemoryProgressRemote;
    use chrono::Duration;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn course() -> CourseStructure {
        CourseStructure::new(&[2, 2], None).unwrap()
    }

    /// Remote that fails every call.
    struct Offline;

    impl ProgressRemote for Offline {
        fn submit_progress(&self, _: &ProgressEntry) -> Result<ProgressEntry> {
            Err(StillpointError::sync("offline"))
        }
        fn fetch_all_progress(&self) -> Result<Vec<ProgressEntry>> {
            Err(StillpointError::sync("offline"))
        }
        fn submit_level_state(&self, _: &LevelTestState) -> Result<LevelTestState> {
            Err(StillpointError::sync("offline"))
        }
        fn fetch_level_states(&self) -> Result<Vec<LevelTestState>> {
            Err(StillpointError::sync("offline"))
        }
    }

    fn completed(level: u32, day: u32, at: DateTime<Utc>) -> ProgressEntry {
        let mut entry = ProgressEntry::new(ProgressKey::lesson(level, day), at);
        entry.completed = true;
        entry.completed_at = Some(at);
        entry
    }

    #[test]
    fn test_push_submits_and_clears_pending() {
        let course = course();
        let sync = ProgressSync::new(MemoryProgressRemote::new());
        let mut store = ProgressStore::new();
        store
            .record_completion(&course, 1, 1, 60.0, 60.0, "calm", t0())
            .unwrap();

        let key = ProgressKey::lesson(1, 1);
        let pushed = sync.push(&mut store, key).unwrap();
        assert!(pushed.completed);
        assert!(!sync.is_pending(key));
        assert_eq!(sync.remote().fetch_all_progress().unwrap(), vec![pushed]);
    }

    #[test]
    fn test_push_unknown_record_is_invalid() {
        let sync = ProgressSync::new(MemoryProgressRemote::new());
        let mut store = ProgressStore::new();
        let err = sync.push(&mut store, ProgressKey::lesson(1, 1)).unwrap_err();
        assert!(matches!(err, StillpointError::InvalidState { .. }));
    }

    #[test]
    fn test_failed_push_stays_pending() {
        let course = course();
        let sync = ProgressSync::new(Offline);
        let mut store = ProgressStore::new();
        store
            .record_completion(&course, 1, 1, 60.0, 60.0, "", t0())
            .unwrap();

        assert!(sync.push(&mut store, ProgressKey::lesson(1, 1)).is_err());
        assert!(sync.is_pending(ProgressKey::lesson(1, 1)));
        assert_eq!(sync.pending_count(), 1);
    }

    #[test]
    fn test_push_adopts_newer_remote_copy() {
        let remote = Arc::new(MemoryProgressRemote::new());
        let sync = ProgressSync::new(Arc::clone(&remote));
        let mut store = ProgressStore::new();

        // Another device wrote a later copy.
        let mut other = completed(1, 1, t0());
        other.feedback = "from tablet".into();
        other.updated_at = t0() + Duration::hours(2);
        remote.force_put(other.clone()).unwrap();

        store.upsert(completed(1, 1, t0())).unwrap();
        let adopted = sync.push(&mut store, ProgressKey::lesson(1, 1)).unwrap();
        assert_eq!(adopted, other);
        assert_eq!(store.lesson(1, 1).unwrap().feedback, "from tablet");
    }

    #[test]
    fn test_reconcile_replaces_projection() {
        let course = course();
        let remote = MemoryProgressRemote::with_records(
            vec![completed(1, 1, t0()), completed(1, 2, t0() + Duration::days(1))],
            Vec::new(),
        );
        let sync = ProgressSync::new(remote);

        let mut store = ProgressStore::new();
        // Not pending, so the remote's view wins and this disappears.
        store.upsert(completed(2, 1, t0())).unwrap();

        let report = sync.reconcile(&mut store, &course).unwrap();
        assert_eq!(report.fetched, 2);
        assert!(report.kept_local.is_empty());
        assert_eq!(report.mastered, vec![1]);

        assert_eq!(store.len(), 2);
        assert!(store.lesson(2, 1).is_none());
        assert_eq!(
            store.level_state(1).unwrap().first_completed_at,
            Some(t0() + Duration::days(1))
        );
    }

    #[test]
    fn test_stale_fetch_keeps_pending_local_write() {
        let course = course();
        let remote = Arc::new(MemoryProgressRemote::new());
        remote
            .force_put(ProgressEntry::new(ProgressKey::lesson(1, 1), t0()))
            .unwrap();

        // The local completion is written but its push failed.
        let offline = ProgressSync::new(Offline);
        let mut store = ProgressStore::new();
        let later = t0() + Duration::minutes(10);
        store
            .record_completion(&course, 1, 1, 60.0, 60.0, "", later)
            .unwrap();
        assert!(offline.push(&mut store, ProgressKey::lesson(1, 1)).is_err());

        // Replay the same pending state against a reachable remote.
        let sync = ProgressSync::new(Arc::clone(&remote));
        sync.pending()
            .unwrap()
            .entries
            .insert(ProgressKey::lesson(1, 1), later);

        let report = sync.reconcile(&mut store, &course).unwrap();
        assert_eq!(report.kept_local, vec![ProgressKey::lesson(1, 1)]);
        assert!(store.is_completed(ProgressKey::lesson(1, 1)));

        // Flushing delivers it and clears the pending marker.
        assert_eq!(sync.flush(&mut store).unwrap(), 1);
        assert_eq!(sync.pending_count(), 0);
        assert!(remote.fetch_all_progress().unwrap()[0].completed);
    }

    #[test]
    fn test_pending_record_missing_remotely_survives() {
        let course = course();
        let sync = ProgressSync::new(MemoryProgressRemote::new());
        let mut store = ProgressStore::new();
        store
            .record_completion(&course, 1, 1, 60.0, 60.0, "", t0())
            .unwrap();
        sync.pending()
            .unwrap()
            .entries
            .insert(ProgressKey::lesson(1, 1), t0());

        let report = sync.reconcile(&mut store, &course).unwrap();
        assert_eq!(report.kept_local, vec![ProgressKey::lesson(1, 1)]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_newer_remote_copy_wins_over_pending() {
        let course = course();
        let mut remote_copy = completed(1, 1, t0());
        remote_copy.updated_at = t0() + Duration::hours(1);
        let sync = ProgressSync::new(MemoryProgressRemote::with_records(
            vec![remote_copy.clone()],
            Vec::new(),
        ));

        let mut store = ProgressStore::new();
        store.upsert(ProgressEntry::new(ProgressKey::lesson(1, 1), t0())).unwrap();
        sync.pending()
            .unwrap()
            .entries
            .insert(ProgressKey::lesson(1, 1), t0());

        let report = sync.reconcile(&mut store, &course).unwrap();
        assert!(report.kept_local.is_empty());
        assert_eq!(store.lesson(1, 1), Some(&remote_copy));
    }

    #[test]
    fn test_reconcile_unlocks_after_fetch() {
        let course = course();
        let sync = ProgressSync::new(MemoryProgressRemote::with_records(
            vec![completed(1, 1, t0()), completed(1, 2, t0() + Duration::days(1))],
            Vec::new(),
        ));
        let mut store = ProgressStore::new();
        sync.reconcile(&mut store, &course).unwrap();

        let config = ProgressionConfig::default();
        let progression = Progression::new(&store, &course, &config);
        assert!(progression.is_level_unlocked(2, t0() + Duration::days(2)));
    }

    #[test]
    fn test_offline_reconcile_fails_open() {
        let course = course();
        let sync = ProgressSync::new(Offline);
        let mut store = ProgressStore::new();
        store.upsert(completed(1, 1, t0())).unwrap();

        let report = sync.reconcile_or_keep(&mut store, &course);
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_push_level_state_keeps_earliest_marker() {
        let remote = Arc::new(MemoryProgressRemote::new());
        let mut earlier = LevelTestState::new(1);
        earlier.first_completed_at = Some(t0());
        remote.submit_level_state(&earlier).unwrap();

        let sync = ProgressSync::new(Arc::clone(&remote));
        let mut store = ProgressStore::new();
        let mut local = LevelTestState::new(1);
        local.first_completed_at = Some(t0() + Duration::days(30));
        store.set_level_state(local);

        let merged = sync.push_level_state(&mut store, 1).unwrap();
        assert_eq!(merged.first_completed_at, Some(t0()));
        assert_eq!(store.level_state(1).unwrap().first_completed_at, Some(t0()));
    }

    #[test]
    fn test_resolve_flags_stale_copies() {
        let local = completed(3, 2, t0() + Duration::seconds(5));
        let remote = completed(3, 2, t0());
        let err = resolve(&local, &remote).unwrap_err();
        assert!(matches!(
            err,
            StillpointError::StaleReconciliation { level: 3, ref day } if day == "day 2"
        ));
        assert!(resolve(&remote, &local).is_ok());
    }
}
