//! File-claim tracking shared with indexer workers.
//!
//! During a round of jobs each file may be indexed by at most one job. The
//! tracker records which job claimed which file; it is the only structure
//! shared between the orchestrator thread and external workers, guarded by
//! one mutex.

use crate::model::FileId;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct VisitState {
    /// fileId -> path for every currently claimed file.
    paths: FxHashMap<FileId, PathBuf>,
    /// jobKey -> the fileIds that job owns.
    owners: FxHashMap<u64, FxHashSet<FileId>>,
}

/// Cloneable handle to the shared claim table.
#[derive(Clone, Default)]
pub struct VisitTracker {
    state: Arc<Mutex<VisitState>>,
}

impl VisitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VisitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `file_id` for the job identified by `job_key`. Returns `true`
    /// when the claim succeeded; `false` means another job already owns the
    /// file for this round.
    pub fn visit_file(&self, file_id: FileId, path: &Path, job_key: u64) -> bool {
        let mut state = self.lock();
        if state.paths.contains_key(&file_id) {
            return false;
        }
        state.paths.insert(file_id, path.to_path_buf());
        state.owners.entry(job_key).or_default().insert(file_id);
        true
    }

    /// Drop the given claims regardless of owner.
    pub fn release_file_ids(&self, file_ids: &FxHashSet<FileId>) {
        if file_ids.is_empty() {
            return;
        }
        let mut state = self.lock();
        for file_id in file_ids {
            state.paths.remove(file_id);
        }
        for owned in state.owners.values_mut() {
            owned.retain(|id| !file_ids.contains(id));
        }
        state.owners.retain(|_, owned| !owned.is_empty());
    }

    /// Drop every claim held by `job_key`, returning the released ids.
    pub fn release_job(&self, job_key: u64) -> FxHashSet<FileId> {
        let mut state = self.lock();
        let released = state.owners.remove(&job_key).unwrap_or_default();
        for file_id in &released {
            state.paths.remove(file_id);
        }
        released
    }

    pub fn contains(&self, file_id: FileId) -> bool {
        self.lock().paths.contains_key(&file_id)
    }

    pub fn path_of(&self, file_id: FileId) -> Option<PathBuf> {
        self.lock().paths.get(&file_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered snapshot for persistence.
    pub fn snapshot(&self) -> BTreeMap<FileId, PathBuf> {
        self.lock()
            .paths
            .iter()
            .map(|(id, p)| (*id, p.clone()))
            .collect()
    }

    /// Restore claims from a persisted snapshot. The owning jobs are gone,
    /// so the entries carry no attribution; a later release by id still
    /// clears them.
    pub fn replay(&self, files: BTreeMap<FileId, PathBuf>) {
        let mut state = self.lock();
        for (file_id, path) in files {
            state.paths.entry(file_id).or_insert(path);
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.paths.clear();
        state.owners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive() {
        let tracker = VisitTracker::new();
        assert!(tracker.visit_file(1, Path::new("/p/a.h"), 100));
        // Second claim fails, even from another job.
        assert!(!tracker.visit_file(1, Path::new("/p/a.h"), 200));
        assert_eq!(tracker.path_of(1), Some(PathBuf::from("/p/a.h")));
    }

    #[test]
    fn test_release_job_frees_claims() {
        let tracker = VisitTracker::new();
        tracker.visit_file(1, Path::new("/p/a.h"), 100);
        tracker.visit_file(2, Path::new("/p/b.h"), 100);
        tracker.visit_file(3, Path::new("/p/c.h"), 200);

        let released = tracker.release_job(100);
        assert_eq!(released.len(), 2);
        assert!(!tracker.contains(1));
        assert!(!tracker.contains(2));
        assert!(tracker.contains(3));

        // A released file can be claimed again.
        assert!(tracker.visit_file(1, Path::new("/p/a.h"), 300));
    }

    #[test]
    fn test_release_file_ids_removes_keys() {
        let tracker = VisitTracker::new();
        tracker.visit_file(1, Path::new("/p/a.h"), 100);
        tracker.visit_file(2, Path::new("/p/b.h"), 100);

        tracker.release_file_ids(&FxHashSet::from_iter([1u32]));
        assert!(!tracker.contains(1));
        assert!(tracker.contains(2));
        assert_eq!(tracker.release_job(100), FxHashSet::from_iter([2u32]));
    }

    #[test]
    fn test_snapshot_replay_round_trip() {
        let tracker = VisitTracker::new();
        tracker.visit_file(1, Path::new("/p/a.h"), 100);
        tracker.visit_file(2, Path::new("/p/b.h"), 200);

        let snapshot = tracker.snapshot();
        let restored = VisitTracker::new();
        restored.replay(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
    }
}
