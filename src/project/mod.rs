//! Project orchestrator.
//!
//! A `Project` ties together the persistent tables, the job lifecycle, dirty
//! detection, the sync engine and the query surface behind a three-state
//! machine: `Unloaded`, `Loaded`, `Syncing`. Every method on `Project` must
//! be called from one thread (the event loop); the only state shared with
//! other threads is the [`VisitTracker`] and the table mutex granted to the
//! sync worker.

pub mod event_loop;
pub mod jobs;
pub mod queries;
pub mod sources;
pub mod sync;
pub mod visit;
pub mod watcher;

pub use event_loop::{EventLoop, ProjectEvent, ProjectHandle};
pub use jobs::{IndexerJob, JobScheduler, NullScheduler};
pub use queries::{
    match_symbol_name, DependencyMode, NameFlavor, ProjectStats, ReindexMode, SortFlag,
    SortedCursor,
};
pub use sync::SyncOutcome;
pub use visit::VisitTracker;

use crate::config::Config;
use crate::dirty::{Dirty, DirtyContext};
use crate::model::{FileId, FixIt, IndexData, Source, NULL_FILE_ID};
use crate::registry::{last_modified_ms, FileRegistry};
use crate::tables::ProjectTables;
use anyhow::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use sync::SyncTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unloaded,
    Loaded,
    Syncing,
}

/// Whether a sync runs inline or on the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Synchronous,
    Asynchronous,
}

pub(crate) fn lock_tables(tables: &Arc<Mutex<ProjectTables>>) -> MutexGuard<'_, ProjectTables> {
    tables.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Project {
    root: PathBuf,
    data_dir: PathBuf,
    config: Config,
    registry: Arc<FileRegistry>,
    scheduler: Arc<dyn JobScheduler>,

    state: State,
    tables: Option<Arc<Mutex<ProjectTables>>>,
    visit: VisitTracker,

    active_jobs: FxHashMap<u64, Arc<IndexerJob>>,
    pending_jobs: Vec<Arc<IndexerJob>>,
    pending_index_data: BTreeMap<u64, (Arc<IndexerJob>, IndexData)>,
    index_data: BTreeMap<u64, IndexData>,

    dirty_files: FxHashSet<FileId>,
    pending_dirty_files: FxHashSet<FileId>,
    suspended_files: FxHashSet<FileId>,
    suspended: bool,

    pub(crate) fix_its: FxHashMap<FileId, BTreeSet<FixIt>>,
    watched_paths: FxHashSet<PathBuf>,
    pending_watch_roots: Vec<PathBuf>,

    job_counter: u64,
    sync_count: u64,
    jobs_started_at: Option<Instant>,
    last_jobs_elapsed: Duration,
    last_dirty_elapsed: Duration,
    sync_deadline: Option<Instant>,
    dirty_deadline: Option<Instant>,

    events: Option<Sender<ProjectEvent>>,
    last_sync_message: Option<String>,
}

impl Project {
    pub fn new(
        root: impl Into<PathBuf>,
        config: Config,
        registry: Arc<FileRegistry>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        let root = root.into();
        let data_dir = config.data_dir_for(&root);
        Self {
            root,
            data_dir,
            config,
            registry,
            scheduler,
            state: State::Unloaded,
            tables: None,
            visit: VisitTracker::new(),
            active_jobs: FxHashMap::default(),
            pending_jobs: Vec::new(),
            pending_index_data: BTreeMap::new(),
            index_data: BTreeMap::new(),
            dirty_files: FxHashSet::default(),
            pending_dirty_files: FxHashSet::default(),
            suspended_files: FxHashSet::default(),
            suspended: false,
            fix_its: FxHashMap::default(),
            watched_paths: FxHashSet::default(),
            pending_watch_roots: Vec::new(),
            job_counter: 0,
            sync_count: 0,
            jobs_started_at: None,
            last_jobs_elapsed: Duration::ZERO,
            last_dirty_elapsed: Duration::ZERO,
            sync_deadline: None,
            dirty_deadline: None,
            events: None,
            last_sync_message: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_indexing(&self) -> bool {
        !self.active_jobs.is_empty() || !self.index_data.is_empty()
    }

    pub fn active_job_count(&self) -> usize {
        self.active_jobs.len()
    }

    pub fn job_counter(&self) -> u64 {
        self.job_counter
    }

    pub fn sync_count(&self) -> u64 {
        self.sync_count
    }

    pub fn last_sync_message(&self) -> Option<&str> {
        self.last_sync_message.as_deref()
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    /// Completion/abort notifications for asynchronous syncs are posted to
    /// this channel; without one every sync runs inline.
    pub fn set_event_sender(&mut self, sender: Sender<ProjectEvent>) {
        self.events = Some(sender);
    }

    /// Handle for indexer workers: `visit_file` / `release_file_ids` without
    /// touching the orchestrator.
    pub fn visit_tracker(&self) -> VisitTracker {
        self.visit.clone()
    }

    /// Claim `file_id` for the job owning `job_key`; see
    /// [`VisitTracker::visit_file`].
    pub fn visit_file(&self, file_id: FileId, path: &Path, job_key: u64) -> bool {
        self.visit.visit_file(file_id, path, job_key)
    }

    pub fn release_file_ids(&self, file_ids: &FxHashSet<FileId>) {
        self.visit.release_file_ids(file_ids)
    }

    /// Directories newly requiring a filesystem watch; drained by the event
    /// loop after load and after each sync.
    pub fn take_pending_watch_roots(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.pending_watch_roots)
    }

    pub(crate) fn tables(&self) -> Option<&Arc<Mutex<ProjectTables>>> {
        self.tables.as_ref()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the tables, replay persisted state, run the initial dirty sweep
    /// and transition to `Loaded`. Failure to open any table leaves the
    /// project `Unloaded`.
    pub fn load(&mut self) -> Result<()> {
        if self.state != State::Unloaded {
            debug!(root = %self.root.display(), "Load requested but project is already loaded");
            return Ok(());
        }

        let tables = ProjectTables::open(&self.data_dir)?;

        if let Some(files) = tables.load_visited_files() {
            debug!(files = files.len(), "Replaying persisted visited files");
            self.visit.replay(files);
        }

        // Re-watch the parent directory of every known dependency root, and
        // note dependency files that vanished while the project was closed.
        let mut roots: BTreeSet<PathBuf> = BTreeSet::new();
        let mut vanished_deps: FxHashSet<FileId> = FxHashSet::default();
        for header in tables.dependencies.keys() {
            let Some(path) = self.registry.path(*header) else {
                continue;
            };
            if last_modified_ms(&path) == 0 {
                vanished_deps.insert(*header);
            }
            let Some(parent) = path.parent() else {
                continue;
            };
            if self.config.is_system_path(parent) && !self.config.watcher.watch_system_paths {
                continue;
            }
            roots.insert(parent.to_path_buf());
        }

        self.tables = Some(Arc::new(Mutex::new(tables)));
        self.state = State::Loaded;
        for root in roots {
            if self.watched_paths.insert(root.clone()) {
                self.pending_watch_roots.push(root);
            }
        }

        info!(
            root = %self.root.display(),
            data_dir = %self.data_dir.display(),
            "Project loaded"
        );

        self.initial_dirty_sweep(vanished_deps);
        Ok(())
    }

    /// Abort all jobs, run a final sync and close the tables. Returns
    /// `false` when a sync is in flight; the caller retries after a delay.
    pub fn unload(&mut self) -> bool {
        match self.state {
            State::Unloaded => true,
            State::Syncing => {
                info!(root = %self.root.display(), "Unload requested during sync, retrying shortly");
                false
            }
            State::Loaded => {
                self.abort_all_jobs();
                if !self.index_data.is_empty() || !self.dirty_files.is_empty() {
                    self.start_sync(SyncMode::Synchronous);
                } else if let Some(tables) = self.tables.clone() {
                    let mut guard = lock_tables(&tables);
                    if let Err(e) = guard.persist_visited_files(&self.visit.snapshot()) {
                        warn!(error = %e, "Failed to persist visited files on unload");
                    }
                }
                if let Err(e) = self.registry.save() {
                    warn!(error = %e, "Failed to save file registry on unload");
                }

                self.tables = None;
                self.visit.clear();
                self.pending_jobs.clear();
                self.pending_index_data.clear();
                self.pending_dirty_files.clear();
                self.index_data.clear();
                self.dirty_files.clear();
                self.fix_its.clear();
                self.watched_paths.clear();
                self.pending_watch_roots.clear();
                self.sync_deadline = None;
                self.dirty_deadline = None;
                self.jobs_started_at = None;
                self.state = State::Unloaded;
                info!(root = %self.root.display(), "Project unloaded");
                true
            }
        }
    }

    /// Dirty sweep run once after load: vanished files (sources or
    /// dependency roots) are dirtied together with their dependents and
    /// their source rows erased; surviving sources are checked by timestamp
    /// against everything they depend on.
    fn initial_dirty_sweep(&mut self, mut vanished: FxHashSet<FileId>) {
        let Some(tables) = self.tables.clone() else {
            return;
        };

        {
            let mut guard = lock_tables(&tables);
            let doomed: Vec<u64> = guard
                .sources
                .iter()
                .filter(|(_, source)| {
                    self.registry
                        .path(source.file_id)
                        .map(|p| last_modified_ms(&p) == 0)
                        .unwrap_or(true)
                })
                .map(|(key, source)| {
                    vanished.insert(source.file_id);
                    *key
                })
                .collect();
            if !doomed.is_empty() {
                warn!(
                    sources = doomed.len(),
                    "Erasing sources whose files vanished from disk"
                );
                let mut scope = guard.sources.write_scope();
                for key in &doomed {
                    scope.erase(key);
                }
            }
        }

        if !vanished.is_empty() {
            let mut dirty = {
                let guard = lock_tables(&tables);
                let ctx = DirtyContext {
                    dependencies: &guard.dependencies,
                    registry: self.registry.as_ref(),
                };
                Dirty::simple(vanished, &ctx)
            };
            self.start_dirty_jobs(&mut dirty);
        }

        let mut dirty = Dirty::if_modified(None);
        self.start_dirty_jobs(&mut dirty);
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Submit a job. Outside `Loaded` the submission is buffered and
    /// replayed after the current sync finishes.
    pub fn index(&mut self, job: Arc<IndexerJob>) {
        if self.state != State::Loaded {
            debug!(key = job.key(), state = ?self.state, "Buffering job submission");
            self.pending_jobs.push(job);
            return;
        }

        let key = job.key();
        if job.is_compile() && !self.admit_compile(&job) {
            return;
        }

        if let Some(previous) = self.active_jobs.remove(&key) {
            self.scheduler.abort(&previous);
            let released = self.visit.release_job(key);
            debug!(key, released = released.len(), "Aborted replaced job");
        }

        self.job_counter += 1;
        if self.jobs_started_at.is_none() {
            self.jobs_started_at = Some(Instant::now());
        }
        self.sync_deadline = None;
        self.active_jobs.insert(key, Arc::clone(&job));
        self.scheduler.add(&job);
    }

    /// Result delivery from the external scheduler.
    pub fn on_job_finished(&mut self, job: Arc<IndexerJob>, data: IndexData) {
        let key = data.key;

        if self.state == State::Syncing {
            debug!(key, "Buffering job completion during sync");
            self.pending_index_data.insert(key, (job, data));
            return;
        }

        match self.active_jobs.get(&key) {
            Some(current) if Arc::ptr_eq(current, &job) => {
                self.active_jobs.remove(&key);
            }
            _ => {
                warn!(key, "Discarding stale job completion");
                return;
            }
        }

        // Ownership of visited files ends with the job either way.
        let released = self.visit.release_job(key);

        if !data.is_complete() {
            warn!(
                key,
                flags = data.flags,
                released = released.len(),
                "Job finished without completing; tables unchanged"
            );
            self.on_batch_maybe_idle(job.is_dirty_job());
            return;
        }

        let Some(tables) = self.tables.clone() else {
            return;
        };
        {
            let mut guard = lock_tables(&tables);
            let Some(mut source) = guard.sources.value(&key).cloned() else {
                warn!(key, "Finished job has no source row, dropping result");
                return;
            };
            if data.parse_time > source.parsed {
                source.parsed = data.parse_time;
                let mut scope = guard.sources.write_scope();
                scope.set(key, source);
            }
        }

        info!(
            key,
            remaining = self.active_jobs.len(),
            buffered = self.index_data.len() + 1,
            errors = data.error_count(),
            warnings = data.warning_count(),
            message = %data.message,
            "Job finished"
        );
        self.index_data.insert(key, data);

        if self.index_data.len() >= self.config.project.sync_threshold {
            self.start_sync(SyncMode::Asynchronous);
        } else {
            self.on_batch_maybe_idle(job.is_dirty_job());
        }
    }

    /// Abort a single job by key without touching persistent tables.
    pub fn abort_job(&mut self, key: u64) {
        if let Some(job) = self.active_jobs.remove(&key) {
            self.scheduler.abort(&job);
            let released = self.visit.release_job(key);
            debug!(key, released = released.len(), "Aborted job");
        }
    }

    fn abort_all_jobs(&mut self) {
        for (key, job) in std::mem::take(&mut self.active_jobs) {
            self.scheduler.abort(&job);
            let released = self.visit.release_job(key);
            debug!(key, released = released.len(), "Aborted job");
        }
    }

    /// Arm the sync timer once the batch has drained. A batch ending on a
    /// dirty job syncs immediately.
    fn on_batch_maybe_idle(&mut self, last_was_dirty: bool) {
        if !self.active_jobs.is_empty() {
            return;
        }
        if let Some(started) = self.jobs_started_at.take() {
            self.last_jobs_elapsed = started.elapsed();
        }
        if self.index_data.is_empty() && self.dirty_files.is_empty() {
            return;
        }
        let timeout = if last_was_dirty {
            Duration::ZERO
        } else {
            self.config.sync_timeout()
        };
        self.sync_deadline = Some(Instant::now() + timeout);
    }

    // ------------------------------------------------------------------
    // Dirty handling
    // ------------------------------------------------------------------

    /// Run `dirty` over the active sources, submit jobs for the stale ones
    /// and record the purge set. With no jobs to run but a non-empty purge
    /// set, the purge is committed through an immediate sync.
    pub(crate) fn start_dirty_jobs(&mut self, dirty: &mut Dirty) -> usize {
        let started = Instant::now();
        let Some(tables) = self.tables.clone() else {
            return 0;
        };

        let to_index: Vec<Source> = {
            let guard = lock_tables(&tables);
            let ctx = DirtyContext {
                dependencies: &guard.dependencies,
                registry: self.registry.as_ref(),
            };
            guard
                .sources
                .iter()
                .filter(|(_, source)| source.is_active())
                .filter(|(_, source)| !self.suspended_files.contains(&source.file_id))
                .filter(|(_, source)| dirty.is_dirty(source, &ctx))
                .map(|(_, source)| source.clone())
                .collect()
        };

        let dirtied = dirty.dirtied();
        self.visit.release_file_ids(dirtied);
        self.dirty_files.extend(dirtied.iter().copied());

        let count = to_index.len();
        for source in to_index {
            self.index(IndexerJob::dirty(source));
        }
        self.last_dirty_elapsed = started.elapsed();
        debug!(jobs = count, dirtied = dirtied.len(), "Dirty sweep finished");

        if count == 0 && !self.dirty_files.is_empty() && self.state == State::Loaded {
            self.start_sync(SyncMode::Synchronous);
        }
        count
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Commit any buffered results and pending purges right now, inline.
    pub fn flush(&mut self) {
        if self.state == State::Loaded
            && (!self.index_data.is_empty() || !self.dirty_files.is_empty())
        {
            self.start_sync(SyncMode::Synchronous);
        }
    }

    pub(crate) fn start_sync(&mut self, mode: SyncMode) {
        if self.state != State::Loaded {
            return;
        }
        let Some(tables) = self.tables.clone() else {
            return;
        };

        self.state = State::Syncing;
        self.sync_deadline = None;

        let task = SyncTask {
            tables,
            data: std::mem::take(&mut self.index_data),
            dirty_files: std::mem::take(&mut self.dirty_files),
            visited: self.visit.snapshot(),
            registry: Arc::clone(&self.registry),
            watch_system_paths: self.config.watcher.watch_system_paths,
            system_paths: self.config.watcher.system_paths.clone(),
            jobs_elapsed: self.last_jobs_elapsed,
            dirty_elapsed: self.last_dirty_elapsed,
        };

        match (mode, self.events.clone()) {
            (SyncMode::Asynchronous, Some(sender)) => {
                debug!(units = task.data.len(), "Starting asynchronous sync");
                std::thread::spawn(move || {
                    let outcome = task.run();
                    // A dropped receiver means the event loop is gone; the
                    // merge itself already hit the tables.
                    let _ = sender.send(ProjectEvent::SyncFinished(outcome));
                });
            }
            _ => {
                let outcome = task.run();
                self.on_sync_finished(outcome);
            }
        }
    }

    /// Completion of a sync: transition back to `Loaded` and replay
    /// everything that arrived while the worker ran.
    pub fn on_sync_finished(&mut self, outcome: SyncOutcome) {
        if self.state == State::Syncing {
            self.state = State::Loaded;
        } else {
            warn!(state = ?self.state, "Sync completion outside Syncing");
        }
        self.sync_count += 1;

        for (file_id, fix_its) in outcome.fix_its {
            if fix_its.is_empty() {
                self.fix_its.remove(&file_id);
            } else {
                self.fix_its.insert(file_id, fix_its);
            }
        }

        for root in outcome.new_watch_roots {
            if self.watched_paths.insert(root.clone()) {
                self.pending_watch_roots.push(root);
            }
        }

        info!(units = outcome.data_count, "{}", outcome.message);
        self.last_sync_message = Some(outcome.message);

        if let Err(e) = self.registry.save() {
            warn!(error = %e, "Failed to save file registry after sync");
        }

        for (_, (job, data)) in std::mem::take(&mut self.pending_index_data) {
            self.on_job_finished(job, data);
        }
        for job in std::mem::take(&mut self.pending_jobs) {
            self.index(job);
        }
    }

    // ------------------------------------------------------------------
    // Watcher events and timers
    // ------------------------------------------------------------------

    pub fn on_file_modified(&mut self, path: &Path) {
        self.note_file_event(path);
    }

    pub fn on_file_removed(&mut self, path: &Path) {
        self.note_file_event(path);
    }

    fn note_file_event(&mut self, path: &Path) {
        if !self.config.watcher.enabled || self.suspended {
            return;
        }
        let file_id = self.registry.file_id(path);
        if file_id == NULL_FILE_ID {
            return;
        }
        if self.suspended_files.contains(&file_id) {
            debug!(path = %path.display(), "Ignoring event for suspended file");
            return;
        }
        debug!(path = %path.display(), file_id, "File event");
        self.pending_dirty_files.insert(file_id);
        self.dirty_deadline = Some(Instant::now() + self.config.dirty_timeout());
    }

    /// Earliest pending timer deadline, for the event loop's poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.sync_deadline, self.dirty_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    /// Fire any timer whose deadline passed.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.dirty_deadline.is_some_and(|deadline| deadline <= now) {
            self.dirty_deadline = None;
            self.fire_dirty_timer();
        }
        if self.sync_deadline.is_some_and(|deadline| deadline <= now) {
            self.sync_deadline = None;
            if self.state == State::Loaded {
                self.start_sync(SyncMode::Asynchronous);
            }
        }
    }

    /// Drain watcher-coalesced modifications into a dirty sweep.
    pub fn fire_dirty_timer(&mut self) {
        if self.state == State::Unloaded || self.pending_dirty_files.is_empty() {
            return;
        }
        let seeds = std::mem::take(&mut self.pending_dirty_files);
        debug!(files = seeds.len(), "Dirty timer fired");
        let mut dirty = if self.suspended {
            Dirty::suspended()
        } else {
            Dirty::watcher(seeds)
        };
        self.start_dirty_jobs(&mut dirty);
    }

    // ------------------------------------------------------------------
    // Suspension
    // ------------------------------------------------------------------

    /// Toggle per-file suspension; returns `true` when the file is now
    /// suspended.
    pub fn toggle_suspend_file(&mut self, file_id: FileId) -> bool {
        if self.suspended_files.insert(file_id) {
            true
        } else {
            self.suspended_files.remove(&file_id);
            false
        }
    }

    pub fn is_suspended(&self, file_id: FileId) -> bool {
        self.suspended || self.suspended_files.contains(&file_id)
    }

    pub fn suspended_files(&self) -> &FxHashSet<FileId> {
        &self.suspended_files
    }

    pub fn clear_suspended_files(&mut self) {
        self.suspended_files.clear();
    }

    /// Project-wide suspension; dirty sweeps use the `Suspended` strategy
    /// while set.
    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexFlags;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingScheduler {
        added: StdMutex<Vec<Arc<IndexerJob>>>,
        aborted: StdMutex<Vec<Arc<IndexerJob>>>,
    }

    impl JobScheduler for RecordingScheduler {
        fn add(&self, job: &Arc<IndexerJob>) {
            self.added.lock().unwrap().push(Arc::clone(job));
        }
        fn abort(&self, job: &Arc<IndexerJob>) {
            self.aborted.lock().unwrap().push(Arc::clone(job));
        }
    }

    fn project(temp: &TempDir) -> (Project, Arc<RecordingScheduler>) {
        let scheduler = Arc::new(RecordingScheduler::default());
        let config = Config::default()
            .with_overrides(Some(temp.path().join("data")), Some(false));
        let registry = Arc::new(FileRegistry::init(None).unwrap());
        let project = Project::new(
            temp.path().join("src"),
            config,
            registry,
            scheduler.clone(),
        );
        (project, scheduler)
    }

    #[test]
    fn test_submission_before_load_is_buffered() {
        let temp = TempDir::new().unwrap();
        let (mut project, scheduler) = project(&temp);

        let source = Source::new(1, 0, vec!["-c".into()]);
        project.index(IndexerJob::compile(source));
        assert_eq!(project.active_job_count(), 0);
        assert!(scheduler.added.lock().unwrap().is_empty());

        project.load().unwrap();
        // Buffered submissions only replay after a sync; drive one manually.
        assert_eq!(project.state(), State::Loaded);
    }

    #[test]
    fn test_load_twice_is_noop() {
        let temp = TempDir::new().unwrap();
        let (mut project, _) = project(&temp);
        project.load().unwrap();
        project.load().unwrap();
        assert_eq!(project.state(), State::Loaded);
    }

    #[test]
    fn test_unload_when_unloaded_is_done() {
        let temp = TempDir::new().unwrap();
        let (mut project, _) = project(&temp);
        assert!(project.unload());
    }

    #[test]
    fn test_toggle_suspend_file() {
        let temp = TempDir::new().unwrap();
        let (mut project, _) = project(&temp);
        assert!(project.toggle_suspend_file(4));
        assert!(project.is_suspended(4));
        assert!(!project.toggle_suspend_file(4));
        assert!(!project.is_suspended(4));

        project.toggle_suspend_file(5);
        project.clear_suspended_files();
        assert!(project.suspended_files().is_empty());
    }

    #[test]
    fn test_next_deadline_picks_earliest() {
        let temp = TempDir::new().unwrap();
        let (mut project, _) = project(&temp);
        assert!(project.next_deadline().is_none());

        let now = Instant::now();
        project.sync_deadline = Some(now + Duration::from_millis(500));
        project.dirty_deadline = Some(now + Duration::from_millis(100));
        assert_eq!(project.next_deadline(), project.dirty_deadline);
    }

    #[test]
    fn test_events_buffered_during_sync_are_replayed() {
        let temp = TempDir::new().unwrap();
        let (mut project, scheduler) = project(&temp);
        project.load().unwrap();

        // Complete one job so the sync has work to do.
        let job = IndexerJob::compile(Source::new(1, 1, vec!["-c".into()]));
        project.index(Arc::clone(&job));
        let mut data = IndexData::new(1, job.key(), IndexFlags::COMPLETE);
        data.parse_time = 10;
        project.on_job_finished(Arc::clone(&job), data);

        // Run the sync on the worker thread, holding its completion event.
        let (tx, rx) = std::sync::mpsc::channel();
        project.set_event_sender(tx);
        project.start_sync(SyncMode::Asynchronous);
        assert_eq!(project.state(), State::Syncing);

        // A submission and a completion arriving mid-sync are buffered.
        let late = IndexerJob::compile(Source::new(2, 1, vec!["-c".into()]));
        project.index(Arc::clone(&late));
        assert_eq!(project.active_job_count(), 0);

        let outcome = match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(ProjectEvent::SyncFinished(outcome)) => outcome,
            other => panic!("Expected sync completion, got {other:?}"),
        };
        project.on_sync_finished(outcome);
        assert_eq!(project.state(), State::Loaded);

        // The buffered submission replayed and reached the scheduler.
        assert_eq!(project.active_job_count(), 1);
        assert!(scheduler
            .added
            .lock()
            .unwrap()
            .iter()
            .any(|j| Arc::ptr_eq(j, &late)));
    }

    #[test]
    fn test_sync_threshold_forces_immediate_sync() {
        let temp = TempDir::new().unwrap();
        let scheduler = Arc::new(RecordingScheduler::default());
        let mut config =
            Config::default().with_overrides(Some(temp.path().join("data")), Some(false));
        config.project.sync_threshold = 2;
        let registry = Arc::new(FileRegistry::init(None).unwrap());
        let mut project = Project::new(temp.path().join("src"), config, registry, scheduler);
        project.load().unwrap();

        for file_id in 1..=2u32 {
            let job = IndexerJob::compile(Source::new(file_id, 1, vec!["-c".into()]));
            project.index(Arc::clone(&job));
            let mut data = IndexData::new(file_id, job.key(), IndexFlags::COMPLETE);
            data.parse_time = 5;
            project.on_job_finished(job, data);
        }

        // The second completion hit the threshold; with no event sender the
        // sync ran inline.
        assert_eq!(project.sync_count(), 1);
        assert_eq!(project.stats().buffered_data, 0);
    }

    #[test]
    fn test_dirty_batch_syncs_without_delay() {
        let temp = TempDir::new().unwrap();
        let (mut project, _scheduler) = project(&temp);
        project.load().unwrap();

        let job = IndexerJob::compile(Source::new(1, 1, vec!["-c".into()]));
        project.index(Arc::clone(&job));
        let mut data = IndexData::new(1, job.key(), IndexFlags::COMPLETE);
        data.parse_time = 5;
        project.on_job_finished(job, data);
        project.poll_timers(Instant::now() + Duration::from_secs(2));
        assert_eq!(project.sync_count(), 1);

        // A batch that ends on a dirty job arms a zero-delay sync.
        let source = project.sources(1).remove(0);
        let dirty_job = IndexerJob::dirty(source);
        project.index(Arc::clone(&dirty_job));
        let mut data = IndexData::new(1, dirty_job.key(), IndexFlags::COMPLETE);
        data.parse_time = 6;
        project.on_job_finished(dirty_job, data);

        let deadline = project.next_deadline().expect("sync timer must be armed");
        assert!(deadline <= Instant::now());
        project.poll_timers(Instant::now());
        assert_eq!(project.sync_count(), 2);
    }
}
