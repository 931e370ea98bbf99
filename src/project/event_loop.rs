//! Single-threaded event loop driving a [`Project`].
//!
//! All orchestrator state is mutated from this loop. External parties (the
//! scheduler's completion callbacks, the watcher, an embedding daemon) talk
//! to it through a cloneable [`ProjectHandle`]; the loop multiplexes those
//! events with the project's single-shot timers.

use crate::model::IndexData;
use crate::project::jobs::IndexerJob;
use crate::project::sync::SyncOutcome;
use crate::project::watcher::ProjectWatcher;
use crate::project::Project;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Delay before retrying an unload that raced a running sync.
const UNLOAD_RETRY: Duration = Duration::from_secs(1);

/// Poll interval when no timer is armed, so external state changes are
/// noticed promptly even without events.
const IDLE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum ProjectEvent {
    /// Submit a job.
    Index(Arc<IndexerJob>),
    /// A job completed with a result.
    JobFinished(Arc<IndexerJob>, IndexData),
    /// The sync worker finished.
    SyncFinished(SyncOutcome),
    FileModified(PathBuf),
    FileRemoved(PathBuf),
    /// Directory-level churn under a watch root.
    DirectoryChanged(PathBuf),
    /// Unload the project but keep the loop alive.
    Unload,
    /// Unload and stop the loop.
    Shutdown,
}

/// Cloneable sender half used by everything outside the loop.
#[derive(Clone)]
pub struct ProjectHandle {
    tx: Sender<ProjectEvent>,
}

impl ProjectHandle {
    pub fn send(&self, event: ProjectEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn index(&self, job: Arc<IndexerJob>) -> bool {
        self.send(ProjectEvent::Index(job))
    }

    pub fn job_finished(&self, job: Arc<IndexerJob>, data: IndexData) -> bool {
        self.send(ProjectEvent::JobFinished(job, data))
    }

    /// Report a modification noticed outside the attached watcher.
    pub fn file_modified(&self, path: PathBuf) -> bool {
        self.send(ProjectEvent::FileModified(path))
    }

    pub fn file_removed(&self, path: PathBuf) -> bool {
        self.send(ProjectEvent::FileRemoved(path))
    }

    pub fn shutdown(&self) -> bool {
        self.send(ProjectEvent::Shutdown)
    }
}

pub struct EventLoop {
    project: Project,
    rx: Receiver<ProjectEvent>,
    tx: Sender<ProjectEvent>,
    watcher: Option<ProjectWatcher>,
}

impl EventLoop {
    /// Wire a project to a fresh channel. The project's asynchronous syncs
    /// will post their completions to this loop.
    pub fn new(mut project: Project) -> (Self, ProjectHandle) {
        let (tx, rx) = mpsc::channel();
        project.set_event_sender(tx.clone());
        let handle = ProjectHandle { tx: tx.clone() };
        (
            Self {
                project,
                rx,
                tx,
                watcher: None,
            },
            handle,
        )
    }

    /// Attach a filesystem watcher with the given debounce window.
    pub fn with_watcher(mut self, debounce: Duration) -> Result<Self> {
        self.watcher = Some(ProjectWatcher::new(debounce, self.tx.clone())?);
        Ok(self)
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Load the project and process events until shutdown.
    pub fn run(mut self) {
        if let Err(e) = self.project.load() {
            error!(error = %e, "Project failed to load, event loop exiting");
            return;
        }
        self.sync_watch_roots();

        let mut unload_retry: Option<Instant> = None;
        let mut shutting_down = false;

        loop {
            let now = Instant::now();
            if unload_retry.is_some_and(|at| at <= now) {
                unload_retry = None;
                if self.project.unload() {
                    if shutting_down {
                        break;
                    }
                } else {
                    unload_retry = Some(now + UNLOAD_RETRY);
                }
            }

            let deadline = [self.project.next_deadline(), unload_retry]
                .into_iter()
                .flatten()
                .min();
            let timeout = deadline
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_POLL);

            match self.rx.recv_timeout(timeout) {
                Ok(event) => match event {
                    ProjectEvent::Index(job) => self.project.index(job),
                    ProjectEvent::JobFinished(job, data) => {
                        self.project.on_job_finished(job, data)
                    }
                    ProjectEvent::SyncFinished(outcome) => self.project.on_sync_finished(outcome),
                    ProjectEvent::FileModified(path) => self.project.on_file_modified(&path),
                    ProjectEvent::FileRemoved(path) => self.project.on_file_removed(&path),
                    ProjectEvent::DirectoryChanged(path) => {
                        debug!(path = %path.display(), "Directory changed under watch root");
                    }
                    ProjectEvent::Unload => {
                        if !self.project.unload() {
                            unload_retry = Some(Instant::now() + UNLOAD_RETRY);
                        }
                    }
                    ProjectEvent::Shutdown => {
                        shutting_down = true;
                        if self.project.unload() {
                            break;
                        }
                        unload_retry = Some(Instant::now() + UNLOAD_RETRY);
                    }
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("All project handles dropped, stopping event loop");
                    self.project.unload();
                    break;
                }
            }

            self.project.poll_timers(Instant::now());
            self.sync_watch_roots();
        }
    }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || self.run())
    }

    fn sync_watch_roots(&mut self) {
        let roots = self.project.take_pending_watch_roots();
        if roots.is_empty() {
            return;
        }
        match self.watcher.as_mut() {
            Some(watcher) => {
                for root in roots {
                    watcher.watch_root(&root);
                }
            }
            None => debug!(roots = roots.len(), "No watcher attached, dropping watch roots"),
        }
    }
}
