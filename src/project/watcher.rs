//! File watcher integration.
//!
//! Wraps the notify debouncer: the event loop asks it to watch dependency
//! root directories (non-recursively), and filesystem events come back as
//! [`ProjectEvent`]s on the loop's channel.

use crate::project::event_loop::ProjectEvent;
use anyhow::Result;
use notify_debouncer_full::{
    new_debouncer, notify::RecursiveMode, DebouncedEvent, Debouncer, RecommendedCache,
};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct ProjectWatcher {
    debouncer: Debouncer<notify_debouncer_full::notify::RecommendedWatcher, RecommendedCache>,
    watched: FxHashSet<PathBuf>,
}

impl ProjectWatcher {
    /// Create a watcher that forwards debounced events to `events`.
    pub fn new(debounce: Duration, events: Sender<ProjectEvent>) -> Result<Self> {
        let debouncer = new_debouncer(
            debounce,
            None,
            move |result: Result<
                Vec<DebouncedEvent>,
                Vec<notify_debouncer_full::notify::Error>,
            >| {
                match result {
                    Ok(batch) => {
                        for event in batch {
                            for project_event in convert_event(&event) {
                                if events.send(project_event).is_err() {
                                    debug!("Watcher channel closed");
                                    return;
                                }
                            }
                        }
                    }
                    Err(errors) => {
                        for e in errors {
                            error!("File watcher error: {:?}", e);
                        }
                    }
                }
            },
        )?;

        Ok(Self {
            debouncer,
            watched: FxHashSet::default(),
        })
    }

    /// Watch one directory (non-recursive). Failures are non-fatal so one
    /// over-limit directory does not break the remaining watches.
    pub fn watch_root(&mut self, dir: &Path) {
        if !self.watched.insert(dir.to_path_buf()) {
            return;
        }
        if !dir.exists() {
            warn!(path = %dir.display(), "Watch root does not exist, skipping");
            return;
        }
        match self.debouncer.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => debug!(path = %dir.display(), "Watching directory"),
            Err(e) => warn!(
                path = %dir.display(),
                error = %e,
                "Failed to watch directory (skipping)"
            ),
        }
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }
}

/// Translate a debounced notify event into project events.
fn convert_event(event: &DebouncedEvent) -> Vec<ProjectEvent> {
    use notify_debouncer_full::notify::EventKind;

    let mut out = Vec::new();
    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in &event.paths {
                if path.is_dir() {
                    // Directory-level churn; the embedding layer may want to
                    // rescan it.
                    out.push(ProjectEvent::DirectoryChanged(path.clone()));
                } else {
                    out.push(ProjectEvent::FileModified(path.clone()));
                }
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                out.push(ProjectEvent::FileRemoved(path.clone()));
            }
        }
        EventKind::Any | EventKind::Access(_) | EventKind::Other => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_watch_root_tolerates_missing_directory() {
        let (tx, _rx) = mpsc::channel();
        let mut watcher = ProjectWatcher::new(Duration::from_millis(50), tx).unwrap();
        watcher.watch_root(Path::new("/definitely/not/a/real/dir"));
        assert_eq!(watcher.watched_count(), 1);
        // Re-watching the same root is a no-op.
        watcher.watch_root(Path::new("/definitely/not/a/real/dir"));
        assert_eq!(watcher.watched_count(), 1);
    }

    #[test]
    fn test_modification_events_reach_the_channel() {
        let temp = tempfile::TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut watcher = ProjectWatcher::new(Duration::from_millis(50), tx).unwrap();
        watcher.watch_root(temp.path());

        std::fs::write(temp.path().join("a.h"), "int foo();\n").unwrap();

        // The debouncer delivers within its window; poll generously.
        let event = rx.recv_timeout(Duration::from_secs(5));
        match event {
            Ok(ProjectEvent::FileModified(path)) => {
                assert!(path.ends_with("a.h"));
            }
            Ok(other) => panic!("Unexpected event: {other:?}"),
            Err(e) => panic!("No watcher event: {e}"),
        }
    }
}
