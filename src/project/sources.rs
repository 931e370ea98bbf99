//! Source table admission.
//!
//! Compile submissions pass through here before a job is scheduled. The
//! table keeps at most one `Active` source per file id; which entry that is
//! depends on argument equality with what is already stored.

use crate::model::source::file_key_range;
use crate::model::Source;
use crate::project::{lock_tables, IndexerJob, Project};
use std::sync::Arc;
use tracing::debug;

impl Project {
    /// Admit a compile job into the `sources` table. Returns `false` when
    /// nothing needs re-indexing (the invocation is already known), `true`
    /// when the job should be scheduled.
    pub(crate) fn admit_compile(&mut self, job: &Arc<IndexerJob>) -> bool {
        let Some(tables) = self.tables().cloned() else {
            return false;
        };
        let mut guard = lock_tables(&tables);
        let key = job.key();
        let file_id = job.source.file_id;

        // Exact key present with identical arguments: nothing to do beyond
        // making sure the entry is the active one.
        if let Some(existing) = guard.sources.value(&key).cloned() {
            if existing.arguments_equal(&job.source) {
                if !existing.is_active() {
                    mark_active(&mut guard.sources, file_id, job.source.build_root_id);
                }
                debug!(key, "Compile arguments unchanged, not re-indexing");
                return false;
            }
        }

        // Another build root may already carry these arguments; if so, that
        // entry becomes the active one instead of storing a duplicate.
        let (lo, hi) = file_key_range(file_id);
        let siblings: Vec<Source> = guard
            .sources
            .range_inclusive(&lo, &hi)
            .map(|(_, source)| source.clone())
            .collect();

        if let Some(same) = siblings
            .iter()
            .find(|sibling| sibling.key() != key && sibling.arguments_equal(&job.source))
        {
            debug!(
                key,
                chosen = same.key(),
                "Equal arguments under another build root, activating that entry"
            );
            let chosen = same.build_root_id;
            mark_active(&mut guard.sources, file_id, chosen);
            return false;
        }

        let mut scope = guard.sources.write_scope();
        if !self.config.project.allow_multiple_sources {
            for sibling in &siblings {
                if sibling.key() != key {
                    debug!(erased = sibling.key(), "Erasing sibling with differing arguments");
                    scope.erase(&sibling.key());
                }
            }
        } else {
            for sibling in &siblings {
                if sibling.key() != key && sibling.is_active() {
                    let mut cleared = sibling.clone();
                    cleared.set_active(false);
                    scope.set(cleared.key(), cleared);
                }
            }
        }

        let mut source = job.source.clone();
        source.set_active(true);
        // A fresh invocation starts unparsed; completion stamps it.
        source.parsed = scope
            .value(&key)
            .map(|existing| existing.parsed)
            .unwrap_or(0);
        scope.set(key, source);
        true
    }
}

/// Rewrite the contiguous key range for `file_id` so that exactly the entry
/// with `chosen_build_id` carries `Active` (none when `chosen_build_id` is
/// zero and no such entry exists).
pub(crate) fn mark_active(
    sources: &mut crate::tables::Table<u64, Source>,
    file_id: u32,
    chosen_build_id: u32,
) {
    let (lo, hi) = file_key_range(file_id);
    let updates: Vec<(u64, Source)> = sources
        .range_inclusive(&lo, &hi)
        .filter_map(|(key, source)| {
            let should_be_active =
                chosen_build_id != 0 && source.build_root_id == chosen_build_id;
            if source.is_active() != should_be_active {
                let mut updated = source.clone();
                updated.set_active(should_be_active);
                Some((*key, updated))
            } else {
                None
            }
        })
        .collect();
    if updates.is_empty() {
        return;
    }
    let mut scope = sources.write_scope();
    for (key, source) in updates {
        scope.set(key, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::source::encode_key;
    use crate::project::jobs::NullScheduler;
    use crate::project::Project;
    use crate::registry::FileRegistry;
    use crate::tables::Table;
    use tempfile::TempDir;

    fn loaded_project(temp: &TempDir, allow_multiple: bool) -> Project {
        let mut config =
            Config::default().with_overrides(Some(temp.path().join("data")), Some(false));
        config.project.allow_multiple_sources = allow_multiple;
        let registry = std::sync::Arc::new(FileRegistry::init(None).unwrap());
        let mut project = Project::new(
            temp.path().join("src"),
            config,
            registry,
            std::sync::Arc::new(NullScheduler),
        );
        project.load().unwrap();
        project
    }

    #[test]
    fn test_resubmitting_identical_arguments_is_a_noop() {
        let temp = TempDir::new().unwrap();
        let mut project = loaded_project(&temp, true);

        project.index(IndexerJob::compile(Source::new(5, 1, vec!["-DA".into()])));
        assert_eq!(project.job_counter(), 1);

        // Same key, same arguments: nothing new to index.
        project.index(IndexerJob::compile(Source::new(5, 1, vec!["-DA".into()])));
        assert_eq!(project.job_counter(), 1);
        assert_eq!(project.sources(5).len(), 1);
    }

    #[test]
    fn test_equal_arguments_under_other_build_root_activate_that_entry() {
        let temp = TempDir::new().unwrap();
        let mut project = loaded_project(&temp, true);

        project.index(IndexerJob::compile(Source::new(5, 1, vec!["-DA".into()])));
        // Same arguments submitted under a different build root: no second
        // row, the existing entry stays the active one.
        project.index(IndexerJob::compile(Source::new(5, 2, vec!["-DA".into()])));

        let sources = project.sources(5);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].build_root_id, 1);
        assert!(sources[0].is_active());
        assert_eq!(project.job_counter(), 1);
    }

    #[test]
    fn test_multiple_build_roots_keep_one_active() {
        let temp = TempDir::new().unwrap();
        let mut project = loaded_project(&temp, true);

        project.index(IndexerJob::compile(Source::new(5, 1, vec!["-DA".into()])));
        project.index(IndexerJob::compile(Source::new(5, 2, vec!["-DB".into()])));

        let sources = project.sources(5);
        assert_eq!(sources.len(), 2);
        let active: Vec<u32> = sources
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.build_root_id)
            .collect();
        assert_eq!(active, vec![2]);
    }

    #[test]
    fn test_single_source_policy_erases_siblings() {
        let temp = TempDir::new().unwrap();
        let mut project = loaded_project(&temp, false);

        project.index(IndexerJob::compile(Source::new(5, 1, vec!["-DA".into()])));
        project.index(IndexerJob::compile(Source::new(5, 2, vec!["-DB".into()])));

        let sources = project.sources(5);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].build_root_id, 2);
        assert!(sources[0].is_active());
    }

    fn source(file_id: u32, build_root: u32, active: bool) -> Source {
        let mut s = Source::new(file_id, build_root, vec![format!("-b{build_root}")]);
        s.set_active(active);
        s
    }

    #[test]
    fn test_mark_active_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let mut sources: Table<u64, Source> = Table::open(temp.path(), "sources").unwrap();
        {
            let mut scope = sources.write_scope();
            for build_root in 1..=3u32 {
                let s = source(7, build_root, build_root == 1);
                scope.set(s.key(), s);
            }
            // An unrelated file keeps its flag.
            let other = source(8, 1, true);
            scope.set(other.key(), other);
        }

        mark_active(&mut sources, 7, 3);

        let active: Vec<u32> = sources
            .range_inclusive(&encode_key(7, 0), &encode_key(7, u32::MAX))
            .filter(|(_, s)| s.is_active())
            .map(|(_, s)| s.build_root_id)
            .collect();
        assert_eq!(active, vec![3]);
        assert!(sources.value(&encode_key(8, 1)).unwrap().is_active());
    }

    #[test]
    fn test_mark_active_zero_clears_all() {
        let temp = TempDir::new().unwrap();
        let mut sources: Table<u64, Source> = Table::open(temp.path(), "sources").unwrap();
        {
            let mut scope = sources.write_scope();
            for build_root in 1..=2u32 {
                let s = source(7, build_root, true);
                scope.set(s.key(), s);
            }
        }

        mark_active(&mut sources, 7, 0);
        assert!(sources.iter().all(|(_, s)| !s.is_active()));
    }
}
