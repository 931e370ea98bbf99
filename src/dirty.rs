//! Dirty detection.
//!
//! A detector decides which sources must be re-indexed and accumulates the
//! set of file ids whose derived rows must be purged at the next sync. The
//! four strategies share one calling convention: `is_dirty` is asked per
//! source while scanning the `sources` table, and `dirtied` is read
//! afterwards to seed the purge set.

use crate::matcher::PathMatch;
use crate::model::{FileId, Source};
use crate::registry::{last_modified_ms, FileRegistry};
use crate::tables::Table;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

/// Borrowed view of the state a detector consults.
pub struct DirtyContext<'a> {
    pub dependencies: &'a Table<FileId, BTreeSet<FileId>>,
    pub registry: &'a FileRegistry,
}

impl<'a> DirtyContext<'a> {
    /// Translation units whose records become stale when `file_id` changes.
    fn dependents(&self, file_id: FileId) -> impl Iterator<Item = FileId> + '_ {
        self.dependencies
            .value(&file_id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Headers (including the file itself) whose modification dirties the
    /// translation unit `file_id`.
    fn depends_on(&self, file_id: FileId) -> Vec<FileId> {
        self.dependencies
            .iter()
            .filter(|(header, tus)| **header == file_id || tus.contains(&file_id))
            .map(|(header, _)| *header)
            .collect()
    }
}

/// Memoized per-detector modification times.
#[derive(Default)]
struct ModifiedCache {
    times: FxHashMap<FileId, u64>,
}

impl ModifiedCache {
    fn get(&mut self, file_id: FileId, ctx: &DirtyContext) -> u64 {
        *self.times.entry(file_id).or_insert_with(|| {
            ctx.registry
                .path(file_id)
                .map(|p| last_modified_ms(&p))
                .unwrap_or(0)
        })
    }
}

/// Strategy deciding which sources are stale.
pub enum Dirty {
    Simple(SimpleDirty),
    Suspended(SuspendedDirty),
    IfModified(IfModifiedDirty),
    Watcher(WatcherDirty),
}

impl Dirty {
    /// Explicit seed set, expanded through the include graph.
    pub fn simple(seeds: FxHashSet<FileId>, ctx: &DirtyContext) -> Self {
        let mut dirty = FxHashSet::default();
        for &seed in &seeds {
            dirty.insert(seed);
            dirty.extend(ctx.dependents(seed));
        }
        Dirty::Simple(SimpleDirty { dirty })
    }

    /// Reports nothing dirty; used while the whole project is suspended.
    pub fn suspended() -> Self {
        Dirty::Suspended(SuspendedDirty {
            empty: FxHashSet::default(),
        })
    }

    /// Timestamp comparison against every file the source depends on,
    /// optionally narrowed to sources whose path matches `matcher`.
    pub fn if_modified(matcher: Option<PathMatch>) -> Self {
        Dirty::IfModified(IfModifiedDirty {
            matcher,
            dirty: FxHashSet::default(),
            modified: ModifiedCache::default(),
        })
    }

    /// Seeded by watcher-reported modified files.
    pub fn watcher(modified: FxHashSet<FileId>) -> Self {
        Dirty::Watcher(WatcherDirty {
            modified,
            dirty: FxHashSet::default(),
            cache: ModifiedCache::default(),
        })
    }

    pub fn is_dirty(&mut self, source: &Source, ctx: &DirtyContext) -> bool {
        match self {
            Dirty::Simple(d) => d.dirty.contains(&source.file_id),
            Dirty::Suspended(_) => false,
            Dirty::IfModified(d) => d.is_dirty(source, ctx),
            Dirty::Watcher(d) => d.is_dirty(source, ctx),
        }
    }

    /// File ids whose derived rows must be purged at the next sync.
    pub fn dirtied(&self) -> &FxHashSet<FileId> {
        match self {
            Dirty::Simple(d) => &d.dirty,
            Dirty::Suspended(d) => &d.empty,
            Dirty::IfModified(d) => &d.dirty,
            Dirty::Watcher(d) => &d.dirty,
        }
    }
}

pub struct SimpleDirty {
    dirty: FxHashSet<FileId>,
}

pub struct SuspendedDirty {
    empty: FxHashSet<FileId>,
}

pub struct IfModifiedDirty {
    matcher: Option<PathMatch>,
    dirty: FxHashSet<FileId>,
    modified: ModifiedCache,
}

impl IfModifiedDirty {
    fn is_dirty(&mut self, source: &Source, ctx: &DirtyContext) -> bool {
        if let Some(ref matcher) = self.matcher {
            let matches = ctx
                .registry
                .path(source.file_id)
                .is_some_and(|p| matcher.is_match(&p));
            if !matches {
                return false;
            }
        }

        let mut stale = false;
        for header in ctx.depends_on(source.file_id) {
            let modified = self.modified.get(header, ctx);
            if modified == 0 || modified > source.parsed {
                self.dirty.insert(header);
                stale = true;
            }
        }
        if stale {
            self.dirty.insert(source.file_id);
        }
        stale
    }
}

pub struct WatcherDirty {
    modified: FxHashSet<FileId>,
    dirty: FxHashSet<FileId>,
    cache: ModifiedCache,
}

impl WatcherDirty {
    fn is_dirty(&mut self, source: &Source, ctx: &DirtyContext) -> bool {
        let mut stale = false;
        for &m in &self.modified {
            let affects = m == source.file_id
                || ctx
                    .dependencies
                    .value(&m)
                    .is_some_and(|tus| tus.contains(&source.file_id));
            if !affects {
                continue;
            }
            let modified = self.cache.get(m, ctx);
            if modified == 0 || modified > source.parsed {
                self.dirty.insert(m);
                stale = true;
            }
        }
        if stale {
            self.dirty.insert(source.file_id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::Table;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        dependencies: Table<FileId, BTreeSet<FileId>>,
        registry: FileRegistry,
        tu: FileId,
        header: FileId,
    }

    /// One translation unit including one header, both on disk.
    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.cpp"), "#include \"a.h\"\n").unwrap();
        std::fs::write(temp.path().join("a.h"), "int foo();\n").unwrap();

        let registry = FileRegistry::init(None).unwrap();
        let tu = registry.insert_file(&temp.path().join("a.cpp"));
        let header = registry.insert_file(&temp.path().join("a.h"));

        let mut dependencies = Table::open(temp.path(), "dependencies").unwrap();
        {
            let mut scope = dependencies.write_scope();
            scope.set(header, BTreeSet::from([tu]));
            scope.set(tu, BTreeSet::from([tu]));
        }

        Fixture {
            _temp: temp,
            dependencies,
            registry,
            tu,
            header,
        }
    }

    fn source_parsed(file_id: FileId, parsed: u64) -> Source {
        let mut source = Source::new(file_id, 0, vec!["-c".into()]);
        source.parsed = parsed;
        source
    }

    #[test]
    fn test_simple_dirty_expands_to_dependents() {
        let f = fixture();
        let ctx = DirtyContext {
            dependencies: &f.dependencies,
            registry: &f.registry,
        };

        let mut dirty = Dirty::simple(FxHashSet::from_iter([f.header]), &ctx);
        assert!(dirty.is_dirty(&source_parsed(f.tu, u64::MAX), &ctx));
        assert!(dirty.dirtied().contains(&f.header));
        assert!(dirty.dirtied().contains(&f.tu));
    }

    #[test]
    fn test_suspended_dirty_reports_nothing() {
        let f = fixture();
        let ctx = DirtyContext {
            dependencies: &f.dependencies,
            registry: &f.registry,
        };
        let mut dirty = Dirty::suspended();
        assert!(!dirty.is_dirty(&source_parsed(f.tu, 0), &ctx));
        assert!(dirty.dirtied().is_empty());
    }

    #[test]
    fn test_if_modified_detects_stale_sources() {
        let f = fixture();
        let ctx = DirtyContext {
            dependencies: &f.dependencies,
            registry: &f.registry,
        };

        // Parsed after both files' mtimes: clean.
        let mut dirty = Dirty::if_modified(None);
        let fresh = source_parsed(f.tu, u64::MAX);
        assert!(!dirty.is_dirty(&fresh, &ctx));

        // Parsed at time zero: the header mtime exceeds it.
        let mut dirty = Dirty::if_modified(None);
        let stale = source_parsed(f.tu, 0);
        assert!(dirty.is_dirty(&stale, &ctx));
        assert!(dirty.dirtied().contains(&f.tu));
    }

    #[test]
    fn test_if_modified_detects_vanished_dependency() {
        let mut f = fixture();
        let gone = f.registry.insert_file(Path::new("/nonexistent/gone.h"));
        {
            let mut scope = f.dependencies.write_scope();
            scope.set(gone, BTreeSet::from([f.tu]));
        }
        let ctx = DirtyContext {
            dependencies: &f.dependencies,
            registry: &f.registry,
        };

        // Even a source parsed "in the future" is dirty when a dependency
        // no longer exists on disk.
        let mut dirty = Dirty::if_modified(None);
        assert!(dirty.is_dirty(&source_parsed(f.tu, u64::MAX), &ctx));
        assert!(dirty.dirtied().contains(&gone));
        assert!(dirty.dirtied().contains(&f.tu));
    }

    #[test]
    fn test_if_modified_honors_path_filter() {
        let f = fixture();
        let ctx = DirtyContext {
            dependencies: &f.dependencies,
            registry: &f.registry,
        };
        let mut dirty = Dirty::if_modified(Some(PathMatch::pattern("no-such-dir")));
        assert!(!dirty.is_dirty(&source_parsed(f.tu, 0), &ctx));
    }

    #[test]
    fn test_if_modified_implies_dirtied_membership() {
        // P6: is_dirty(S) implies S.file_id in dirtied().
        let f = fixture();
        let ctx = DirtyContext {
            dependencies: &f.dependencies,
            registry: &f.registry,
        };
        let mut dirty = Dirty::if_modified(None);
        let source = source_parsed(f.tu, 0);
        if dirty.is_dirty(&source, &ctx) {
            assert!(dirty.dirtied().contains(&source.file_id));
        }
    }

    #[test]
    fn test_watcher_dirty_requires_newer_mtime() {
        let f = fixture();
        let ctx = DirtyContext {
            dependencies: &f.dependencies,
            registry: &f.registry,
        };

        // Modified header, source parsed before the modification.
        let mut dirty = Dirty::watcher(FxHashSet::from_iter([f.header]));
        assert!(dirty.is_dirty(&source_parsed(f.tu, 0), &ctx));
        assert!(dirty.dirtied().contains(&f.header));
        assert!(dirty.dirtied().contains(&f.tu));

        // Source parsed after the modification: nothing to do.
        let mut dirty = Dirty::watcher(FxHashSet::from_iter([f.header]));
        assert!(!dirty.is_dirty(&source_parsed(f.tu, u64::MAX), &ctx));
        assert!(dirty.dirtied().is_empty());
    }

    #[test]
    fn test_watcher_dirty_ignores_unrelated_files() {
        let f = fixture();
        let ctx = DirtyContext {
            dependencies: &f.dependencies,
            registry: &f.registry,
        };
        let unrelated = f.registry.insert_file(Path::new("/elsewhere/b.h"));
        let mut dirty = Dirty::watcher(FxHashSet::from_iter([unrelated]));
        assert!(!dirty.is_dirty(&source_parsed(f.tu, 0), &ctx));
    }
}
