//! Query primitives served from the persisted tables.

use crate::dirty::{Dirty, DirtyContext};
use crate::matcher::PathMatch;
use crate::model::source::file_key_range;
use crate::model::{FileId, Location, Source, SymbolKind, NULL_FILE_ID};
use crate::project::{lock_tables, Project};
use crate::tables::ProjectTables;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;

/// How a stored symbol name may match a query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFlavor {
    /// The stored name may carry a signature: a query matching up to a `(`
    /// is accepted, and names nested inside a signature (`")::"`) only
    /// match on the part after it.
    MaybeFunction,
    /// Plain names match exactly.
    NonFunction,
}

/// Sort flags for [`Project::sort`].
#[derive(Debug, Clone, Copy)]
pub struct SortFlag;

impl SortFlag {
    pub const NONE: u32 = 0x0;
    /// Drop definitions represented by a declaration target.
    pub const DECLARATION_ONLY: u32 = 0x1;
    pub const REVERSE: u32 = 0x2;
}

/// One entry of a sorted query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortedCursor {
    pub location: Location,
    pub kind: SymbolKind,
    pub is_definition: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyMode {
    /// Files that depend on the argument (the stored value set).
    DependsOnArg,
    /// Files the argument depends on (keys whose value contains it).
    ArgDependsOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexMode {
    /// Unconditionally re-index everything matching.
    Reindex,
    /// Re-index only what timestamp comparison finds stale.
    CheckReindex,
}

/// Table and lifecycle counters, mostly for status output.
#[derive(Debug, Clone, Default)]
pub struct ProjectStats {
    pub symbols: usize,
    pub symbol_names: usize,
    pub usrs: usize,
    pub sources: usize,
    pub dependencies: usize,
    pub targets: usize,
    pub references: usize,
    pub active_jobs: usize,
    pub buffered_data: usize,
    pub jobs: u64,
    pub syncs: u64,
}

/// Match `query` against a stored symbol name.
pub fn match_symbol_name(query: &str, stored: &str, flavor: NameFlavor) -> bool {
    match flavor {
        NameFlavor::NonFunction => stored == query,
        NameFlavor::MaybeFunction => {
            // A name nested inside a function signature (a local) only
            // matches on what follows the signature.
            let candidate = match stored.find(")::") {
                Some(idx) => &stored[idx + 3..],
                None => stored,
            };
            match candidate.strip_prefix(query) {
                Some(rest) => rest.is_empty() || rest.starts_with('('),
                None => false,
            }
        }
    }
}

fn flavor_for(stored: &str) -> NameFlavor {
    if stored.contains('(') {
        NameFlavor::MaybeFunction
    } else {
        NameFlavor::NonFunction
    }
}

fn best_target(tables: &ProjectTables, location: Location) -> Option<Location> {
    let targets = tables.targets.value(&location)?;
    targets
        .iter()
        .max_by(|(loc_a, kind_a), (loc_b, kind_b)| {
            kind_a
                .rank()
                .cmp(&kind_b.rank())
                .then(loc_b.cmp(loc_a))
        })
        .map(|(location, _)| *location)
}

impl Project {
    /// Locations carrying `name`. With a file id the scan is confined to
    /// that file's symbols; an empty name returns every non-reference
    /// symbol location.
    pub fn locations(&self, name: &str, file_id: FileId) -> BTreeSet<Location> {
        let Some(tables) = self.tables() else {
            return BTreeSet::new();
        };
        let guard = lock_tables(tables);
        let mut out = BTreeSet::new();

        if file_id != NULL_FILE_ID {
            let lo = Location::file_start(file_id);
            let hi = Location::file_end(file_id);
            for (location, info) in guard.symbols.range_inclusive(&lo, &hi) {
                if info.is_reference() {
                    continue;
                }
                if !name.is_empty()
                    && !match_symbol_name(name, &info.symbol_name, flavor_for(&info.symbol_name))
                {
                    continue;
                }
                out.insert(*location);
            }
        } else if name.is_empty() {
            for (location, info) in guard.symbols.iter() {
                if !info.is_reference() {
                    out.insert(*location);
                }
            }
        } else {
            let mut cursor = guard.symbol_names.lower_bound(&name.to_string());
            while let Some(stored) = cursor.key() {
                if !stored.starts_with(name) {
                    break;
                }
                if match_symbol_name(name, stored, flavor_for(stored)) {
                    if let Some(locations) = cursor.value() {
                        out.extend(locations.iter().copied());
                    }
                }
                cursor.next();
            }
        }
        out
    }

    /// Order query results by kind rank then location.
    pub fn sort(
        &self,
        locations: impl IntoIterator<Item = Location>,
        flags: u32,
    ) -> Vec<SortedCursor> {
        let Some(tables) = self.tables() else {
            return Vec::new();
        };
        let guard = lock_tables(tables);

        let mut cursors = Vec::new();
        for location in locations {
            let Some(info) = guard.symbols.value(&location) else {
                continue;
            };
            if flags & SortFlag::DECLARATION_ONLY != 0 && info.definition {
                let declaration_target = best_target(&guard, location)
                    .and_then(|target| guard.symbols.value(&target))
                    .map(|target| !target.definition)
                    .unwrap_or(false);
                if declaration_target {
                    continue;
                }
            }
            cursors.push(SortedCursor {
                location,
                kind: info.kind,
                is_definition: info.definition,
            });
        }

        cursors.sort_by(|a, b| {
            b.kind
                .rank()
                .cmp(&a.kind.rank())
                .then(a.location.cmp(&b.location))
        });
        if flags & SortFlag::REVERSE != 0 {
            cursors.reverse();
        }
        cursors
    }

    /// The stored symbol record at `location`, if any.
    pub fn symbol(&self, location: Location) -> Option<crate::model::SymbolInfo> {
        let tables = self.tables()?;
        let guard = lock_tables(tables);
        guard.symbols.value(&location).cloned()
    }

    /// Definition/declaration sites `location` may resolve to.
    pub fn targets(&self, location: Location) -> std::collections::BTreeMap<Location, SymbolKind> {
        let Some(tables) = self.tables() else {
            return Default::default();
        };
        let guard = lock_tables(tables);
        guard.targets.value(&location).cloned().unwrap_or_default()
    }

    /// Use sites recorded against `location`.
    pub fn references(&self, location: Location) -> BTreeSet<Location> {
        let Some(tables) = self.tables() else {
            return BTreeSet::new();
        };
        let guard = lock_tables(tables);
        guard
            .references
            .value(&location)
            .cloned()
            .unwrap_or_default()
    }

    /// Every source for `file_id`, or all sources when it is 0.
    pub fn sources(&self, file_id: FileId) -> Vec<Source> {
        let Some(tables) = self.tables() else {
            return Vec::new();
        };
        let guard = lock_tables(tables);
        if file_id == NULL_FILE_ID {
            guard.sources.iter().map(|(_, s)| s.clone()).collect()
        } else {
            let (lo, hi) = file_key_range(file_id);
            guard
                .sources
                .range_inclusive(&lo, &hi)
                .map(|(_, s)| s.clone())
                .collect()
        }
    }

    /// Include-graph neighborhood of `file_id`.
    pub fn dependencies(&self, file_id: FileId, mode: DependencyMode) -> BTreeSet<FileId> {
        let Some(tables) = self.tables() else {
            return BTreeSet::new();
        };
        let guard = lock_tables(tables);
        match mode {
            DependencyMode::DependsOnArg => guard
                .dependencies
                .value(&file_id)
                .cloned()
                .unwrap_or_default(),
            DependencyMode::ArgDependsOn => guard
                .dependencies
                .iter()
                .filter(|(_, tus)| tus.contains(&file_id))
                .map(|(header, _)| *header)
                .collect(),
        }
    }

    /// Human-readable fix-it list for `file_id`, one `line:column length
    /// text` entry per line.
    pub fn fix_its(&self, file_id: FileId) -> String {
        self.fix_its
            .get(&file_id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|f| format!("{}:{} {} {}", f.line, f.column, f.length, f.text))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    /// Schedule re-indexing for sources matching `matcher`. Returns the
    /// number of jobs started.
    pub fn reindex(&mut self, matcher: &PathMatch, mode: ReindexMode) -> usize {
        let Some(tables) = self.tables().cloned() else {
            return 0;
        };
        let mut dirty = match mode {
            ReindexMode::Reindex => {
                let guard = lock_tables(&tables);
                let seeds: FxHashSet<FileId> = guard
                    .sources
                    .iter()
                    .filter(|(_, source)| {
                        self.registry()
                            .path(source.file_id)
                            .map(|p| matcher.is_match(&p))
                            .unwrap_or(false)
                    })
                    .map(|(_, source)| source.file_id)
                    .collect();
                let ctx = DirtyContext {
                    dependencies: &guard.dependencies,
                    registry: self.registry().as_ref(),
                };
                Dirty::simple(seeds, &ctx)
            }
            ReindexMode::CheckReindex => Dirty::if_modified(Some(matcher.clone())),
        };
        self.start_dirty_jobs(&mut dirty)
    }

    /// Erase matching sources, abort their jobs and purge their rows from
    /// the symbol-family tables. Returns the number of sources removed.
    pub fn remove(&mut self, matcher: &PathMatch) -> usize {
        let Some(tables) = self.tables().cloned() else {
            return 0;
        };

        let (doomed_keys, file_ids) = {
            let guard = lock_tables(&tables);
            let mut keys = Vec::new();
            let mut ids: FxHashSet<FileId> = FxHashSet::default();
            for (key, source) in guard.sources.iter() {
                let matches = self
                    .registry()
                    .path(source.file_id)
                    .map(|p| matcher.is_match(&p))
                    .unwrap_or(false);
                if matches {
                    keys.push(*key);
                    ids.insert(source.file_id);
                }
            }
            (keys, ids)
        };

        for key in &doomed_keys {
            self.abort_job(*key);
        }

        {
            let mut guard = lock_tables(&tables);
            {
                let mut scope = guard.sources.write_scope();
                for key in &doomed_keys {
                    scope.erase(key);
                }
            }
            guard.purge_file_ids(&file_ids);
        }
        doomed_keys.len()
    }

    pub fn stats(&self) -> ProjectStats {
        let mut stats = ProjectStats {
            active_jobs: self.active_job_count(),
            buffered_data: self.index_data.len(),
            jobs: self.job_counter(),
            syncs: self.sync_count(),
            ..Default::default()
        };
        if let Some(tables) = self.tables() {
            let guard = lock_tables(tables);
            stats.symbols = guard.symbols.len();
            stats.symbol_names = guard.symbol_names.len();
            stats.usrs = guard.usr.len();
            stats.sources = guard.sources.len();
            stats.dependencies = guard.dependencies.len();
            stats.targets = guard.targets.len();
            stats.references = guard.references.len();
        }
        stats
    }
}
