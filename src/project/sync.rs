//! The sync engine.
//!
//! A sync folds every buffered `IndexData` into the persistent tables and
//! purges rows for dirtied files. It runs either inline on the orchestrator
//! thread or on a single worker thread while the project is in the
//! `Syncing` state; either way it holds the table mutex for the duration of
//! the merge.

use crate::model::{FileId, FixIt, IndexData, Location, PendingReference, SymbolKind};
use crate::registry::FileRegistry;
use crate::tables::ProjectTables;
use crate::utils::{format_bytes, format_number};
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Everything a sync needs, detached from the orchestrator so it can run on
/// a worker thread.
pub(crate) struct SyncTask {
    pub tables: Arc<Mutex<ProjectTables>>,
    pub data: BTreeMap<u64, IndexData>,
    pub dirty_files: FxHashSet<FileId>,
    pub visited: BTreeMap<FileId, PathBuf>,
    pub registry: Arc<FileRegistry>,
    pub watch_system_paths: bool,
    pub system_paths: Vec<PathBuf>,
    pub jobs_elapsed: Duration,
    pub dirty_elapsed: Duration,
}

/// Result of one sync, handed back to the orchestrator.
#[derive(Debug)]
pub struct SyncOutcome {
    /// One-line human-readable summary of the batch.
    pub message: String,
    /// Parent directories of files first seen in this batch.
    pub new_watch_roots: Vec<PathBuf>,
    /// Per-file fix-it replacements; an empty set clears the entry.
    pub fix_its: Vec<(FileId, BTreeSet<FixIt>)>,
    pub data_count: usize,
    pub purged_symbols: usize,
    pub symbols: usize,
    pub symbol_names: usize,
    pub targets: usize,
    pub references: usize,
}

impl SyncTask {
    pub fn run(self) -> SyncOutcome {
        let sync_start = Instant::now();
        let mut guard = self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let purged_symbols = guard.purge_file_ids(&self.dirty_files);

        let mut all_usrs: BTreeMap<String, BTreeMap<Location, SymbolKind>> = BTreeMap::new();
        let mut all_targets: BTreeMap<Location, BTreeMap<Location, SymbolKind>> = BTreeMap::new();
        let mut all_references: BTreeMap<Location, BTreeSet<Location>> = BTreeMap::new();
        let mut pending: BTreeMap<String, Vec<PendingReference>> = BTreeMap::new();
        let mut fix_its: Vec<(FileId, BTreeSet<FixIt>)> = Vec::new();
        let mut new_files: FxHashSet<FileId> = FxHashSet::default();
        let mut symbols = 0usize;
        let mut symbol_names = 0usize;

        let tables = &mut *guard;
        {
            let mut dep_scope = tables.dependencies.write_scope();
            let mut symbol_scope = tables.symbols.write_scope();
            let mut name_scope = tables.symbol_names.write_scope();

            for data in self.data.values() {
                for (header, tus) in &data.dependencies {
                    new_files.insert(*header);
                    new_files.extend(tus.iter().copied());
                    let mut merged = dep_scope.value(header).cloned().unwrap_or_default();
                    merged.extend(tus.iter().copied());
                    dep_scope.set(*header, merged);
                }

                for (file_id, entries) in &data.fix_its {
                    fix_its.push((*file_id, entries.clone()));
                }

                for (usr, locations) in &data.usrs {
                    all_usrs
                        .entry(usr.clone())
                        .or_default()
                        .extend(locations.iter().map(|(l, k)| (*l, *k)));
                }

                for (location, info) in &data.symbols {
                    match symbol_scope.value(location).cloned() {
                        Some(mut existing) => {
                            existing.unite(info);
                            symbol_scope.set(*location, existing);
                        }
                        None => symbol_scope.set(*location, info.clone()),
                    }
                    symbols += 1;
                }

                for (name, locations) in &data.symbol_names {
                    let mut merged = name_scope.value(name).cloned().unwrap_or_default();
                    merged.extend(locations.iter().copied());
                    name_scope.set(name.clone(), merged);
                    symbol_names += 1;
                }

                for (location, refs) in &data.references {
                    all_references
                        .entry(*location)
                        .or_default()
                        .extend(refs.iter().copied());
                }
                for (location, tgts) in &data.targets {
                    all_targets
                        .entry(*location)
                        .or_default()
                        .extend(tgts.iter().map(|(l, k)| (*l, *k)));
                }

                for (usr, refs) in &data.pending_references {
                    pending
                        .entry(usr.clone())
                        .or_default()
                        .extend(refs.iter().copied());
                }
            }
        }

        // Emit USRs and join cursors: a USR seen at several locations gets
        // pairwise target edges so navigation resolves across TU boundaries.
        {
            let mut usr_scope = tables.usr.write_scope();
            for (usr, locations) in &all_usrs {
                let mut merged = usr_scope.value(usr).cloned().unwrap_or_default();
                merged.extend(locations.iter().map(|(l, k)| (*l, *k)));
                usr_scope.set(usr.clone(), merged.clone());

                if merged.len() >= 2 {
                    for a in merged.keys() {
                        for (b, kind) in &merged {
                            if a != b {
                                all_targets.entry(*a).or_default().insert(*b, *kind);
                            }
                        }
                    }
                }
            }
        }

        // Resolve references that could not be bound inside their TU.
        for (usr, refs) in &pending {
            let mut declarations = lookup_usr(tables, &all_usrs, usr);
            #[cfg(feature = "objc-usr-compat")]
            if declarations.is_empty() && usr.contains("(im)") {
                let rewritten = usr.replace("(im)", "(py)");
                declarations = lookup_usr(tables, &all_usrs, &rewritten);
            }
            if declarations.is_empty() {
                debug!(usr = %usr, refs = refs.len(), "Unresolved pending references");
                continue;
            }
            for reference in refs {
                for (decl, kind) in &declarations {
                    all_targets
                        .entry(reference.location)
                        .or_default()
                        .insert(*decl, *kind);
                    all_references
                        .entry(*decl)
                        .or_default()
                        .insert(reference.location);
                }
            }
        }

        // Commit targets and references: union with any existing row and
        // only write back when the union is strictly larger.
        let mut targets = 0usize;
        {
            let mut scope = tables.targets.write_scope();
            for (location, tgts) in &all_targets {
                match scope.value(location) {
                    None => {
                        targets += tgts.len();
                        scope.set(*location, tgts.clone());
                    }
                    Some(existing) => {
                        let mut merged = existing.clone();
                        merged.extend(tgts.iter().map(|(l, k)| (*l, *k)));
                        if merged.len() > existing.len() {
                            targets += merged.len() - existing.len();
                            scope.set(*location, merged);
                        }
                    }
                }
            }
        }
        let mut references = 0usize;
        {
            let mut scope = tables.references.write_scope();
            for (location, refs) in &all_references {
                match scope.value(location) {
                    None => {
                        references += refs.len();
                        scope.set(*location, refs.clone());
                    }
                    Some(existing) => {
                        let mut merged = existing.clone();
                        merged.extend(refs.iter().copied());
                        if merged.len() > existing.len() {
                            references += merged.len() - existing.len();
                            scope.set(*location, merged);
                        }
                    }
                }
            }
        }

        let save_start = Instant::now();
        if let Err(e) = tables.persist_visited_files(&self.visited) {
            warn!(error = %e, "Failed to persist visited files");
        }
        let saving = save_start.elapsed();

        let new_watch_roots = self.collect_watch_roots(&new_files);

        let message = format!(
            "Jobs took {:.2}s, dirtying took {:.2}s, syncing took {:.2}s, saving took {:.2}s. \
             Merged {} symbols, {} symbol names, {} targets, {} references from {} units \
             (purged {}). {} of memory in use.",
            self.jobs_elapsed.as_secs_f64(),
            self.dirty_elapsed.as_secs_f64(),
            sync_start.elapsed().as_secs_f64(),
            saving.as_secs_f64(),
            format_number(symbols),
            format_number(symbol_names),
            format_number(targets),
            format_number(references),
            self.data.len(),
            purged_symbols,
            format_bytes(process_memory()),
        );

        SyncOutcome {
            message,
            new_watch_roots,
            fix_its,
            data_count: self.data.len(),
            purged_symbols,
            symbols,
            symbol_names,
            targets,
            references,
        }
    }

    fn collect_watch_roots(&self, new_files: &FxHashSet<FileId>) -> Vec<PathBuf> {
        let mut roots: BTreeSet<PathBuf> = BTreeSet::new();
        for &file_id in new_files {
            let Some(path) = self.registry.path(file_id) else {
                continue;
            };
            let Some(parent) = path.parent() else {
                continue;
            };
            let is_system = self.system_paths.iter().any(|p| parent.starts_with(p));
            if is_system && !self.watch_system_paths {
                continue;
            }
            roots.insert(parent.to_path_buf());
        }
        roots.into_iter().collect()
    }
}

fn lookup_usr(
    tables: &ProjectTables,
    all_usrs: &BTreeMap<String, BTreeMap<Location, SymbolKind>>,
    usr: &str,
) -> BTreeMap<Location, SymbolKind> {
    let mut merged = tables
        .usr
        .value(&usr.to_string())
        .cloned()
        .unwrap_or_default();
    if let Some(batch) = all_usrs.get(usr) {
        merged.extend(batch.iter().map(|(l, k)| (*l, *k)));
    }
    merged
}

fn process_memory() -> u64 {
    use sysinfo::{Pid, ProcessesToUpdate, System};
    let pid = Pid::from_u32(std::process::id());
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(|p| p.memory()).unwrap_or(0)
}
