//! The persistent table set for one project.
//!
//! A project directory holds eight bincode-backed ordered tables, opened in
//! a stable order independent of insertion: `symbols`, `symbolnames`, `usr`,
//! `dependencies`, `sources`, `references`, `targets`, `db`. `db` stores
//! small opaque blobs such as the serialized visited-files map.

pub mod table;

pub use table::{Cursor, Table, WriteScope};

use crate::model::{FileId, Location, Source, SymbolInfo, SymbolKind};
use crate::DATABASE_VERSION;
use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::info;

/// Key in the `db` table holding the serialized visited-files map.
pub const VISITED_FILES_KEY: &str = "visitedFiles";

pub struct ProjectTables {
    pub symbols: Table<Location, SymbolInfo>,
    pub symbol_names: Table<String, BTreeSet<Location>>,
    pub usr: Table<String, BTreeMap<Location, SymbolKind>>,
    pub dependencies: Table<FileId, BTreeSet<FileId>>,
    pub sources: Table<u64, Source>,
    pub references: Table<Location, BTreeSet<Location>>,
    pub targets: Table<Location, BTreeMap<Location, SymbolKind>>,
    pub general: Table<String, Vec<u8>>,
}

/// Versioned envelope for the visited-files blob inside `db`.
#[derive(Serialize, Deserialize)]
struct PersistedVisitedFiles {
    version: u32,
    files: BTreeMap<FileId, PathBuf>,
}

impl ProjectTables {
    /// Open every table under `dir`. Failure of any single table fails the
    /// open; the caller leaves the project unloaded.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create project directory: {}", dir.display()))?;

        let tables = Self {
            symbols: Table::open(dir, "symbols")?,
            symbol_names: Table::open(dir, "symbolnames")?,
            usr: Table::open(dir, "usr")?,
            dependencies: Table::open(dir, "dependencies")?,
            sources: Table::open(dir, "sources")?,
            references: Table::open(dir, "references")?,
            targets: Table::open(dir, "targets")?,
            general: Table::open(dir, "db")?,
        };

        info!(
            dir = %dir.display(),
            symbols = tables.symbols.len(),
            sources = tables.sources.len(),
            dependencies = tables.dependencies.len(),
            "Opened project tables"
        );
        Ok(tables)
    }

    /// Purge every row belonging to any of `file_ids` from the symbol-family
    /// tables (`symbols`, `references`, `targets`, `symbolnames`, `usr`).
    /// `sources` and `dependencies` are deliberately untouched; re-indexing
    /// rewrites them. Returns the number of erased symbol rows.
    pub fn purge_file_ids(&mut self, file_ids: &FxHashSet<FileId>) -> usize {
        if file_ids.is_empty() {
            return 0;
        }

        let mut erased = 0;
        {
            let mut scope = self.symbols.write_scope();
            for &file_id in file_ids {
                erased += scope.erase_range(
                    &Location::file_start(file_id),
                    &Location::file_end(file_id),
                );
            }
        }
        {
            let mut scope = self.references.write_scope();
            for &file_id in file_ids {
                scope.erase_range(
                    &Location::file_start(file_id),
                    &Location::file_end(file_id),
                );
            }
        }
        {
            let mut scope = self.targets.write_scope();
            for &file_id in file_ids {
                scope.erase_range(
                    &Location::file_start(file_id),
                    &Location::file_end(file_id),
                );
            }
        }

        // String-keyed tables hold locations in their values; strip matching
        // locations and drop entries that end up empty.
        prune_string_table(&mut self.symbol_names, |locations| {
            locations.retain(|l| !file_ids.contains(&l.file_id));
            locations.is_empty()
        });
        prune_string_table(&mut self.usr, |map| {
            map.retain(|l, _| !file_ids.contains(&l.file_id));
            map.is_empty()
        });

        erased
    }

    /// Write the visited-files map into `db` under [`VISITED_FILES_KEY`].
    pub fn persist_visited_files(&mut self, files: &BTreeMap<FileId, PathBuf>) -> Result<()> {
        let blob = bincode::serialize(&PersistedVisitedFiles {
            version: DATABASE_VERSION,
            files: files.clone(),
        })
        .context("Failed to serialize visited files")?;
        let mut scope = self.general.write_scope();
        scope.set(VISITED_FILES_KEY.to_string(), blob);
        scope.flush()
    }

    /// Read the persisted visited-files map, if any. A version mismatch is
    /// treated as absent data rather than an error.
    pub fn load_visited_files(&self) -> Option<BTreeMap<FileId, PathBuf>> {
        let blob = self.general.value(&VISITED_FILES_KEY.to_string())?;
        let persisted: PersistedVisitedFiles = bincode::deserialize(blob).ok()?;
        (persisted.version == DATABASE_VERSION).then_some(persisted.files)
    }
}

fn prune_string_table<V: table::TableValue + PartialEq>(
    table: &mut Table<String, V>,
    mut strip: impl FnMut(&mut V) -> bool,
) {
    let mut rewrites: Vec<(String, Option<V>)> = Vec::new();
    for (key, value) in table.iter() {
        let mut updated = value.clone();
        let now_empty = strip(&mut updated);
        if now_empty || &updated != value {
            rewrites.push((key.clone(), (!now_empty).then_some(updated)));
        }
    }
    let mut scope = table.write_scope();
    for (key, value) in rewrites {
        match value {
            Some(v) => scope.set(key, v),
            None => {
                scope.erase(&key);
            }
        }
    }
}
