//! Ordered persistent key-value table.
//!
//! Each table is an in-memory `BTreeMap` backed by one bincode file. Reads
//! are served from memory; mutation goes through a [`WriteScope`] that
//! applies writes immediately and defers the durable save until the scope is
//! flushed or dropped, so all writes inside one scope hit disk as a single
//! file replacement.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::error;

use crate::DATABASE_VERSION;

/// Key bound for persistent tables. `Ord` on the decoded type must agree
/// with the intended on-disk ordering; `Location` and the packed `u64`
/// source key are both constructed so that it does.
pub trait TableKey: Ord + Clone + Serialize + DeserializeOwned {}
impl<T: Ord + Clone + Serialize + DeserializeOwned> TableKey for T {}

/// Value bound for persistent tables.
pub trait TableValue: Clone + Serialize + DeserializeOwned {}
impl<T: Clone + Serialize + DeserializeOwned> TableValue for T {}

/// On-disk envelope; the version is checked on open.
#[derive(Serialize, Deserialize)]
struct PersistedTable<K: Ord, V> {
    version: u32,
    entries: BTreeMap<K, V>,
}

pub struct Table<K: TableKey, V: TableValue> {
    name: &'static str,
    path: PathBuf,
    map: BTreeMap<K, V>,
    dirty: bool,
}

impl<K: TableKey, V: TableValue> Table<K, V> {
    /// Open the table file under `dir`, creating an empty table if the file
    /// does not exist. A present-but-unreadable file is an error; the caller
    /// treats that as a failed project load.
    pub fn open(dir: &Path, name: &'static str) -> Result<Self> {
        let path = dir.join(name);
        let map = if path.exists() {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("Failed to open table file: {}", path.display()))?;
            let reader = std::io::BufReader::new(file);
            let persisted: PersistedTable<K, V> = bincode::deserialize_from(reader)
                .with_context(|| format!("Failed to deserialize table: {}", path.display()))?;
            if persisted.version != DATABASE_VERSION {
                anyhow::bail!(
                    "Table version mismatch in {}: found {}, expected {}",
                    path.display(),
                    persisted.version,
                    DATABASE_VERSION
                );
            }
            persisted.entries
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            name,
            path,
            map,
            dirty: false,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn value(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    /// Ordered scan over `[lo, hi]` inclusive.
    pub fn range_inclusive<'a>(&'a self, lo: &K, hi: &K) -> impl Iterator<Item = (&'a K, &'a V)> {
        self.map
            .range((Bound::Included(lo.clone()), Bound::Included(hi.clone())))
    }

    /// Cursor positioned at the first key `>= key`, or past-the-end.
    pub fn lower_bound(&self, key: &K) -> Cursor<'_, K, V> {
        let found = self
            .map
            .range((Bound::Included(key.clone()), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone());
        Cursor {
            table: self,
            key: found,
        }
    }

    /// Cursor positioned at the smallest key.
    pub fn first(&self) -> Cursor<'_, K, V> {
        Cursor {
            table: self,
            key: self.map.keys().next().cloned(),
        }
    }

    /// Begin a batch of writes. Durability is deferred until the scope is
    /// flushed or dropped.
    pub fn write_scope(&mut self) -> WriteScope<'_, K, V> {
        WriteScope { table: self }
    }

    fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create table directory: {}", parent.display())
            })?;
        }
        let file = std::fs::File::create(&self.path)
            .with_context(|| format!("Failed to create table file: {}", self.path.display()))?;
        let writer = std::io::BufWriter::new(file);
        let persisted = PersistedTable {
            version: DATABASE_VERSION,
            entries: std::mem::take(&mut self.map),
        };
        let result = bincode::serialize_into(writer, &persisted)
            .with_context(|| format!("Failed to serialize table: {}", self.path.display()));
        self.map = persisted.entries;
        result?;
        self.dirty = false;
        Ok(())
    }
}

/// Read cursor over a table. Positions are tracked by key, so a cursor stays
/// meaningful across writes made through a scope on the same table.
pub struct Cursor<'t, K: TableKey, V: TableValue> {
    table: &'t Table<K, V>,
    key: Option<K>,
}

impl<'t, K: TableKey, V: TableValue> Cursor<'t, K, V> {
    pub fn is_valid(&self) -> bool {
        self.key.is_some()
    }

    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub fn value(&self) -> Option<&'t V> {
        self.key.as_ref().and_then(|k| self.table.map.get(k))
    }

    /// Advance to the successor key; past the last key the cursor becomes
    /// invalid.
    pub fn next(&mut self) {
        if let Some(current) = self.key.take() {
            self.key = self
                .table
                .map
                .range((Bound::Excluded(current), Bound::Unbounded))
                .next()
                .map(|(k, _)| k.clone());
        }
    }

    /// Step to the predecessor key; from past-the-end this lands on the
    /// largest key.
    pub fn prev(&mut self) {
        self.key = match self.key.take() {
            Some(current) => self
                .table
                .map
                .range((Bound::Unbounded, Bound::Excluded(current)))
                .next_back()
                .map(|(k, _)| k.clone()),
            None => self.table.map.keys().next_back().cloned(),
        };
    }
}

/// Batches writes to one table; the durable save happens once, at `flush`
/// or on drop.
pub struct WriteScope<'t, K: TableKey, V: TableValue> {
    table: &'t mut Table<K, V>,
}

impl<'t, K: TableKey, V: TableValue> WriteScope<'t, K, V> {
    pub fn set(&mut self, key: K, value: V) {
        self.table.map.insert(key, value);
        self.table.dirty = true;
    }

    pub fn erase(&mut self, key: &K) -> bool {
        let removed = self.table.map.remove(key).is_some();
        if removed {
            self.table.dirty = true;
        }
        removed
    }

    /// Remove every key in `[lo, hi]` inclusive, returning the count.
    pub fn erase_range(&mut self, lo: &K, hi: &K) -> usize {
        let doomed: Vec<K> = self
            .table
            .range_inclusive(lo, hi)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.table.map.remove(key);
        }
        if !doomed.is_empty() {
            self.table.dirty = true;
        }
        doomed.len()
    }

    pub fn value(&self, key: &K) -> Option<&V> {
        self.table.value(key)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.table.save()
    }
}

impl<'t, K: TableKey, V: TableValue> Drop for WriteScope<'t, K, V> {
    fn drop(&mut self) {
        if let Err(e) = self.table.save() {
            error!(table = self.table.name, error = %e, "Failed to flush table on scope drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_u64(dir: &Path) -> Table<u64, String> {
        Table::open(dir, "test_table").expect("Failed to open table")
    }

    #[test]
    fn test_set_and_reload() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut table = open_u64(temp_dir.path());
            let mut scope = table.write_scope();
            scope.set(2, String::from("b"));
            scope.set(1, String::from("a"));
        }

        let table = open_u64(temp_dir.path());
        assert_eq!(table.len(), 2);
        assert_eq!(table.value(&1), Some(&String::from("a")));
        assert_eq!(table.value(&2), Some(&String::from("b")));
    }

    #[test]
    fn test_lower_bound_and_iteration() {
        let temp_dir = TempDir::new().unwrap();
        let mut table = open_u64(temp_dir.path());
        {
            let mut scope = table.write_scope();
            for key in [10u64, 20, 30] {
                scope.set(key, key.to_string());
            }
        }

        let mut cursor = table.lower_bound(&15);
        assert_eq!(cursor.key(), Some(&20));
        cursor.next();
        assert_eq!(cursor.key(), Some(&30));
        cursor.next();
        assert!(!cursor.is_valid());

        // prev from past-the-end lands on the last key.
        cursor.prev();
        assert_eq!(cursor.key(), Some(&30));
        cursor.prev();
        assert_eq!(cursor.key(), Some(&20));
    }

    #[test]
    fn test_erase_range() {
        let temp_dir = TempDir::new().unwrap();
        let mut table = open_u64(temp_dir.path());
        {
            let mut scope = table.write_scope();
            for key in 0u64..10 {
                scope.set(key, key.to_string());
            }
            assert_eq!(scope.erase_range(&3, &6), 4);
        }
        assert_eq!(table.len(), 6);
        assert!(!table.contains(&4));
        assert!(table.contains(&7));
    }

    #[test]
    fn test_version_mismatch_fails_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test_table");
        let persisted = PersistedTable::<u64, String> {
            version: DATABASE_VERSION + 1,
            entries: BTreeMap::new(),
        };
        let file = std::fs::File::create(&path).unwrap();
        bincode::serialize_into(std::io::BufWriter::new(file), &persisted).unwrap();

        assert!(Table::<u64, String>::open(temp_dir.path(), "test_table").is_err());
    }

    #[test]
    fn test_unflushed_reads_see_scope_writes() {
        let temp_dir = TempDir::new().unwrap();
        let mut table = open_u64(temp_dir.path());
        let mut scope = table.write_scope();
        scope.set(5, String::from("five"));
        assert_eq!(scope.value(&5), Some(&String::from("five")));
    }
}
