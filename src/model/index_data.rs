//! Per-translation-unit index deltas.
//!
//! An `IndexData` is the complete result of indexing one translation unit.
//! The external indexer produces it, the job lifecycle buffers it, and the
//! sync engine folds it into the persistent tables. Once completed it is
//! treated as immutable until merged and discarded.
//!
//! The collection fields use `BTreeMap`/`BTreeSet` so that merge order is
//! deterministic across runs.

use crate::model::{FileId, Location, SymbolInfo, SymbolKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bit flags describing how an indexing run ended and what kind of job
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFlags;

impl IndexFlags {
    /// The run finished and the delta is safe to merge.
    pub const COMPLETE: u32 = 0x01;
    /// The worker process died; treat like an incomplete run.
    pub const CRASHED: u32 = 0x02;
    /// The run was aborted before completion.
    pub const ABORTED: u32 = 0x04;
    /// The job was scheduled by dirty detection rather than a new compile.
    pub const DIRTY: u32 = 0x08;
    /// The job came from a compile command and must pass source admission.
    pub const COMPILE: u32 = 0x10;
}

/// A reference whose declaration could not be resolved inside the
/// translation unit; resolution is retried against the `usr` table at sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReference {
    pub location: Location,
    pub kind: SymbolKind,
}

/// A suggested source edit attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixIt {
    pub line: u32,
    pub column: u32,
    pub length: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file_id: FileId,
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub message: String,
}

/// The full delta for one translation unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexData {
    /// File id of the translation unit itself.
    pub file_id: FileId,
    /// Source key of the job that produced this delta.
    pub key: u64,
    /// Parse completion time, milliseconds since the epoch.
    pub parse_time: u64,
    pub flags: u32,
    pub symbols: BTreeMap<Location, SymbolInfo>,
    pub symbol_names: BTreeMap<String, BTreeSet<Location>>,
    pub targets: BTreeMap<Location, BTreeMap<Location, SymbolKind>>,
    pub references: BTreeMap<Location, BTreeSet<Location>>,
    pub usrs: BTreeMap<String, BTreeMap<Location, SymbolKind>>,
    /// Include graph contribution: header file id to the set of translation
    /// units (always containing this TU) that transitively include it.
    pub dependencies: BTreeMap<FileId, BTreeSet<FileId>>,
    pub pending_references: BTreeMap<String, Vec<PendingReference>>,
    pub fix_its: BTreeMap<FileId, BTreeSet<FixIt>>,
    /// Files this run claimed; `true` means this TU owned indexing of the
    /// file during the round.
    pub visited: BTreeMap<FileId, bool>,
    pub diagnostics: Vec<Diagnostic>,
    pub message: String,
}

impl IndexData {
    pub fn new(file_id: FileId, key: u64, flags: u32) -> Self {
        Self {
            file_id,
            key,
            flags,
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.flags & IndexFlags::COMPLETE != 0
    }

    pub fn is_aborted(&self) -> bool {
        self.flags & IndexFlags::ABORTED != 0
    }

    /// File ids this run owned, used for ownership release.
    pub fn owned_files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.visited
            .iter()
            .filter(|(_, owned)| **owned)
            .map(|(file_id, _)| *file_id)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let data = IndexData::new(1, 1 << 32, IndexFlags::COMPLETE | IndexFlags::DIRTY);
        assert!(data.is_complete());
        assert!(!data.is_aborted());
        assert_eq!(data.flags & IndexFlags::DIRTY, IndexFlags::DIRTY);
    }

    #[test]
    fn test_owned_files_skips_unowned() {
        let mut data = IndexData::new(1, 1 << 32, IndexFlags::COMPLETE);
        data.visited.insert(1, true);
        data.visited.insert(2, false);
        data.visited.insert(3, true);

        let owned: Vec<FileId> = data.owned_files().collect();
        assert_eq!(owned, vec![1, 3]);
    }

    #[test]
    fn test_diagnostic_counts() {
        let mut data = IndexData::new(1, 1 << 32, IndexFlags::COMPLETE);
        for severity in [Severity::Error, Severity::Warning, Severity::Warning] {
            data.diagnostics.push(Diagnostic {
                file_id: 1,
                line: 1,
                column: 1,
                severity,
                message: String::from("m"),
            });
        }
        assert_eq!(data.error_count(), 1);
        assert_eq!(data.warning_count(), 2);
    }
}
