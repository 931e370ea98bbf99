//! Locations and file identifiers.
//!
//! A `Location` is the universal coordinate of the index: every symbol,
//! target and reference edge is keyed by one. Locations order
//! lexicographically by `(file_id, line, column)` so that all records for a
//! file are contiguous in the ordered tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 32-bit file identifier. The mapping to an absolute path lives in
/// the [`FileRegistry`](crate::registry::FileRegistry).
pub type FileId = u32;

/// Reserved "no file" id.
pub const NULL_FILE_ID: FileId = 0;

/// A `(file, line, column)` triple. Lines and columns are 1-based; the null
/// location has `file_id == 0`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Location {
    pub file_id: FileId,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file_id: FileId, line: u32, column: u32) -> Self {
        Self {
            file_id,
            line,
            column,
        }
    }

    pub fn is_null(&self) -> bool {
        self.file_id == NULL_FILE_ID
    }

    /// Smallest location in `file_id`, for range scans.
    pub fn file_start(file_id: FileId) -> Self {
        Self::new(file_id, 0, 0)
    }

    /// Largest location in `file_id`, for inclusive range scans.
    pub fn file_end(file_id: FileId) -> Self {
        Self::new(file_id, u32::MAX, u32::MAX)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_id, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_ordering_is_lexicographic() {
        let a = Location::new(1, 10, 5);
        let b = Location::new(1, 10, 6);
        let c = Location::new(1, 11, 1);
        let d = Location::new(2, 1, 1);

        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn test_file_range_bounds() {
        let loc = Location::new(7, 123, 45);
        assert!(Location::file_start(7) <= loc);
        assert!(loc <= Location::file_end(7));
        assert!(Location::file_end(7) < Location::file_start(8));
    }

    #[test]
    fn test_null_location() {
        assert!(Location::default().is_null());
        assert!(!Location::new(1, 1, 1).is_null());
    }
}
