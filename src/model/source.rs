//! Compile invocations.
//!
//! A `Source` describes one translation unit: the file, the build root it
//! was configured under, and the compile arguments. The persistent key packs
//! `(file_id, build_root_id)` into a `u64` so that all sources for a file
//! are contiguous in the `sources` table and ordered by build root.

use crate::model::FileId;
use serde::{Deserialize, Serialize};

/// Bit flags carried by a [`Source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFlags;

impl SourceFlags {
    pub const NONE: u32 = 0x0;
    /// The preferred entry among all sources sharing a file id.
    pub const ACTIVE: u32 = 0x1;
}

/// One compile invocation for a translation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub file_id: FileId,
    pub build_root_id: u32,
    pub arguments: Vec<String>,
    pub flags: u32,
    /// Completion timestamp of the last successful index, in milliseconds
    /// since the epoch. Never decreases.
    pub parsed: u64,
}

impl Source {
    pub fn new(file_id: FileId, build_root_id: u32, arguments: Vec<String>) -> Self {
        Self {
            file_id,
            build_root_id,
            arguments,
            flags: SourceFlags::NONE,
            parsed: 0,
        }
    }

    /// Persistent table key: file id in the high 32 bits, build root in the
    /// low. Unsigned `u64` ordering then groups by file and orders by build
    /// root within the group.
    pub fn key(&self) -> u64 {
        encode_key(self.file_id, self.build_root_id)
    }

    pub fn is_active(&self) -> bool {
        self.flags & SourceFlags::ACTIVE != 0
    }

    pub fn set_active(&mut self, active: bool) {
        if active {
            self.flags |= SourceFlags::ACTIVE;
        } else {
            self.flags &= !SourceFlags::ACTIVE;
        }
    }

    /// Argument-list equality, the dedup criterion for re-submitted compiles.
    pub fn arguments_equal(&self, other: &Source) -> bool {
        self.arguments == other.arguments
    }
}

pub fn encode_key(file_id: FileId, build_root_id: u32) -> u64 {
    (u64::from(file_id) << 32) | u64::from(build_root_id)
}

pub fn decode_key(key: u64) -> (FileId, u32) {
    ((key >> 32) as u32, (key & 0xffff_ffff) as u32)
}

/// Inclusive key range covering every source for `file_id`.
pub fn file_key_range(file_id: FileId) -> (u64, u64) {
    (encode_key(file_id, 0), encode_key(file_id, u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip() {
        let source = Source::new(42, 7, vec!["-I/usr/include".into()]);
        assert_eq!(decode_key(source.key()), (42, 7));
    }

    #[test]
    fn test_key_ordering_groups_by_file() {
        // All keys for file 5 sort between file 4 and file 6, ordered by
        // build root inside the group.
        assert!(encode_key(4, u32::MAX) < encode_key(5, 0));
        assert!(encode_key(5, 0) < encode_key(5, 1));
        assert!(encode_key(5, u32::MAX) < encode_key(6, 0));
    }

    #[test]
    fn test_file_key_range_covers_all_build_roots() {
        let (lo, hi) = file_key_range(9);
        for build_root in [0u32, 1, 1000, u32::MAX] {
            let key = encode_key(9, build_root);
            assert!(lo <= key && key <= hi);
        }
        assert!(encode_key(8, u32::MAX) < lo);
        assert!(hi < encode_key(10, 0));
    }

    #[test]
    fn test_active_flag() {
        let mut source = Source::new(1, 0, Vec::new());
        assert!(!source.is_active());
        source.set_active(true);
        assert!(source.is_active());
        source.set_active(false);
        assert!(!source.is_active());
    }
}
