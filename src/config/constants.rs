//! # Engine Constants
//!
//! This module centralizes the on-disk geometry and engine tunables, grouping
//! interdependent values together so a change in one place cannot silently
//! break a derived quantity elsewhere.
//!
//! ## Dependency Graph
//!
//! ```text
//! BLOCK_SIZE (16384 bytes, every block except the super block)
//!       │
//!       ├─> DATA_HEADER_SIZE (32 bytes, fixed by the DataHeader layout)
//!       │
//!       ├─> TRAILER_SIZE (8 bytes: two reserved slot words + checksum)
//!       │
//!       ├─> DATA_CAPACITY (derived: BLOCK_SIZE - DATA_HEADER_SIZE - TRAILER_SIZE)
//!       │     The freesize of a freshly cleared data block.
//!       │
//!       └─> MERGE_THRESHOLD (derived: DATA_CAPACITY / 2)
//!             A data block whose freesize exceeds this after a delete is a
//!             candidate for merging with its successor.
//!
//! SUPER_SIZE (4096 bytes, block 0 only)
//!       │
//!       └─> Block k >= 1 lives at file offset SUPER_SIZE + (k-1) * BLOCK_SIZE.
//!
//! SLOT_SIZE (4 bytes: u16 offset + u16 length)
//!       │
//!       └─> trailer growth when the slot count crosses an 8-byte boundary;
//!           see DataBlockMut::allocate demand accounting.
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions below:
//!
//! 1. `DATA_CAPACITY == 16344` — the merge policy constant 8172 in the table
//!    layer is exactly half of this.
//! 2. Header sizes are multiples of `ALIGN` so record offsets stay aligned.
//! 3. Slot offsets are u16, so `BLOCK_SIZE` must not exceed the u16 range.

use crate::storage::{DATA_HEADER_SIZE, TRAILER_SIZE};

/// Size of the super block, always block 0 at file offset 0.
pub const SUPER_SIZE: usize = 4096;

/// Size of every non-super block.
pub const BLOCK_SIZE: usize = 16384;

/// Format identifier stored big-endian in every block header; a hex dump of
/// the first four bytes of a valid block reads `"db01"`.
pub const MAGIC: u32 = 0x6462_3031;

/// Records and trailers are padded to this boundary.
pub const ALIGN: usize = 8;

/// Per-slot footprint in the slot array: big-endian u16 offset + u16 length.
pub const SLOT_SIZE: usize = 4;

/// Bytes usable for records and slots in a freshly cleared data block.
pub const DATA_CAPACITY: usize = BLOCK_SIZE - DATA_HEADER_SIZE - TRAILER_SIZE;

/// A data block whose `freesize` exceeds this after a delete tries to absorb
/// or rebalance with its successor.
pub const MERGE_THRESHOLD: usize = DATA_CAPACITY / 2;

/// Tablespace id of the system catalog.
pub const CATALOG_SPACE_ID: u32 = 0;

/// Tablespace id of user table files.
pub const TABLE_SPACE_ID: u32 = 1;

/// File name of the system catalog.
pub const CATALOG_FILE_NAME: &str = "_meta.db";

/// Default block-cache budget for callers that do not care: 4 MiB, enough
/// for 256 data blocks.
pub const DEFAULT_CACHE_BYTES: usize = 4 * 1024 * 1024;

/// The cache refuses to shrink below this many frames; the table layer can
/// hold a handful of blocks pinned at once during a split or merge.
pub const MIN_CACHE_FRAMES: usize = 8;

/// Rounds `n` up to the next multiple of [`ALIGN`].
#[inline]
pub const fn align8(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

const _: () = assert!(DATA_CAPACITY == 16344);
const _: () = assert!(MERGE_THRESHOLD == 8172);
const _: () = assert!(DATA_HEADER_SIZE % ALIGN == 0);
const _: () = assert!(TRAILER_SIZE % ALIGN == 0);
const _: () = assert!(BLOCK_SIZE <= u16::MAX as usize + 1);
const _: () = assert!(SUPER_SIZE % ALIGN == 0 && BLOCK_SIZE % ALIGN == 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align8_rounds_up() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(7), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(9), 16);
        assert_eq!(align8(16343), 16344);
    }

    #[test]
    fn capacity_matches_merge_threshold() {
        assert_eq!(DATA_CAPACITY, 2 * MERGE_THRESHOLD);
    }
}
