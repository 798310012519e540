//! # Storage Module
//!
//! The on-disk foundation of the engine: typed views over fixed-size,
//! checksummed, big-endian blocks; a positional file shim; and a pinned
//! block cache sitting between the two.
//!
//! ## Block Geometry
//!
//! Every table file (and the catalog) is a super block followed by a train
//! of uniform blocks:
//!
//! ```text
//! offset 0                    : block 0, the super block (4 KB)
//! offset SUPER_SIZE           : block 1 (16 KB)
//! offset SUPER_SIZE + BLK     : block 2
//! ...
//! ```
//!
//! Inside a data block, records pack upward from the header while the slot
//! array grows downward from the trailer:
//!
//! ```text
//! +--------------------+ 0
//! |    DataHeader      |
//! +--------------------+ DATA_HEADER_SIZE
//! |      records       |   (8-byte aligned spans)
//! +--------------------+ <- freespace cursor
//! |     free space     |
//! +--------------------+
//! |     slot array     |   (4-byte entries, key-sorted, grows down)
//! +--------------------+ BLOCK_SIZE - 8
//! |      trailer       |   (reserved words + checksum)
//! +--------------------+ BLOCK_SIZE
//! ```
//!
//! ## Layering
//!
//! - `headers`: zerocopy big-endian header structs shared by all views
//! - `super_block` / `data_block`: borrowed views implementing the block
//!   state machines (allocate, tombstone, shrink, reorder, split)
//! - `file`: positional read/write shim over `std::fs::File`
//! - `pool`: `(file, block)`-keyed cache with pinned guards and LRU
//!   write-back
//!
//! Views never own the bytes; they borrow a span from a pool guard and must
//! not outlive it. The borrow checker enforces this at compile time.

mod data_block;
mod file;
mod headers;
mod pool;
mod super_block;

pub use data_block::{DataBlock, DataBlockMut, InsertOutcome, RecordIter};
pub use file::TableFile;
pub use headers::{BlockKind, CommonHeader, DataHeader, IdleHeader, MetaHeader, Slot, SuperHeader, Trailer};
pub use pool::{BlockGuard, BlockKey, BufferPool};
pub use super_block::{SuperBlock, SuperBlockMut};

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of the common header prefix shared by every block.
pub const COMMON_HEADER_SIZE: usize = 12;

/// Size of the super block header.
pub const SUPER_HEADER_SIZE: usize = 52;

/// Size of the data/meta block header.
pub const DATA_HEADER_SIZE: usize = 32;

/// Size of the idle block header.
pub const IDLE_HEADER_SIZE: usize = 16;

/// Size of the trailer closing every block: two reserved slot words plus
/// the 32-bit checksum.
pub const TRAILER_SIZE: usize = 8;

/// Parses a zerocopy struct from the front of a byte slice.
#[inline]
pub fn parse_zerocopy<'a, T: FromBytes + KnownLayout + Immutable>(
    bytes: &'a [u8],
    type_name: &str,
) -> Result<&'a T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::ref_from_bytes(&bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}

/// Parses a mutable zerocopy struct from the front of a byte slice.
#[inline]
pub fn parse_zerocopy_mut<'a, T: FromBytes + KnownLayout + IntoBytes>(
    bytes: &'a mut [u8],
    type_name: &str,
) -> Result<&'a mut T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::mut_from_bytes(&mut bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}

/// File offset of a block: the super block sits at 0, block `k >= 1` at
/// `SUPER_SIZE + (k-1) * BLOCK_SIZE`.
#[inline]
pub fn block_offset(blockid: u32) -> u64 {
    use crate::config::{BLOCK_SIZE, SUPER_SIZE};
    if blockid == 0 {
        0
    } else {
        SUPER_SIZE as u64 + (blockid as u64 - 1) * BLOCK_SIZE as u64
    }
}

/// Byte size of a block: 4 KB for the super block, 16 KB otherwise.
#[inline]
pub fn block_len(blockid: u32) -> usize {
    use crate::config::{BLOCK_SIZE, SUPER_SIZE};
    if blockid == 0 {
        SUPER_SIZE
    } else {
        BLOCK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BLOCK_SIZE, SUPER_SIZE};

    #[test]
    fn block_offsets_follow_the_layout() {
        assert_eq!(block_offset(0), 0);
        assert_eq!(block_offset(1), SUPER_SIZE as u64);
        assert_eq!(block_offset(2), (SUPER_SIZE + BLOCK_SIZE) as u64);
        assert_eq!(block_offset(3), (SUPER_SIZE + 2 * BLOCK_SIZE) as u64);
    }

    #[test]
    fn block_lengths_follow_the_layout() {
        assert_eq!(block_len(0), SUPER_SIZE);
        assert_eq!(block_len(1), BLOCK_SIZE);
        assert_eq!(block_len(77), BLOCK_SIZE);
    }
}
