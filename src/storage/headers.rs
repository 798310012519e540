//! # Block Header Definitions
//!
//! Type-safe, zerocopy-based header structs for every block variant. All
//! multi-byte fields are big-endian on disk; the `zerocopy::big_endian`
//! wrapper types make the conversion happen exactly at the accessor edge,
//! so a header struct can be transmuted straight from a block buffer.
//!
//! ## Common Prefix (12 bytes, every block)
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  ----------------------------------------
//! 0       4     magic      Format identifier ("db01" in a hex dump)
//! 4       4     spaceid    Tablespace id; 0 for the catalog
//! 8       2     kind       Block kind tag (idle/super/data/index/meta/log)
//! 10      2     freespace  Offset of the free-space cursor
//! ```
//!
//! ## Variants
//!
//! - [`SuperHeader`] (52 B): chain heads (`first`, `idle`), allocation
//!   watermark (`maxid`), live-record and block counters.
//! - [`DataHeader`] (32 B): slot count, reclaimable-byte counter, chain
//!   link (`next`), own id (`self`). Meta blocks reuse this layout
//!   ([`MetaHeader`] is an alias).
//! - [`IdleHeader`] (16 B): just the free-chain link. A freed data block is
//!   readable through either layout; only `next` is meaningful.
//! - [`Trailer`] (8 B): closes every block; two reserved slot words and the
//!   whole-block checksum.
//! - [`Slot`] (4 B): one slot-array entry, `{offset, length}`.
//!
//! Kind tags 3 (`INDEX`) and 5 (`LOG`) are reserved: blocks carrying them
//! round-trip through the cache without interpretation.

use eyre::Result;
use zerocopy::big_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{
    parse_zerocopy, parse_zerocopy_mut, COMMON_HEADER_SIZE, DATA_HEADER_SIZE, IDLE_HEADER_SIZE,
    SUPER_HEADER_SIZE, TRAILER_SIZE,
};
use crate::config::{MAGIC, SLOT_SIZE};

/// Block kind tag stored in the common header.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Idle = 0,
    Super = 1,
    Data = 2,
    Index = 3,
    Meta = 4,
    Log = 5,
}

impl BlockKind {
    /// Decodes a stored tag; unknown tags are corruption, not a variant.
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(BlockKind::Idle),
            1 => Some(BlockKind::Super),
            2 => Some(BlockKind::Data),
            3 => Some(BlockKind::Index),
            4 => Some(BlockKind::Meta),
            5 => Some(BlockKind::Log),
            _ => None,
        }
    }
}

/// The 12-byte prefix shared by every block.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct CommonHeader {
    magic: U32,
    spaceid: U32,
    kind: U16,
    freespace: U16,
}

const _: () = assert!(std::mem::size_of::<CommonHeader>() == COMMON_HEADER_SIZE);

impl CommonHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_zerocopy(bytes, "CommonHeader")
    }

    be_accessors! {
        magic: u32,
        spaceid: u32,
        kind: u16,
        freespace: u16,
    }

    pub fn has_magic(&self) -> bool {
        self.magic() == MAGIC
    }
}

/// Header of block 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SuperHeader {
    magic: U32,
    spaceid: U32,
    kind: U16,
    freespace: U16,
    first: U32,
    stamp: U64,
    idle: U32,
    maxid: U32,
    self_id: U32,
    records: U64,
    data_count: U32,
    idle_count: U32,
}

const _: () = assert!(std::mem::size_of::<SuperHeader>() == SUPER_HEADER_SIZE);

impl SuperHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_zerocopy(bytes, "SuperHeader")
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        parse_zerocopy_mut(bytes, "SuperHeader")
    }

    be_accessors! {
        magic: u32,
        spaceid: u32,
        kind: u16,
        freespace: u16,
        first: u32,
        stamp: u64,
        idle: u32,
        maxid: u32,
        self_id: u32,
        records: u64,
        data_count: u32,
        idle_count: u32,
    }

    pub fn has_magic(&self) -> bool {
        self.magic() == MAGIC
    }
}

/// Header of data and meta blocks.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DataHeader {
    magic: U32,
    spaceid: U32,
    kind: U16,
    freespace: U16,
    slots: U16,
    freesize: U16,
    stamp: U64,
    next: U32,
    self_id: U32,
}

const _: () = assert!(std::mem::size_of::<DataHeader>() == DATA_HEADER_SIZE);

/// Meta blocks reuse the data block layout.
pub type MetaHeader = DataHeader;

impl DataHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_zerocopy(bytes, "DataHeader")
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        parse_zerocopy_mut(bytes, "DataHeader")
    }

    be_accessors! {
        magic: u32,
        spaceid: u32,
        kind: u16,
        freespace: u16,
        slots: u16,
        freesize: u16,
        stamp: u64,
        next: u32,
        self_id: u32,
    }

    pub fn has_magic(&self) -> bool {
        self.magic() == MAGIC
    }
}

/// Header view of a block on the idle chain.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IdleHeader {
    magic: U32,
    spaceid: U32,
    kind: U16,
    freespace: U16,
    next: U32,
}

const _: () = assert!(std::mem::size_of::<IdleHeader>() == IDLE_HEADER_SIZE);

impl IdleHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_zerocopy(bytes, "IdleHeader")
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        parse_zerocopy_mut(bytes, "IdleHeader")
    }

    be_accessors! {
        magic: u32,
        next: u32,
    }
}

/// The 8 bytes closing every block.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Trailer {
    reserved: [U16; 2],
    checksum: U32,
}

const _: () = assert!(std::mem::size_of::<Trailer>() == TRAILER_SIZE);

impl Trailer {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_zerocopy(bytes, "Trailer")
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        parse_zerocopy_mut(bytes, "Trailer")
    }

    be_accessors! {
        checksum: u32,
    }
}

/// One slot-array entry: the block-relative offset and allocated length of
/// a live record. Both are multiples of 8.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Slot {
    offset: U16,
    length: U16,
}

const _: () = assert!(std::mem::size_of::<Slot>() == SLOT_SIZE);

impl Slot {
    pub fn new(offset: u16, length: u16) -> Self {
        Self {
            offset: U16::new(offset),
            length: U16::new(length),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_zerocopy(bytes, "Slot")
    }

    be_accessors! {
        offset: u16,
        length: u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sizes_match_the_format() {
        assert_eq!(std::mem::size_of::<CommonHeader>(), 12);
        assert_eq!(std::mem::size_of::<SuperHeader>(), 52);
        assert_eq!(std::mem::size_of::<DataHeader>(), 32);
        assert_eq!(std::mem::size_of::<IdleHeader>(), 16);
        assert_eq!(std::mem::size_of::<Trailer>(), 8);
        assert_eq!(std::mem::size_of::<Slot>(), 4);
    }

    #[test]
    fn block_kind_roundtrips_known_tags() {
        for kind in [
            BlockKind::Idle,
            BlockKind::Super,
            BlockKind::Data,
            BlockKind::Index,
            BlockKind::Meta,
            BlockKind::Log,
        ] {
            assert_eq!(BlockKind::from_u16(kind as u16), Some(kind));
        }
        assert_eq!(BlockKind::from_u16(6), None);
        assert_eq!(BlockKind::from_u16(0xFFFF), None);
    }

    #[test]
    fn fields_are_stored_big_endian() {
        let mut buf = [0u8; 32];
        {
            let header = DataHeader::from_bytes_mut(&mut buf).unwrap();
            header.set_magic(crate::config::MAGIC);
            header.set_slots(0x0102);
            header.set_next(0x0A0B0C0D);
        }

        assert_eq!(&buf[0..4], b"db01");
        assert_eq!(&buf[12..14], &[0x01, 0x02]);
        assert_eq!(&buf[24..28], &[0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn idle_next_sits_right_after_the_common_prefix() {
        // The free chain reads and writes links through IdleHeader, whose
        // next field starts at offset 12. DataHeader keeps its own next at
        // offset 24; the two deliberately do not alias.
        let mut buf = [0u8; 32];
        IdleHeader::from_bytes_mut(&mut buf)
            .unwrap()
            .set_next(0xDEAD_BEEF);
        assert_eq!(&buf[12..16], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&buf[24..28], &[0u8; 4]);
    }

    #[test]
    fn slot_packs_offset_then_length() {
        let slot = Slot::new(0x1234, 0x5678);
        assert_eq!(slot.as_bytes(), &[0x12, 0x34, 0x56, 0x78]);
    }
}
