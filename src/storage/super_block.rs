//! # Super Block Views
//!
//! Block 0 of every file is a 4 KB super block anchoring the two chains
//! (`first` for live data blocks, `idle` for freed ones), the allocation
//! watermark `maxid`, and the table-wide counters. The views borrow a
//! buffer-pool frame; [`SuperBlock`] reads, [`SuperBlockMut`] mutates and
//! reseals the checksum.
//!
//! Chain fields use 0 as the empty sentinel: a fresh super block has
//! `first == 0` and `idle == 0`, and block ids start at 1.

use eyre::{ensure, Result};

use super::headers::{BlockKind, SuperHeader, Trailer};
use super::{SUPER_HEADER_SIZE, TRAILER_SIZE};
use crate::config::{MAGIC, SUPER_SIZE};
use crate::encoding::{checksum, timestamp};

/// Read-only view of a super block.
#[derive(Debug, Clone, Copy)]
pub struct SuperBlock<'a> {
    data: &'a [u8],
}

impl<'a> SuperBlock<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == SUPER_SIZE,
            "invalid super block size: {} != {}",
            data.len(),
            SUPER_SIZE
        );
        Ok(Self { data })
    }

    fn header(&self) -> &SuperHeader {
        SuperHeader::from_bytes(self.data).unwrap() // INVARIANT: length checked in from_page
    }

    pub fn has_magic(&self) -> bool {
        self.header().has_magic()
    }

    pub fn kind(&self) -> Option<BlockKind> {
        BlockKind::from_u16(self.header().kind())
    }

    pub fn spaceid(&self) -> u32 {
        self.header().spaceid()
    }

    pub fn freespace(&self) -> u16 {
        self.header().freespace()
    }

    pub fn first(&self) -> u32 {
        self.header().first()
    }

    pub fn idle(&self) -> u32 {
        self.header().idle()
    }

    pub fn maxid(&self) -> u32 {
        self.header().maxid()
    }

    pub fn stamp(&self) -> u64 {
        self.header().stamp()
    }

    pub fn records(&self) -> u64 {
        self.header().records()
    }

    pub fn data_count(&self) -> u32 {
        self.header().data_count()
    }

    pub fn idle_count(&self) -> u32 {
        self.header().idle_count()
    }

    /// True iff the whole block, stored checksum included, sums to zero.
    pub fn checksum_ok(&self) -> bool {
        checksum::verify(self.data)
    }
}

/// Mutable view of a super block.
pub struct SuperBlockMut<'a> {
    data: &'a mut [u8],
}

impl<'a> SuperBlockMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == SUPER_SIZE,
            "invalid super block size: {} != {}",
            data.len(),
            SUPER_SIZE
        );
        Ok(Self { data })
    }

    pub fn as_ref(&self) -> SuperBlock<'_> {
        SuperBlock { data: self.data }
    }

    fn header_mut(&mut self) -> &mut SuperHeader {
        SuperHeader::from_bytes_mut(self.data).unwrap() // INVARIANT: length checked in from_page
    }

    /// Reinitializes the block: zeroes the buffer, stamps the header with
    /// empty chains and counters, and seals the checksum.
    pub fn clear(&mut self, spaceid: u32) {
        self.data.fill(0);
        let header = self.header_mut();
        header.set_magic(MAGIC);
        header.set_spaceid(spaceid);
        header.set_kind(BlockKind::Super as u16);
        header.set_stamp(timestamp::now());
        header.set_first(0);
        header.set_idle(0);
        header.set_maxid(0);
        header.set_self_id(0);
        header.set_records(0);
        header.set_data_count(0);
        header.set_idle_count(0);
        header.set_freespace(SUPER_HEADER_SIZE as u16);
        self.set_checksum();
    }

    pub fn set_first(&mut self, first: u32) {
        self.header_mut().set_first(first);
    }

    pub fn set_idle(&mut self, idle: u32) {
        self.header_mut().set_idle(idle);
    }

    pub fn set_maxid(&mut self, maxid: u32) {
        self.header_mut().set_maxid(maxid);
    }

    pub fn set_records(&mut self, records: u64) {
        self.header_mut().set_records(records);
    }

    pub fn set_data_count(&mut self, count: u32) {
        self.header_mut().set_data_count(count);
    }

    pub fn set_idle_count(&mut self, count: u32) {
        self.header_mut().set_idle_count(count);
    }

    /// Reseals the trailer checksum over the current contents.
    pub fn set_checksum(&mut self) {
        let at = SUPER_SIZE - TRAILER_SIZE;
        Trailer::from_bytes_mut(&mut self.data[at..])
            .unwrap() // INVARIANT: trailer span is TRAILER_SIZE bytes
            .set_checksum(0);
        let sum = checksum::seal(self.data);
        Trailer::from_bytes_mut(&mut self.data[at..])
            .unwrap()
            .set_checksum(sum);
    }
}
