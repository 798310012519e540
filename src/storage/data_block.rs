//! # Data Block Views
//!
//! A data block is a 16 KB slotted page: records pack upward from the
//! header, the key-sorted slot array grows downward from the trailer, and
//! the free-space cursor sits between them. Meta blocks share the layout
//! and most of the machinery (minus key ordering).
//!
//! ## Slot Array
//!
//! Slot position `i` identifies the `i`-th smallest live record; position 0
//! sits at the lowest address, `BLOCK_SIZE - 4 - slots * 4`. Growing the
//! array moves its start down by one entry, so a fresh allocation enters at
//! position 0 without moving any existing entry; [`DataBlockMut::reorder`]
//! then restores key order. The first slot entry lives in the trailer's
//! reserved words, which is why the trailer charge is
//! `align8(slots * 4 + 4)`.
//!
//! ## Space Accounting
//!
//! Two numbers describe free space:
//!
//! - `freesize`: every reclaimable byte — the contiguous gap plus the bytes
//!   still occupied by tombstoned records. Invariant:
//!   `freesize == BLOCK_SIZE - DATA_HEADER_SIZE - trailer_size - sum(live
//!   allocated lengths)`.
//! - `freespace_size`: only the contiguous gap between the cursor and the
//!   slot array.
//!
//! [`DataBlockMut::allocate`] charges the aligned record length plus any
//! trailer growth; when `freesize` suffices but the contiguous gap does
//! not, [`DataBlockMut::shrink`] compacts tombstone space first. One shrink
//! is always enough.
//!
//! ## Tombstones
//!
//! [`DataBlockMut::deallocate`] clears the record's alive bit, drops its
//! slot, and returns its bytes to `freesize`; the bytes stay put until the
//! next shrink rewrites the record area.
//!
//! ## Checksums
//!
//! The compound mutators (`insert_record`, `copy_record`) reseal the
//! trailer checksum before returning. Callers composing the primitive
//! mutators directly finish with [`DataBlockMut::set_checksum`].

use eyre::{ensure, Result};
use smallvec::SmallVec;
use tracing::debug;

use super::headers::{BlockKind, DataHeader, IdleHeader, Slot, Trailer};
use super::{DATA_HEADER_SIZE, TRAILER_SIZE};
use crate::config::{align8, BLOCK_SIZE, DATA_CAPACITY, MAGIC, SLOT_SIZE};
use crate::encoding::{checksum, timestamp};
use crate::record::{self, RecordView};
use crate::types::DataType;

/// Result of [`DataBlockMut::insert_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record is in and the block is resorted and resealed.
    Inserted,
    /// A record with an equal key already exists; nothing changed.
    Duplicate,
    /// The block cannot hold the record; the payload is the slot position
    /// the record would occupy, for the caller's split decision.
    NeedsSplit(u16),
}

/// Trailer charge for a block holding `slots` live records.
#[inline]
fn trailer_size_for(slots: usize) -> usize {
    align8(slots * SLOT_SIZE + 4)
}

/// Byte address of slot position `index` (0 = lowest address = smallest
/// key once ordered).
#[inline]
fn slot_addr(slots: usize, index: usize) -> usize {
    BLOCK_SIZE - 4 - (slots - index) * SLOT_SIZE
}

/// Reseals the trailer checksum of a full-size block buffer.
pub(crate) fn seal_block(data: &mut [u8]) {
    let at = data.len() - TRAILER_SIZE;
    Trailer::from_bytes_mut(&mut data[at..])
        .unwrap() // INVARIANT: trailer span is TRAILER_SIZE bytes
        .set_checksum(0);
    let sum = checksum::seal(data);
    Trailer::from_bytes_mut(&mut data[at..])
        .unwrap()
        .set_checksum(sum);
}

/// Read-only view of a data or meta block.
#[derive(Debug, Clone, Copy)]
pub struct DataBlock<'a> {
    data: &'a [u8],
}

impl<'a> DataBlock<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == BLOCK_SIZE,
            "invalid block size: {} != {}",
            data.len(),
            BLOCK_SIZE
        );
        Ok(Self { data })
    }

    fn header(&self) -> &DataHeader {
        DataHeader::from_bytes(self.data).unwrap() // INVARIANT: length checked in from_page
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

    pub fn slots(&self) -> u16 {
        self.header().slots()
    }

    pub fn freesize(&self) -> u16 {
        self.header().freesize()
    }

    pub fn freespace(&self) -> u16 {
        self.header().freespace()
    }

    pub fn stamp(&self) -> u64 {
        self.header().stamp()
    }

    pub fn next(&self) -> u32 {
        self.header().next()
    }

    pub fn self_id(&self) -> u32 {
        self.header().self_id()
    }

    /// Free-chain link, read through the idle layout.
    pub fn idle_next(&self) -> u32 {
        IdleHeader::from_bytes(self.data).unwrap().next() // INVARIANT: length checked in from_page
    }

    pub fn checksum_ok(&self) -> bool {
        checksum::verify(self.data)
    }

    /// Current trailer charge, slot array included.
    pub fn trailer_size(&self) -> usize {
        trailer_size_for(self.slots() as usize)
    }

    /// Contiguous free bytes between the cursor and the slot array.
    pub fn freespace_size(&self) -> usize {
        BLOCK_SIZE - self.trailer_size() - self.freespace() as usize
    }

    pub fn slot_at(&self, index: usize) -> Result<Slot> {
        let slots = self.slots() as usize;
        ensure!(
            index < slots,
            "slot index {} out of bounds (slots={})",
            index,
            slots
        );
        let at = slot_addr(slots, index);
        Ok(*Slot::from_bytes(&self.data[at..at + SLOT_SIZE])?)
    }

    /// The allocated byte span of the record in slot `index`.
    pub fn record_span(&self, index: usize) -> Result<&'a [u8]> {
        let slot = self.slot_at(index)?;
        let off = slot.offset() as usize;
        let len = slot.length() as usize;
        ensure!(
            off >= DATA_HEADER_SIZE && off + len <= BLOCK_SIZE - self.trailer_size(),
            "record span {}+{} escapes the record area",
            off,
            len
        );
        Ok(&self.data[off..off + len])
    }

    pub fn record_at(&self, index: usize) -> Result<RecordView<'a>> {
        RecordView::new(self.record_span(index)?)
    }

    /// Key bytes of the record in slot `index`.
    pub fn key_at(&self, index: usize, key: usize) -> Result<&'a [u8]> {
        self.record_at(index)?.field(key)
    }

    /// Lower bound over the key-sorted slot array: the smallest slot
    /// position whose key is `>= needle`, or `slots` if all keys are less.
    pub fn lower_bound(&self, kind: DataType, key: usize, needle: &[u8]) -> Result<usize> {
        let mut lo = 0usize;
        let mut hi = self.slots() as usize;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if kind.less(self.key_at(mid, key)?, needle) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Chooses where to cut this block for a split that must make room for
    /// `space` more bytes entering at slot position `insert_pos`.
    ///
    /// Returns `(split_slot, left_side)`: slots `[split_slot, slots)` move
    /// to the new right-hand block, and `left_side` says whether the
    /// incoming record belongs in this block (`true`) or the new one.
    pub fn split_position(&self, space: usize, insert_pos: usize) -> Result<(usize, bool)> {
        let slots = self.slots() as usize;
        let half = align8((BLOCK_SIZE - DATA_HEADER_SIZE) / 2 - slots * SLOT_SIZE);

        let mut acc = 0usize;
        for i in 0..slots {
            if i == insert_pos {
                acc += align8(space);
                if acc > half {
                    return Ok((i, false));
                }
            }
            acc += self.slot_at(i)?.length() as usize;
            if acc > half {
                return Ok((i, insert_pos <= i));
            }
        }
        if insert_pos >= slots {
            acc += align8(space);
            if acc > half {
                return Ok((slots, false));
            }
        }
        Ok((slots, true))
    }

    /// Forward iterator over the live records in slot order.
    pub fn records(&self) -> RecordIter<'a> {
        RecordIter {
            block: *self,
            pos: 0,
        }
    }
}

/// Forward-only iterator over slot positions, yielding record views.
pub struct RecordIter<'a> {
    block: DataBlock<'a>,
    pos: usize,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<RecordView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.block.slots() as usize {
            return None;
        }
        let item = self.block.record_at(self.pos);
        self.pos += 1;
        Some(item)
    }
}

/// Mutable view of a data or meta block.
pub struct DataBlockMut<'a> {
    data: &'a mut [u8],
}

impl<'a> DataBlockMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == BLOCK_SIZE,
            "invalid block size: {} != {}",
            data.len(),
            BLOCK_SIZE
        );
        Ok(Self { data })
    }

    pub fn as_ref(&self) -> DataBlock<'_> {
        DataBlock { data: self.data }
    }

    fn header_mut(&mut self) -> &mut DataHeader {
        DataHeader::from_bytes_mut(self.data).unwrap() // INVARIANT: length checked in from_page
    }

    /// Reinitializes the buffer as an empty block of the given kind.
    pub fn clear(&mut self, spaceid: u32, self_id: u32, kind: BlockKind) {
        self.data.fill(0);
        let header = self.header_mut();
        header.set_magic(MAGIC);
        header.set_spaceid(spaceid);
        header.set_kind(kind as u16);
        header.set_freespace(DATA_HEADER_SIZE as u16);
        header.set_slots(0);
        header.set_freesize(DATA_CAPACITY as u16);
        header.set_stamp(timestamp::now());
        header.set_next(0);
        header.set_self_id(self_id);
        self.set_checksum();
    }

    pub fn set_next(&mut self, next: u32) {
        self.header_mut().set_next(next);
    }

    pub fn set_kind(&mut self, kind: BlockKind) {
        self.header_mut().set_kind(kind as u16);
    }

    /// Free-chain link, written through the idle layout.
    pub fn set_idle_next(&mut self, next: u32) {
        IdleHeader::from_bytes_mut(self.data).unwrap().set_next(next); // INVARIANT: length checked in from_page
    }

    /// Reseals the trailer checksum over the current contents.
    pub fn set_checksum(&mut self) {
        seal_block(self.data);
    }

    /// Reserves `align8(space)` bytes for a record, growing the slot array
    /// by one entry at position 0. Returns the record offset, or `None`
    /// when `freesize` cannot cover the demand. Shrinks first when the
    /// contiguous gap alone is too small.
    ///
    /// The new slot is unordered; call [`DataBlockMut::reorder`] before
    /// relying on key order.
    pub fn allocate(&mut self, space: usize) -> Result<Option<u16>> {
        let space = align8(space);
        let slots = self.as_ref().slots() as usize;
        let t0 = trailer_size_for(slots);
        let t1 = trailer_size_for(slots + 1);
        let demand = space + (t1 - t0);

        let freesize = self.as_ref().freesize() as usize;
        if freesize < demand {
            return Ok(None);
        }

        let contiguous = (BLOCK_SIZE - t1).saturating_sub(self.as_ref().freespace() as usize);
        if contiguous < space {
            self.shrink()?;
        }

        let freespace = self.as_ref().freespace() as usize;
        if (BLOCK_SIZE - t1).saturating_sub(freespace) < space {
            return Ok(None);
        }

        let header = self.header_mut();
        header.set_slots((slots + 1) as u16);
        header.set_freespace((freespace + space) as u16);
        header.set_freesize((freesize - demand) as u16);

        let at = slot_addr(slots + 1, 0);
        let slot = Slot::new(freespace as u16, space as u16);
        self.data[at..at + SLOT_SIZE].copy_from_slice(zerocopy::IntoBytes::as_bytes(&slot));

        Ok(Some(freespace as u16))
    }

    /// Tombstones the record in slot `index` and removes the slot,
    /// returning its bytes (and any trailer shrink) to `freesize`.
    pub fn deallocate(&mut self, index: usize) -> Result<()> {
        let slots = self.as_ref().slots() as usize;
        let slot = self.as_ref().slot_at(index)?;

        record::die(&mut self.data[slot.offset() as usize..]);

        // Close the gap: entries at lower addresses slide up one position.
        let start = slot_addr(slots, 0);
        self.data
            .copy_within(start..start + index * SLOT_SIZE, start + SLOT_SIZE);

        let t0 = trailer_size_for(slots);
        let t1 = trailer_size_for(slots - 1);
        let freesize = self.as_ref().freesize() as usize;

        let header = self.header_mut();
        header.set_slots((slots - 1) as u16);
        header.set_freesize((freesize + slot.length() as usize + (t0 - t1)) as u16);
        Ok(())
    }

    /// Compacts the record area: live records slide down over tombstone
    /// gaps, the cursor retreats, and `freesize` becomes purely contiguous.
    ///
    /// Leaves the slot array sorted by offset; key order must be restored
    /// with [`DataBlockMut::reorder`].
    pub fn shrink(&mut self) -> Result<()> {
        let slots = self.as_ref().slots() as usize;
        let mut entries: SmallVec<[(u16, u16); 64]> = SmallVec::with_capacity(slots);
        for i in 0..slots {
            let slot = self.as_ref().slot_at(i)?;
            entries.push((slot.offset(), slot.length()));
        }
        entries.sort_unstable_by_key(|&(off, _)| off);

        let mut write_at = DATA_HEADER_SIZE;
        for (off, len) in entries.iter_mut() {
            let src = *off as usize;
            let n = *len as usize;
            if src != write_at {
                self.data.copy_within(src..src + n, write_at);
            }
            *off = write_at as u16;
            write_at += n;
        }

        for (i, &(off, len)) in entries.iter().enumerate() {
            let at = slot_addr(slots, i);
            let slot = Slot::new(off, len);
            self.data[at..at + SLOT_SIZE].copy_from_slice(zerocopy::IntoBytes::as_bytes(&slot));
        }

        let freesize = BLOCK_SIZE - trailer_size_for(slots) - write_at;
        let header = self.header_mut();
        header.set_freespace(write_at as u16);
        header.set_freesize(freesize as u16);

        debug!(slots, freespace = write_at, "block shrink complete");
        Ok(())
    }

    /// Re-sorts the slot array so position order matches ascending key
    /// order under the table's key type.
    pub fn reorder(&mut self, kind: DataType, key: usize) -> Result<()> {
        let slots = self.as_ref().slots() as usize;
        let mut entries: SmallVec<[(Slot, SmallVec<[u8; 16]>); 64]> =
            SmallVec::with_capacity(slots);
        for i in 0..slots {
            let slot = self.as_ref().slot_at(i)?;
            let key_bytes = self.as_ref().key_at(i, key)?;
            entries.push((slot, SmallVec::from_slice(key_bytes)));
        }

        entries.sort_by(|a, b| kind.compare(&a.1, &b.1));

        for (i, (slot, _)) in entries.iter().enumerate() {
            let at = slot_addr(slots, i);
            self.data[at..at + SLOT_SIZE].copy_from_slice(zerocopy::IntoBytes::as_bytes(slot));
        }
        Ok(())
    }

    /// Encodes and inserts a record, keeping the slot array key-ordered
    /// and the checksum sealed. See [`InsertOutcome`] for the partial
    /// outcomes.
    pub fn insert_record(
        &mut self,
        fields: &[&[u8]],
        kind: DataType,
        key: usize,
    ) -> Result<InsertOutcome> {
        ensure!(
            key < fields.len(),
            "key field {} out of range (record has {} fields)",
            key,
            fields.len()
        );

        let length = record::size(fields);
        let aligned = align8(length);
        ensure!(
            aligned <= DATA_CAPACITY,
            "record of {} bytes exceeds block capacity",
            length
        );

        let me = self.as_ref();
        let slots = me.slots() as usize;
        let pos = me.lower_bound(kind, key, fields[key])?;
        if pos < slots && kind.equal(me.key_at(pos, key)?, fields[key]) {
            return Ok(InsertOutcome::Duplicate);
        }

        let demand = aligned + (trailer_size_for(slots + 1) - trailer_size_for(slots));
        if (me.freesize() as usize) < demand {
            return Ok(InsertOutcome::NeedsSplit(pos as u16));
        }

        let off = self
            .allocate(length)?
            .ok_or_else(|| eyre::eyre!("allocation failed with sufficient freesize"))?
            as usize;
        record::write(&mut self.data[off..off + aligned], fields, record::ALIVE)?;
        self.reorder(kind, key)?;
        self.set_checksum();
        Ok(InsertOutcome::Inserted)
    }

    /// Copies an already-encoded record span in, used when migrating
    /// records between blocks. Returns `false` when space is insufficient
    /// even after a shrink.
    pub fn copy_record(&mut self, span: &[u8], kind: DataType, key: usize) -> Result<bool> {
        match self.allocate(span.len())? {
            None => Ok(false),
            Some(off) => {
                let off = off as usize;
                self.data[off..off + span.len()].copy_from_slice(span);
                self.reorder(kind, key)?;
                self.set_checksum();
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: usize = 0;
    const KIND: DataType = DataType::BigInt;

    fn fresh() -> Vec<u8> {
        let mut page = vec![0u8; BLOCK_SIZE];
        DataBlockMut::from_page(&mut page)
            .unwrap()
            .clear(1, 1, BlockKind::Data);
        page
    }

    fn insert(page: &mut [u8], id: u64, payload: &[u8]) -> InsertOutcome {
        let id = id.to_be_bytes();
        let fields: [&[u8]; 2] = [&id, payload];
        DataBlockMut::from_page(page)
            .unwrap()
            .insert_record(&fields, KIND, KEY)
            .unwrap()
    }

    fn keys(page: &[u8]) -> Vec<u64> {
        let block = DataBlock::from_page(page).unwrap();
        (0..block.slots() as usize)
            .map(|i| {
                let k = block.key_at(i, KEY).unwrap();
                u64::from_be_bytes(k.try_into().unwrap())
            })
            .collect()
    }

    #[test]
    fn clear_initializes_an_empty_block() {
        let page = fresh();
        let block = DataBlock::from_page(&page).unwrap();

        assert!(block.has_magic());
        assert_eq!(block.kind(), Some(BlockKind::Data));
        assert_eq!(block.spaceid(), 1);
        assert_eq!(block.self_id(), 1);
        assert_eq!(block.next(), 0);
        assert_eq!(block.slots(), 0);
        assert_eq!(block.freesize() as usize, DATA_CAPACITY);
        assert_eq!(block.freespace() as usize, DATA_HEADER_SIZE);
        assert_eq!(block.trailer_size(), TRAILER_SIZE);
        assert!(block.checksum_ok());
    }

    #[test]
    fn inserts_keep_slots_sorted_ascending() {
        let mut page = fresh();
        for id in [50u64, 10, 90, 30, 70, 20] {
            assert_eq!(insert(&mut page, id, b"payload"), InsertOutcome::Inserted);
        }
        assert_eq!(keys(&page), vec![10, 20, 30, 50, 70, 90]);
        assert!(DataBlock::from_page(&page).unwrap().checksum_ok());
    }

    #[test]
    fn slot_offsets_and_lengths_stay_aligned() {
        let mut page = fresh();
        for id in 0..20u64 {
            insert(&mut page, id, &vec![b'x'; 1 + (id as usize * 7) % 40]);
        }
        let block = DataBlock::from_page(&page).unwrap();
        for i in 0..block.slots() as usize {
            let slot = block.slot_at(i).unwrap();
            assert_eq!(slot.offset() % 8, 0);
            assert_eq!(slot.length() % 8, 0);
        }
        assert_eq!(block.trailer_size() % 8, 0);
    }

    #[test]
    fn freesize_accounts_for_every_live_record() {
        let mut page = fresh();
        for id in 0..12u64 {
            insert(&mut page, id, b"0123456789");
        }
        let block = DataBlock::from_page(&page).unwrap();

        let live: usize = (0..block.slots() as usize)
            .map(|i| block.slot_at(i).unwrap().length() as usize)
            .sum();
        let expect = BLOCK_SIZE - DATA_HEADER_SIZE - block.trailer_size() - live;
        assert_eq!(block.freesize() as usize, expect);
    }

    #[test]
    fn duplicate_key_is_detected_without_change() {
        let mut page = fresh();
        insert(&mut page, 7, b"first");
        let before = keys(&page);

        assert_eq!(insert(&mut page, 7, b"second"), InsertOutcome::Duplicate);
        assert_eq!(keys(&page), before);
    }

    #[test]
    fn lower_bound_finds_the_insertion_point() {
        let mut page = fresh();
        for id in [10u64, 20, 30, 40] {
            insert(&mut page, id, b"p");
        }
        let block = DataBlock::from_page(&page).unwrap();

        let probe = |v: u64| {
            block
                .lower_bound(KIND, KEY, &v.to_be_bytes())
                .unwrap()
        };
        assert_eq!(probe(5), 0);
        assert_eq!(probe(10), 0);
        assert_eq!(probe(15), 1);
        assert_eq!(probe(40), 3);
        assert_eq!(probe(41), 4);
    }

    #[test]
    fn deallocate_tombstones_and_reclaims() {
        let mut page = fresh();
        for id in [1u64, 2, 3] {
            insert(&mut page, id, b"payload");
        }
        let span_of_2 = {
            let block = DataBlock::from_page(&page).unwrap();
            let slot = block.slot_at(1).unwrap();
            (slot.offset() as usize, slot.length() as usize)
        };
        let freesize_before = DataBlock::from_page(&page).unwrap().freesize();

        DataBlockMut::from_page(&mut page)
            .unwrap()
            .deallocate(1)
            .unwrap();

        assert_eq!(keys(&page), vec![1, 3]);
        let view = RecordView::new(&page[span_of_2.0..span_of_2.0 + span_of_2.1]).unwrap();
        assert!(!view.is_active());

        let freesize_after = DataBlock::from_page(&page).unwrap().freesize();
        assert!(freesize_after as usize >= freesize_before as usize + span_of_2.1);
    }

    #[test]
    fn shrink_packs_live_records_and_restores_contiguity() {
        let mut page = fresh();
        for id in 0..10u64 {
            insert(&mut page, id, b"some payload bytes");
        }
        for _ in 0..4 {
            DataBlockMut::from_page(&mut page)
                .unwrap()
                .deallocate(0)
                .unwrap();
        }

        {
            let mut block = DataBlockMut::from_page(&mut page).unwrap();
            block.shrink().unwrap();
            block.reorder(KIND, KEY).unwrap();
            block.set_checksum();
        }

        let block = DataBlock::from_page(&page).unwrap();
        assert_eq!(block.freesize() as usize, block.freespace_size());
        assert_eq!(keys(&page), vec![4, 5, 6, 7, 8, 9]);

        // Records are packed tight from the header.
        let mut expect = DATA_HEADER_SIZE;
        let mut by_offset: Vec<_> = (0..block.slots() as usize)
            .map(|i| block.slot_at(i).unwrap())
            .collect();
        by_offset.sort_unstable_by_key(|s| s.offset());
        for slot in by_offset {
            assert_eq!(slot.offset() as usize, expect);
            expect += slot.length() as usize;
        }
        assert_eq!(block.freespace() as usize, expect);
    }

    #[test]
    fn allocate_after_deallocate_reuses_tombstone_space() {
        let mut page = fresh();
        let payload = vec![b'z'; 1000];
        let mut n = 0u64;
        loop {
            let id = n.to_be_bytes();
            let fields: [&[u8]; 2] = [&id, &payload];
            let out = DataBlockMut::from_page(&mut page)
                .unwrap()
                .insert_record(&fields, KIND, KEY)
                .unwrap();
            if out != InsertOutcome::Inserted {
                break;
            }
            n += 1;
        }

        // Free one record's worth; the same shape must fit again even
        // though the contiguous gap alone is too small.
        DataBlockMut::from_page(&mut page)
            .unwrap()
            .deallocate(3)
            .unwrap();
        assert_eq!(insert(&mut page, 10_000, &payload), InsertOutcome::Inserted);
    }

    #[test]
    fn oversized_record_is_rejected_not_split() {
        let mut page = fresh();
        let huge = vec![b'x'; DATA_CAPACITY];
        let id = 1u64.to_be_bytes();
        let fields: [&[u8]; 2] = [&id, &huge];
        let result = DataBlockMut::from_page(&mut page)
            .unwrap()
            .insert_record(&fields, KIND, KEY);
        assert!(result.is_err());
    }

    #[test]
    fn full_block_reports_split_position() {
        let mut page = fresh();
        let payload = vec![b'q'; 100];
        let mut id = 0u64;
        loop {
            let out = insert(&mut page, id * 2, &payload);
            match out {
                InsertOutcome::Inserted => id += 1,
                InsertOutcome::NeedsSplit(pos) => {
                    // The colliding key sorts after every even key below it.
                    assert_eq!(pos as u64, id);
                    break;
                }
                InsertOutcome::Duplicate => panic!("keys are distinct"),
            }
        }

        let block = DataBlock::from_page(&page).unwrap();
        let space = {
            let idb = (id * 2).to_be_bytes();
            let fields: [&[u8]; 2] = [&idb, &payload];
            record::size(&fields)
        };
        let (split, left) = block.split_position(space, id as usize).unwrap();
        assert!(split > 0 && split <= block.slots() as usize);
        // Insertion at the tail lands in the right half.
        assert!(!left || split == block.slots() as usize);
    }

    #[test]
    fn split_position_balances_bytes() {
        let mut page = fresh();
        let payload = vec![b'b'; 120];
        let mut count = 0u64;
        while let InsertOutcome::Inserted = insert(&mut page, count, &payload) {
            count += 1;
        }
        let block = DataBlock::from_page(&page).unwrap();
        let (split, left) = block.split_position(200, 0).unwrap();

        // Inserting at the very front keeps the incoming record left.
        assert!(left);
        let slots = block.slots() as usize;
        assert!(split > slots / 3 && split < slots, "split={} slots={}", split, slots);
    }

    #[test]
    fn copy_record_copies_byte_for_byte() {
        let mut src = fresh();
        insert(&mut src, 5, b"migrate me");
        let src_block = DataBlock::from_page(&src).unwrap();
        let span = src_block.record_span(0).unwrap();

        let mut dst = fresh();
        {
            let mut block = DataBlockMut::from_page(&mut dst).unwrap();
            assert!(block.copy_record(span, KIND, KEY).unwrap());
        }
        assert_eq!(keys(&dst), vec![5]);

        let dst_block = DataBlock::from_page(&dst).unwrap();
        assert_eq!(dst_block.record_span(0).unwrap(), span);
        assert_eq!(
            dst_block.record_at(0).unwrap().field(1).unwrap(),
            b"migrate me"
        );
    }

    #[test]
    fn copy_record_refuses_when_full() {
        let mut src = fresh();
        insert(&mut src, 5, &vec![b'm'; 5000]);
        let span_len = {
            let block = DataBlock::from_page(&src).unwrap();
            block.record_span(0).unwrap().len()
        };

        // Fill the destination until even a kilobyte no longer fits.
        let mut dst = fresh();
        let mut id = 100u64;
        while let InsertOutcome::Inserted = insert(&mut dst, id, &vec![b'f'; 1000]) {
            id += 1;
        }
        let mut block = DataBlockMut::from_page(&mut dst).unwrap();
        assert!((block.as_ref().freesize() as usize) < span_len);
        let span = DataBlock::from_page(&src).unwrap().record_span(0).unwrap();
        assert!(!block.copy_record(span, KIND, KEY).unwrap());
    }

    #[test]
    fn record_iterator_walks_slot_order() {
        let mut page = fresh();
        for id in [3u64, 1, 2] {
            insert(&mut page, id, b"it");
        }
        let block = DataBlock::from_page(&page).unwrap();
        let ids: Vec<u64> = block
            .records()
            .map(|r| {
                let view = r.unwrap();
                u64::from_be_bytes(view.field(KEY).unwrap().try_into().unwrap())
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn idle_next_roundtrips_through_the_idle_layout() {
        let mut page = fresh();
        {
            let mut block = DataBlockMut::from_page(&mut page).unwrap();
            block.set_kind(BlockKind::Idle);
            block.set_idle_next(17);
            block.set_checksum();
        }
        let block = DataBlock::from_page(&page).unwrap();
        assert_eq!(block.kind(), Some(BlockKind::Idle));
        assert_eq!(block.idle_next(), 17);
        assert!(block.checksum_ok());
    }
}
