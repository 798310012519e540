//! # Table Layer
//!
//! A `Table` is the per-table facade over one data file: a super block
//! anchoring two disjoint singly linked chains (live data blocks via
//! `first`/`next`, freed blocks via `idle`), with records key-ordered
//! inside each block and across the chain.
//!
//! ## Chain Invariants
//!
//! - Following `next` from `super.first` reaches every live data block
//!   exactly once and ends at 0.
//! - For adjacent blocks `B -> B.next`, `last_key(B) < first_key(B.next)`;
//!   keys are unique table-wide.
//! - The idle chain holds every freed block exactly once; the two chains
//!   share no blocks.
//!
//! ## Write Paths
//!
//! - **Insert**: locate the target block by first-record keys, try an
//!   in-block insert; on overflow, split — pick a byte-balanced cut,
//!   allocate a block, migrate the upper slots, splice it after the
//!   original, and place the incoming record on its side of the cut.
//! - **Remove**: tombstone in place; when the block is left more than half
//!   reclaimable, absorb the successor if it fits (after an optional
//!   shrink) or rebalance slot counts with it.
//! - **Update**: remove then insert, restoring the saved original encoding
//!   if the new record cannot be placed.
//!
//! Block allocation pops the idle chain head first and only then grows the
//! file past `maxid`; deallocation pushes onto the idle chain and retags
//! the block idle. The super block is rewritten (and resealed) on every
//! accounting change.
//!
//! ## Iteration
//!
//! [`BlockChain`] re-borrows the pool on every step: it yields one pinned
//! guard at a time and reads the next link before handing the guard out,
//! so callers never hold a view across an advance.

use eyre::{bail, ensure, Result, WrapErr};
use tracing::debug;

use crate::config::{DATA_CAPACITY, MERGE_THRESHOLD, TABLE_SPACE_ID};
use crate::record;
use crate::schema::{RelationInfo, Schema};
use crate::storage::{
    BlockGuard, BlockKind, BufferPool, DataBlock, DataBlockMut, InsertOutcome, SuperBlock,
    SuperBlockMut,
};
use crate::types::DataType;

/// Open handle on one table.
pub struct Table {
    name: String,
    path: String,
    info: RelationInfo,
    pool: BufferPool,
    maxid: u32,
    idle: u32,
    first: u32,
}

impl Table {
    /// Opens a table registered in the catalog, initializing its data file
    /// on first use and snapshotting the super block.
    pub fn open(pool: BufferPool, schema: &Schema, name: &str) -> Result<Self> {
        let info = schema
            .lookup(name)
            .ok_or_else(|| eyre::eyre!("table '{}' not found in the catalog", name))?
            .clone();
        let path = info.path.clone();

        let mut guard = pool.borrow(&path, 0)?;
        if !SuperBlock::from_page(guard.data())?.has_magic() {
            debug!(table = name, file = %path, "initializing table file");
            SuperBlockMut::from_page(guard.data_mut())?.clear(TABLE_SPACE_ID);
        }
        let sup = SuperBlock::from_page(guard.data())?;
        ensure!(
            sup.checksum_ok(),
            "super block of '{}' is corrupted",
            path
        );

        let (maxid, idle, first) = (sup.maxid(), sup.idle(), sup.first());
        drop(guard);

        Ok(Self {
            name: name.to_string(),
            path,
            info,
            pool,
            maxid,
            idle,
            first,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &RelationInfo {
        &self.info
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    pub fn maxid(&self) -> u32 {
        self.maxid
    }

    pub fn idle(&self) -> u32 {
        self.idle
    }

    fn key_index(&self) -> usize {
        self.info.key as usize
    }

    fn key_type(&self) -> DataType {
        self.info.key_type()
    }

    /// Acquires a block id: the idle chain head if any, else the next id
    /// past the watermark. The block comes back cleared as a data block.
    pub fn allocate(&mut self) -> Result<u32> {
        let id = if self.idle != 0 {
            let current = self.idle;
            let next = {
                let guard = self.pool.borrow(&self.path, current)?;
                DataBlock::from_page(guard.data())?.idle_next()
            };

            {
                let mut guard = self.pool.borrow(&self.path, 0)?;
                let mut sup = SuperBlockMut::from_page(guard.data_mut())?;
                sup.set_idle(next);
                sup.set_idle_count(sup.as_ref().idle_count().saturating_sub(1));
                sup.set_data_count(sup.as_ref().data_count() + 1);
                sup.set_checksum();
            }
            self.idle = next;
            current
        } else {
            self.maxid += 1;
            let mut guard = self.pool.borrow(&self.path, 0)?;
            let mut sup = SuperBlockMut::from_page(guard.data_mut())?;
            sup.set_maxid(self.maxid);
            sup.set_data_count(sup.as_ref().data_count() + 1);
            sup.set_checksum();
            self.maxid
        };

        let mut guard = self.pool.borrow(&self.path, id)?;
        DataBlockMut::from_page(guard.data_mut())?.clear(TABLE_SPACE_ID, id, BlockKind::Data);
        debug!(table = %self.name, blockid = id, "allocated data block");
        Ok(id)
    }

    /// Returns a block to the idle chain.
    pub fn deallocate(&mut self, blockid: u32) -> Result<()> {
        {
            let mut guard = self.pool.borrow(&self.path, blockid)?;
            let mut block = DataBlockMut::from_page(guard.data_mut())?;
            block.set_kind(BlockKind::Idle);
            block.set_idle_next(self.idle);
            block.set_checksum();
        }

        let mut guard = self.pool.borrow(&self.path, 0)?;
        let mut sup = SuperBlockMut::from_page(guard.data_mut())?;
        sup.set_idle(blockid);
        sup.set_idle_count(sup.as_ref().idle_count() + 1);
        sup.set_data_count(sup.as_ref().data_count().saturating_sub(1));
        sup.set_checksum();

        self.idle = blockid;
        debug!(table = %self.name, blockid, "freed data block");
        Ok(())
    }

    /// Finds the block a key belongs to by walking first-record keys along
    /// the chain. A fresh table materializes its first block here.
    pub fn locate(&mut self, key_bytes: &[u8]) -> Result<u32> {
        if self.first == 0 {
            let id = self.allocate()?;
            let mut guard = self.pool.borrow(&self.path, 0)?;
            let mut sup = SuperBlockMut::from_page(guard.data_mut())?;
            sup.set_first(id);
            sup.set_checksum();
            self.first = id;
            return Ok(id);
        }

        let kind = self.key_type();
        let key = self.key_index();
        let mut prev = self.first;
        let mut blockid = self.first;

        while blockid != 0 {
            let guard = self.pool.borrow(&self.path, blockid)?;
            let block = DataBlock::from_page(guard.data())?;

            if block.slots() == 0 {
                prev = blockid;
                blockid = block.next();
                continue;
            }

            let first_key = block.key_at(0, key)?;
            if kind.less(first_key, key_bytes) {
                prev = blockid;
                blockid = block.next();
                continue;
            }
            if kind.less(key_bytes, first_key) {
                return Ok(prev);
            }
            return Ok(blockid);
        }
        Ok(prev)
    }

    /// Inserts a row into the given block, splitting it on overflow.
    /// Duplicate keys are an error and leave the table unchanged.
    pub fn insert(&mut self, blockid: u32, row: &[&[u8]]) -> Result<()> {
        ensure!(
            row.len() == self.info.count as usize,
            "row has {} fields, table '{}' has {}",
            row.len(),
            self.name,
            self.info.count
        );

        let kind = self.key_type();
        let key = self.key_index();

        let outcome = {
            let mut guard = self.pool.borrow(&self.path, blockid)?;
            DataBlockMut::from_page(guard.data_mut())?.insert_record(row, kind, key)?
        };

        match outcome {
            InsertOutcome::Inserted => {
                self.bump_records(1)?;
                Ok(())
            }
            InsertOutcome::Duplicate => {
                bail!("duplicate key in table '{}'", self.name)
            }
            InsertOutcome::NeedsSplit(pos) => self
                .split_insert(blockid, row, pos as usize)
                .wrap_err_with(|| format!("failed to split block {} of '{}'", blockid, self.name)),
        }
    }

    /// Overflow path of [`Table::insert`]: cut the block, migrate the
    /// upper slots to a fresh block spliced after it, and place the
    /// incoming row on its side of the cut.
    fn split_insert(&mut self, blockid: u32, row: &[&[u8]], insert_pos: usize) -> Result<()> {
        let kind = self.key_type();
        let key = self.key_index();

        let (split_slot, left_side) = {
            let guard = self.pool.borrow(&self.path, blockid)?;
            DataBlock::from_page(guard.data())?.split_position(record::size(row), insert_pos)?
        };

        // The new block exists before the source is touched, so a failure
        // below cannot lose records.
        let new_id = self.allocate()?;
        debug!(
            table = %self.name,
            from = blockid,
            to = new_id,
            split_slot,
            left_side,
            "splitting data block"
        );

        let mut src_guard = self.pool.borrow(&self.path, blockid)?;
        let mut dst_guard = self.pool.borrow(&self.path, new_id)?;

        loop {
            let copied = {
                let src = DataBlock::from_page(src_guard.data())?;
                if (src.slots() as usize) <= split_slot {
                    break;
                }
                let span = src.record_span(split_slot)?;
                DataBlockMut::from_page(dst_guard.data_mut())?.copy_record(span, kind, key)?
            };
            ensure!(copied, "split target block {} ran out of space", new_id);
            DataBlockMut::from_page(src_guard.data_mut())?.deallocate(split_slot)?;
        }

        let target = if left_side {
            &mut src_guard
        } else {
            &mut dst_guard
        };
        match DataBlockMut::from_page(target.data_mut())?.insert_record(row, kind, key)? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Duplicate => bail!("duplicate key in table '{}'", self.name),
            InsertOutcome::NeedsSplit(_) => {
                bail!("record does not fit in either half of the split")
            }
        }

        let old_next = DataBlock::from_page(src_guard.data())?.next();
        {
            let mut dst = DataBlockMut::from_page(dst_guard.data_mut())?;
            dst.set_next(old_next);
            dst.set_checksum();
        }
        {
            let mut src = DataBlockMut::from_page(src_guard.data_mut())?;
            src.set_next(new_id);
            src.set_checksum();
        }

        self.bump_records(1)?;
        Ok(())
    }

    /// Removes the record with the given key from the block. Returns
    /// `Ok(false)` when the key is not there.
    pub fn remove(&mut self, blockid: u32, key_bytes: &[u8]) -> Result<bool> {
        let kind = self.key_type();
        let key = self.key_index();

        let removed = {
            let mut guard = self.pool.borrow(&self.path, blockid)?;
            let (pos, found) = {
                let block = DataBlock::from_page(guard.data())?;
                let pos = block.lower_bound(kind, key, key_bytes)?;
                let found = pos < block.slots() as usize
                    && kind.equal(block.key_at(pos, key)?, key_bytes);
                (pos, found)
            };
            if found {
                let mut block = DataBlockMut::from_page(guard.data_mut())?;
                block.deallocate(pos)?;
                block.set_checksum();
            }
            found
        };

        if !removed {
            return Ok(false);
        }

        self.try_merge(blockid)?;
        self.bump_records(-1)?;
        Ok(true)
    }

    /// After a delete leaves the block more than half reclaimable, absorb
    /// the successor when its contents fit, otherwise even out the slot
    /// counts.
    fn try_merge(&mut self, blockid: u32) -> Result<()> {
        let kind = self.key_type();
        let key = self.key_index();

        let (freesize, next_id) = {
            let guard = self.pool.borrow(&self.path, blockid)?;
            let block = DataBlock::from_page(guard.data())?;
            (block.freesize() as usize, block.next())
        };
        if freesize <= MERGE_THRESHOLD || next_id == 0 {
            return Ok(());
        }

        let mut src_guard = self.pool.borrow(&self.path, blockid)?;
        let mut next_guard = self.pool.borrow(&self.path, next_id)?;

        let next_used = DATA_CAPACITY
            - DataBlock::from_page(next_guard.data())?.freesize() as usize;

        if next_used <= freesize {
            // Absorb: the successor's whole payload fits in here.
            if next_used > DataBlock::from_page(src_guard.data())?.freespace_size() {
                let mut src = DataBlockMut::from_page(src_guard.data_mut())?;
                src.shrink()?;
                src.reorder(kind, key)?;
            }

            loop {
                let copied = {
                    let nb = DataBlock::from_page(next_guard.data())?;
                    if nb.slots() == 0 {
                        break;
                    }
                    let span = nb.record_span(0)?;
                    DataBlockMut::from_page(src_guard.data_mut())?.copy_record(span, kind, key)?
                };
                if !copied {
                    break;
                }
                DataBlockMut::from_page(next_guard.data_mut())?.deallocate(0)?;
            }

            if DataBlock::from_page(next_guard.data())?.slots() == 0 {
                let after = DataBlock::from_page(next_guard.data())?.next();
                let mut src = DataBlockMut::from_page(src_guard.data_mut())?;
                src.set_next(after);
                src.set_checksum();

                drop(next_guard);
                drop(src_guard);
                self.deallocate(next_id)?;
                debug!(table = %self.name, absorbed = next_id, into = blockid, "merged blocks");
            } else {
                // Trailer growth got in the way of the last records; the
                // move so far is a valid rebalance, keep both blocks.
                DataBlockMut::from_page(next_guard.data_mut())?.set_checksum();
            }
            return Ok(());
        }

        let next_slots = DataBlock::from_page(next_guard.data())?.slots();
        let my_slots = DataBlock::from_page(src_guard.data())?.slots();
        if next_slots > my_slots {
            let mut diff = (next_slots - my_slots) / 2;
            let mut shrunk = false;
            while diff > 0 {
                let copied = {
                    let nb = DataBlock::from_page(next_guard.data())?;
                    let span = nb.record_span(0)?;
                    DataBlockMut::from_page(src_guard.data_mut())?.copy_record(span, kind, key)?
                };
                if !copied {
                    if shrunk {
                        break;
                    }
                    let mut src = DataBlockMut::from_page(src_guard.data_mut())?;
                    src.shrink()?;
                    src.reorder(kind, key)?;
                    shrunk = true;
                    continue;
                }
                DataBlockMut::from_page(next_guard.data_mut())?.deallocate(0)?;
                diff -= 1;
            }
            DataBlockMut::from_page(next_guard.data_mut())?.set_checksum();
            DataBlockMut::from_page(src_guard.data_mut())?.set_checksum();
            debug!(table = %self.name, from = next_id, into = blockid, "rebalanced blocks");
        }
        Ok(())
    }

    /// Replaces the record whose key matches the row's key field. Returns
    /// `Ok(false)` when the key is missing; on placement failure the
    /// original record is restored and `Ok(false)` is returned.
    pub fn update(&mut self, blockid: u32, row: &[&[u8]]) -> Result<bool> {
        ensure!(
            row.len() == self.info.count as usize,
            "row has {} fields, table '{}' has {}",
            row.len(),
            self.name,
            self.info.count
        );

        let kind = self.key_type();
        let key = self.key_index();
        let key_bytes = row[key];

        let saved = {
            let guard = self.pool.borrow(&self.path, blockid)?;
            let block = DataBlock::from_page(guard.data())?;
            let pos = block.lower_bound(kind, key, key_bytes)?;
            if pos >= block.slots() as usize
                || !kind.equal(block.key_at(pos, key)?, key_bytes)
            {
                return Ok(false);
            }
            block.record_span(pos)?.to_vec()
        };

        if !self.remove(blockid, key_bytes)? {
            return Ok(false);
        }

        match self.insert(blockid, row) {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!(table = %self.name, "update failed, restoring original: {err}");
                let target = self.locate(key_bytes)?;
                let mut guard = self.pool.borrow(&self.path, target)?;
                let restored = DataBlockMut::from_page(guard.data_mut())?
                    .copy_record(&saved, kind, key)?;
                ensure!(
                    restored,
                    "failed to restore record after update failure: {}",
                    err
                );
                drop(guard);
                self.bump_records(1)?;
                Ok(false)
            }
        }
    }

    /// Adjusts the live-record counter in the super block.
    fn bump_records(&mut self, delta: i64) -> Result<()> {
        let mut guard = self.pool.borrow(&self.path, 0)?;
        let mut sup = SuperBlockMut::from_page(guard.data_mut())?;
        let records = sup.as_ref().records() as i64 + delta;
        sup.set_records(records.max(0) as u64);
        sup.set_checksum();
        Ok(())
    }

    /// Live records in the table.
    pub fn record_count(&self) -> Result<u64> {
        let guard = self.pool.borrow(&self.path, 0)?;
        Ok(SuperBlock::from_page(guard.data())?.records())
    }

    /// Blocks on the data chain.
    pub fn data_count(&self) -> Result<u32> {
        let guard = self.pool.borrow(&self.path, 0)?;
        Ok(SuperBlock::from_page(guard.data())?.data_count())
    }

    /// Blocks on the idle chain.
    pub fn idle_count(&self) -> Result<u32> {
        let guard = self.pool.borrow(&self.path, 0)?;
        Ok(SuperBlock::from_page(guard.data())?.idle_count())
    }

    /// Iterator over the data chain, borrowing one block at a time.
    pub fn blocks(&self) -> BlockChain {
        BlockChain {
            pool: self.pool.clone(),
            path: self.path.clone(),
            next: self.first,
        }
    }
}

/// Forward iterator over a table's data chain.
///
/// Each step borrows the pool afresh; the yielded guard is the only handle
/// kept, so block views never survive an advance.
pub struct BlockChain {
    pool: BufferPool,
    path: String,
    next: u32,
}

impl Iterator for BlockChain {
    type Item = Result<BlockGuard>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 {
            return None;
        }
        let guard = match self.pool.borrow(&self.path, self.next) {
            Ok(guard) => guard,
            Err(err) => {
                self.next = 0;
                return Some(Err(err));
            }
        };
        self.next = match DataBlock::from_page(guard.data()) {
            Ok(block) => block.next(),
            Err(err) => {
                self.next = 0;
                return Some(Err(err));
            }
        };
        Some(Ok(guard))
    }
}
