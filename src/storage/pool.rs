//! # Buffer Pool
//!
//! An identity-keyed cache of block buffers sitting between the block views
//! and the files. Every disk block the engine touches is borrowed from
//! here; the pool owns the bytes, tracks pins and dirt, and writes frames
//! back on eviction and flush.
//!
//! ## Keys
//!
//! Frames are keyed by `(file name, block id)` with **string equality** on
//! the name: callers reach the same table through `&str`s of different
//! provenance (catalog rows, table handles, iterators), so pointer identity
//! would silently split the cache.
//!
//! ## Borrow Protocol
//!
//! 1. [`BufferPool::borrow`] pins the frame and returns a [`BlockGuard`].
//! 2. The guard hands out `&[u8]` / `&mut [u8]` over the frame; mutable
//!    access marks the frame dirty.
//! 3. Dropping the guard unpins; the frame stays cached and becomes
//!    evictable at pin count zero.
//!
//! A cache miss evicts the least-recently-used unpinned frame first,
//! writing it back if dirty. Borrowing while every frame is pinned is an
//! error: the engine never holds more than a handful of pins at once, so
//! that state is a leak, not load.
//!
//! ## Lazy Reads
//!
//! A missed borrow reads the whole block from disk (`SUPER_SIZE` for block
//! 0, `BLOCK_SIZE` otherwise). Files grow lazily, so a read past EOF
//! yields zeroes; a `clear` on the block view turns that into a valid
//! page.
//!
//! ## Handles and Aliasing
//!
//! `BufferPool` is a cheap-clone handle over shared interior state; clones
//! address the same cache, and the last one dropped performs the final
//! write-back. Guard data access goes through a raw pointer captured at
//! borrow time; the pin keeps the frame alive and the heap allocation
//! never moves, so the pointer stays valid for the guard's lifetime. The
//! engine is single-writer cooperative: callers must not borrow the same
//! block mutably twice at once, mirroring the discipline the block views
//! already demand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::file::{self, TableFile};
use super::{block_len, block_offset};
use crate::config::{BLOCK_SIZE, MIN_CACHE_FRAMES};

/// Cache identity of one block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub file: String,
    pub blockid: u32,
}

impl BlockKey {
    pub fn new(file: impl Into<String>, blockid: u32) -> Self {
        Self {
            file: file.into(),
            blockid,
        }
    }
}

struct Frame {
    data: Box<[u8]>,
    pin_count: u32,
    dirty: bool,
    tick: u64,
}

struct PoolInner {
    frames: HashMap<BlockKey, Frame>,
    files: HashMap<String, TableFile>,
    capacity: usize,
    tick: u64,
}

impl PoolInner {
    fn file_for(&mut self, base: &Path, name: &str) -> Result<&mut TableFile> {
        if !self.files.contains_key(name) {
            let file = TableFile::open_or_create(base.join(name))?;
            self.files.insert(name.to_string(), file);
        }
        Ok(self.files.get_mut(name).unwrap()) // INVARIANT: inserted above
    }

    /// Evicts the least-recently-used unpinned frame, writing it back if
    /// dirty. Errors when every frame is pinned.
    fn evict_one(&mut self, base: &Path) -> Result<()> {
        let victim = self
            .frames
            .iter()
            .filter(|(_, f)| f.pin_count == 0)
            .min_by_key(|(_, f)| f.tick)
            .map(|(k, _)| k.clone());

        let Some(key) = victim else {
            bail!(
                "buffer pool exhausted: all {} frames are pinned",
                self.frames.len()
            );
        };

        let frame = self.frames.remove(&key).unwrap(); // INVARIANT: key came from the map
        if frame.dirty {
            debug!(file = %key.file, blockid = key.blockid, "write-back on eviction");
            let file = self.file_for(base, &key.file)?;
            file.write_at(block_offset(key.blockid), &frame.data)?;
        }
        Ok(())
    }

    fn write_back_all(&mut self, base: &Path) -> Result<usize> {
        let dirty_keys: Vec<BlockKey> = self
            .frames
            .iter()
            .filter(|(_, f)| f.dirty)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &dirty_keys {
            let (ptr, len) = {
                let frame = self.frames.get(key).unwrap(); // INVARIANT: collected above
                (frame.data.as_ptr(), frame.data.len())
            };
            // SAFETY: the frame stays in the map for the duration of the
            // write; exclusive access to the inner state means nothing can
            // evict or mutate it meanwhile.
            let data = unsafe { std::slice::from_raw_parts(ptr, len) };
            let file = self.file_for(base, &key.file)?;
            file.write_at(block_offset(key.blockid), data)?;
            self.frames.get_mut(key).unwrap().dirty = false;
        }
        Ok(dirty_keys.len())
    }
}

struct PoolShared {
    base: PathBuf,
    inner: Mutex<PoolInner>,
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        // Final write-back; these bytes have no other owner.
        let inner = self.inner.get_mut();
        if let Err(e) = inner.write_back_all(&self.base) {
            warn!("final write-back failed: {e}");
        }
    }
}

/// Cheap-clone handle on a block cache rooted at one database directory.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Creates a pool rooted at `base` with roughly `cache_bytes` of frame
    /// budget (never fewer than [`MIN_CACHE_FRAMES`] frames).
    pub fn new<P: AsRef<Path>>(base: P, cache_bytes: usize) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        std::fs::create_dir_all(&base)
            .map_err(|e| eyre::eyre!("failed to create '{}': {}", base.display(), e))?;

        let capacity = (cache_bytes / BLOCK_SIZE).max(MIN_CACHE_FRAMES);
        Ok(Self {
            shared: Arc::new(PoolShared {
                base,
                inner: Mutex::new(PoolInner {
                    frames: HashMap::with_capacity(capacity),
                    files: HashMap::new(),
                    capacity,
                    tick: 0,
                }),
            }),
        })
    }

    pub fn base(&self) -> &Path {
        &self.shared.base
    }

    /// Number of frames currently cached.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pins the block and returns a guard over its bytes, reading from disk
    /// on a miss.
    pub fn borrow(&self, name: &str, blockid: u32) -> Result<BlockGuard> {
        let key = BlockKey::new(name, blockid);
        let mut inner = self.shared.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(frame) = inner.frames.get_mut(&key) {
            frame.pin_count += 1;
            frame.tick = tick;
            let ptr = frame.data.as_ptr() as *mut u8;
            let len = frame.data.len();
            return Ok(BlockGuard {
                pool: self.clone(),
                key,
                ptr,
                len,
            });
        }

        while inner.frames.len() >= inner.capacity {
            inner.evict_one(&self.shared.base)?;
        }

        let len = block_len(blockid);
        let mut data = vec![0u8; len].into_boxed_slice();
        let base = self.shared.base.clone();
        let file = inner.file_for(&base, name)?;
        file.read_at(block_offset(blockid), &mut data)?;

        let ptr = data.as_ptr() as *mut u8;
        inner.frames.insert(
            key.clone(),
            Frame {
                data,
                pin_count: 1,
                dirty: false,
                tick,
            },
        );

        Ok(BlockGuard {
            pool: self.clone(),
            key,
            ptr,
            len,
        })
    }

    fn unpin(&self, key: &BlockKey) {
        let mut inner = self.shared.inner.lock();
        if let Some(frame) = inner.frames.get_mut(key) {
            debug_assert!(frame.pin_count > 0, "unpin of an unpinned frame");
            frame.pin_count = frame.pin_count.saturating_sub(1);
        }
    }

    fn mark_dirty(&self, key: &BlockKey) {
        let mut inner = self.shared.inner.lock();
        if let Some(frame) = inner.frames.get_mut(key) {
            frame.dirty = true;
        }
    }

    /// True iff the frame is currently marked dirty.
    pub fn is_dirty(&self, name: &str, blockid: u32) -> bool {
        let key = BlockKey::new(name, blockid);
        self.shared
            .inner
            .lock()
            .frames
            .get(&key)
            .map(|f| f.dirty)
            .unwrap_or(false)
    }

    /// Writes every dirty frame back to its file. Returns the number of
    /// frames written.
    pub fn flush(&self) -> Result<usize> {
        let mut inner = self.shared.inner.lock();
        let base = self.shared.base.clone();
        inner.write_back_all(&base)
    }

    /// Syncs every open file to disk.
    pub fn sync(&self) -> Result<()> {
        let inner = self.shared.inner.lock();
        for file in inner.files.values() {
            file.sync()?;
        }
        Ok(())
    }

    /// Drops every cached frame and open handle for `name`, then deletes
    /// the file. Fails if any of its frames is still pinned.
    pub fn remove_file(&self, name: &str) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        let pinned = inner
            .frames
            .iter()
            .any(|(k, f)| k.file == name && f.pin_count > 0);
        ensure!(!pinned, "cannot remove '{}': blocks still borrowed", name);

        inner.frames.retain(|k, _| k.file != name);
        inner.files.remove(name);
        file::remove(self.shared.base.join(name))
    }
}

/// RAII pin over one cached block.
///
/// Holds the pool alive, keeps the frame pinned, and unpins on drop.
/// Mutable access marks the frame dirty.
pub struct BlockGuard {
    pool: BufferPool,
    key: BlockKey,
    ptr: *mut u8,
    len: usize,
}

impl BlockGuard {
    pub fn blockid(&self) -> u32 {
        self.key.blockid
    }

    pub fn file(&self) -> &str {
        &self.key.file
    }

    pub fn data(&self) -> &[u8] {
        // SAFETY: the pin held by this guard prevents eviction, the boxed
        // frame bytes never move, and single-writer discipline rules out a
        // concurrent mutable alias.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.pool.mark_dirty(&self.key);
        // SAFETY: as in `data`, plus `&mut self` makes this the only slice
        // handed out through this guard.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    pub fn mark_dirty(&self) {
        self.pool.mark_dirty(&self.key);
    }
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        self.pool.unpin(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SUPER_SIZE;
    use tempfile::tempdir;

    fn pool_with(frames: usize) -> (BufferPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(dir.path(), frames * BLOCK_SIZE).unwrap();
        (pool, dir)
    }

    #[test]
    fn borrow_sizes_depend_on_block_id() {
        let (pool, _dir) = pool_with(8);

        let sup = pool.borrow("t.dat", 0).unwrap();
        assert_eq!(sup.data().len(), SUPER_SIZE);

        let blk = pool.borrow("t.dat", 1).unwrap();
        assert_eq!(blk.data().len(), BLOCK_SIZE);
    }

    #[test]
    fn fresh_blocks_read_as_zeroes() {
        let (pool, _dir) = pool_with(8);
        let guard = pool.borrow("t.dat", 3).unwrap();
        assert!(guard.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn writes_survive_eviction_and_reload() {
        let (pool, _dir) = pool_with(MIN_CACHE_FRAMES);

        {
            let mut guard = pool.borrow("t.dat", 1).unwrap();
            guard.data_mut()[100] = 0xAB;
        }

        // Touch enough other blocks to force the frame out.
        for id in 2..(2 + MIN_CACHE_FRAMES as u32 + 2) {
            let _ = pool.borrow("t.dat", id).unwrap();
        }

        let guard = pool.borrow("t.dat", 1).unwrap();
        assert_eq!(guard.data()[100], 0xAB);
    }

    #[test]
    fn pinned_frames_are_not_evicted() {
        let (pool, _dir) = pool_with(MIN_CACHE_FRAMES);

        let mut held = pool.borrow("t.dat", 1).unwrap();
        held.data_mut()[0] = 0x77;

        for id in 2..(2 + MIN_CACHE_FRAMES as u32 + 4) {
            let _ = pool.borrow("t.dat", id).unwrap();
        }

        // The pinned frame still has its byte, unflushed.
        assert_eq!(held.data()[0], 0x77);
    }

    #[test]
    fn all_pinned_borrow_fails() {
        let (pool, _dir) = pool_with(MIN_CACHE_FRAMES);

        let mut guards = Vec::new();
        for id in 1..=MIN_CACHE_FRAMES as u32 {
            guards.push(pool.borrow("t.dat", id).unwrap());
        }
        assert!(pool.borrow("t.dat", 999).is_err());

        guards.pop();
        assert!(pool.borrow("t.dat", 999).is_ok());
    }

    #[test]
    fn repinning_uses_the_same_frame() {
        let (pool, _dir) = pool_with(8);

        let mut a = pool.borrow("t.dat", 1).unwrap();
        a.data_mut()[0] = 1;
        drop(a);

        let b = pool.borrow("t.dat", 1).unwrap();
        assert_eq!(b.data()[0], 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn keys_compare_by_file_name_string() {
        let (pool, _dir) = pool_with(8);

        let name_a = String::from("t.dat");
        let name_b = format!("{}.dat", "t");
        let mut a = pool.borrow(&name_a, 1).unwrap();
        a.data_mut()[0] = 9;
        drop(a);

        let b = pool.borrow(&name_b, 1).unwrap();
        assert_eq!(b.data()[0], 9);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn flush_writes_dirty_frames() {
        let (pool, dir) = pool_with(8);

        {
            let mut guard = pool.borrow("t.dat", 1).unwrap();
            guard.data_mut()[0] = 0x42;
        }
        assert!(pool.is_dirty("t.dat", 1));

        let flushed = pool.flush().unwrap();
        assert_eq!(flushed, 1);
        assert!(!pool.is_dirty("t.dat", 1));

        let on_disk = std::fs::read(dir.path().join("t.dat")).unwrap();
        assert_eq!(on_disk[SUPER_SIZE], 0x42);
    }

    #[test]
    fn drop_flushes_dirty_frames() {
        let dir = tempdir().unwrap();
        {
            let pool = BufferPool::new(dir.path(), 8 * BLOCK_SIZE).unwrap();
            let mut guard = pool.borrow("t.dat", 1).unwrap();
            guard.data_mut()[7] = 0x55;
        }
        let on_disk = std::fs::read(dir.path().join("t.dat")).unwrap();
        assert_eq!(on_disk[SUPER_SIZE + 7], 0x55);
    }

    #[test]
    fn clones_share_one_cache() {
        let (pool, _dir) = pool_with(8);
        let other = pool.clone();

        {
            let mut guard = pool.borrow("t.dat", 1).unwrap();
            guard.data_mut()[0] = 0x33;
        }
        let guard = other.borrow("t.dat", 1).unwrap();
        assert_eq!(guard.data()[0], 0x33);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn remove_file_drops_frames_and_deletes() {
        let (pool, dir) = pool_with(8);

        {
            let mut guard = pool.borrow("gone.dat", 1).unwrap();
            guard.data_mut()[0] = 1;
        }
        pool.flush().unwrap();
        assert!(dir.path().join("gone.dat").exists());

        pool.remove_file("gone.dat").unwrap();
        assert!(!dir.path().join("gone.dat").exists());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn remove_file_refuses_while_borrowed() {
        let (pool, _dir) = pool_with(8);
        let _guard = pool.borrow("busy.dat", 1).unwrap();
        assert!(pool.remove_file("busy.dat").is_err());
    }
}
