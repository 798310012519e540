//! # System Catalog
//!
//! Table schemas are ordinary records stored in the engine's own format:
//! the catalog file `_meta.db` is a super block plus a chain of meta
//! blocks, and each live record in the chain is one serialized
//! [`RelationInfo`] row. Opening the catalog loads every row into an
//! in-memory map; creating a table appends a row and writes through.
//!
//! ## Row Layout
//!
//! A relation row has `7 + 4 * count` fields:
//!
//! ```text
//! 0  table name      (UTF-8)
//! 1  data file path  (UTF-8)
//! 2  count           (u16 big-endian, number of columns)
//! 3  kind            (u16 big-endian, table kind flag)
//! 4  key             (u32 big-endian, index of the key column)
//! 5  size            (u64 big-endian)
//! 6  rows            (u64 big-endian)
//! then per column:
//!    name            (UTF-8)
//!    index           (u64 big-endian)
//!    length          (i64 big-endian; > 0 fixed, < 0 variable cap)
//!    type name       (UTF-8, resolved via DataType::parse on load)
//! ```
//!
//! Serialization is a pure function of the row: the caller's
//! `RelationInfo` is never mutated, and numeric fields are flipped to big
//! endian in scratch buffers.
//!
//! ## Meta Chain Overflow
//!
//! When the tail meta block cannot hold a new row, the catalog allocates
//! the next block id from the super block's `maxid` watermark, clears it as
//! a meta block and splices it onto the chain. `open` walks the whole
//! chain, so rows land wherever there is room.

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use tracing::debug;

use crate::config::{CATALOG_FILE_NAME, CATALOG_SPACE_ID};
use crate::record::{self, RecordView};
use crate::storage::{BlockKind, BufferPool, DataBlock, DataBlockMut, SuperBlock, SuperBlockMut};
use crate::types::DataType;

/// One column of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub index: u64,
    pub length: i64,
    pub kind: DataType,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, index: u64, length: i64, kind: DataType) -> Self {
        Self {
            name: name.into(),
            index,
            length,
            kind,
        }
    }
}

/// Schema row of one table: where its data lives and how its columns look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    /// Name of the table's data file, relative to the database directory.
    pub path: String,
    /// Number of columns; must match `fields.len()`.
    pub count: u16,
    /// Table kind flag; 0 for ordinary tables.
    pub kind: u16,
    /// Index of the key column.
    pub key: u32,
    /// Total byte size accounted to the table.
    pub size: u64,
    /// Row count accounted to the table.
    pub rows: u64,
    pub fields: Vec<FieldInfo>,
}

impl RelationInfo {
    /// Type of the key column.
    pub fn key_type(&self) -> DataType {
        self.fields[self.key as usize].kind
    }
}

/// The in-memory catalog, backed by `_meta.db`.
pub struct Schema {
    pool: BufferPool,
    tablespace: HashMap<String, RelationInfo>,
}

impl Schema {
    /// Opens the catalog, bootstrapping `_meta.db` on first use and
    /// loading every relation row from the meta chain.
    pub fn open(pool: BufferPool) -> Result<Self> {
        let mut schema = Self {
            pool,
            tablespace: HashMap::new(),
        };
        schema.load().wrap_err("failed to open the system catalog")?;
        Ok(schema)
    }

    fn load(&mut self) -> Result<()> {
        let first = {
            let mut guard = self.pool.borrow(CATALOG_FILE_NAME, 0)?;
            let fresh = !SuperBlock::from_page(guard.data())?.has_magic();
            if fresh {
                debug!("bootstrapping catalog super block");
                let mut sup = SuperBlockMut::from_page(guard.data_mut())?;
                sup.clear(CATALOG_SPACE_ID);
                sup.set_first(1);
                sup.set_maxid(1);
                sup.set_data_count(1);
                sup.set_checksum();
            }
            let sup = SuperBlock::from_page(guard.data())?;
            ensure!(sup.checksum_ok(), "catalog super block is corrupted");
            sup.first()
        };

        let mut blockid = first;
        while blockid != 0 {
            let mut guard = self.pool.borrow(CATALOG_FILE_NAME, blockid)?;
            if !DataBlock::from_page(guard.data())?.has_magic() {
                DataBlockMut::from_page(guard.data_mut())?.clear(
                    CATALOG_SPACE_ID,
                    blockid,
                    BlockKind::Meta,
                );
            }

            let block = DataBlock::from_page(guard.data())?;
            ensure!(
                block.checksum_ok(),
                "catalog meta block {} is corrupted",
                blockid
            );
            ensure!(
                block.kind() == Some(BlockKind::Meta),
                "catalog block {} has kind {:?}, expected meta",
                blockid,
                block.kind()
            );

            for rec in block.records() {
                let view = rec?;
                if !view.is_active() {
                    continue;
                }
                let (name, info) = decode_row(&view)
                    .wrap_err_with(|| format!("bad relation row in meta block {}", blockid))?;
                self.tablespace.insert(name, info);
            }
            blockid = block.next();
        }

        debug!(tables = self.tablespace.len(), "catalog loaded");
        Ok(())
    }

    /// Registers a table and persists its row in the meta chain.
    pub fn create(&mut self, table: &str, info: RelationInfo) -> Result<()> {
        ensure!(
            info.count as usize == info.fields.len(),
            "relation count {} disagrees with {} fields",
            info.count,
            info.fields.len()
        );
        ensure!(
            (info.key as usize) < info.fields.len(),
            "key index {} out of range for {} fields",
            info.key,
            info.fields.len()
        );
        ensure!(!table.is_empty(), "table name must not be empty");
        if self.tablespace.contains_key(table) {
            bail!("table '{}' already exists", table);
        }

        let owned = encode_row(table, &info);
        let fields: Vec<&[u8]> = owned.iter().map(|f| f.as_slice()).collect();
        let length = record::size(&fields);

        self.append_row(&fields, length)
            .wrap_err_with(|| format!("failed to persist relation '{}'", table))?;
        self.tablespace.insert(table.to_string(), info);
        self.pool.flush()?;
        Ok(())
    }

    /// Writes one encoded row into the first meta block with room,
    /// extending the chain when the tail is full.
    fn append_row(&mut self, fields: &[&[u8]], length: usize) -> Result<()> {
        ensure!(
            crate::config::align8(length) <= crate::config::DATA_CAPACITY,
            "relation row of {} bytes exceeds meta block capacity",
            length
        );
        let first = {
            let guard = self.pool.borrow(CATALOG_FILE_NAME, 0)?;
            SuperBlock::from_page(guard.data())?.first()
        };

        let mut blockid = first;
        loop {
            let mut guard = self.pool.borrow(CATALOG_FILE_NAME, blockid)?;

            let allocated = DataBlockMut::from_page(guard.data_mut())?.allocate(length)?;
            if let Some(off) = allocated {
                let off = off as usize;
                let span = crate::config::align8(length);
                record::write(
                    &mut guard.data_mut()[off..off + span],
                    fields,
                    record::ALIVE,
                )?;
                DataBlockMut::from_page(guard.data_mut())?.set_checksum();
                return Ok(());
            }

            let next = DataBlock::from_page(guard.data())?.next();
            if next != 0 {
                blockid = next;
                continue;
            }

            // Tail is full: splice a fresh meta block onto the chain.
            let new_id = {
                let mut guard = self.pool.borrow(CATALOG_FILE_NAME, 0)?;
                let mut sup = SuperBlockMut::from_page(guard.data_mut())?;
                let new_id = sup.as_ref().maxid() + 1;
                sup.set_maxid(new_id);
                sup.set_data_count(sup.as_ref().data_count() + 1);
                sup.set_checksum();
                new_id
            };
            debug!(new_id, "extending catalog meta chain");

            {
                let mut guard = self.pool.borrow(CATALOG_FILE_NAME, new_id)?;
                DataBlockMut::from_page(guard.data_mut())?.clear(
                    CATALOG_SPACE_ID,
                    new_id,
                    BlockKind::Meta,
                );
            }

            let mut block = DataBlockMut::from_page(guard.data_mut())?;
            block.set_next(new_id);
            block.set_checksum();
            blockid = new_id;
        }
    }

    /// Looks up a relation by table name.
    pub fn lookup(&self, table: &str) -> Option<&RelationInfo> {
        self.tablespace.get(table)
    }

    /// Iterates the known tables.
    pub fn tables(&self) -> impl Iterator<Item = (&String, &RelationInfo)> {
        self.tablespace.iter()
    }

    pub fn len(&self) -> usize {
        self.tablespace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tablespace.is_empty()
    }

    /// Deletes the catalog file and forgets every table.
    pub fn destroy(mut self) -> Result<()> {
        self.tablespace.clear();
        self.pool.remove_file(CATALOG_FILE_NAME)
    }
}

/// Serializes one relation row into owned field buffers; pure in `info`.
fn encode_row(table: &str, info: &RelationInfo) -> Vec<Vec<u8>> {
    let mut out = Vec::with_capacity(7 + 4 * info.fields.len());
    out.push(table.as_bytes().to_vec());
    out.push(info.path.as_bytes().to_vec());
    out.push(info.count.to_be_bytes().to_vec());
    out.push(info.kind.to_be_bytes().to_vec());
    out.push(info.key.to_be_bytes().to_vec());
    out.push(info.size.to_be_bytes().to_vec());
    out.push(info.rows.to_be_bytes().to_vec());
    for field in &info.fields {
        out.push(field.name.as_bytes().to_vec());
        out.push(field.index.to_be_bytes().to_vec());
        out.push(field.length.to_be_bytes().to_vec());
        out.push(field.kind.name().as_bytes().to_vec());
    }
    out
}

/// Decodes one relation row.
fn decode_row(view: &RecordView<'_>) -> Result<(String, RelationInfo)> {
    let fields = view.fields()?;
    ensure!(
        fields.len() >= 7,
        "relation row has {} fields, expected at least 7",
        fields.len()
    );

    let table = utf8(fields[0], "table name")?;
    let path = utf8(fields[1], "path")?;
    let count = be_u16(fields[2], "count")?;
    let kind = be_u16(fields[3], "kind")?;
    let key = be_u32(fields[4], "key")?;
    let size = be_u64(fields[5], "size")?;
    let rows = be_u64(fields[6], "rows")?;

    ensure!(
        fields.len() == 7 + 4 * count as usize,
        "relation row has {} fields, expected {} for {} columns",
        fields.len(),
        7 + 4 * count as usize,
        count
    );
    ensure!(
        (key as usize) < count as usize,
        "relation key index {} out of range for {} columns",
        key,
        count
    );

    let mut columns = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let base = 7 + 4 * i;
        let name = utf8(fields[base], "column name")?;
        let index = be_u64(fields[base + 1], "column index")?;
        let length = be_u64(fields[base + 2], "column length")? as i64;
        let type_name = utf8(fields[base + 3], "column type")?;
        let kind = DataType::parse(&type_name)
            .ok_or_else(|| eyre::eyre!("unknown column type '{}'", type_name))?;
        columns.push(FieldInfo::new(name, index, length, kind));
    }

    Ok((
        table,
        RelationInfo {
            path,
            count,
            kind,
            key,
            size,
            rows,
            fields: columns,
        },
    ))
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    Ok(std::str::from_utf8(bytes)
        .map_err(|_| eyre::eyre!("{} is not valid UTF-8", what))?
        .to_string())
}

fn be_u16(bytes: &[u8], what: &str) -> Result<u16> {
    ensure!(bytes.len() == 2, "{} has {} bytes, expected 2", what, bytes.len());
    Ok(u16::from_be_bytes(bytes.try_into().unwrap())) // INVARIANT: length checked
}

fn be_u32(bytes: &[u8], what: &str) -> Result<u32> {
    ensure!(bytes.len() == 4, "{} has {} bytes, expected 4", what, bytes.len());
    Ok(u32::from_be_bytes(bytes.try_into().unwrap())) // INVARIANT: length checked
}

fn be_u64(bytes: &[u8], what: &str) -> Result<u64> {
    ensure!(bytes.len() == 8, "{} has {} bytes, expected 8", what, bytes.len());
    Ok(u64::from_be_bytes(bytes.try_into().unwrap())) // INVARIANT: length checked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::align8;
    use tempfile::tempdir;

    fn phone_book() -> RelationInfo {
        RelationInfo {
            path: "t.dat".to_string(),
            count: 3,
            kind: 0,
            key: 0,
            size: 0,
            rows: 0,
            fields: vec![
                FieldInfo::new("id", 0, 8, DataType::BigInt),
                FieldInfo::new("phone", 1, 20, DataType::Char),
                FieldInfo::new("name", 2, -128, DataType::Varchar),
            ],
        }
    }

    #[test]
    fn row_encoding_roundtrips() {
        let info = phone_book();
        let owned = encode_row("t", &info);
        let fields: Vec<&[u8]> = owned.iter().map(|f| f.as_slice()).collect();

        let mut buf = vec![0u8; align8(record::size(&fields))];
        record::write(&mut buf, &fields, record::ALIVE).unwrap();

        let view = RecordView::new(&buf).unwrap();
        let (table, decoded) = decode_row(&view).unwrap();
        assert_eq!(table, "t");
        assert_eq!(decoded, info);
    }

    #[test]
    fn encode_row_does_not_mutate_the_relation() {
        let info = phone_book();
        let copy = info.clone();
        let _ = encode_row("t", &info);
        assert_eq!(info, copy);
    }

    #[test]
    fn decode_rejects_count_mismatch() {
        let info = phone_book();
        let mut owned = encode_row("t", &info);
        owned[2] = 5u16.to_be_bytes().to_vec(); // claim five columns
        let fields: Vec<&[u8]> = owned.iter().map(|f| f.as_slice()).collect();

        let mut buf = vec![0u8; align8(record::size(&fields))];
        record::write(&mut buf, &fields, record::ALIVE).unwrap();
        assert!(decode_row(&RecordView::new(&buf).unwrap()).is_err());
    }

    #[test]
    fn decode_rejects_unknown_type_name() {
        let info = phone_book();
        let mut owned = encode_row("t", &info);
        let last = owned.len() - 1;
        owned[last] = b"FLOAT".to_vec();
        let fields: Vec<&[u8]> = owned.iter().map(|f| f.as_slice()).collect();

        let mut buf = vec![0u8; align8(record::size(&fields))];
        record::write(&mut buf, &fields, record::ALIVE).unwrap();
        assert!(decode_row(&RecordView::new(&buf).unwrap()).is_err());
    }

    #[test]
    fn create_validates_count_and_duplicates() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(dir.path(), crate::config::DEFAULT_CACHE_BYTES).unwrap();
        let mut schema = Schema::open(pool).unwrap();

        let mut bad = phone_book();
        bad.count = 2;
        assert!(schema.create("t", bad).is_err());

        schema.create("t", phone_book()).unwrap();
        let err = schema.create("t", phone_book());
        assert!(err.is_err());
        assert_eq!(schema.len(), 1);
    }

    #[test]
    fn created_tables_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let pool = BufferPool::new(dir.path(), crate::config::DEFAULT_CACHE_BYTES).unwrap();
            let mut schema = Schema::open(pool).unwrap();
            schema.create("t", phone_book()).unwrap();
        }

        let pool = BufferPool::new(dir.path(), crate::config::DEFAULT_CACHE_BYTES).unwrap();
        let schema = Schema::open(pool).unwrap();
        let info = schema.lookup("t").expect("t survives reopen");
        assert_eq!(info, &phone_book());
        assert!(schema.lookup("missing").is_none());
    }
}
