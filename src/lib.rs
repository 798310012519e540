//! # Strata - Embedded Relational Storage Engine
//!
//! Strata is a single-node storage engine for relational tables: durable,
//! ordered, variable-length records in checksummed fixed-size blocks, with
//! table schemas stored as records in the engine's own format.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │       Database (aggregate)          │
//! ├──────────────────┬──────────────────┤
//! │  Schema catalog  │   Table layer    │
//! │  (_meta.db rows) │ (chain, split,   │
//! │                  │  merge, locate)  │
//! ├──────────────────┴──────────────────┤
//! │       Record codec (varint,         │
//! │       offsets, tombstones)          │
//! ├─────────────────────────────────────┤
//! │   Block views (super/data/meta,     │
//! │   slot array, shrink, reorder)      │
//! ├─────────────────────────────────────┤
//! │   Buffer pool (pinned guards,       │
//! │   LRU write-back)                   │
//! ├─────────────────────────────────────┤
//! │   File shim (positional I/O)        │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## On-Disk Format
//!
//! Every file is a 4 KB super block followed by 16 KB blocks. All integers
//! are big-endian; every block carries a magic word and a whole-block
//! checksum that must sum to zero. Records live in slotted pages whose
//! slot arrays stay sorted by the table's key; blocks chain through `next`
//! links with strictly increasing key ranges, and freed blocks queue on a
//! free chain anchored in the super block.
//!
//! ## Quick Start
//!
//! ```ignore
//! use strata::{Database, DataType, FieldInfo, RelationInfo};
//!
//! let mut db = Database::open("./mydb")?;
//! db.create_table("t", RelationInfo {
//!     path: "t.dat".into(),
//!     count: 2,
//!     kind: 0,
//!     key: 0,
//!     size: 0,
//!     rows: 0,
//!     fields: vec![
//!         FieldInfo::new("id", 0, 8, DataType::BigInt),
//!         FieldInfo::new("name", 1, -128, DataType::Varchar),
//!     ],
//! })?;
//!
//! let mut t = db.table("t")?;
//! let id = 1u64.to_be_bytes();
//! let row: [&[u8]; 2] = [&id, b"alice"];
//! let block = t.locate(&id)?;
//! t.insert(block, &row)?;
//! ```
//!
//! ## Concurrency Model
//!
//! The engine is single-writer cooperative: no internal threads, no async.
//! The buffer pool's interior is lock-protected so guards can be dropped
//! from anywhere, but callers serialize mutations themselves.
//!
//! ## Module Overview
//!
//! - [`storage`]: block formats, block views, buffer pool, file shim
//! - [`record`]: self-describing record codec with zero-copy field access
//! - [`types`]: the closed SQL type registry driving key order
//! - [`schema`]: the system catalog persisted in `_meta.db`
//! - [`table`]: per-table chain management and the write paths
//! - [`database`]: the aggregate tying a directory's state together

#[macro_use]
mod macros;

pub mod config;
pub mod database;
pub mod encoding;
pub mod record;
pub mod schema;
pub mod storage;
pub mod table;
pub mod types;

pub use database::Database;
pub use schema::{FieldInfo, RelationInfo, Schema};
pub use storage::{BlockKind, BufferPool, DataBlock, DataBlockMut, SuperBlock, SuperBlockMut};
pub use table::{BlockChain, Table};
pub use types::DataType;
