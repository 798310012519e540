//! # Database Aggregate
//!
//! One `Database` value wires together the engine's shared state: a block
//! cache over the database directory and the system catalog loaded from
//! `_meta.db`. There are no process-wide globals; tests and embedders
//! create as many independent databases as they like, each rooted in its
//! own directory.

use std::path::Path;
use eyre::Result;

use crate::config::DEFAULT_CACHE_BYTES;
use crate::schema::{RelationInfo, Schema};
use crate::storage::BufferPool;
use crate::table::Table;

/// An open database directory: block cache plus catalog.
pub struct Database {
    pool: BufferPool,
    schema: Schema,
}

impl Database {
    /// Opens (or creates) a database in `dir` with the default cache
    /// budget.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::with_cache(dir, DEFAULT_CACHE_BYTES)
    }

    /// Opens (or creates) a database with an explicit cache budget in
    /// bytes.
    pub fn with_cache<P: AsRef<Path>>(dir: P, cache_bytes: usize) -> Result<Self> {
        let pool = BufferPool::new(dir, cache_bytes)?;
        let schema = Schema::open(pool.clone())?;
        Ok(Self { pool, schema })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Registers a table in the catalog.
    pub fn create_table(&mut self, name: &str, info: RelationInfo) -> Result<()> {
        self.schema.create(name, info)
    }

    /// Opens a handle on a cataloged table.
    pub fn table(&self, name: &str) -> Result<Table> {
        Table::open(self.pool.clone(), &self.schema, name)
    }

    /// Writes every dirty cached block back to its file.
    pub fn flush(&self) -> Result<usize> {
        self.pool.flush()
    }

    /// Flushes and syncs all open files.
    pub fn sync(&self) -> Result<()> {
        self.pool.flush()?;
        self.pool.sync()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }
}
