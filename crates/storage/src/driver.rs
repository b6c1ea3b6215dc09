#![forbid(unsafe_code)]

use crate::bounds::ScanBounds;
use crate::error::StoreError;
use crate::memory::MemoryDriver;
use crate::sqlite::SqliteDriver;
use ps_core::{IndexDef, Row, RowId, TableDef};

/// Contract every storage backend implements.
///
/// Drivers trust the engine to have validated table and index names against the
/// registered schema. For the same calls, every driver returns the same rows in
/// the same order.
pub trait Driver: Send {
    /// Registers tables and builds their (empty) indexes. Re-registering is a no-op.
    fn load_tables(&mut self, tables: &[TableDef]) -> Result<(), StoreError>;

    /// Rows of `table` in `index` order, restricted by `bounds`.
    ///
    /// The index walk is lazy and stops once `limit` is reached; the driver then
    /// materializes the selected rows.
    fn select_key(
        &self,
        table: &TableDef,
        index: &IndexDef,
        bounds: &ScanBounds,
    ) -> Result<Vec<Row>, StoreError>;

    /// Adds rows to the table and every index. Fails on an id that already exists.
    fn insert(&mut self, table: &TableDef, rows: &[Row]) -> Result<usize, StoreError>;

    /// Drops rows from every index and the table, returning the rows that existed.
    fn delete(&mut self, table: &TableDef, ids: &[RowId]) -> Result<Vec<Row>, StoreError>;

    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Backend picked at runtime.
#[derive(Debug)]
pub enum AnyDriver {
    Memory(MemoryDriver),
    Sqlite(SqliteDriver),
}

impl Driver for AnyDriver {
    fn load_tables(&mut self, tables: &[TableDef]) -> Result<(), StoreError> {
        match self {
            AnyDriver::Memory(driver) => driver.load_tables(tables),
            AnyDriver::Sqlite(driver) => driver.load_tables(tables),
        }
    }

    fn select_key(
        &self,
        table: &TableDef,
        index: &IndexDef,
        bounds: &ScanBounds,
    ) -> Result<Vec<Row>, StoreError> {
        match self {
            AnyDriver::Memory(driver) => driver.select_key(table, index, bounds),
            AnyDriver::Sqlite(driver) => driver.select_key(table, index, bounds),
        }
    }

    fn insert(&mut self, table: &TableDef, rows: &[Row]) -> Result<usize, StoreError> {
        match self {
            AnyDriver::Memory(driver) => driver.insert(table, rows),
            AnyDriver::Sqlite(driver) => driver.insert(table, rows),
        }
    }

    fn delete(&mut self, table: &TableDef, ids: &[RowId]) -> Result<Vec<Row>, StoreError> {
        match self {
            AnyDriver::Memory(driver) => driver.delete(table, ids),
            AnyDriver::Sqlite(driver) => driver.delete(table, ids),
        }
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        match self {
            AnyDriver::Memory(driver) => driver.begin(),
            AnyDriver::Sqlite(driver) => driver.begin(),
        }
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        match self {
            AnyDriver::Memory(driver) => driver.commit(),
            AnyDriver::Sqlite(driver) => driver.commit(),
        }
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        match self {
            AnyDriver::Memory(driver) => driver.rollback(),
            AnyDriver::Sqlite(driver) => driver.rollback(),
        }
    }
}
