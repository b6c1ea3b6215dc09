#![forbid(unsafe_code)]

mod bounds;
mod driver;
mod engine;
mod error;
mod index;
mod memory;
pub mod query;
mod sqlite;

pub use bounds::{KeyRange, ScanBounds};
pub use driver::{AnyDriver, Driver};
pub use engine::StorageEngine;
pub use error::StoreError;
pub use index::{CompositeIndex, IndexEntry, IndexScan};
pub use memory::MemoryDriver;
pub use sqlite::SqliteDriver;

/// Engine over a backend chosen at runtime.
pub type Engine = StorageEngine<AnyDriver>;

impl StorageEngine<AnyDriver> {
    pub fn memory() -> Self {
        StorageEngine::new(AnyDriver::Memory(MemoryDriver::new()))
    }

    pub fn sqlite(storage_dir: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        Ok(StorageEngine::new(AnyDriver::Sqlite(SqliteDriver::open(
            storage_dir,
        )?)))
    }
}
