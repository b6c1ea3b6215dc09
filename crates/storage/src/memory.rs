#![forbid(unsafe_code)]

use crate::bounds::ScanBounds;
use crate::driver::Driver;
use crate::error::StoreError;
use crate::index::CompositeIndex;
use ps_core::{IndexDef, Row, RowId, TableDef};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default)]
struct MemoryTable {
    rows: BTreeMap<RowId, Row>,
    indexes: BTreeMap<String, CompositeIndex>,
}

impl MemoryTable {
    fn put(&mut self, row: Row) {
        for index in self.indexes.values_mut() {
            index.insert(&row);
        }
        self.rows.insert(row.id.clone(), row);
    }

    fn take(&mut self, id: &str) -> Option<Row> {
        let row = self.rows.remove(id)?;
        for index in self.indexes.values_mut() {
            index.delete(&row);
        }
        Some(row)
    }
}

#[derive(Debug)]
enum Undo {
    Inserted { table: String, id: RowId },
    Deleted { table: String, row: Row },
}

/// Pure in-memory backend. Every call resolves immediately; transactions
/// roll back by replaying an undo journal.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    tables: BTreeMap<String, MemoryTable>,
    journal: Option<Vec<Undo>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    fn table(&self, name: &str) -> Result<&MemoryTable, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo);
        }
    }
}

impl Driver for MemoryDriver {
    fn load_tables(&mut self, tables: &[TableDef]) -> Result<(), StoreError> {
        for def in tables {
            let table = self.tables.entry(def.name.clone()).or_default();
            for index in &def.indexes {
                if table.indexes.contains_key(&index.name) {
                    continue;
                }
                let mut built = CompositeIndex::new(index.clone());
                for row in table.rows.values() {
                    built.insert(row);
                }
                table.indexes.insert(index.name.clone(), built);
            }
        }
        Ok(())
    }

    fn select_key(
        &self,
        table: &TableDef,
        index: &IndexDef,
        bounds: &ScanBounds,
    ) -> Result<Vec<Row>, StoreError> {
        let stored = self.table(&table.name)?;
        let built = stored
            .indexes
            .get(&index.name)
            .ok_or_else(|| StoreError::UnknownIndex {
                table: table.name.clone(),
                index: index.name.clone(),
            })?;
        Ok(built
            .scan(bounds)
            .filter_map(|id| stored.rows.get(id).cloned())
            .collect())
    }

    fn insert(&mut self, table: &TableDef, rows: &[Row]) -> Result<usize, StoreError> {
        let stored = self.table_mut(&table.name)?;
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for row in rows {
            if !seen.insert(row.id.as_str()) || stored.rows.contains_key(&row.id) {
                return Err(StoreError::DuplicateId {
                    table: table.name.clone(),
                    id: row.id.clone(),
                });
            }
        }
        for row in rows {
            stored.put(row.clone());
        }
        for row in rows {
            self.record(Undo::Inserted {
                table: table.name.clone(),
                id: row.id.clone(),
            });
        }
        Ok(rows.len())
    }

    fn delete(&mut self, table: &TableDef, ids: &[RowId]) -> Result<Vec<Row>, StoreError> {
        let stored = self.table_mut(&table.name)?;
        let removed: Vec<Row> = ids.iter().filter_map(|id| stored.take(id)).collect();
        for row in &removed {
            self.record(Undo::Deleted {
                table: table.name.clone(),
                row: row.clone(),
            });
        }
        Ok(removed)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.journal.is_some() {
            return Err(StoreError::InvalidInput("transaction already open"));
        }
        self.journal = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.journal
            .take()
            .map(|_| ())
            .ok_or(StoreError::InvalidInput("no open transaction"))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let journal = self
            .journal
            .take()
            .ok_or(StoreError::InvalidInput("no open transaction"))?;
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Inserted { table, id } => {
                    if let Some(stored) = self.tables.get_mut(&table) {
                        stored.take(&id);
                    }
                }
                Undo::Deleted { table, row } => {
                    if let Some(stored) = self.tables.get_mut(&table) {
                        stored.put(row);
                    }
                }
            }
        }
        Ok(())
    }
}
