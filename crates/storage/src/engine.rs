#![forbid(unsafe_code)]

use crate::bounds::ScanBounds;
use crate::driver::Driver;
use crate::error::StoreError;
use ps_core::{IDS_INDEX, IndexDef, Row, RowId, TableDef, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Table registry in front of one backend driver.
///
/// Validates every table and index name before the driver sees it, and keeps
/// writes that touch several rows atomic by wrapping them in a driver transaction.
/// Single-writer: callers serialize access (see `query::Blocking` for a shared handle).
#[derive(Debug)]
pub struct StorageEngine<D> {
    driver: D,
    tables: BTreeMap<String, TableDef>,
    tx_depth: usize,
}

fn lookup<'t>(tables: &'t BTreeMap<String, TableDef>, name: &str) -> Result<&'t TableDef, StoreError> {
    tables
        .get(name)
        .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
}

/// JSON has no NaN or infinity, so such a value could not round-trip through every driver.
fn check_finite(rows: &[Row]) -> Result<(), StoreError> {
    let finite = rows.iter().all(|row| {
        row.fields
            .values()
            .all(|value| !matches!(value, Value::Float(f) if !f.is_finite()))
    });
    if finite {
        Ok(())
    } else {
        Err(StoreError::InvalidInput("float values must be finite"))
    }
}

fn lookup_index<'t>(table: &'t TableDef, name: &str) -> Result<&'t IndexDef, StoreError> {
    table.index(name).ok_or_else(|| StoreError::UnknownIndex {
        table: table.name.clone(),
        index: name.to_string(),
    })
}

impl<D: Driver> StorageEngine<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            tables: BTreeMap::new(),
            tx_depth: 0,
        }
    }

    /// Registers tables with the driver. Registering a name again replaces its definition
    /// and builds any index it did not have before.
    pub fn register(&mut self, tables: Vec<TableDef>) -> Result<(), StoreError> {
        self.driver.load_tables(&tables)?;
        for table in tables {
            debug!(table = %table.name, indexes = table.indexes.len(), "registered table");
            self.tables.insert(table.name.clone(), table);
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&TableDef, StoreError> {
        lookup(&self.tables, name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_depth > 0
    }

    pub fn scan(&self, table: &str, index: &str, bounds: &ScanBounds) -> Result<Vec<Row>, StoreError> {
        let def = lookup(&self.tables, table)?;
        let index_def = lookup_index(def, index)?;
        let rows = self.driver.select_key(def, index_def, bounds)?;
        debug!(table, index, rows = rows.len(), "scan");
        Ok(rows)
    }

    pub fn get(&self, table: &str, id: &str) -> Result<Option<Row>, StoreError> {
        let bounds = ScanBounds::prefix(vec![Value::from(id)]).limit(1);
        Ok(self.scan(table, IDS_INDEX, &bounds)?.into_iter().next())
    }

    /// Rows for `ids` in request order; ids with no row are skipped.
    pub fn get_many(&self, table: &str, ids: &[RowId]) -> Result<Vec<Row>, StoreError> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.get(table, id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn insert(&mut self, table: &str, rows: Vec<Row>) -> Result<usize, StoreError> {
        lookup(&self.tables, table)?;
        check_finite(&rows)?;
        self.transaction(|engine| {
            let def = lookup(&engine.tables, table)?;
            let inserted = engine.driver.insert(def, &rows)?;
            debug!(table, rows = inserted, "insert");
            Ok(inserted)
        })
    }

    /// Replaces whole rows by id. Each row leaves every index under its old key and
    /// re-enters under its new one. Ids with no stored row are skipped.
    pub fn update(&mut self, table: &str, rows: Vec<Row>) -> Result<usize, StoreError> {
        lookup(&self.tables, table)?;
        check_finite(&rows)?;
        self.transaction(|engine| {
            let def = lookup(&engine.tables, table)?;
            let mut updated = 0;
            for row in rows {
                if engine.driver.delete(def, std::slice::from_ref(&row.id))?.is_empty() {
                    continue;
                }
                engine.driver.insert(def, std::slice::from_ref(&row))?;
                updated += 1;
            }
            debug!(table, rows = updated, "update");
            Ok(updated)
        })
    }

    /// Applies `f` to the stored row. The id cannot change. Returns `false` if no row matched.
    pub fn update_with<F>(&mut self, table: &str, id: &str, f: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Row),
    {
        let Some(mut row) = self.get(table, id)? else {
            return Ok(false);
        };
        f(&mut row);
        row.id = id.to_string();
        Ok(self.update(table, vec![row])? == 1)
    }

    pub fn delete(&mut self, table: &str, ids: &[RowId]) -> Result<usize, StoreError> {
        lookup(&self.tables, table)?;
        self.transaction(|engine| {
            let def = lookup(&engine.tables, table)?;
            let removed = engine.driver.delete(def, ids)?.len();
            debug!(table, rows = removed, "delete");
            Ok(removed)
        })
    }

    /// Deletes every row that `bounds` selects on `index`.
    pub fn delete_where(&mut self, table: &str, index: &str, bounds: &ScanBounds) -> Result<usize, StoreError> {
        let ids: Vec<RowId> = self
            .scan(table, index, bounds)?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.transaction(|engine| engine.delete(table, &ids))
    }

    /// Runs `f` inside one backend transaction. Nested calls join the outer one;
    /// an error anywhere rolls back everything since the outermost `begin`.
    pub fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StoreError> + std::fmt::Display,
    {
        if self.tx_depth > 0 {
            self.tx_depth += 1;
            let result = f(self);
            self.tx_depth -= 1;
            return result;
        }

        self.driver.begin()?;
        self.tx_depth = 1;
        let result = f(self);
        self.tx_depth = 0;

        match result {
            Ok(value) => {
                if let Err(err) = self.driver.commit() {
                    warn!(error = %err, "commit failed, rolling back");
                    if let Err(rollback) = self.driver.rollback() {
                        warn!(error = %rollback, "rollback failed");
                    }
                    return Err(err.into());
                }
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, "transaction rolled back");
                if let Err(rollback) = self.driver.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
