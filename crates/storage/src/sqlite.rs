#![forbid(unsafe_code)]

//! Durable backend on SQLite.
//!
//! Rows live in one `rows` table as JSON bodies. Each (table, index) pair gets a
//! partial expression index over `tuple_key(body, col...)`, a deterministic SQL
//! function that returns the same order-preserving key bytes the in-memory index
//! sorts by, so range predicates and ordering match the memory backend exactly.

use crate::bounds::ScanBounds;
use crate::driver::Driver;
use crate::error::StoreError;
use ps_core::codec::encode_tuple;
use ps_core::{IndexDef, Row, RowId, TableDef};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE: &str = "plansync.db";
const SCHEMA_VERSION: &str = "1";

#[derive(Debug)]
pub struct SqliteDriver {
    conn: Connection,
    storage_dir: Option<PathBuf>,
}

impl SqliteDriver {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = Connection::open(storage_dir.join(DB_FILE))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        register_functions(&conn)?;
        install_schema(&conn)?;

        Ok(Self {
            conn,
            storage_dir: Some(storage_dir),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        register_functions(&conn)?;
        install_schema(&conn)?;
        Ok(Self {
            conn,
            storage_dir: None,
        })
    }

    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage_dir.as_deref()
    }
}

fn register_functions(conn: &Connection) -> Result<(), StoreError> {
    conn.create_scalar_function(
        "tuple_key",
        -1,
        FunctionFlags::SQLITE_UTF8
            | FunctionFlags::SQLITE_DETERMINISTIC
            | FunctionFlags::SQLITE_INNOCUOUS,
        |ctx| {
            if ctx.len() < 2 {
                return Err(rusqlite::Error::UserFunctionError(
                    "tuple_key(body, column, ...) needs at least one column".into(),
                ));
            }
            let body = ctx.get::<String>(0)?;
            let row: Row = serde_json::from_str(&body)
                .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))?;
            let mut columns = Vec::with_capacity(ctx.len() - 1);
            for idx in 1..ctx.len() {
                columns.push(ctx.get::<String>(idx)?);
            }
            Ok(encode_tuple(&row.key(&columns)))
        },
    )?;
    Ok(())
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rows (
          table_name TEXT NOT NULL,
          id TEXT NOT NULL,
          body TEXT NOT NULL,
          PRIMARY KEY (table_name, id)
        );
        "#,
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", SCHEMA_VERSION],
    )?;
    Ok(())
}

/// `tuple_key(body, 'a', 'b')`. Names are validated identifiers, so inlining is safe;
/// the text must match the index definition byte for byte for SQLite to use it.
fn key_expr(index: &IndexDef) -> String {
    let columns = index
        .columns
        .iter()
        .map(|column| format!("'{column}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("tuple_key(body, {columns})")
}

fn index_name(table: &TableDef, index: &IndexDef) -> String {
    format!("ix_{}__{}", table.name, index.name)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

impl Driver for SqliteDriver {
    fn load_tables(&mut self, tables: &[TableDef]) -> Result<(), StoreError> {
        for table in tables {
            for index in &table.indexes {
                self.conn.execute_batch(&format!(
                    "CREATE INDEX IF NOT EXISTS \"{}\" ON rows({}, id) WHERE table_name = '{}';",
                    index_name(table, index),
                    key_expr(index),
                    table.name
                ))?;
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
        let range = bounds.key_range(index.arity());
        if range.is_empty() || bounds.limit == Some(0) {
            return Ok(Vec::new());
        }

        let expr = key_expr(index);
        let mut sql = format!("SELECT body FROM rows WHERE table_name = '{}'", table.name);
        let mut keys: Vec<Vec<u8>> = Vec::new();
        for (bound, inclusive, exclusive) in [(&range.lower, ">=", ">"), (&range.upper, "<=", "<")] {
            let (op, key) = match bound {
                Bound::Included(key) => (inclusive, key),
                Bound::Excluded(key) => (exclusive, key),
                Bound::Unbounded => continue,
            };
            keys.push(key.clone());
            sql.push_str(&format!(" AND {expr} {op} ?{}", keys.len()));
        }
        let direction = if bounds.reverse { "DESC" } else { "ASC" };
        let limit = bounds
            .limit
            .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        sql.push_str(&format!(
            " ORDER BY {expr} {direction}, id {direction} LIMIT {limit}"
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let bodies = stmt.query_map(params_from_iter(keys.iter()), |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in bodies {
            out.push(serde_json::from_str::<Row>(&body?)?);
        }
        Ok(out)
    }

    fn insert(&mut self, table: &TableDef, rows: &[Row]) -> Result<usize, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO rows(table_name, id, body) VALUES (?1, ?2, ?3)")?;
        for row in rows {
            let body = serde_json::to_string(row)?;
            if let Err(err) = stmt.execute(params![table.name, row.id, body]) {
                if is_constraint_violation(&err) {
                    return Err(StoreError::DuplicateId {
                        table: table.name.clone(),
                        id: row.id.clone(),
                    });
                }
                return Err(err.into());
            }
        }
        Ok(rows.len())
    }

    fn delete(&mut self, table: &TableDef, ids: &[RowId]) -> Result<Vec<Row>, StoreError> {
        let mut removed = Vec::new();
        for id in ids {
            let body = self
                .conn
                .query_row(
                    "SELECT body FROM rows WHERE table_name = ?1 AND id = ?2",
                    params![table.name, id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            let Some(body) = body else {
                continue;
            };
            self.conn.execute(
                "DELETE FROM rows WHERE table_name = ?1 AND id = ?2",
                params![table.name, id],
            )?;
            removed.push(serde_json::from_str::<Row>(&body)?);
        }
        Ok(removed)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_core::Value;

    #[test]
    fn key_expression_is_stable_text() {
        let index = IndexDef::new("byProject", &["projectId", "orderToken"]);
        assert_eq!(
            key_expr(&index),
            "tuple_key(body, 'projectId', 'orderToken')"
        );
    }

    #[test]
    fn tuple_key_function_matches_codec() {
        let driver = SqliteDriver::open_in_memory().expect("open");
        let row = Row::new("t1").with("projectId", "p").with("rank", 3_i64);
        let body = serde_json::to_string(&row).expect("json");
        let key: Vec<u8> = driver
            .conn
            .query_row(
                "SELECT tuple_key(?1, 'projectId', 'rank', 'id')",
                params![body],
                |r| r.get(0),
            )
            .expect("tuple_key");
        assert_eq!(
            key,
            encode_tuple(&[Value::from("p"), Value::Integer(3), Value::from("t1")])
        );
    }
}
