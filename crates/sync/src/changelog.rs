#![forbid(unsafe_code)]

//! Append-only change log and the small key/value table that holds sync cursors.
//!
//! Log rows are keyed by the record's `updatedAt` token, which is unique per
//! issuing clock, so a record that arrives twice is recognised by its key.

use crate::error::SyncError;
use ps_core::{ChangeRecord, ClockToken, HybridClock, IndexDef, Row, SchemaError, TableDef, Value, WallClock};
use ps_storage::{Driver, ScanBounds, StorageEngine, StoreError};
use std::collections::BTreeMap;

pub const CHANGES_TABLE: &str = "_changes";
pub const META_TABLE: &str = "_meta";

pub const BY_UPDATED_AT: &str = "byUpdatedAt";
pub const BY_ENTITY: &str = "byEntity";

pub fn is_internal_table(name: &str) -> bool {
    name.starts_with('_')
}

pub fn log_tables() -> Result<Vec<TableDef>, SchemaError> {
    Ok(vec![
        TableDef::new(
            CHANGES_TABLE,
            vec![
                IndexDef::new(BY_UPDATED_AT, &["updatedAt"]),
                IndexDef::new(BY_ENTITY, &["tableName", "entityId", "updatedAt"]),
            ],
        )?,
        TableDef::new(META_TABLE, Vec::new())?,
    ])
}

/// A logged record plus, for locally issued records, the entity row as it was written.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub record: ChangeRecord,
    pub snapshot: Option<Row>,
}

fn token_value(token: &ClockToken) -> Value {
    Value::from(token.as_str())
}

fn encode(entry: &LogEntry) -> Result<Row, SyncError> {
    let record = &entry.record;
    let snapshot = match &entry.snapshot {
        Some(row) => Value::Text(serde_json::to_string(row)?),
        None => Value::Null,
    };
    Ok(Row::new(record.updated_at.as_str())
        .with("updatedAt", token_value(&record.updated_at))
        .with("tableName", record.table_name.as_str())
        .with("entityId", record.id.as_str())
        .with("createdAt", token_value(&record.created_at))
        .with("deletedAt", record.deleted_at.as_ref().map(token_value))
        .with("clientId", record.origin_client_id.as_str())
        .with("changes", serde_json::to_string(&record.changes)?)
        .with("row", snapshot))
}

fn text<'r>(row: &'r Row, field: &'static str) -> Result<&'r str, SyncError> {
    row.text(field)
        .ok_or(SyncError::InvalidChange("change log row is missing a field"))
}

fn decode(row: &Row) -> Result<LogEntry, SyncError> {
    let deleted_at = match row.text("deletedAt") {
        Some(token) => Some(ClockToken::parse(token)?),
        None => None,
    };
    let changes: BTreeMap<String, ClockToken> = serde_json::from_str(text(row, "changes")?)?;
    let snapshot = match row.text("row") {
        Some(body) => Some(serde_json::from_str(body)?),
        None => None,
    };
    Ok(LogEntry {
        record: ChangeRecord {
            id: text(row, "entityId")?.to_string(),
            table_name: text(row, "tableName")?.to_string(),
            created_at: ClockToken::parse(text(row, "createdAt")?)?,
            updated_at: ClockToken::parse(text(row, "updatedAt")?)?,
            deleted_at,
            origin_client_id: text(row, "clientId")?.to_string(),
            changes,
        },
        snapshot,
    })
}

/// Appends entries in one engine call.
pub fn append<D: Driver>(engine: &mut StorageEngine<D>, entries: &[LogEntry]) -> Result<usize, SyncError> {
    if entries.is_empty() {
        return Ok(0);
    }
    let rows = entries.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
    Ok(engine.insert(CHANGES_TABLE, rows)?)
}

pub fn contains<D: Driver>(engine: &StorageEngine<D>, updated_at: &ClockToken) -> Result<bool, SyncError> {
    Ok(engine.get(CHANGES_TABLE, updated_at.as_str())?.is_some())
}

/// Most recent entry for one entity.
pub fn latest_for<D: Driver>(
    engine: &StorageEngine<D>,
    table: &str,
    id: &str,
) -> Result<Option<LogEntry>, SyncError> {
    let bounds = ScanBounds::prefix(vec![Value::from(table), Value::from(id)])
        .reverse()
        .limit(1);
    engine
        .scan(CHANGES_TABLE, BY_ENTITY, &bounds)?
        .first()
        .map(decode)
        .transpose()
}

/// Up to `limit` entries with `updatedAt` strictly after `since`, ascending.
pub fn entries_after<D: Driver>(
    engine: &StorageEngine<D>,
    since: &str,
    limit: usize,
) -> Result<Vec<LogEntry>, SyncError> {
    let bounds = ScanBounds::all().gt(vec![Value::from(since)]).limit(limit);
    engine
        .scan(CHANGES_TABLE, BY_UPDATED_AT, &bounds)?
        .iter()
        .map(decode)
        .collect()
}

/// Entry with the greatest `updatedAt`.
pub fn newest<D: Driver>(engine: &StorageEngine<D>) -> Result<Option<LogEntry>, SyncError> {
    let bounds = ScanBounds::all().reverse().limit(1);
    engine
        .scan(CHANGES_TABLE, BY_UPDATED_AT, &bounds)?
        .first()
        .map(decode)
        .transpose()
}

/// Advances `clock` past every token in the newest log entry, so a restarted
/// store never issues a token at or below one it already logged.
pub fn seed_clock<D: Driver, W: WallClock>(
    engine: &StorageEngine<D>,
    clock: &mut HybridClock<W>,
) -> Result<(), SyncError> {
    let Some(entry) = newest(engine)? else {
        return Ok(());
    };
    let record = &entry.record;
    clock.observe(&record.updated_at);
    clock.observe(&record.created_at);
    if let Some(deleted_at) = &record.deleted_at {
        clock.observe(deleted_at);
    }
    for token in record.changes.values() {
        clock.observe(token);
    }
    Ok(())
}

pub fn read_meta<D: Driver>(engine: &StorageEngine<D>, key: &str) -> Result<Option<String>, SyncError> {
    Ok(engine
        .get(META_TABLE, key)?
        .and_then(|row| row.text("value").map(str::to_string)))
}

pub fn write_meta<D: Driver>(engine: &mut StorageEngine<D>, key: &str, value: &str) -> Result<(), SyncError> {
    let row = Row::new(key).with("value", value);
    engine.transaction(|engine| {
        if engine.update(META_TABLE, vec![row.clone()])? == 0 {
            engine.insert(META_TABLE, vec![row])?;
        }
        Ok::<_, StoreError>(())
    })?;
    Ok(())
}
