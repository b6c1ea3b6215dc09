#![forbid(unsafe_code)]

//! Server-side field-level merge of pushed changesets.
//!
//! For each field the side with the greater clock owns the value; on an exact tie the
//! server keeps its value. Deletion is sticky. An item whose merge leaves both row and
//! record unchanged is acknowledged without a write, which makes replaying a batch a no-op.

use crate::changelog::{self, LogEntry};
use crate::error::SyncError;
use crate::wire::{ChangeItem, TableChangeset};
use ps_core::{ChangeRecord, ClockToken, HybridClock, Row, RowId, WallClock};
use ps_storage::{Driver, StorageEngine};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Records appended to the server log, one per written entity.
    pub records: Vec<ChangeRecord>,
}

/// Server state of one entity, folded over every item in the batch that targets it.
#[derive(Debug)]
struct Merged {
    prior_record: Option<ChangeRecord>,
    prior_row: Option<Row>,
    row: Row,
    changes: BTreeMap<String, ClockToken>,
    delete_requested: bool,
}

impl Merged {
    fn load<D: Driver>(engine: &StorageEngine<D>, table: &str, id: &str) -> Result<Self, SyncError> {
        let prior_record = changelog::latest_for(engine, table, id)?.map(|entry| entry.record);
        let prior_row = engine.get(table, id)?;
        Ok(Self {
            row: prior_row.clone().unwrap_or_else(|| Row::new(id)),
            changes: prior_record
                .as_ref()
                .map(|record| record.changes.clone())
                .unwrap_or_default(),
            prior_record,
            prior_row,
            delete_requested: false,
        })
    }

    fn fold(&mut self, item: &ChangeItem) {
        for (field, incoming) in &item.change.changes {
            let wins = match self.changes.get(field) {
                Some(current) => incoming > current,
                None => true,
            };
            if wins {
                self.row.set(field.clone(), item.row.get(field));
                self.changes.insert(field.clone(), incoming.clone());
            }
        }
        self.delete_requested |= item.change.is_deleted();
    }

    fn already_deleted(&self) -> bool {
        self.prior_record
            .as_ref()
            .is_some_and(ChangeRecord::is_deleted)
    }

    fn is_deleted(&self) -> bool {
        self.already_deleted() || self.delete_requested
    }

    fn is_unchanged(&self) -> bool {
        let Some(prior) = self.prior_record.as_ref() else {
            return false;
        };
        if prior.changes != self.changes || self.already_deleted() != self.is_deleted() {
            return false;
        }
        self.is_deleted() || self.prior_row.as_ref() == Some(&self.row)
    }
}

enum Bucket {
    Delete,
    Update,
    Insert,
}

fn validate<D: Driver>(engine: &StorageEngine<D>, changeset: &[TableChangeset]) -> Result<(), SyncError> {
    for table in changeset {
        if changelog::is_internal_table(&table.table_name) || engine.table(&table.table_name).is_err() {
            warn!(table = %table.table_name, "rejecting changeset for unknown table");
            return Err(SyncError::UnknownTable(table.table_name.clone()));
        }
        for item in &table.data {
            if item.change.table_name != table.table_name {
                return Err(SyncError::InvalidChange("change names a different table"));
            }
            if item.row.id != item.change.id {
                return Err(SyncError::InvalidChange("row id does not match change id"));
            }
        }
    }
    Ok(())
}

/// Merges one pushed batch into the server tables and log in a single transaction.
///
/// Every table is checked before anything is read or written, so a batch naming an
/// unknown table changes nothing.
pub fn apply_changeset<D: Driver, W: WallClock>(
    engine: &mut StorageEngine<D>,
    clock: &mut HybridClock<W>,
    changeset: &[TableChangeset],
) -> Result<MergeReport, SyncError> {
    validate(engine, changeset)?;

    let mut order: Vec<(String, RowId)> = Vec::new();
    let mut merged: BTreeMap<(String, RowId), Merged> = BTreeMap::new();
    for table in changeset {
        for item in &table.data {
            clock.observe(&item.change.updated_at);
            for token in item.change.changes.values() {
                clock.observe(token);
            }
            let key = (table.table_name.clone(), item.change.id.clone());
            if !merged.contains_key(&key) {
                let state = Merged::load(engine, &key.0, &key.1)?;
                merged.insert(key.clone(), state);
                order.push(key.clone());
            }
            if let Some(state) = merged.get_mut(&key) {
                state.fold(item);
            }
        }
    }

    let mut report = MergeReport::default();
    let mut writes: Vec<(String, Bucket, Merged)> = Vec::new();
    let mut entries: Vec<LogEntry> = Vec::new();
    for key in order {
        let Some(state) = merged.remove(&key) else {
            continue;
        };
        if state.is_unchanged() {
            report.unchanged += 1;
            continue;
        }

        let token = clock.tick();
        let deleted_at = match state.prior_record.as_ref().and_then(|r| r.deleted_at.clone()) {
            Some(existing) => Some(existing),
            None if state.delete_requested => Some(token.clone()),
            None => None,
        };
        let record = ChangeRecord {
            id: key.1.clone(),
            table_name: key.0.clone(),
            created_at: state
                .prior_record
                .as_ref()
                .map(|r| r.created_at.clone())
                .unwrap_or_else(|| token.clone()),
            updated_at: token,
            deleted_at,
            origin_client_id: clock.client_id().to_string(),
            changes: state.changes.clone(),
        };

        let bucket = if state.is_deleted() {
            Bucket::Delete
        } else if state.prior_row.is_some() {
            Bucket::Update
        } else {
            Bucket::Insert
        };
        match bucket {
            Bucket::Delete => report.deleted += 1,
            Bucket::Update => report.updated += 1,
            Bucket::Insert => report.inserted += 1,
        }
        debug!(table = %key.0, id = %key.1, updated_at = %record.updated_at, "merged entity");
        entries.push(LogEntry {
            record: record.clone(),
            snapshot: None,
        });
        report.records.push(record);
        writes.push((key.0, bucket, state));
    }

    if !entries.is_empty() {
        engine.transaction(|engine| {
            for (table, bucket, state) in writes {
                match bucket {
                    Bucket::Delete => {
                        if state.prior_row.is_some() {
                            engine.delete(&table, std::slice::from_ref(&state.row.id))?;
                        }
                    }
                    Bucket::Update => {
                        engine.update(&table, vec![state.row])?;
                    }
                    Bucket::Insert => {
                        engine.insert(&table, vec![state.row])?;
                    }
                }
            }
            changelog::append(engine, &entries)
        })?;
    }

    info!(
        inserted = report.inserted,
        updated = report.updated,
        deleted = report.deleted,
        unchanged = report.unchanged,
        "merged changeset"
    );
    Ok(report)
}
