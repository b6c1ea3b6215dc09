#![forbid(unsafe_code)]

use crate::changelog::{self, LogEntry};
use crate::error::SyncError;
use crate::tracker::{Mutation, derive_record};
use crate::wire::{ChangeItem, PullRequest, PulledChange, PushRequest, TableChangeset};
use ps_core::model::EntityRow;
use ps_core::{ChangeRecord, ClockToken, HybridClock, Row, RowId, SystemClock, WallClock};
use ps_storage::{Driver, StorageEngine};
use std::collections::BTreeMap;
use tracing::{debug, info};

const LAST_PUSHED_AT: &str = "lastPushedAt";
const LAST_SERVER_UPDATED_AT: &str = "lastServerUpdatedAt";

/// Local changes not yet acknowledged by the server.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingPush {
    pub request: PushRequest,
    /// Newest local record included; pass to [`LocalReplica::acknowledge_push`] once the server accepts.
    pub through: ClockToken,
}

/// Client-side store: entity tables plus the local change log.
///
/// Every mutation commits its rows and change records in one transaction. Records
/// pulled from the server replace local rows whole.
#[derive(Debug)]
pub struct LocalReplica<D, W = SystemClock> {
    engine: StorageEngine<D>,
    clock: HybridClock<W>,
}

impl<D: Driver, W: WallClock> LocalReplica<D, W> {
    /// Reopening an existing store seeds the clock from its newest log entry.
    pub fn new(mut engine: StorageEngine<D>, mut clock: HybridClock<W>) -> Result<Self, SyncError> {
        engine.register(changelog::log_tables().map_err(ps_storage::StoreError::from)?)?;
        changelog::seed_clock(&engine, &mut clock)?;
        Ok(Self { engine, clock })
    }

    pub fn engine(&self) -> &StorageEngine<D> {
        &self.engine
    }

    pub fn clock(&self) -> &HybridClock<W> {
        &self.clock
    }

    pub fn into_engine(self) -> StorageEngine<D> {
        self.engine
    }

    fn check_table(&self, table: &str) -> Result<(), SyncError> {
        if changelog::is_internal_table(table) {
            return Err(SyncError::InvalidChange("internal tables are not writable"));
        }
        self.engine.table(table)?;
        Ok(())
    }

    fn record(
        &mut self,
        table: &str,
        prior: Option<&Row>,
        next: Option<&Row>,
    ) -> Result<Option<LogEntry>, SyncError> {
        let Some(mutation) = Mutation::classify(prior, next) else {
            return Ok(None);
        };
        let previous = changelog::latest_for(&self.engine, table, mutation.id())?;
        let previous = previous.map(|entry| entry.record);
        let Some(record) = derive_record(table, mutation, previous.as_ref(), &mut self.clock) else {
            return Ok(None);
        };
        Ok(Some(LogEntry {
            record,
            snapshot: next.cloned(),
        }))
    }

    fn commit(&mut self, table: &str, entries: Vec<LogEntry>, writes: Writes) -> Result<Vec<ChangeRecord>, SyncError> {
        self.engine.transaction(|engine| {
            match writes {
                Writes::Insert(rows) => {
                    engine.insert(table, rows)?;
                }
                Writes::Update(rows) => {
                    engine.update(table, rows)?;
                }
                Writes::Delete(ids) => {
                    engine.delete(table, &ids)?;
                }
            }
            changelog::append(engine, &entries)
        })?;
        debug!(table, records = entries.len(), "committed local change");
        Ok(entries.into_iter().map(|entry| entry.record).collect())
    }

    /// Inserts new entities. Reusing the id of a deleted entity is rejected.
    pub fn insert(&mut self, table: &str, rows: Vec<Row>) -> Result<Vec<ChangeRecord>, SyncError> {
        self.check_table(table)?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            if changelog::latest_for(&self.engine, table, &row.id)?
                .is_some_and(|entry| entry.record.is_deleted())
            {
                return Err(SyncError::InvalidChange("id belongs to a deleted entity"));
            }
            entries.extend(self.record(table, None, Some(row))?);
        }
        self.commit(table, entries, Writes::Insert(rows))
    }

    /// Replaces existing entities. Rows that change nothing produce no record;
    /// ids with no stored row are skipped.
    pub fn update(&mut self, table: &str, rows: Vec<Row>) -> Result<Vec<ChangeRecord>, SyncError> {
        self.check_table(table)?;
        let mut entries = Vec::new();
        let mut changed = Vec::new();
        for row in rows {
            let Some(prior) = self.engine.get(table, &row.id)? else {
                continue;
            };
            if let Some(entry) = self.record(table, Some(&prior), Some(&row))? {
                entries.push(entry);
                changed.push(row);
            }
        }
        if changed.is_empty() {
            return Ok(Vec::new());
        }
        self.commit(table, entries, Writes::Update(changed))
    }

    pub fn update_with<F>(&mut self, table: &str, id: &str, f: F) -> Result<Option<ChangeRecord>, SyncError>
    where
        F: FnOnce(&mut Row),
    {
        let Some(mut row) = self.engine.get(table, id)? else {
            return Ok(None);
        };
        f(&mut row);
        row.id = id.to_string();
        Ok(self.update(table, vec![row])?.into_iter().next())
    }

    pub fn delete(&mut self, table: &str, ids: &[RowId]) -> Result<Vec<ChangeRecord>, SyncError> {
        self.check_table(table)?;
        let mut entries = Vec::new();
        let mut removed = Vec::new();
        for id in ids {
            let Some(prior) = self.engine.get(table, id)? else {
                continue;
            };
            entries.extend(self.record(table, Some(&prior), None)?);
            removed.push(id.clone());
        }
        if removed.is_empty() {
            return Ok(Vec::new());
        }
        self.commit(table, entries, Writes::Delete(removed))
    }

    /// Inserts or updates a typed planner entity.
    pub fn save(&mut self, entity: &EntityRow) -> Result<Option<ChangeRecord>, SyncError> {
        let row = entity.to_row();
        let table = entity.table_name();
        if self.engine.get(table, &row.id)?.is_some() {
            Ok(self.update(table, vec![row])?.into_iter().next())
        } else {
            Ok(self.insert(table, vec![row])?.into_iter().next())
        }
    }

    pub fn last_pushed_at(&self) -> Result<Option<String>, SyncError> {
        changelog::read_meta(&self.engine, LAST_PUSHED_AT)
    }

    pub fn last_server_updated_at(&self) -> Result<Option<String>, SyncError> {
        changelog::read_meta(&self.engine, LAST_SERVER_UPDATED_AT)
    }

    /// Latest local record per entity since the last acknowledged push, grouped by table.
    pub fn pending_push(&self) -> Result<Option<PendingPush>, SyncError> {
        let since = self.last_pushed_at()?.unwrap_or_default();
        let own = self.clock.client_id().as_str();

        let mut latest: BTreeMap<(String, RowId), LogEntry> = BTreeMap::new();
        let mut through: Option<ClockToken> = None;
        for entry in changelog::entries_after(&self.engine, &since, usize::MAX)? {
            if entry.record.origin_client_id != own {
                continue;
            }
            through = Some(entry.record.updated_at.clone());
            let key = (entry.record.table_name.clone(), entry.record.id.clone());
            latest.insert(key, entry);
        }
        let Some(through) = through else {
            return Ok(None);
        };

        let mut tables: BTreeMap<String, Vec<ChangeItem>> = BTreeMap::new();
        for ((table, id), entry) in latest {
            let row = match entry.snapshot {
                Some(row) if !entry.record.is_deleted() => row,
                _ => Row::new(id),
            };
            tables.entry(table).or_default().push(ChangeItem {
                row,
                change: entry.record,
            });
        }
        let changeset = tables
            .into_iter()
            .map(|(table_name, data)| TableChangeset { table_name, data })
            .collect();
        Ok(Some(PendingPush {
            request: PushRequest { changeset },
            through,
        }))
    }

    pub fn acknowledge_push(&mut self, through: &ClockToken) -> Result<(), SyncError> {
        let current = self.last_pushed_at()?.unwrap_or_default();
        if through.as_str() > current.as_str() {
            changelog::write_meta(&mut self.engine, LAST_PUSHED_AT, through.as_str())?;
        }
        Ok(())
    }

    pub fn pull_request(&self) -> Result<PullRequest, SyncError> {
        Ok(PullRequest {
            last_server_updated_at: self.last_server_updated_at()?.unwrap_or_default(),
        })
    }

    /// Applies pulled records by whole-row replacement. Records already in the local
    /// log are skipped, so redelivery is harmless. Returns how many were applied.
    ///
    /// A live record may arrive without a row when the server has since deleted the
    /// entity; it is logged only, and the tombstone later in the feed removes the row.
    pub fn apply_pull(&mut self, pulled: Vec<PulledChange>) -> Result<usize, SyncError> {
        for item in &pulled {
            self.check_table(&item.change.table_name)?;
            self.clock.observe(&item.change.updated_at);
        }
        let cursor = self.last_server_updated_at()?.unwrap_or_default();

        let applied = self.engine.transaction(|engine| {
            let mut applied = 0;
            let mut newest = cursor.clone();
            for item in pulled {
                let change = item.change;
                if change.updated_at.as_str() > newest.as_str() {
                    newest = change.updated_at.as_str().to_string();
                }
                if changelog::contains(engine, &change.updated_at)? {
                    continue;
                }
                let table = change.table_name.as_str();
                if change.is_deleted() {
                    engine.delete(table, std::slice::from_ref(&change.id))?;
                } else if let Some(row) = item.row {
                    if row.id != change.id {
                        return Err(SyncError::InvalidChange("row id does not match change id"));
                    }
                    if engine.update(table, vec![row.clone()])? == 0 {
                        engine.insert(table, vec![row])?;
                    }
                }
                changelog::append(
                    engine,
                    &[LogEntry {
                        record: change,
                        snapshot: None,
                    }],
                )?;
                applied += 1;
            }
            if newest != cursor {
                changelog::write_meta(engine, LAST_SERVER_UPDATED_AT, &newest)?;
            }
            Ok::<_, SyncError>(applied)
        })?;
        info!(applied, "applied pulled changes");
        Ok(applied)
    }
}

enum Writes {
    Insert(Vec<Row>),
    Update(Vec<Row>),
    Delete(Vec<RowId>),
}
