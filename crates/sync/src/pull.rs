#![forbid(unsafe_code)]

use crate::changelog;
use crate::error::SyncError;
use crate::wire::PulledChange;
use ps_core::ChangeRecord;
use ps_storage::{Driver, StorageEngine};
use std::collections::VecDeque;

pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Lazy, finite walk over the change log after a clock, ascending by `updatedAt`.
///
/// Reads one page at a time; the feed ends after the first short page. A failed read
/// is yielded once and ends the feed.
pub struct ChangeFeed<'e, D> {
    engine: &'e StorageEngine<D>,
    cursor: String,
    page_size: usize,
    buffer: VecDeque<ChangeRecord>,
    exhausted: bool,
}

impl<'e, D: Driver> ChangeFeed<'e, D> {
    pub fn new(engine: &'e StorageEngine<D>, since: impl Into<String>, page_size: usize) -> Self {
        Self {
            engine,
            cursor: since.into(),
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<(), SyncError> {
        let page = changelog::entries_after(self.engine, &self.cursor, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = last.record.updated_at.as_str().to_string();
        }
        self.buffer.extend(page.into_iter().map(|entry| entry.record));
        Ok(())
    }
}

impl<D: Driver> Iterator for ChangeFeed<'_, D> {
    type Item = Result<ChangeRecord, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Every record with `updatedAt` strictly greater than `since`, ascending.
pub fn get_changes_after<'e, D: Driver>(
    engine: &'e StorageEngine<D>,
    since: &str,
) -> ChangeFeed<'e, D> {
    ChangeFeed::new(engine, since, DEFAULT_PAGE_SIZE)
}

/// Attaches the server's current row to each live record.
pub fn with_rows<D: Driver>(
    engine: &StorageEngine<D>,
    records: impl IntoIterator<Item = Result<ChangeRecord, SyncError>>,
) -> Result<Vec<PulledChange>, SyncError> {
    let mut out = Vec::new();
    for record in records {
        let change = record?;
        let row = if change.is_deleted() {
            None
        } else {
            engine.get(&change.table_name, &change.id)?
        };
        out.push(PulledChange { change, row });
    }
    Ok(out)
}
