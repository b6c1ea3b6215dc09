#![forbid(unsafe_code)]

use crate::changelog;
use crate::error::SyncError;
use crate::merge::{MergeReport, apply_changeset};
use crate::pull::{ChangeFeed, DEFAULT_PAGE_SIZE, with_rows};
use crate::wire::{PullRequest, PulledChange, PushRequest, PushResponse};
use ps_core::{HybridClock, SystemClock, WallClock};
use ps_storage::{Driver, StorageEngine, StoreError};
use tracing::warn;

/// Authoritative side of the protocol: merges pushes, serves pulls.
#[derive(Debug)]
pub struct SyncServer<D, W = SystemClock> {
    engine: StorageEngine<D>,
    clock: HybridClock<W>,
    page_size: usize,
}

impl<D: Driver, W: WallClock> SyncServer<D, W> {
    /// Reopening an existing store seeds the clock from its newest log entry, so
    /// records merged after a restart still sort after every client's pull cursor.
    pub fn new(mut engine: StorageEngine<D>, mut clock: HybridClock<W>) -> Result<Self, SyncError> {
        engine.register(changelog::log_tables().map_err(StoreError::from)?)?;
        changelog::seed_clock(&engine, &mut clock)?;
        Ok(Self {
            engine,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn engine(&self) -> &StorageEngine<D> {
        &self.engine
    }

    pub fn into_engine(self) -> StorageEngine<D> {
        self.engine
    }

    pub fn merge(&mut self, request: &PushRequest) -> Result<MergeReport, SyncError> {
        apply_changeset(&mut self.engine, &mut self.clock, &request.changeset)
    }

    pub fn push(&mut self, request: &PushRequest) -> Result<PushResponse, SyncError> {
        self.merge(request)?;
        Ok(PushResponse {})
    }

    pub fn feed(&self, since: &str) -> ChangeFeed<'_, D> {
        ChangeFeed::new(&self.engine, since, self.page_size)
    }

    pub fn pull(&self, request: &PullRequest) -> Result<Vec<PulledChange>, SyncError> {
        with_rows(&self.engine, self.feed(&request.last_server_updated_at))
    }

    /// JSON entry point for a push body; answers `{}`.
    pub fn handle_push_json(&mut self, body: &str) -> Result<String, SyncError> {
        let request: PushRequest = serde_json::from_str(body)?;
        let response = self.push(&request).inspect_err(|err| {
            warn!(error = %err, "push rejected");
        })?;
        Ok(serde_json::to_string(&response)?)
    }

    /// JSON entry point for a pull body; answers an array of records.
    pub fn handle_pull_json(&self, body: &str) -> Result<String, SyncError> {
        let request: PullRequest = serde_json::from_str(body)?;
        Ok(serde_json::to_string(&self.pull(&request)?)?)
    }
}
