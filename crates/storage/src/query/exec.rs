#![forbid(unsafe_code)]

use super::{Effect, Executor, Outcome, Resolution};
use crate::driver::Driver;
use crate::engine::StorageEngine;
use crate::error::StoreError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Performs one effect against an engine.
pub fn apply<D: Driver>(engine: &mut StorageEngine<D>, effect: Effect) -> Result<Outcome, StoreError> {
    match effect {
        Effect::Scan {
            table,
            index,
            bounds,
        } => engine.scan(&table, &index, &bounds).map(Outcome::Rows),
        Effect::Get { table, id } => engine.get(&table, &id).map(Outcome::Row),
        Effect::Insert { table, rows } => engine.insert(&table, rows).map(Outcome::Affected),
        Effect::Update { table, rows } => engine.update(&table, rows).map(Outcome::Affected),
        Effect::Delete { table, ids } => engine.delete(&table, &ids).map(Outcome::Affected),
        Effect::Batch(effects) => engine
            .transaction(|engine| {
                effects
                    .into_iter()
                    .map(|effect| apply(engine, effect))
                    .collect::<Result<Vec<_>, StoreError>>()
            })
            .map(Outcome::Batch),
    }
}

/// Resolves every effect inline against a borrowed engine. Runs never suspend.
#[derive(Debug)]
pub struct Immediate<'e, D> {
    engine: &'e mut StorageEngine<D>,
}

impl<'e, D: Driver> Immediate<'e, D> {
    pub fn new(engine: &'e mut StorageEngine<D>) -> Self {
        Self { engine }
    }
}

impl<D: Driver> Executor for Immediate<'_, D> {
    fn execute(&mut self, effect: Effect) -> Resolution {
        Resolution::Ready(apply(self.engine, effect))
    }
}

/// Shared engine whose effects run on tokio's blocking pool. Every effect suspends the run.
///
/// The mutex serializes physical storage access between concurrent runs; steps from
/// different runs may interleave with each other, never within one run.
#[derive(Debug)]
pub struct Blocking<D> {
    engine: Arc<Mutex<StorageEngine<D>>>,
}

impl<D> Clone for Blocking<D> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<D: Driver + 'static> Blocking<D> {
    pub fn new(engine: StorageEngine<D>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<StorageEngine<D>>> {
        &self.engine
    }
}

impl<D: Driver + 'static> Executor for Blocking<D> {
    fn execute(&mut self, effect: Effect) -> Resolution {
        let engine = Arc::clone(&self.engine);
        Resolution::Pending(Box::pin(async move {
            tokio::task::spawn_blocking(move || apply(&mut engine.lock(), effect))
                .await
                .map_err(|err| StoreError::Backend(err.to_string()))?
        }))
    }
}
