#![forbid(unsafe_code)]

use crate::changelog;
use crate::error::SyncError;
use crate::pull::DEFAULT_PAGE_SIZE;
use crate::replica::LocalReplica;
use crate::server::SyncServer;
use ps_core::ids::ClientId;
use ps_core::model::planner_tables;
use ps_core::{HybridClock, SystemClock};
use ps_storage::{AnyDriver, Engine, StoreError};
use std::path::PathBuf;

pub const STORAGE_DIR_ENV: &str = "PLANSYNC_STORAGE_DIR";
pub const BACKEND_ENV: &str = "PLANSYNC_BACKEND";
pub const CLIENT_ID_ENV: &str = "PLANSYNC_CLIENT_ID";
pub const PULL_PAGE_SIZE_ENV: &str = "PLANSYNC_PULL_PAGE_SIZE";

const DEFAULT_STORAGE_DIR: &str = ".plansync";
const DEFAULT_CLIENT_ID: &str = "local";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    #[default]
    Sqlite,
}

impl BackendKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub storage_dir: PathBuf,
    pub backend: BackendKind,
    pub client_id: ClientId,
    pub pull_page_size: usize,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`. Unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let storage_dir = get(STORAGE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));

        let backend = match get(BACKEND_ENV) {
            None => BackendKind::default(),
            Some(raw) => BackendKind::parse(&raw).ok_or_else(|| SyncError::Config {
                key: BACKEND_ENV,
                message: format!("expected memory or sqlite, got {raw:?}"),
            })?,
        };

        let client_id = ClientId::try_new(
            get(CLIENT_ID_ENV).unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
        )
        .map_err(|err| SyncError::Config {
            key: CLIENT_ID_ENV,
            message: err.to_string(),
        })?;

        let pull_page_size = match get(PULL_PAGE_SIZE_ENV) {
            None => DEFAULT_PAGE_SIZE,
            Some(raw) => match raw.parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(SyncError::Config {
                        key: PULL_PAGE_SIZE_ENV,
                        message: format!("expected a positive integer, got {raw:?}"),
                    });
                }
            },
        };

        Ok(Self {
            storage_dir,
            backend,
            client_id,
            pull_page_size,
        })
    }

    /// Opens the configured backend with planner, change-log and meta tables registered.
    pub fn open_engine(&self) -> Result<Engine, SyncError> {
        let mut engine = match self.backend {
            BackendKind::Memory => Engine::memory(),
            BackendKind::Sqlite => Engine::sqlite(&self.storage_dir)?,
        };
        engine.register(planner_tables().map_err(StoreError::from)?)?;
        engine.register(changelog::log_tables().map_err(StoreError::from)?)?;
        Ok(engine)
    }

    pub fn open_replica(&self) -> Result<LocalReplica<AnyDriver, SystemClock>, SyncError> {
        LocalReplica::new(self.open_engine()?, HybridClock::system(self.client_id.clone()))
    }

    pub fn open_server(&self) -> Result<SyncServer<AnyDriver, SystemClock>, SyncError> {
        Ok(
            SyncServer::new(self.open_engine()?, HybridClock::system(self.client_id.clone()))?
                .with_page_size(self.pull_page_size),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = SyncConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.storage_dir, PathBuf::from(".plansync"));
        assert_eq!(config.client_id.as_str(), "local");
        assert_eq!(config.pull_page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let config = SyncConfig::from_lookup(lookup(&[
            (BACKEND_ENV, " Memory "),
            (CLIENT_ID_ENV, "laptop-1"),
            (PULL_PAGE_SIZE_ENV, "50"),
            (STORAGE_DIR_ENV, "/tmp/plansync"),
        ]))
        .expect("config");
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.client_id.as_str(), "laptop-1");
        assert_eq!(config.pull_page_size, 50);
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/plansync"));
    }

    #[test]
    fn malformed_values_name_their_key() {
        for (key, value) in [
            (BACKEND_ENV, "postgres"),
            (CLIENT_ID_ENV, "bad id"),
            (PULL_PAGE_SIZE_ENV, "0"),
            (PULL_PAGE_SIZE_ENV, "ten"),
        ] {
            match SyncConfig::from_lookup(lookup(&[(key, value)])) {
                Err(SyncError::Config { key: named, .. }) => assert_eq!(named, key),
                other => panic!("{key}={value}: unexpected result {other:?}"),
            }
        }
    }

    #[test]
    fn memory_engine_has_every_table() {
        let config = SyncConfig::from_lookup(lookup(&[(BACKEND_ENV, "memory")])).expect("config");
        let engine = config.open_engine().expect("engine");
        let names: Vec<&str> = engine.table_names().collect();
        assert_eq!(names, ["_changes", "_meta", "projects", "tags", "tasks"]);
    }
}
