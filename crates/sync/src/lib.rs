#![forbid(unsafe_code)]

pub mod changelog;
mod config;
mod error;
pub mod merge;
pub mod pull;
mod replica;
pub mod selectors;
mod server;
pub mod tracker;
pub mod wire;

pub use changelog::LogEntry;
pub use config::{BackendKind, SyncConfig};
pub use error::SyncError;
pub use merge::{MergeReport, apply_changeset};
pub use pull::{ChangeFeed, get_changes_after};
pub use replica::{LocalReplica, PendingPush};
pub use server::SyncServer;
pub use wire::{ChangeItem, PullRequest, PulledChange, PushRequest, PushResponse, TableChangeset};
