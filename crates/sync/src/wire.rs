#![forbid(unsafe_code)]

//! JSON shapes exchanged between clients and the sync server.

use ps_core::{ChangeRecord, Row};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Clock of the newest server record the client has applied; empty for a first pull.
    #[serde(default)]
    pub last_server_updated_at: String,
}

/// One pulled record. `row` is the server's current row, absent for tombstones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PulledChange {
    #[serde(flatten)]
    pub change: ChangeRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<Row>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub row: Row,
    pub change: ChangeRecord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChangeset {
    pub table_name: String,
    pub data: Vec<ChangeItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub changeset: Vec<TableChangeset>,
}

impl PushRequest {
    pub fn is_empty(&self) -> bool {
        self.changeset.iter().all(|table| table.data.is_empty())
    }
}

/// Bare acknowledgement; serializes as `{}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {}
