#![forbid(unsafe_code)]

use crate::clock::ClockToken;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clock-stamped description of one entity's lifecycle, exchanged with the server.
///
/// `changes` maps a field name to the clock of its latest write. `deleted_at`
/// only ever goes from `None` to `Some`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub id: String,
    pub table_name: String,
    pub created_at: ClockToken,
    pub updated_at: ClockToken,
    pub deleted_at: Option<ClockToken>,
    #[serde(rename = "clientId")]
    pub origin_client_id: String,
    #[serde(default)]
    pub changes: BTreeMap<String, ClockToken>,
}

impl ChangeRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn field_clock(&self, field: &str) -> Option<&ClockToken> {
        self.changes.get(field)
    }
}
