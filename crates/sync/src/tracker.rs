#![forbid(unsafe_code)]

use ps_core::{ChangeRecord, ClockToken, HybridClock, Row, WallClock};
use std::collections::{BTreeMap, BTreeSet};

/// A committed state transition of one entity.
#[derive(Clone, Copy, Debug)]
pub enum Mutation<'a> {
    Create { next: &'a Row },
    Update { prior: &'a Row, next: &'a Row },
    Delete { prior: &'a Row },
}

impl<'a> Mutation<'a> {
    /// `None` when neither side exists.
    pub fn classify(prior: Option<&'a Row>, next: Option<&'a Row>) -> Option<Self> {
        match (prior, next) {
            (None, Some(next)) => Some(Mutation::Create { next }),
            (Some(prior), Some(next)) => Some(Mutation::Update { prior, next }),
            (Some(prior), None) => Some(Mutation::Delete { prior }),
            (None, None) => None,
        }
    }

    pub fn id(&self) -> &'a str {
        match *self {
            Mutation::Create { next } => &next.id,
            Mutation::Update { next, .. } => &next.id,
            Mutation::Delete { prior } => &prior.id,
        }
    }
}

/// Fields whose value differs between two versions of a row. A dropped field counts as set to null.
pub fn changed_fields(prior: &Row, next: &Row) -> BTreeSet<String> {
    prior
        .fields
        .keys()
        .chain(next.fields.keys())
        .filter(|field| prior.get(field) != next.get(field))
        .cloned()
        .collect()
}

/// Derives the change record for `mutation`, stamped with a fresh tick.
///
/// `previous` is the entity's latest record, whose per-field clocks carry forward so
/// they only ever increase. Returns `None` for an update that changes nothing.
pub fn derive_record<W: WallClock>(
    table: &str,
    mutation: Mutation<'_>,
    previous: Option<&ChangeRecord>,
    clock: &mut HybridClock<W>,
) -> Option<ChangeRecord> {
    let stamped: BTreeSet<String> = match mutation {
        Mutation::Create { next } => next.fields.keys().cloned().collect(),
        Mutation::Update { prior, next } => {
            let fields = changed_fields(prior, next);
            if fields.is_empty() {
                return None;
            }
            fields
        }
        Mutation::Delete { .. } => BTreeSet::new(),
    };

    let token = clock.tick();
    let mut changes: BTreeMap<String, ClockToken> = previous
        .map(|record| record.changes.clone())
        .unwrap_or_default();
    for field in stamped {
        changes.insert(field, token.clone());
    }

    let deleted_at = match mutation {
        Mutation::Delete { .. } => previous
            .and_then(|record| record.deleted_at.clone())
            .or_else(|| Some(token.clone())),
        _ => previous.and_then(|record| record.deleted_at.clone()),
    };

    Some(ChangeRecord {
        id: mutation.id().to_string(),
        table_name: table.to_string(),
        created_at: previous
            .map(|record| record.created_at.clone())
            .unwrap_or_else(|| token.clone()),
        updated_at: token,
        deleted_at,
        origin_client_id: clock.client_id().to_string(),
        changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_core::ManualClock;
    use ps_core::ids::ClientId;
    use std::sync::Arc;

    fn clock(millis: u64) -> (Arc<ManualClock>, HybridClock<Arc<ManualClock>>) {
        let wall = Arc::new(ManualClock::new(millis));
        let clock = HybridClock::new(ClientId::try_new("phone").expect("id"), Arc::clone(&wall));
        (wall, clock)
    }

    #[test]
    fn create_stamps_every_field() {
        let (_, mut clock) = clock(100);
        let row = Row::new("t1").with("title", "A").with("status", "todo");
        let record = derive_record("tasks", Mutation::Create { next: &row }, None, &mut clock)
            .expect("record");
        assert_eq!(record.created_at.as_str(), "100-0000-phone");
        assert_eq!(record.updated_at, record.created_at);
        assert_eq!(record.deleted_at, None);
        assert_eq!(record.origin_client_id, "phone");
        assert_eq!(
            record.changes.keys().collect::<Vec<_>>(),
            ["status", "title"]
        );
    }

    #[test]
    fn update_carries_clocks_forward_and_stamps_only_changed_fields() {
        let (wall, mut clock) = clock(100);
        let before = Row::new("t1").with("title", "A").with("status", "todo");
        let created = derive_record("tasks", Mutation::Create { next: &before }, None, &mut clock)
            .expect("create");

        wall.set(200);
        let after = before.clone().with("status", "done");
        let updated = derive_record(
            "tasks",
            Mutation::Update {
                prior: &before,
                next: &after,
            },
            Some(&created),
            &mut clock,
        )
        .expect("update");
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.field_clock("title"), created.field_clock("title"));
        assert_eq!(
            updated.field_clock("status").map(ClockToken::as_str),
            Some("200-0000-phone")
        );
    }

    #[test]
    fn no_op_update_produces_no_record() {
        let (_, mut clock) = clock(100);
        let row = Row::new("t1").with("title", "A");
        let mutation = Mutation::classify(Some(&row), Some(&row)).expect("mutation");
        assert!(derive_record("tasks", mutation, None, &mut clock).is_none());
    }

    #[test]
    fn dropped_field_is_a_change() {
        let before = Row::new("t1").with("title", "A").with("notes", "x");
        let after = Row::new("t1").with("title", "A");
        assert_eq!(
            changed_fields(&before, &after).into_iter().collect::<Vec<_>>(),
            ["notes"]
        );
    }

    #[test]
    fn delete_sets_a_tombstone_that_later_records_keep() {
        let (wall, mut clock) = clock(100);
        let row = Row::new("t1").with("title", "A");
        let created = derive_record("tasks", Mutation::Create { next: &row }, None, &mut clock)
            .expect("create");
        wall.set(150);
        let deleted = derive_record(
            "tasks",
            Mutation::Delete { prior: &row },
            Some(&created),
            &mut clock,
        )
        .expect("delete");
        assert_eq!(
            deleted.deleted_at.as_ref().map(ClockToken::as_str),
            Some("150-0000-phone")
        );
        assert_eq!(deleted.changes, created.changes);
        assert!(Mutation::classify(None, None).is_none());
    }
}
