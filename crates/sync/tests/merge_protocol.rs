#![forbid(unsafe_code)]

use ps_core::ids::ClientId;
use ps_core::model::planner_tables;
use ps_core::{ChangeRecord, ClockToken, HybridClock, ManualClock, Row};
use ps_storage::{Engine, ScanBounds};
use ps_sync::changelog::{self, CHANGES_TABLE};
use ps_sync::{ChangeItem, PullRequest, PushRequest, SyncError, SyncServer, TableChangeset};
use std::collections::BTreeMap;
use std::sync::Arc;

const WALL: u64 = 1_700_000_001_000;

fn server() -> SyncServer<ps_storage::AnyDriver, Arc<ManualClock>> {
    let mut engine = Engine::memory();
    engine
        .register(planner_tables().expect("planner tables"))
        .expect("register");
    let clock = HybridClock::new(
        ClientId::try_new("server").expect("client id"),
        Arc::new(ManualClock::new(WALL)),
    );
    SyncServer::new(engine, clock).expect("server")
}

fn token(value: &str) -> ClockToken {
    ClockToken::parse(value).expect("token")
}

fn item(row: Row, updated_at: &str, fields: &[&str], deleted: bool) -> ChangeItem {
    let updated = token(updated_at);
    let changes: BTreeMap<String, ClockToken> = fields
        .iter()
        .map(|field| (field.to_string(), updated.clone()))
        .collect();
    ChangeItem {
        change: ChangeRecord {
            id: row.id.clone(),
            table_name: "tasks".to_string(),
            created_at: updated.clone(),
            updated_at: updated.clone(),
            deleted_at: deleted.then(|| updated.clone()),
            origin_client_id: updated.client_id().to_string(),
            changes,
        },
        row,
    }
}

fn push(items: Vec<ChangeItem>) -> PushRequest {
    PushRequest {
        changeset: vec![TableChangeset {
            table_name: "tasks".to_string(),
            data: items,
        }],
    }
}

fn snapshot<W: ps_core::WallClock>(server: &SyncServer<ps_storage::AnyDriver, W>) -> (Vec<Row>, Vec<Row>) {
    let engine = server.engine();
    (
        engine.scan("tasks", "ids", &ScanBounds::all()).expect("tasks"),
        engine
            .scan(CHANGES_TABLE, "ids", &ScanBounds::all())
            .expect("changes"),
    )
}

fn seed_title_a(server: &mut SyncServer<ps_storage::AnyDriver, Arc<ManualClock>>) {
    server
        .merge(&push(vec![item(
            Row::new("t1").with("title", "A"),
            "1700000000100-0000-a",
            &["title"],
            false,
        )]))
        .expect("seed");
}

#[test]
fn newer_field_clock_wins() {
    let mut server = server();
    seed_title_a(&mut server);

    let report = server
        .merge(&push(vec![item(
            Row::new("t1").with("title", "B"),
            "1700000000200-0000-b",
            &["title"],
            false,
        )]))
        .expect("merge");
    assert_eq!(report.updated, 1);

    let row = server.engine().get("tasks", "t1").expect("get").expect("row");
    assert_eq!(row.text("title"), Some("B"));
    let latest = changelog::latest_for(server.engine(), "tasks", "t1")
        .expect("latest")
        .expect("record");
    assert_eq!(
        latest.record.field_clock("title").map(ClockToken::as_str),
        Some("1700000000200-0000-b")
    );
}

#[test]
fn older_field_clock_loses() {
    let mut server = server();
    seed_title_a(&mut server);
    let before = snapshot(&server);

    let report = server
        .merge(&push(vec![item(
            Row::new("t1").with("title", "B"),
            "1700000000050-0000-b",
            &["title"],
            false,
        )]))
        .expect("merge");
    assert_eq!(report.unchanged, 1);
    assert!(report.records.is_empty());

    let row = server.engine().get("tasks", "t1").expect("get").expect("row");
    assert_eq!(row.text("title"), Some("A"));
    assert_eq!(snapshot(&server), before);
}

#[test]
fn fields_merge_independently() {
    let mut server = server();
    server
        .merge(&push(vec![item(
            Row::new("t1").with("title", "A").with("status", "todo"),
            "1700000000100-0000-a",
            &["title", "status"],
            false,
        )]))
        .expect("seed");

    let mut newer_status = item(
        Row::new("t1").with("title", "stale").with("status", "done"),
        "1700000000300-0000-b",
        &["status"],
        false,
    );
    newer_status
        .change
        .changes
        .insert("title".to_string(), token("1700000000050-0000-b"));
    server.merge(&push(vec![newer_status])).expect("merge");

    let row = server.engine().get("tasks", "t1").expect("get").expect("row");
    assert_eq!(row.text("title"), Some("A"));
    assert_eq!(row.text("status"), Some("done"));
}

#[test]
fn replaying_a_batch_changes_nothing() {
    let mut server = server();
    let batch = push(vec![
        item(
            Row::new("t1").with("title", "A"),
            "1700000000100-0000-a",
            &["title"],
            false,
        ),
        item(Row::new("t2"), "1700000000110-0000-a", &[], true),
    ]);

    let first = server.merge(&batch).expect("first");
    assert_eq!((first.inserted, first.deleted), (1, 1));
    let after_first = snapshot(&server);

    let second = server.merge(&batch).expect("second");
    assert_eq!(second.unchanged, 2);
    assert!(second.records.is_empty());
    assert_eq!(snapshot(&server), after_first);
}

#[test]
fn deletion_is_sticky() {
    let mut server = server();
    seed_title_a(&mut server);
    server
        .merge(&push(vec![item(
            Row::new("t1"),
            "1700000000200-0000-a",
            &[],
            true,
        )]))
        .expect("delete");
    assert_eq!(server.engine().get("tasks", "t1").expect("get"), None);

    let report = server
        .merge(&push(vec![item(
            Row::new("t1").with("title", "revived"),
            "1700000000300-0000-b",
            &["title"],
            false,
        )]))
        .expect("late edit");
    assert_eq!(report.deleted, 1);
    assert_eq!(server.engine().get("tasks", "t1").expect("get"), None);

    let latest = changelog::latest_for(server.engine(), "tasks", "t1")
        .expect("latest")
        .expect("record");
    assert!(latest.record.is_deleted());
}

#[test]
fn unknown_table_aborts_the_whole_batch() {
    let mut server = server();
    let mut request = push(vec![item(
        Row::new("t1").with("title", "A"),
        "1700000000100-0000-a",
        &["title"],
        false,
    )]);
    let mut widget = item(Row::new("w1"), "1700000000100-0000-a", &["size"], false);
    widget.change.table_name = "widgets".to_string();
    request.changeset.push(TableChangeset {
        table_name: "widgets".to_string(),
        data: vec![widget],
    });

    match server.merge(&request) {
        Err(SyncError::UnknownTable(name)) => assert_eq!(name, "widgets"),
        other => panic!("expected UnknownTable, got {other:?}"),
    }
    assert_eq!(snapshot(&server), (Vec::new(), Vec::new()));
}

#[test]
fn internal_tables_are_not_pushable() {
    let mut server = server();
    let request = PushRequest {
        changeset: vec![TableChangeset {
            table_name: CHANGES_TABLE.to_string(),
            data: Vec::new(),
        }],
    };
    match server.merge(&request) {
        Err(SyncError::UnknownTable(name)) => assert_eq!(name, CHANGES_TABLE),
        other => panic!("expected UnknownTable, got {other:?}"),
    }
}

#[test]
fn pull_is_strictly_after_and_ascending() {
    let mut server = server();
    server
        .merge(&push(vec![
            item(Row::new("t1").with("title", "A"), "1700000000100-0000-a", &["title"], false),
            item(Row::new("t2").with("title", "B"), "1700000000100-0001-a", &["title"], false),
            item(Row::new("t3"), "1700000000100-0002-a", &[], true),
        ]))
        .expect("merge");

    let all = server.pull(&PullRequest::default()).expect("pull");
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|pair| pair[0].change.updated_at < pair[1].change.updated_at));
    assert_eq!(all[0].row.as_ref().and_then(|row| row.text("title")), Some("A"));
    assert_eq!(all[2].row, None);

    let since = all[0].change.updated_at.as_str().to_string();
    let rest = server
        .pull(&PullRequest {
            last_server_updated_at: since.clone(),
        })
        .expect("pull");
    let ids: Vec<&str> = rest.iter().map(|p| p.change.id.as_str()).collect();
    assert_eq!(ids, ["t2", "t3"]);
    assert!(rest.iter().all(|p| p.change.updated_at.as_str() > since.as_str()));

    let newest = all[2].change.updated_at.as_str().to_string();
    let none = server
        .pull(&PullRequest {
            last_server_updated_at: newest,
        })
        .expect("pull");
    assert!(none.is_empty());
}

#[test]
fn small_pages_return_every_record() {
    let mut server = server().with_page_size(2);
    let items = (0..5)
        .map(|n| {
            item(
                Row::new(format!("t{n}")).with("title", "x"),
                &format!("1700000000100-000{n}-a"),
                &["title"],
                false,
            )
        })
        .collect();
    server.merge(&push(items)).expect("merge");
    assert_eq!(server.pull(&PullRequest::default()).expect("pull").len(), 5);
}

#[test]
fn json_handlers_speak_the_wire_format() {
    let mut server = server();
    let body = serde_json::json!({
        "changeset": [{
            "tableName": "tasks",
            "data": [{
                "row": { "id": "t1", "title": "A" },
                "change": {
                    "id": "t1",
                    "tableName": "tasks",
                    "createdAt": "1700000000100-0000-phone",
                    "updatedAt": "1700000000100-0000-phone",
                    "deletedAt": null,
                    "clientId": "phone",
                    "changes": { "title": "1700000000100-0000-phone" }
                }
            }]
        }]
    });
    let answer = server
        .handle_push_json(&body.to_string())
        .expect("push");
    assert_eq!(answer, "{}");

    let pulled: serde_json::Value = serde_json::from_str(
        &server
            .handle_pull_json(r#"{"lastServerUpdatedAt":""}"#)
            .expect("pull"),
    )
    .expect("json");
    let records = pulled.as_array().expect("array");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], "t1");
    assert_eq!(records[0]["clientId"], "server");
    assert_eq!(records[0]["row"]["title"], "A");
    assert_eq!(records[0]["changes"]["title"], "1700000000100-0000-phone");

    match server.handle_push_json("{\"changeset\": 7}") {
        Err(SyncError::Json(_)) => {}
        other => panic!("expected a json error, got {other:?}"),
    }
}

#[test]
fn sqlite_server_keeps_its_log_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ps_sync::SyncConfig {
        storage_dir: dir.path().to_path_buf(),
        backend: ps_sync::BackendKind::Sqlite,
        client_id: ClientId::try_new("server").expect("client id"),
        pull_page_size: 2,
    };
    {
        let mut server = config.open_server().expect("open");
        server
            .merge(&push(vec![
                item(Row::new("t1").with("title", "A"), "1700000000100-0000-a", &["title"], false),
                item(Row::new("t2").with("title", "B"), "1700000000100-0001-a", &["title"], false),
                item(Row::new("t3").with("title", "C"), "1700000000100-0002-a", &["title"], false),
            ]))
            .expect("merge");
    }

    let server = config.open_server().expect("reopen");
    let pulled = server.pull(&PullRequest::default()).expect("pull");
    let titles: Vec<Option<&str>> = pulled
        .iter()
        .map(|p| p.row.as_ref().and_then(|row| row.text("title")))
        .collect();
    assert_eq!(titles, [Some("A"), Some("B"), Some("C")]);
}

#[test]
fn sqlite_server_reopened_with_an_earlier_wall_clock_issues_later_tokens() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ps_sync::SyncConfig {
        storage_dir: dir.path().to_path_buf(),
        backend: ps_sync::BackendKind::Sqlite,
        client_id: ClientId::try_new("server").expect("client id"),
        pull_page_size: 10,
    };
    let open = |millis: u64| {
        let clock = HybridClock::new(config.client_id.clone(), Arc::new(ManualClock::new(millis)));
        SyncServer::new(config.open_engine().expect("engine"), clock).expect("server")
    };
    {
        let mut server = open(9_000);
        server
            .merge(&push(vec![
                item(Row::new("t1").with("title", "A"), "100-0000-a", &["title"], false),
                item(Row::new("t2").with("title", "B"), "100-0001-a", &["title"], false),
            ]))
            .expect("merge");
    }

    let mut server = open(5_001);
    let logged = changelog::newest(server.engine())
        .expect("newest")
        .expect("logged entry")
        .record
        .updated_at;
    server
        .merge(&push(vec![item(
            Row::new("t3").with("title", "C"),
            "200-0000-b",
            &["title"],
            false,
        )]))
        .expect("merge after reopen");

    let pulled = server
        .pull(&PullRequest {
            last_server_updated_at: logged.as_str().to_string(),
        })
        .expect("pull");
    assert_eq!(pulled.len(), 1);
    assert_eq!(pulled[0].change.id, "t3");
    assert!(pulled[0].change.updated_at > logged);
}
