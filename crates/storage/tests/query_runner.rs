#![forbid(unsafe_code)]

use ps_core::{IndexDef, Row, TableDef, Value};
use ps_storage::query::{
    self, Blocking, Effect, Executor, Immediate, Outcome, Query, QueryExt, Resolution, Run, Step,
};
use ps_storage::{Engine, MemoryDriver, ScanBounds, StorageEngine, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn seeded_engine() -> StorageEngine<MemoryDriver> {
    let mut engine = StorageEngine::new(MemoryDriver::new());
    engine
        .register(vec![
            TableDef::new("projects", vec![IndexDef::new("byOrder", &["orderToken"])])
                .expect("projects"),
            TableDef::new(
                "tasks",
                vec![IndexDef::new("byProject", &["projectId", "orderToken"])],
            )
            .expect("tasks"),
        ])
        .expect("register");
    engine
        .insert(
            "projects",
            vec![
                Row::new("p2").with("orderToken", "b"),
                Row::new("p1").with("orderToken", "a"),
            ],
        )
        .expect("projects");
    engine
        .insert(
            "tasks",
            vec![
                Row::new("t1").with("projectId", "p1").with("orderToken", "b"),
                Row::new("t2").with("projectId", "p2").with("orderToken", "a"),
                Row::new("t3").with("projectId", "p1").with("orderToken", "a"),
            ],
        )
        .expect("tasks");
    engine
}

/// Lists projects, then delegates one nested scan per project for its tasks.
struct Board {
    projects: Option<Vec<Row>>,
    next: usize,
    out: Vec<(String, Vec<String>)>,
}

impl Board {
    fn new() -> Self {
        Self {
            projects: None,
            next: 0,
            out: Vec::new(),
        }
    }
}

impl Query for Board {
    type Output = Vec<(String, Vec<String>)>;

    fn resume(&mut self, input: Outcome) -> Result<Step<Self::Output>, StoreError> {
        match self.projects.as_ref() {
            None => {
                if matches!(input, Outcome::Unit) {
                    return Ok(Step::Effect(Effect::Scan {
                        table: "projects".to_string(),
                        index: "byOrder".to_string(),
                        bounds: ScanBounds::all(),
                    }));
                }
                self.projects = Some(input.into_rows()?);
            }
            Some(projects) => {
                let tasks = input.into_rows()?;
                let project = &projects[self.next - 1];
                self.out.push((
                    project.id.clone(),
                    tasks.into_iter().map(|row| row.id).collect(),
                ));
            }
        }

        let projects = self.projects.as_ref().map_or(&[][..], Vec::as_slice);
        let Some(project) = projects.get(self.next) else {
            return Ok(Step::Done(std::mem::take(&mut self.out)));
        };
        self.next += 1;
        Ok(Step::Delegate(
            query::scan(
                "tasks",
                "byProject",
                ScanBounds::prefix(vec![Value::from(project.id.as_str())]),
            )
            .boxed(),
        ))
    }
}

fn expected_board() -> Vec<(String, Vec<String>)> {
    vec![
        ("p1".to_string(), vec!["t3".to_string(), "t1".to_string()]),
        ("p2".to_string(), vec!["t2".to_string()]),
    ]
}

/// Wraps another executor and counts effects.
struct Counting<E> {
    inner: E,
    calls: Arc<AtomicUsize>,
}

impl<E: Executor> Executor for Counting<E> {
    fn execute(&mut self, effect: Effect) -> Resolution {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(effect)
    }
}

#[test]
fn immediate_backend_completes_without_suspending() {
    let mut engine = seeded_engine();
    let mut executor = Immediate::new(&mut engine);
    let run = query::run(Board::new(), &mut executor);
    assert!(run.is_complete());
    match run {
        Run::Complete(result) => assert_eq!(result.expect("board"), expected_board()),
        Run::Suspended(_) => panic!("immediate executor suspended"),
    }
}

#[test]
fn immediate_steps_do_not_reach_the_backend() {
    let mut engine = seeded_engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut executor = Counting {
        inner: Immediate::new(&mut engine),
        calls: Arc::clone(&calls),
    };

    let value = query::run_sync(query::pure(41_u32).map(|n| Ok(n + 1)), &mut executor)
        .expect("pure");
    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let board = query::run_sync(Board::new(), &mut executor).expect("board");
    assert_eq!(board, expected_board());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn then_chains_effects_in_order() {
    let mut engine = seeded_engine();
    let mut executor = Immediate::new(&mut engine);
    let chained = query::insert(
        "tasks",
        vec![Row::new("t4").with("projectId", "p2").with("orderToken", "b")],
    )
    .then(|inserted| {
        assert_eq!(inserted, Outcome::Affected(1));
        Ok(query::scan(
            "tasks",
            "byProject",
            ScanBounds::prefix(vec![Value::from("p2")]),
        ))
    })
    .map(|outcome| {
        Ok(outcome
            .into_rows()?
            .into_iter()
            .map(|row| row.id)
            .collect::<Vec<_>>())
    });
    let ids = query::run_sync(chained, &mut executor).expect("chain");
    assert_eq!(ids, ["t2", "t4"]);
}

#[test]
fn failing_step_aborts_the_run() {
    let mut engine = seeded_engine();
    let mut executor = Immediate::new(&mut engine);
    let reached_second = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&reached_second);
    let failing = query::scan("widgets", "ids", ScanBounds::all()).then(move |_| {
        flag.fetch_add(1, Ordering::SeqCst);
        Ok(query::pure(Outcome::Unit))
    });
    let err = query::run_sync(failing, &mut executor).expect_err("unknown table");
    assert!(matches!(err, StoreError::UnknownTable(ref table) if table == "widgets"));
    assert_eq!(reached_second.load(Ordering::SeqCst), 0);
}

#[test]
fn batch_effect_is_atomic() {
    let mut engine = seeded_engine();
    {
        let mut executor = Immediate::new(&mut engine);
        let batch = query::effect(Effect::Batch(vec![
            Effect::Delete {
                table: "tasks".to_string(),
                ids: vec!["t1".to_string()],
            },
            Effect::Insert {
                table: "tasks".to_string(),
                rows: vec![Row::new("t2")],
            },
        ]));
        let err = query::run_sync(batch, &mut executor).expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateId { .. }));
    }
    assert!(engine.get("tasks", "t1").expect("get").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_backend_suspends_and_resolves_the_same_result() {
    let mut executor = Blocking::new(seeded_engine());
    let run = query::run(Board::new(), &mut executor);
    assert!(!run.is_complete());
    assert_eq!(run.await.expect("board"), expected_board());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_behind_blocking_executor_matches_memory() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut engine = Engine::sqlite(dir.path()).expect("open");
    engine
        .register(vec![
            TableDef::new("projects", vec![IndexDef::new("byOrder", &["orderToken"])])
                .expect("projects"),
            TableDef::new(
                "tasks",
                vec![IndexDef::new("byProject", &["projectId", "orderToken"])],
            )
            .expect("tasks"),
        ])
        .expect("register");
    let mut executor = Blocking::new(engine);
    let seed = query::effect(Effect::Batch(vec![
        Effect::Insert {
            table: "projects".to_string(),
            rows: vec![
                Row::new("p2").with("orderToken", "b"),
                Row::new("p1").with("orderToken", "a"),
            ],
        },
        Effect::Insert {
            table: "tasks".to_string(),
            rows: vec![
                Row::new("t1").with("projectId", "p1").with("orderToken", "b"),
                Row::new("t2").with("projectId", "p2").with("orderToken", "a"),
                Row::new("t3").with("projectId", "p1").with("orderToken", "a"),
            ],
        },
    ]));
    let seeded = query::run(seed, &mut executor).await.expect("seed");
    assert_eq!(
        seeded,
        Outcome::Batch(vec![Outcome::Affected(2), Outcome::Affected(3)])
    );

    let board = query::run(Board::new(), &mut executor).await.expect("board");
    assert_eq!(board, expected_board());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_failure_propagates_to_the_awaiting_caller() {
    let mut executor = Blocking::new(seeded_engine());
    let err = query::run(query::get("widgets", "w1"), &mut executor)
        .await
        .expect_err("unknown table");
    assert!(matches!(err, StoreError::UnknownTable(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn independent_runs_share_one_backend() {
    let executor = Blocking::new(seeded_engine());
    let mut first = executor.clone();
    let mut second = executor.clone();
    let (a, b) = tokio::join!(
        async move { query::run(Board::new(), &mut first).await },
        async move { query::run(Board::new(), &mut second).await },
    );
    assert_eq!(a.expect("first"), expected_board());
    assert_eq!(b.expect("second"), expected_board());
}
