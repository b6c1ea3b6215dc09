#![forbid(unsafe_code)]

//! Planner read queries, written once and run against any executor.

use ps_core::model::{Entity, PROJECTS, Project, TASKS, Task, TaskStatus};
use ps_core::{Row, Value};
use ps_storage::query::{self, Outcome, Query, QueryExt, Step};
use ps_storage::{ScanBounds, StoreError};

fn decode<T: Entity>(rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.iter()
        .map(T::from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from)
}

/// Projects in board order.
pub fn projects() -> impl Query<Output = Vec<Project>> {
    query::scan(PROJECTS, "byOrder", ScanBounds::all()).map(|outcome| decode(outcome.into_rows()?))
}

/// Tasks of one project in board order.
pub fn tasks_in_project(project_id: &str) -> impl Query<Output = Vec<Task>> + use<> {
    query::scan(
        TASKS,
        "byProject",
        ScanBounds::prefix(vec![Value::from(project_id)]),
    )
    .map(|outcome| decode(outcome.into_rows()?))
}

pub fn tasks_with_status(status: TaskStatus) -> impl Query<Output = Vec<Task>> {
    query::scan(
        TASKS,
        "byStatus",
        ScanBounds::prefix(vec![Value::from(status.as_str())]),
    )
    .map(|outcome| decode(outcome.into_rows()?))
}

/// Every non-archived project with its tasks. Issues one scan for the projects,
/// then one delegated scan per project.
#[derive(Debug, Default)]
pub struct ProjectBoard {
    projects: Option<Vec<Project>>,
    next: usize,
    columns: Vec<(Project, Vec<Task>)>,
}

impl ProjectBoard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Query for ProjectBoard {
    type Output = Vec<(Project, Vec<Task>)>;

    fn resume(&mut self, input: Outcome) -> Result<Step<Self::Output>, StoreError> {
        match self.projects.as_ref() {
            None => {
                if input == Outcome::Unit {
                    return Ok(Step::Effect(query::Effect::Scan {
                        table: PROJECTS.to_string(),
                        index: "byOrder".to_string(),
                        bounds: ScanBounds::all(),
                    }));
                }
                let projects: Vec<Project> = decode(input.into_rows()?)?;
                self.projects = Some(projects.into_iter().filter(|p| !p.archived).collect());
            }
            Some(projects) => {
                let tasks = decode(input.into_rows()?)?;
                let project = projects[self.next - 1].clone();
                self.columns.push((project, tasks));
            }
        }

        let Some(project) = self.projects.as_ref().and_then(|p| p.get(self.next)) else {
            return Ok(Step::Done(std::mem::take(&mut self.columns)));
        };
        let nested = query::scan(
            TASKS,
            "byProject",
            ScanBounds::prefix(vec![Value::from(project.id.as_str())]),
        );
        self.next += 1;
        Ok(Step::Delegate(nested.boxed()))
    }
}
