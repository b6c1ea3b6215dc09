#![forbid(unsafe_code)]

//! Planner entity kinds and the tables that hold them.

use crate::row::Row;
use crate::schema::{IndexDef, SchemaError, TableDef};
use crate::value::Value;

pub const PROJECTS: &str = "projects";
pub const TASKS: &str = "tasks";
pub const TAGS: &str = "tags";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    #[error("row {id:?} is missing field {field:?}")]
    MissingField { id: String, field: &'static str },
    #[error("row {id:?} has an invalid value for {field:?}")]
    InvalidField { id: String, field: &'static str },
    #[error("unknown entity table: {0}")]
    UnknownTable(String),
}

pub trait Entity: Sized {
    const TABLE: &'static str;

    fn id(&self) -> &str;
    fn to_row(&self) -> Row;
    fn from_row(row: &Row) -> Result<Self, EntityError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub order_token: String,
    pub archived: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub order_token: String,
    pub due_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

fn required_text(row: &Row, field: &'static str) -> Result<String, EntityError> {
    match row.fields.get(field) {
        Some(Value::Text(value)) => Ok(value.clone()),
        Some(_) => Err(EntityError::InvalidField {
            id: row.id.clone(),
            field,
        }),
        None => Err(EntityError::MissingField {
            id: row.id.clone(),
            field,
        }),
    }
}

fn optional_text(row: &Row, field: &'static str) -> Result<Option<String>, EntityError> {
    match row.fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Text(value)) => Ok(Some(value.clone())),
        Some(_) => Err(EntityError::InvalidField {
            id: row.id.clone(),
            field,
        }),
    }
}

impl Entity for Project {
    const TABLE: &'static str = PROJECTS;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Row {
        Row::new(self.id.clone())
            .with("name", self.name.clone())
            .with("orderToken", self.order_token.clone())
            .with("archived", self.archived)
    }

    fn from_row(row: &Row) -> Result<Self, EntityError> {
        let archived = match row.fields.get("archived") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(value)) => *value,
            Some(_) => {
                return Err(EntityError::InvalidField {
                    id: row.id.clone(),
                    field: "archived",
                });
            }
        };
        Ok(Self {
            id: row.id.clone(),
            name: required_text(row, "name")?,
            order_token: required_text(row, "orderToken")?,
            archived,
        })
    }
}

impl Entity for Task {
    const TABLE: &'static str = TASKS;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Row {
        Row::new(self.id.clone())
            .with("projectId", self.project_id.clone())
            .with("title", self.title.clone())
            .with("status", self.status.as_str())
            .with("orderToken", self.order_token.clone())
            .with("dueDate", self.due_date.clone())
            .with("notes", self.notes.clone())
    }

    fn from_row(row: &Row) -> Result<Self, EntityError> {
        let status = required_text(row, "status")?;
        let status = TaskStatus::parse(&status).ok_or_else(|| EntityError::InvalidField {
            id: row.id.clone(),
            field: "status",
        })?;
        Ok(Self {
            id: row.id.clone(),
            project_id: required_text(row, "projectId")?,
            title: required_text(row, "title")?,
            status,
            order_token: required_text(row, "orderToken")?,
            due_date: optional_text(row, "dueDate")?,
            notes: optional_text(row, "notes")?,
        })
    }
}

impl Entity for Tag {
    const TABLE: &'static str = TAGS;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Row {
        Row::new(self.id.clone())
            .with("name", self.name.clone())
            .with("color", self.color.clone())
    }

    fn from_row(row: &Row) -> Result<Self, EntityError> {
        Ok(Self {
            id: row.id.clone(),
            name: required_text(row, "name")?,
            color: optional_text(row, "color")?,
        })
    }
}

/// A row of any planner table, tagged by kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityRow {
    Project(Project),
    Task(Task),
    Tag(Tag),
}

impl EntityRow {
    pub fn from_row(table: &str, row: &Row) -> Result<Self, EntityError> {
        match table {
            PROJECTS => Project::from_row(row).map(EntityRow::Project),
            TASKS => Task::from_row(row).map(EntityRow::Task),
            TAGS => Tag::from_row(row).map(EntityRow::Tag),
            other => Err(EntityError::UnknownTable(other.to_string())),
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            EntityRow::Project(_) => PROJECTS,
            EntityRow::Task(_) => TASKS,
            EntityRow::Tag(_) => TAGS,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityRow::Project(project) => project.id(),
            EntityRow::Task(task) => task.id(),
            EntityRow::Tag(tag) => tag.id(),
        }
    }

    pub fn to_row(&self) -> Row {
        match self {
            EntityRow::Project(project) => project.to_row(),
            EntityRow::Task(task) => task.to_row(),
            EntityRow::Tag(tag) => tag.to_row(),
        }
    }
}

pub fn planner_tables() -> Result<Vec<TableDef>, SchemaError> {
    Ok(vec![
        TableDef::new(PROJECTS, vec![IndexDef::new("byOrder", &["orderToken"])])?,
        TableDef::new(
            TASKS,
            vec![
                IndexDef::new("byProject", &["projectId", "orderToken"]),
                IndexDef::new("byStatus", &["status", "orderToken"]),
            ],
        )?,
        TableDef::new(TAGS, vec![IndexDef::new("byName", &["name"])])?,
    ])
}
