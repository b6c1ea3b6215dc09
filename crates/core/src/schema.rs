#![forbid(unsafe_code)]

use crate::ids::is_identifier;
use crate::row::ID_COLUMN;

/// Name of the index every table carries implicitly, keyed on `id` alone.
pub const IDS_INDEX: &str = "ids";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|column| column.to_string()).collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub indexes: Vec<IndexDef>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("duplicate index {index:?} on table {table:?}")]
    DuplicateIndex { table: String, index: String },
    #[error("index {index:?} on table {table:?} has no columns")]
    EmptyIndex { table: String, index: String },
}

impl TableDef {
    /// Builds a table definition; the `ids` index is always present and always first.
    pub fn new(name: impl Into<String>, indexes: Vec<IndexDef>) -> Result<Self, SchemaError> {
        let name = name.into();
        if !is_identifier(&name) {
            return Err(SchemaError::InvalidIdentifier(name));
        }

        let mut all = vec![IndexDef::new(IDS_INDEX, &[ID_COLUMN])];
        for index in indexes {
            if !is_identifier(&index.name) {
                return Err(SchemaError::InvalidIdentifier(index.name));
            }
            if index.columns.is_empty() {
                return Err(SchemaError::EmptyIndex {
                    table: name,
                    index: index.name,
                });
            }
            if let Some(column) = index.columns.iter().find(|c| !is_identifier(c)) {
                return Err(SchemaError::InvalidIdentifier(column.clone()));
            }
            if all.iter().any(|existing| existing.name == index.name) {
                return Err(SchemaError::DuplicateIndex {
                    table: name,
                    index: index.name,
                });
            }
            all.push(index);
        }

        Ok(Self { name, indexes: all })
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|index| index.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_index_is_implicit() {
        let table = TableDef::new(
            "tasks",
            vec![IndexDef::new("byProject", &["projectId", "orderToken"])],
        )
        .expect("table");
        assert_eq!(table.indexes[0], IndexDef::new("ids", &["id"]));
        assert_eq!(table.index("byProject").map(IndexDef::arity), Some(2));
        assert!(table.index("byNothing").is_none());
    }

    #[test]
    fn rejects_bad_definitions() {
        assert_eq!(
            TableDef::new("bad name", Vec::new()).unwrap_err(),
            SchemaError::InvalidIdentifier("bad name".to_string())
        );
        assert_eq!(
            TableDef::new("tasks", vec![IndexDef::new("ids", &["title"])]).unwrap_err(),
            SchemaError::DuplicateIndex {
                table: "tasks".to_string(),
                index: "ids".to_string()
            }
        );
        assert_eq!(
            TableDef::new("tasks", vec![IndexDef::new("empty", &[])]).unwrap_err(),
            SchemaError::EmptyIndex {
                table: "tasks".to_string(),
                index: "empty".to_string()
            }
        );
        assert!(matches!(
            TableDef::new("tasks", vec![IndexDef::new("x", &["a'b"])]),
            Err(SchemaError::InvalidIdentifier(_))
        ));
    }
}
