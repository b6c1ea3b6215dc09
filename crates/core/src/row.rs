#![forbid(unsafe_code)]

use crate::value::{Tuple, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type RowId = String;

pub const ID_COLUMN: &str = "id";

/// A keyed record. `id` is fixed for the lifetime of the row; every other field is free-form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(id: impl Into<RowId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        if column == ID_COLUMN {
            return;
        }
        self.fields.insert(column, value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.fields.remove(column)
    }

    /// Missing columns read as `Null`; `id` reads the row id.
    pub fn get(&self, column: &str) -> Value {
        if column == ID_COLUMN {
            return Value::Text(self.id.clone());
        }
        self.fields.get(column).cloned().unwrap_or(Value::Null)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(Value::as_str)
    }

    /// Extracts the index key for `columns`, in column order.
    pub fn key(&self, columns: &[String]) -> Tuple {
        columns.iter().map(|column| self.get(column)).collect()
    }
}
