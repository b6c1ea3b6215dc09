#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("schema: {0}")]
    Schema(#[from] ps_core::SchemaError),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown index {index} on table {table}")]
    UnknownIndex { table: String, index: String },
    #[error("duplicate id {id} in table {table}")]
    DuplicateId { table: String, id: String },
    #[error("entity: {0}")]
    Entity(#[from] ps_core::model::EntityError),
    #[error("backend: {0}")]
    Backend(String),
}
