use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalRefError {
    #[error("Entity has been deleted: {path}")]
    Deleted { path: String },

    #[error("Emission depth {depth} exceeds limit of {limit}")]
    Reentrancy { depth: usize, limit: usize },

    #[error("Document data must serialize to a JSON object")]
    NotAnObject,

    #[error("{path} holds a {found}, not a {expected}")]
    KindMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, LocalRefError>;
