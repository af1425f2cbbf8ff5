use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task '{task_id}' not found in catalog")]
    NotFound { task_id: String },

    #[error("migration {version} already applied")]
    MigrationConflict { version: String },

    #[error("migration {version} failed: {source}")]
    Migration {
        version: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid schema version '{0}'")]
    InvalidVersion(String),

    #[error("view '{name}' unavailable after refresh")]
    ViewUnavailable { name: String },

    #[error("unknown view '{0}'")]
    UnknownView(String),

    #[error("no task is active in this session")]
    NoActiveTask,

    #[error("storage transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
